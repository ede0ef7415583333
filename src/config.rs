//! Configuration snapshot for the pipeline.

/// Maximum permitted length of an incoming clipboard update, in bytes.
pub const DEFAULT_MAX_CUT_TEXT: usize = 256 * 1024;

/// Tunables shared by the encoding pipeline and the message reader.
///
/// Passed in at construction; there is no process-global parameter
/// registry.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on inbound clipboard payloads. Larger payloads are
    /// logged and drained from the stream without being delivered.
    pub max_cut_text: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cut_text: DEFAULT_MAX_CUT_TEXT,
        }
    }
}
