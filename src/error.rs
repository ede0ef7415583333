//! Error types for the encoding pipeline.

use std::io;
use thiserror::Error;

/// Result type for encoding pipeline operations.
pub type Result<T> = std::result::Result<T, EncodeError>;

/// Errors that can occur while producing framebuffer updates or parsing
/// the peer messages that share this pipeline's logging channel.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer's capabilities do not allow the requested operation.
    #[error("Peer does not support {0}")]
    PeerIncapable(&'static str),

    /// Malformed inbound protocol data. The connection should terminate.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Inbound payload exceeded a configured bound.
    #[error("Oversized payload: {got} bytes (limit {limit})")]
    OversizedPayload {
        /// Actual payload length.
        got: usize,
        /// Configured limit that was exceeded.
        limit: usize,
    },

    /// A codec aborted while encoding a rectangle. The current update is
    /// aborted; later updates may proceed.
    #[error("Codec failure: {0}")]
    CodecFailure(String),
}
