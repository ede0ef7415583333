//! Peer capability snapshot.

use crate::protocol::PixelFormat;

/// JPEG chrominance subsampling requested by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subsampling {
    /// No preference expressed.
    #[default]
    Undefined,
    /// 4:4:4, no subsampling.
    None,
    /// 4:2:2, 2x horizontal subsampling.
    TwoX,
    /// 4:2:0, 2x2 subsampling.
    FourX,
    /// 4:1:1, 4x horizontal subsampling.
    EightX,
    /// 16x subsampling.
    SixteenX,
    /// Discard chrominance entirely; forces grayscale JPEG output.
    Gray,
}

/// A snapshot of everything the peer negotiated that affects encoding.
///
/// Captured once per connection state change and shared immutably with
/// worker threads for the duration of an update.
#[derive(Debug, Clone)]
pub struct PeerCaps {
    /// The encoding the peer listed first in SetEncodings.
    pub preferred_encoding: i32,
    /// All encodings the peer advertised.
    pub encodings: Vec<i32>,
    /// Pixel format the peer wants update payloads in.
    pub pixel_format: PixelFormat,
    /// JPEG quality level; -1 when unspecified, else 0..=9.
    pub quality_level: i8,
    /// Fine-grained JPEG quality; -1 when unspecified, else 0..=100.
    pub fine_quality_level: i8,
    /// JPEG subsampling mode.
    pub subsampling: Subsampling,
    /// Compression level; -1 when unspecified, else 0..=9.
    pub compress_level: i8,
    /// Peer understands the extended clipboard extension.
    pub supports_extended_clipboard: bool,
    /// Peer understands fence messages.
    pub supports_fence: bool,
    /// Peer accepts the LastRect sentinel in update headers.
    pub supports_last_rect: bool,
    /// Peer understands continuous updates.
    pub supports_continuous_updates: bool,
}

impl PeerCaps {
    /// Whether the peer advertised support for `encoding`.
    #[must_use]
    pub fn supports_encoding(&self, encoding: i32) -> bool {
        self.encodings.contains(&encoding)
    }
}

impl Default for PeerCaps {
    fn default() -> Self {
        Self {
            preferred_encoding: crate::protocol::ENCODING_RAW,
            encodings: vec![crate::protocol::ENCODING_RAW],
            pixel_format: PixelFormat::rgb888(),
            quality_level: -1,
            fine_quality_level: -1,
            subsampling: Subsampling::Undefined,
            compress_level: -1,
            supports_extended_clipboard: false,
            supports_fence: false,
            supports_last_rect: false,
            supports_continuous_updates: false,
        }
    }
}
