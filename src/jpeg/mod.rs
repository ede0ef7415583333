//! JPEG compression support for the Tight JPEG codec.
//!
//! TurboJPEG support is optional and enabled with the `turbojpeg` feature;
//! without it the Tight JPEG codec reports itself unsupported and the
//! selector falls back to lossless codecs.

#[cfg(feature = "turbojpeg")]
pub mod turbojpeg;

#[cfg(feature = "turbojpeg")]
pub use turbojpeg::TurboJpegCompressor;
