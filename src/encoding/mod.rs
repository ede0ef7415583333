// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Framebuffer encoding implementations.
//!
//! Each encoding is a plugin implementing the [`Encoder`] trait: it
//! declares its wire id, ordering and pixel-format requirements, and
//! serializes rectangle payloads into a byte buffer. The pipeline selects
//! one codec per content class and calls it from worker threads under the
//! queue ownership rules described in the worker module.

use bytes::BytesMut;

use crate::caps::{PeerCaps, Subsampling};
use crate::error::Result;
use crate::palette::Palette;
use crate::protocol::PixelFormat;
use crate::region::Rect;

pub mod common;
pub mod hextile;
pub mod raw;
pub mod rre;
pub mod tight;
pub mod tightjpeg;
pub mod zrle;

pub use hextile::HextileEncoder;
pub use raw::RawEncoder;
pub use rre::RreEncoder;
pub use tight::TightEncoder;
pub use tightjpeg::TightJpegEncoder;
pub use zrle::ZrleEncoder;

/// Identifies one of the fixed codec plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// Uncompressed pixel dump.
    Raw,
    /// Rise-and-run-length encoding.
    Rre,
    /// 16x16 tile encoding.
    Hextile,
    /// Tight basic compression (zlib streams).
    Tight,
    /// Tight JPEG compression.
    TightJpeg,
    /// Zlib run-length encoding.
    Zrle,
}

impl CodecId {
    /// All codecs, in stats/queue index order.
    pub const ALL: [CodecId; 6] = [
        CodecId::Raw,
        CodecId::Rre,
        CodecId::Hextile,
        CodecId::Tight,
        CodecId::TightJpeg,
        CodecId::Zrle,
    ];

    /// Dense index for per-codec tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            CodecId::Raw => 0,
            CodecId::Rre => 1,
            CodecId::Hextile => 2,
            CodecId::Tight => 3,
            CodecId::TightJpeg => 4,
            CodecId::Zrle => 5,
        }
    }

    /// Human-readable name used in the stats summary.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Raw => "Raw",
            CodecId::Rre => "RRE",
            CodecId::Hextile => "Hextile",
            CodecId::Tight => "Tight",
            CodecId::TightJpeg => "Tight (JPEG)",
            CodecId::Zrle => "ZRLE",
        }
    }
}

/// Classification of a rectangle's pixel content, produced by the
/// analyzer and used to pick a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    /// Every pixel is the same colour.
    Solid,
    /// Two colours, low run-length redundancy.
    Bitmap,
    /// Two colours, RLE-friendly.
    BitmapRle,
    /// Small palette, low run-length redundancy.
    Indexed,
    /// Small palette, RLE-friendly.
    IndexedRle,
    /// Too many colours for a palette.
    FullColour,
}

impl ContentClass {
    /// All classes, in stats index order.
    pub const ALL: [ContentClass; 6] = [
        ContentClass::Solid,
        ContentClass::Bitmap,
        ContentClass::BitmapRle,
        ContentClass::Indexed,
        ContentClass::IndexedRle,
        ContentClass::FullColour,
    ];

    /// Dense index for per-class tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ContentClass::Solid => 0,
            ContentClass::Bitmap => 1,
            ContentClass::BitmapRle => 2,
            ContentClass::Indexed => 3,
            ContentClass::IndexedRle => 4,
            ContentClass::FullColour => 5,
        }
    }

    /// Human-readable name used in the stats summary.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ContentClass::Solid => "Solid",
            ContentClass::Bitmap => "Bitmap",
            ContentClass::BitmapRle => "Bitmap RLE",
            ContentClass::Indexed => "Indexed",
            ContentClass::IndexedRle => "Indexed RLE",
            ContentClass::FullColour => "Full Colour",
        }
    }
}

/// Behavioral flags a codec declares about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderFlags {
    /// The codec holds compression state across calls; its rectangles must
    /// be serialized in submission order.
    pub ordered: bool,
    /// The codec consumes pixels in the surface's native format rather
    /// than the peer's requested format.
    pub native_pf: bool,
}

/// A rectangle of tightly packed pixels handed to a codec.
#[derive(Debug)]
pub struct RectPixels<'a> {
    /// Position and size in framebuffer coordinates.
    pub rect: Rect,
    /// Format of `data` (peer format, or native for `native_pf` codecs).
    pub format: &'a PixelFormat,
    /// Packed pixel bytes, stride == rect width.
    pub data: &'a [u8],
}

impl RectPixels<'_> {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.rect.width() as usize
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.rect.height() as usize
    }

    /// Decodes all pixels to `u32` values for analysis-style processing.
    #[must_use]
    pub fn to_u32(&self) -> Vec<u32> {
        self.data
            .chunks_exact(self.format.bytes_per_pixel())
            .map(|chunk| self.format.read_pixel(chunk))
            .collect()
    }
}

/// A pluggable rectangle encoder.
///
/// Instances are single-threaded: an `ordered` codec is only ever driven
/// by the worker that currently owns its queue, and unordered codecs keep
/// no state between `write_rect` calls.
///
/// The palette passed to [`write_rect`](Encoder::write_rect) holds values
/// in the same pixel format as the rectangle data.
pub trait Encoder: Send {
    /// Wire encoding id emitted in rectangle headers.
    fn encoding(&self) -> i32;

    /// Ordering and pixel-format requirements.
    fn flags(&self) -> EncoderFlags;

    /// Largest palette this codec can represent for indexed content;
    /// 0 when not applicable.
    fn max_palette_size(&self) -> usize {
        0
    }

    /// Whether the peer's capabilities permit this codec.
    fn is_supported(&self, caps: &PeerCaps) -> bool;

    /// Updates the zlib compression level (-1 = default).
    fn set_compress_level(&mut self, _level: i8) {}

    /// Updates the JPEG quality level (-1 = unspecified).
    fn set_quality_level(&mut self, _level: i8) {}

    /// Updates the fine-grained JPEG quality and subsampling.
    fn set_fine_quality_level(&mut self, _level: i8, _subsampling: Subsampling) {}

    /// Serializes the payload for one rectangle into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::CodecFailure`](crate::EncodeError::CodecFailure)
    /// if the payload cannot be produced; the current update is aborted.
    fn write_rect(
        &mut self,
        pixels: &RectPixels<'_>,
        palette: &Palette,
        caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()>;

    /// Serializes a solid rectangle of `width * height` copies of
    /// `colour` (given in `format`'s byte representation).
    ///
    /// # Errors
    ///
    /// Returns a codec failure like [`write_rect`](Encoder::write_rect).
    fn write_solid_rect(
        &mut self,
        width: i32,
        height: i32,
        format: &PixelFormat,
        colour: &[u8],
        caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()>;
}

/// Builds the fixed codec family, indexed by [`CodecId::index`].
#[must_use]
pub fn new_codec_set() -> [Box<dyn Encoder>; 6] {
    [
        Box::new(RawEncoder),
        Box::new(RreEncoder),
        Box::new(HextileEncoder),
        Box::new(TightEncoder::new()),
        Box::new(TightJpegEncoder::new()),
        Box::new(ZrleEncoder::new()),
    ]
}

/// Writes the Tight-style compact length (1-3 bytes, 7 bits per byte with
/// a continuation flag).
pub(crate) fn write_compact_length(buf: &mut BytesMut, len: usize) {
    use bytes::BufMut;
    if len < 128 {
        buf.put_u8(len as u8);
    } else if len < 16384 {
        buf.put_u8(((len & 0x7F) | 0x80) as u8);
        buf.put_u8((len >> 7) as u8);
    } else {
        buf.put_u8(((len & 0x7F) | 0x80) as u8);
        buf.put_u8((((len >> 7) & 0x7F) | 0x80) as u8);
        buf.put_u8((len >> 14) as u8);
    }
}
