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

//! Tight encoding, basic compression paths.
//!
//! Four payload shapes: solid fill, mono rect (1-bit bitmap over two
//! colours), indexed palette, and full-colour zlib. The three zlib streams
//! (full-colour, mono, indexed) keep their dictionaries across rectangles,
//! so this codec is ordered. The JPEG path lives in its own codec.

use bytes::{BufMut, BytesMut};
use flate2::{Compress, Compression};

use super::common::compress_sync;
use super::{write_compact_length, Encoder, EncoderFlags, RectPixels};
use crate::caps::PeerCaps;
use crate::error::{EncodeError, Result};
use crate::palette::Palette;
use crate::protocol::{self, PixelFormat};

const TIGHT_EXPLICIT_FILTER: u8 = 0x04;
const TIGHT_FILL: u8 = 0x08;
const TIGHT_FILTER_PALETTE: u8 = 0x01;

/// Zlib stream ids for the basic-compression paths.
const STREAM_FULL_COLOUR: usize = 0;
const STREAM_MONO: usize = 1;
const STREAM_INDEXED: usize = 2;

/// Data this small is cheaper uncompressed, and is then sent without a
/// length field.
const MIN_TO_COMPRESS: usize = 12;

/// Whether the format qualifies for the 3-byte TPIXEL packing: 32bpp,
/// depth 24, each component a full byte.
fn pack24(pf: &PixelFormat) -> bool {
    pf.bits_per_pixel == 32
        && pf.depth <= 24
        && pf.red_max == 255
        && pf.green_max == 255
        && pf.blue_max == 255
}

/// Appends one Tight pixel (TPIXEL): packed RGB bytes for qualifying
/// 32-bit formats, the plain pixel otherwise.
#[allow(clippy::cast_possible_truncation)]
fn write_tpixel(buf: &mut BytesMut, pixel: u32, pf: &PixelFormat) {
    if pack24(pf) {
        buf.put_u8((pixel >> pf.red_shift) as u8);
        buf.put_u8((pixel >> pf.green_shift) as u8);
        buf.put_u8((pixel >> pf.blue_shift) as u8);
    } else {
        pf.write_pixel(buf, pixel);
    }
}

/// The Tight encoder. Holds the three persistent zlib streams.
pub struct TightEncoder {
    level: i8,
    streams: [Option<Compress>; 3],
}

impl TightEncoder {
    /// Creates an encoder; streams open lazily at first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            level: -1,
            streams: [None, None, None],
        }
    }

    /// Compresses `data` on the given stream and appends the Tight
    /// compact-length framing. Short payloads bypass zlib and the length
    /// field entirely.
    fn compress_into(&mut self, stream: usize, data: &[u8], out: &mut BytesMut) -> Result<()> {
        if data.len() < MIN_TO_COMPRESS {
            out.extend_from_slice(data);
            return Ok(());
        }
        let level = match self.level {
            -1 => Compression::default(),
            n => Compression::new(n.clamp(0, 9) as u32),
        };
        let compressor = self.streams[stream].get_or_insert_with(|| Compress::new(level, true));
        let compressed = compress_sync(compressor, data)
            .map_err(|e| EncodeError::CodecFailure(format!("Tight zlib: {e}")))?;
        write_compact_length(out, compressed.len());
        out.extend_from_slice(&compressed);
        Ok(())
    }

    fn write_full_colour(&mut self, pixels: &RectPixels<'_>, out: &mut BytesMut) -> Result<()> {
        let pf = pixels.format;
        let mut tpixels = BytesMut::with_capacity(pixels.data.len());
        for chunk in pixels.data.chunks_exact(pf.bytes_per_pixel()) {
            write_tpixel(&mut tpixels, pf.read_pixel(chunk), pf);
        }
        out.put_u8((STREAM_FULL_COLOUR as u8) << 4);
        self.compress_into(STREAM_FULL_COLOUR, &tpixels, out)
    }

    fn write_mono(
        &mut self,
        pixels: &RectPixels<'_>,
        bg: u32,
        fg: u32,
        out: &mut BytesMut,
    ) -> Result<()> {
        let pf = pixels.format;
        let bitmap = mono_bitmap(pixels, bg);

        out.put_u8((STREAM_MONO as u8 | TIGHT_EXPLICIT_FILTER) << 4);
        out.put_u8(TIGHT_FILTER_PALETTE);
        out.put_u8(1); // palette size - 1
        write_tpixel(out, bg, pf);
        write_tpixel(out, fg, pf);
        self.compress_into(STREAM_MONO, &bitmap, out)
    }

    fn write_indexed(
        &mut self,
        pixels: &RectPixels<'_>,
        palette: &Palette,
        out: &mut BytesMut,
    ) -> Result<()> {
        let pf = pixels.format;
        let bpp = pf.bytes_per_pixel();

        let mut indices = Vec::with_capacity(pixels.width() * pixels.height());
        for chunk in pixels.data.chunks_exact(bpp) {
            indices.push(palette.lookup(pf.read_pixel(chunk)).unwrap_or(0));
        }

        out.put_u8((STREAM_INDEXED as u8 | TIGHT_EXPLICIT_FILTER) << 4);
        out.put_u8(TIGHT_FILTER_PALETTE);
        #[allow(clippy::cast_possible_truncation)] // palette size <= 256
        out.put_u8((palette.size() - 1) as u8);
        for &colour in palette.colours() {
            write_tpixel(out, colour, pf);
        }
        self.compress_into(STREAM_INDEXED, &indices, out)
    }
}

impl Default for TightEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for TightEncoder {
    fn encoding(&self) -> i32 {
        protocol::ENCODING_TIGHT
    }

    fn flags(&self) -> EncoderFlags {
        EncoderFlags {
            ordered: true,
            native_pf: false,
        }
    }

    fn max_palette_size(&self) -> usize {
        256
    }

    fn is_supported(&self, caps: &PeerCaps) -> bool {
        caps.supports_encoding(protocol::ENCODING_TIGHT)
    }

    fn set_compress_level(&mut self, level: i8) {
        self.level = level;
    }

    fn write_rect(
        &mut self,
        pixels: &RectPixels<'_>,
        palette: &Palette,
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        match palette.size() {
            0 => self.write_full_colour(pixels, out),
            1 => {
                out.put_u8(TIGHT_FILL << 4);
                write_tpixel(out, palette.colour(0), pixels.format);
                Ok(())
            }
            2 => self.write_mono(pixels, palette.colour(0), palette.colour(1), out),
            _ => self.write_indexed(pixels, palette, out),
        }
    }

    fn write_solid_rect(
        &mut self,
        _width: i32,
        _height: i32,
        format: &PixelFormat,
        colour: &[u8],
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        out.put_u8(TIGHT_FILL << 4);
        write_tpixel(out, format.read_pixel(colour), format);
        Ok(())
    }
}

/// Renders the rect as a 1-bit bitmap: 0 = `bg`, 1 = anything else.
/// Rows are byte-aligned, MSB first.
fn mono_bitmap(pixels: &RectPixels<'_>, bg: u32) -> Vec<u8> {
    let pf = pixels.format;
    let bpp = pf.bytes_per_pixel();
    let width = pixels.width();
    let height = pixels.height();
    let bytes_per_row = width.div_ceil(8);
    let mut bitmap = vec![0u8; bytes_per_row * height];

    for y in 0..height {
        let row = &pixels.data[y * width * bpp..(y + 1) * width * bpp];
        for (x, chunk) in row.chunks_exact(bpp).enumerate() {
            if pf.read_pixel(chunk) != bg {
                bitmap[y * bytes_per_row + x / 8] |= 0x80 >> (x % 8);
            }
        }
    }
    bitmap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Rect;

    #[test]
    fn solid_rect_is_fill_control_plus_tpixel() {
        let pf = PixelFormat::rgb888();
        let mut colour = BytesMut::new();
        pf.write_pixel(&mut colour, pf.pixel_from_rgb(10, 20, 30));

        let mut out = BytesMut::new();
        TightEncoder::new()
            .write_solid_rect(64, 64, &pf, &colour, &PeerCaps::default(), &mut out)
            .unwrap();
        assert_eq!(&out[..], &[0x80, 10, 20, 30]);
    }

    #[test]
    fn tpixel_falls_back_to_full_pixels_for_16bpp() {
        let pf = PixelFormat::rgb565();
        let mut buf = BytesMut::new();
        write_tpixel(&mut buf, 0xF800, &pf);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn mono_rect_header_carries_both_colours() {
        let pf = PixelFormat::rgb888();
        let mut palette = Palette::new();
        palette.insert(1);
        palette.insert(2);

        let mut data = BytesMut::new();
        for v in [1u32, 2, 1, 2, 1, 2, 1, 2] {
            pf.write_pixel(&mut data, v);
        }
        let pixels = RectPixels {
            rect: Rect::from_xywh(0, 0, 4, 2),
            format: &pf,
            data: &data,
        };

        let mut out = BytesMut::new();
        TightEncoder::new()
            .write_rect(&pixels, &palette, &PeerCaps::default(), &mut out)
            .unwrap();
        assert_eq!(out[0], (1 | 0x04) << 4);
        assert_eq!(out[1], TIGHT_FILTER_PALETTE);
        assert_eq!(out[2], 1);
    }

    #[test]
    fn short_payloads_skip_the_length_field() {
        let pf = PixelFormat::rgb888();
        let mut palette = Palette::new();
        palette.insert(5);
        palette.insert(6);

        // 2x2 mono: bitmap is 2 bytes, well under the compress threshold.
        let mut data = BytesMut::new();
        for v in [5u32, 6, 6, 5] {
            pf.write_pixel(&mut data, v);
        }
        let pixels = RectPixels {
            rect: Rect::from_xywh(0, 0, 2, 2),
            format: &pf,
            data: &data,
        };

        let mut out = BytesMut::new();
        TightEncoder::new()
            .write_rect(&pixels, &palette, &PeerCaps::default(), &mut out)
            .unwrap();
        // control + filter + size + 2 tpixels + raw 2-byte bitmap
        assert_eq!(out.len(), 3 + 6 + 2);
    }
}
