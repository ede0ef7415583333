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

//! ZRLE (Zlib Run-Length Encoding).
//!
//! The rectangle is divided into 64x64 tiles; each tile picks the cheapest
//! of raw, solid, packed-palette, palette-RLE or plain-RLE sub-encoding,
//! using the compact CPIXEL representation. The concatenated tile stream
//! is pushed through one zlib stream whose dictionary persists across
//! rectangles, which is why this codec is ordered.

use bytes::{BufMut, BytesMut};
use flate2::{Compress, Compression};

use super::common::compress_sync;
use super::{Encoder, EncoderFlags, RectPixels};
use crate::caps::PeerCaps;
use crate::error::{EncodeError, Result};
use crate::palette::Palette;
use crate::protocol::{self, PixelFormat};

const TILE: usize = 64;

/// Largest palette the palette-RLE sub-encoding can address.
const MAX_PALETTE: usize = 127;

/// CPIXEL size: 3 bytes when a 32bpp depth<=24 format keeps all RGB bits
/// in the same three bytes, else the full pixel size (RFC 6143 §7.6.9).
fn bytes_per_cpixel(pf: &PixelFormat) -> usize {
    if pf.true_colour_flag != 0 && pf.bits_per_pixel == 32 && pf.depth <= 24 {
        if fits_in_ls3_bytes(pf) || fits_in_ms3_bytes(pf) {
            return 3;
        }
    }
    pf.bytes_per_pixel()
}

fn fits_in_ls3_bytes(pf: &PixelFormat) -> bool {
    (u32::from(pf.red_max) << pf.red_shift) < (1 << 24)
        && (u32::from(pf.green_max) << pf.green_shift) < (1 << 24)
        && (u32::from(pf.blue_max) << pf.blue_shift) < (1 << 24)
}

fn fits_in_ms3_bytes(pf: &PixelFormat) -> bool {
    pf.red_shift > 7 && pf.green_shift > 7 && pf.blue_shift > 7
}

/// Appends one CPIXEL. 3-byte CPIXELs drop either the most or the least
/// significant byte of the client-endian pixel, whichever carries no RGB.
#[allow(clippy::cast_possible_truncation)]
fn write_cpixel(buf: &mut BytesMut, pixel: u32, pf: &PixelFormat) {
    match bytes_per_cpixel(pf) {
        1 => buf.put_u8(pixel as u8),
        2 => {
            if pf.big_endian_flag != 0 {
                buf.put_u16(pixel as u16);
            } else {
                buf.put_u16_le(pixel as u16);
            }
        }
        3 => {
            let big_endian = pf.big_endian_flag != 0;
            let bytes = if big_endian {
                pixel.to_be_bytes()
            } else {
                pixel.to_le_bytes()
            };
            let keep_low = (fits_in_ls3_bytes(pf) && !big_endian)
                || (fits_in_ms3_bytes(pf) && big_endian);
            if keep_low {
                buf.extend_from_slice(&bytes[0..3]);
            } else {
                buf.extend_from_slice(&bytes[1..4]);
            }
        }
        _ => {
            if pf.big_endian_flag != 0 {
                buf.put_u32(pixel);
            } else {
                buf.put_u32_le(pixel);
            }
        }
    }
}

/// The ZRLE encoder. Holds the persistent zlib stream.
pub struct ZrleEncoder {
    level: i8,
    stream: Option<Compress>,
}

impl ZrleEncoder {
    /// Creates an encoder with no stream yet; the stream is opened with
    /// the configured compression level on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            level: -1,
            stream: None,
        }
    }

    fn stream(&mut self) -> &mut Compress {
        let level = match self.level {
            -1 => Compression::default(),
            n => Compression::new(n.clamp(0, 9) as u32),
        };
        self.stream.get_or_insert_with(|| Compress::new(level, true))
    }

    fn deflate(&mut self, tile_bytes: &[u8], out: &mut BytesMut) -> Result<()> {
        let compressed = compress_sync(self.stream(), tile_bytes)
            .map_err(|e| EncodeError::CodecFailure(format!("ZRLE zlib: {e}")))?;
        out.put_u32(compressed.len() as u32);
        out.extend_from_slice(&compressed);
        log::trace!(
            "ZRLE: {} tile bytes -> {} compressed",
            tile_bytes.len(),
            compressed.len()
        );
        Ok(())
    }
}

impl Default for ZrleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for ZrleEncoder {
    fn encoding(&self) -> i32 {
        protocol::ENCODING_ZRLE
    }

    fn flags(&self) -> EncoderFlags {
        EncoderFlags {
            ordered: true,
            native_pf: false,
        }
    }

    fn max_palette_size(&self) -> usize {
        MAX_PALETTE
    }

    fn is_supported(&self, caps: &PeerCaps) -> bool {
        caps.supports_encoding(protocol::ENCODING_ZRLE)
    }

    fn set_compress_level(&mut self, level: i8) {
        self.level = level;
    }

    fn write_rect(
        &mut self,
        pixels: &RectPixels<'_>,
        _palette: &Palette,
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        let pf = pixels.format;
        let width = pixels.width();
        let height = pixels.height();
        let values = pixels.to_u32();

        let mut tile_bytes = BytesMut::new();
        for y in (0..height).step_by(TILE) {
            for x in (0..width).step_by(TILE) {
                let tw = TILE.min(width - x);
                let th = TILE.min(height - y);
                let tile = super::common::extract_tile(&values, width, x, y, tw, th);
                encode_tile(&mut tile_bytes, &tile, tw, th, pf);
            }
        }

        self.deflate(&tile_bytes, out)
    }

    fn write_solid_rect(
        &mut self,
        width: i32,
        height: i32,
        format: &PixelFormat,
        colour: &[u8],
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        let pixel = format.read_pixel(colour);
        let tiles_x = (width as usize).div_ceil(TILE);
        let tiles_y = (height as usize).div_ceil(TILE);

        let mut tile_bytes = BytesMut::new();
        for _ in 0..tiles_x * tiles_y {
            tile_bytes.put_u8(1); // solid sub-encoding
            write_cpixel(&mut tile_bytes, pixel, format);
        }

        self.deflate(&tile_bytes, out)
    }
}

/// Encodes one tile, choosing the cheapest sub-encoding.
#[allow(clippy::cast_possible_truncation)] // indices and runs fit u8 per the wire format
fn encode_tile(buf: &mut BytesMut, tile: &[u32], width: usize, height: usize, pf: &PixelFormat) {
    let cpixel = bytes_per_cpixel(pf);

    let (runs, singles, palette) = runs_and_palette(tile);

    if palette.len() == 1 {
        buf.put_u8(1);
        write_cpixel(buf, tile[0], pf);
        return;
    }

    let mut use_rle = false;
    let mut use_palette = false;
    let mut estimated = width * height * cpixel; // raw cost

    let plain_rle = (cpixel + 1) * (runs + singles);
    if plain_rle < estimated {
        use_rle = true;
        estimated = plain_rle;
    }

    if palette.len() <= MAX_PALETTE {
        let palette_rle = cpixel * palette.len() + 2 * runs + singles;
        if palette_rle < estimated {
            use_rle = true;
            use_palette = true;
            estimated = palette_rle;
        }

        if palette.len() < 17 {
            let bits = packed_bits(palette.len());
            let row_bytes = (width * bits).div_ceil(8);
            let packed = cpixel * palette.len() + row_bytes * height;
            if packed < estimated {
                use_rle = false;
                use_palette = true;
            }
        }
    }

    if use_palette {
        let index_of = |pixel: u32| palette.iter().position(|&c| c == pixel).unwrap_or(0) as u8;
        if use_rle {
            // Palette RLE
            buf.put_u8(128 | palette.len() as u8);
            for &colour in &palette {
                write_cpixel(buf, colour, pf);
            }
            let mut i = 0;
            while i < tile.len() {
                let colour = tile[i];
                let index = index_of(colour);
                let mut run = 1;
                while i + run < tile.len() && tile[i + run] == colour {
                    run += 1;
                }
                if run == 1 {
                    buf.put_u8(index);
                } else {
                    buf.put_u8(index | 128);
                    let mut left = run - 1;
                    while left >= 255 {
                        buf.put_u8(255);
                        left -= 255;
                    }
                    buf.put_u8(left as u8);
                }
                i += run;
            }
        } else {
            // Packed palette; each row is byte-aligned.
            buf.put_u8(palette.len() as u8);
            for &colour in &palette {
                write_cpixel(buf, colour, pf);
            }
            let bits = packed_bits(palette.len());
            for row in tile.chunks_exact(width) {
                let mut byte = 0u8;
                let mut nbits = 0;
                for &pixel in row {
                    byte = (byte << bits) | index_of(pixel);
                    nbits += bits;
                    if nbits >= 8 {
                        buf.put_u8(byte);
                        byte = 0;
                        nbits = 0;
                    }
                }
                if nbits > 0 {
                    buf.put_u8(byte << (8 - nbits));
                }
            }
        }
    } else if use_rle {
        // Plain RLE
        buf.put_u8(128);
        let mut i = 0;
        while i < tile.len() {
            let colour = tile[i];
            let mut run = 1;
            while i + run < tile.len() && tile[i + run] == colour {
                run += 1;
            }
            write_cpixel(buf, colour, pf);
            let mut left = run - 1;
            while left >= 255 {
                buf.put_u8(255);
                left -= 255;
            }
            buf.put_u8(left as u8);
            i += run;
        }
    } else {
        // Raw
        buf.put_u8(0);
        for &pixel in tile {
            write_cpixel(buf, pixel, pf);
        }
    }
}

fn packed_bits(palette_size: usize) -> usize {
    match palette_size {
        0..=2 => 1,
        3..=4 => 2,
        _ => 4,
    }
}

/// Counts RLE runs and single pixels and collects the palette in first-seen
/// order. The palette stops growing past 256 entries; run counting
/// continues.
fn runs_and_palette(pixels: &[u32]) -> (usize, usize, Vec<u32>) {
    let mut runs = 0;
    let mut singles = 0;
    let mut palette: Vec<u32> = Vec::with_capacity(16);

    let mut i = 0;
    while i < pixels.len() {
        let colour = pixels[i];
        if palette.len() < 256 && !palette.contains(&colour) {
            palette.push(colour);
        }
        let mut run = 1;
        while i + run < pixels.len() && pixels[i + run] == colour {
            run += 1;
        }
        if run == 1 {
            singles += 1;
        } else {
            runs += 1;
        }
        i += run;
    }
    (runs, singles, palette)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Rect;

    fn rgb888_rect(values: &[u32], w: i32, h: i32) -> (BytesMut, PixelFormat) {
        let pf = PixelFormat::rgb888();
        let mut data = BytesMut::new();
        for &v in values {
            pf.write_pixel(&mut data, v);
        }
        assert_eq!(values.len() as i32, w * h);
        (data, pf)
    }

    #[test]
    fn cpixel_is_three_bytes_for_depth24() {
        assert_eq!(bytes_per_cpixel(&PixelFormat::rgb888()), 3);
        assert_eq!(bytes_per_cpixel(&PixelFormat::rgb565()), 2);
        assert_eq!(bytes_per_cpixel(&PixelFormat::bgr233()), 1);
    }

    #[test]
    fn solid_tile_compresses_to_one_subencoding() {
        let mut tile_bytes = BytesMut::new();
        encode_tile(&mut tile_bytes, &[42; 16], 4, 4, &PixelFormat::rgb888());
        assert_eq!(tile_bytes[0], 1);
        assert_eq!(tile_bytes.len(), 1 + 3);
    }

    #[test]
    fn output_carries_length_prefix() {
        let (data, pf) = rgb888_rect(&[1, 2, 3, 4], 2, 2);
        let pixels = RectPixels {
            rect: Rect::from_xywh(0, 0, 2, 2),
            format: &pf,
            data: &data,
        };
        let mut enc = ZrleEncoder::new();
        let mut out = BytesMut::new();
        enc.write_rect(&pixels, &Palette::new(), &PeerCaps::default(), &mut out)
            .unwrap();
        let len = u32::from_be_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(out.len(), 4 + len);
    }

    #[test]
    fn stream_persists_across_rects() {
        let (data, pf) = rgb888_rect(&[9; 64], 8, 8);
        let pixels = RectPixels {
            rect: Rect::from_xywh(0, 0, 8, 8),
            format: &pf,
            data: &data,
        };
        let mut enc = ZrleEncoder::new();
        let mut first = BytesMut::new();
        let mut second = BytesMut::new();
        enc.write_rect(&pixels, &Palette::new(), &PeerCaps::default(), &mut first)
            .unwrap();
        enc.write_rect(&pixels, &Palette::new(), &PeerCaps::default(), &mut second)
            .unwrap();
        // The second block rides the existing dictionary and shrinks.
        assert!(second.len() <= first.len());
    }
}
