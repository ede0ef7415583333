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

//! Hextile encoding.
//!
//! Divides the rectangle into 16x16 tiles; each tile is raw, solid,
//! monochrome with subrects, or coloured with subrects. Background and
//! foreground colours carry over between tiles when unchanged.

use bytes::{BufMut, BytesMut};

use super::common::{extract_tile, find_subrects, tile_colours};
use super::{Encoder, EncoderFlags, RectPixels};
use crate::caps::PeerCaps;
use crate::error::Result;
use crate::palette::Palette;
use crate::protocol::{self, PixelFormat};

const RAW: u8 = 1 << 0;
const BACKGROUND_SPECIFIED: u8 = 1 << 1;
const FOREGROUND_SPECIFIED: u8 = 1 << 2;
const ANY_SUBRECTS: u8 = 1 << 3;
const SUBRECTS_COLOURED: u8 = 1 << 4;

const TILE: usize = 16;

/// The Hextile encoder.
pub struct HextileEncoder;

impl Encoder for HextileEncoder {
    fn encoding(&self) -> i32 {
        protocol::ENCODING_HEXTILE
    }

    fn flags(&self) -> EncoderFlags {
        EncoderFlags::default()
    }

    fn is_supported(&self, caps: &PeerCaps) -> bool {
        caps.supports_encoding(protocol::ENCODING_HEXTILE)
    }

    #[allow(clippy::cast_possible_truncation)] // tile coordinates fit in a nibble
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

        let mut last_bg: Option<u32> = None;
        let mut last_fg: Option<u32> = None;

        for ty in (0..height).step_by(TILE) {
            for tx in (0..width).step_by(TILE) {
                let tw = TILE.min(width - tx);
                let th = TILE.min(height - ty);
                let tile = extract_tile(&values, width, tx, ty, tw, th);
                let (is_solid, is_mono, bg, fg) = tile_colours(&tile);

                let tile_start = out.len();
                out.put_u8(0); // placeholder for the subencoding byte
                let mut subencoding: u8 = 0;

                if is_solid {
                    if Some(bg) != last_bg {
                        subencoding |= BACKGROUND_SPECIFIED;
                        pf.write_pixel(out, bg);
                        last_bg = Some(bg);
                    }
                    out[tile_start] = subencoding;
                    continue;
                }

                let subrects = find_subrects(&tile, tw, th, bg);

                // Raw wins when the structured form would not be smaller,
                // or when the subrect count overflows its length byte.
                let bpp = pf.bytes_per_pixel();
                let raw_size = tw * th * bpp;
                let bg_bytes = if Some(bg) == last_bg { 0 } else { bpp };
                let fg_bytes = if is_mono && Some(fg) != last_fg { bpp } else { 0 };
                let body = subrects.len() * if is_mono { 2 } else { 2 + bpp };
                if subrects.is_empty()
                    || subrects.len() > 255
                    || bg_bytes + fg_bytes + 1 + body > raw_size
                {
                    out.truncate(tile_start);
                    out.put_u8(RAW);
                    for &pixel in &tile {
                        pf.write_pixel(out, pixel);
                    }
                    last_bg = None;
                    last_fg = None;
                    continue;
                }

                if Some(bg) != last_bg {
                    subencoding |= BACKGROUND_SPECIFIED;
                    pf.write_pixel(out, bg);
                    last_bg = Some(bg);
                }

                subencoding |= ANY_SUBRECTS;

                if is_mono {
                    if Some(fg) != last_fg {
                        subencoding |= FOREGROUND_SPECIFIED;
                        pf.write_pixel(out, fg);
                        last_fg = Some(fg);
                    }
                    out.put_u8(subrects.len() as u8);
                    for sr in subrects {
                        out.put_u8(((sr.x as u8) << 4) | (sr.y as u8));
                        out.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8));
                    }
                } else {
                    subencoding |= SUBRECTS_COLOURED;
                    last_fg = None;
                    out.put_u8(subrects.len() as u8);
                    for sr in subrects {
                        pf.write_pixel(out, sr.colour);
                        out.put_u8(((sr.x as u8) << 4) | (sr.y as u8));
                        out.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8));
                    }
                }

                out[tile_start] = subencoding;
            }
        }
        Ok(())
    }

    fn write_solid_rect(
        &mut self,
        width: i32,
        height: i32,
        _format: &PixelFormat,
        colour: &[u8],
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        // First tile carries the background; the rest inherit it.
        let tiles_x = (width as usize).div_ceil(TILE);
        let tiles_y = (height as usize).div_ceil(TILE);
        let mut first = true;
        for _ in 0..tiles_x * tiles_y {
            if first {
                out.put_u8(BACKGROUND_SPECIFIED);
                out.extend_from_slice(colour);
                first = false;
            } else {
                out.put_u8(0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Rect;

    #[test]
    fn solid_rect_emits_one_background_per_update() {
        let pf = PixelFormat::rgb888();
        let mut colour = BytesMut::new();
        pf.write_pixel(&mut colour, 0x0011_2233);

        let mut out = BytesMut::new();
        HextileEncoder
            .write_solid_rect(40, 20, &pf, &colour, &PeerCaps::default(), &mut out)
            .unwrap();

        // 3x2 tiles: one background-specified tile + five empty tiles.
        assert_eq!(out.len(), 1 + 4 + 5);
        assert_eq!(out[0], BACKGROUND_SPECIFIED);
    }

    #[test]
    fn mono_tile_uses_two_byte_subrects() {
        let pf = PixelFormat::rgb565();
        let mut data = BytesMut::new();
        for i in 0..64u32 {
            pf.write_pixel(&mut data, if i == 10 { 0xF800 } else { 0x001F });
        }
        let pixels = RectPixels {
            rect: Rect::from_xywh(0, 0, 8, 8),
            format: &pf,
            data: &data,
        };

        let mut out = BytesMut::new();
        HextileEncoder
            .write_rect(&pixels, &Palette::new(), &PeerCaps::default(), &mut out)
            .unwrap();

        let sub = out[0];
        assert_ne!(sub & ANY_SUBRECTS, 0);
        assert_eq!(sub & SUBRECTS_COLOURED, 0);
        assert_ne!(sub & BACKGROUND_SPECIFIED, 0);
        assert_ne!(sub & FOREGROUND_SPECIFIED, 0);
    }
}
