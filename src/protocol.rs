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

//! RFB protocol constants and pixel format definitions.
//!
//! This module provides the wire-level building blocks the encoding
//! pipeline serializes against: message type ids, encoding ids, and the
//! [`PixelFormat`] structure from RFC 6143. All multi-byte protocol fields
//! are big-endian; pixel data endianness follows the pixel format's
//! big-endian flag.

use bytes::{Buf, BufMut, BytesMut};
use std::io;

// Server-to-client message types

/// Message type: Server sends a framebuffer update.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Message type: Server sends cut text (clipboard data).
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

/// Message type: fence (flow-control barrier), server-originated.
pub const SERVER_MSG_FENCE: u8 = 248;

// Client-to-server message types

/// Message type: Client sends cut text (clipboard data).
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

/// Message type: fence (flow-control barrier), client-originated.
pub const CLIENT_MSG_FENCE: u8 = 248;

// Encoding types

/// Encoding type: Raw pixel data, uncompressed.
pub const ENCODING_RAW: i32 = 0;

/// Encoding type: Copy Rectangle. The client copies pixels from another
/// location of its own framebuffer; no pixel data travels on the wire.
pub const ENCODING_COPYRECT: i32 = 1;

/// Encoding type: Rise-and-Run-length Encoding.
pub const ENCODING_RRE: i32 = 2;

/// Encoding type: Hextile (16x16 tile subdivision).
pub const ENCODING_HEXTILE: i32 = 5;

/// Encoding type: Tight.
pub const ENCODING_TIGHT: i32 = 7;

/// Encoding type: Zlib Run-Length Encoding.
pub const ENCODING_ZRLE: i32 = 16;

// Pseudo-encodings

/// Pseudo-encoding: LastRect. Lets the server defer the rect count and
/// close the update with a sentinel rectangle instead.
pub const ENCODING_LAST_RECT: i32 = -224;

/// Sentinel rectangle count used when the peer supports LastRect.
pub const LAST_RECT_SENTINEL: u16 = 0xFFFF;

/// Pseudo-encoding range start: JPEG quality level 0 (lowest).
pub const ENCODING_QUALITY_LEVEL_0: i32 = -32;

/// Pseudo-encoding range end: JPEG quality level 9 (highest).
pub const ENCODING_QUALITY_LEVEL_9: i32 = -23;

/// Pseudo-encoding range start: compression level 0.
pub const ENCODING_COMPRESS_LEVEL_0: i32 = -256;

/// Pseudo-encoding range end: compression level 9.
pub const ENCODING_COMPRESS_LEVEL_9: i32 = -247;

// Supported fence flags (block-before, block-after, sync-next)
pub(crate) const FENCE_FLAGS_SUPPORTED: u32 = 0x8000_0003;

/// Largest fence payload the protocol permits.
pub(crate) const FENCE_MAX_PAYLOAD: usize = 64;

/// Represents the pixel format of a framebuffer or peer.
///
/// Defines how pixel data is interpreted: color depth, endianness, and the
/// position and range of each RGB component. Equality is value-wise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel (8, 16 or 32).
    pub bits_per_pixel: u8,
    /// Depth of the pixel in bits.
    pub depth: u8,
    /// Non-zero if pixel values are big-endian on the wire.
    pub big_endian_flag: u8,
    /// Non-zero if the format is true-colour (not colormapped).
    pub true_colour_flag: u8,
    /// Maximum red component value.
    pub red_max: u16,
    /// Maximum green component value.
    pub green_max: u16,
    /// Maximum blue component value.
    pub blue_max: u16,
    /// Right shift to the red component.
    pub red_shift: u8,
    /// Right shift to the green component.
    pub green_shift: u8,
    /// Right shift to the blue component.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Standard 32-bit RGBX format (little-endian, depth 24).
    #[must_use]
    pub fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }

    /// 16-bit RGB565 format, common on embedded displays.
    #[must_use]
    pub fn rgb565() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        }
    }

    /// 8-bit BGR233 format for very low bandwidth clients.
    #[must_use]
    pub fn bgr233() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        }
    }

    /// Bytes per pixel for this format.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel / 8) as usize
    }

    /// Validates that this format is one the pipeline can handle.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return false;
        }
        if self.depth == 0 || self.depth > 32 {
            return false;
        }
        if self.true_colour_flag != 0 {
            if self.red_shift >= 32 || self.green_shift >= 32 || self.blue_shift >= 32 {
                return false;
            }
        } else if self.bits_per_pixel != 8 {
            return false;
        }
        true
    }

    /// Reads a pixel value from the head of `data` according to this
    /// format's width and endianness.
    #[inline]
    #[must_use]
    pub fn read_pixel(&self, data: &[u8]) -> u32 {
        match self.bytes_per_pixel() {
            1 => u32::from(data[0]),
            2 => {
                if self.big_endian_flag != 0 {
                    u32::from(u16::from_be_bytes([data[0], data[1]]))
                } else {
                    u32::from(u16::from_le_bytes([data[0], data[1]]))
                }
            }
            _ => {
                if self.big_endian_flag != 0 {
                    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
                } else {
                    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
                }
            }
        }
    }

    /// Appends a pixel value to `buf` in this format's width and
    /// endianness.
    #[inline]
    #[allow(clippy::cast_possible_truncation)] // value already fits the format width
    pub fn write_pixel(&self, buf: &mut BytesMut, pixel: u32) {
        match self.bytes_per_pixel() {
            1 => buf.put_u8(pixel as u8),
            2 => {
                if self.big_endian_flag != 0 {
                    buf.put_u16(pixel as u16);
                } else {
                    buf.put_u16_le(pixel as u16);
                }
            }
            _ => {
                if self.big_endian_flag != 0 {
                    buf.put_u32(pixel);
                } else {
                    buf.put_u32_le(pixel);
                }
            }
        }
    }

    /// Extracts 8-bit RGB components from a pixel value in this format.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // scaled into 0..=255
    pub fn rgb_from_pixel(&self, pixel: u32) -> (u8, u8, u8) {
        let scale = |v: u32, max: u16| -> u8 {
            if max == 0 {
                0
            } else {
                ((v * 255 + u32::from(max) / 2) / u32::from(max)) as u8
            }
        };
        let r = (pixel >> self.red_shift) & u32::from(self.red_max);
        let g = (pixel >> self.green_shift) & u32::from(self.green_max);
        let b = (pixel >> self.blue_shift) & u32::from(self.blue_max);
        (
            scale(r, self.red_max),
            scale(g, self.green_max),
            scale(b, self.blue_max),
        )
    }

    /// Builds a pixel value in this format from 8-bit RGB components.
    #[inline]
    #[must_use]
    pub fn pixel_from_rgb(&self, r: u8, g: u8, b: u8) -> u32 {
        let scale = |v: u8, max: u16| -> u32 { (u32::from(v) * u32::from(max) + 127) / 255 };
        (scale(r, self.red_max) << self.red_shift)
            | (scale(g, self.green_max) << self.green_shift)
            | (scale(b, self.blue_max) << self.blue_shift)
    }

    /// Serializes this format into the 16-byte RFB wire representation.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Deserializes a format from the RFB wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than 16 bytes are available.
    pub fn from_bytes(buf: &mut BytesMut) -> io::Result<Self> {
        if buf.len() < 16 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes for PixelFormat",
            ));
        }
        let pf = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian_flag: buf.get_u8(),
            true_colour_flag: buf.get_u8(),
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        };
        buf.advance(3);
        Ok(pf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_round_trips_on_the_wire() {
        let pf = PixelFormat::rgb565();
        let mut buf = BytesMut::new();
        pf.write_to(&mut buf);
        assert_eq!(buf.len(), 16);
        let parsed = PixelFormat::from_bytes(&mut buf).unwrap();
        assert_eq!(parsed, pf);
    }

    #[test]
    fn read_write_pixel_respects_endianness() {
        let mut be = PixelFormat::rgb888();
        be.big_endian_flag = 1;
        let mut buf = BytesMut::new();
        be.write_pixel(&mut buf, 0x00AA_BBCC);
        assert_eq!(&buf[..], &[0x00, 0xAA, 0xBB, 0xCC]);
        assert_eq!(be.read_pixel(&buf), 0x00AA_BBCC);
    }

    #[test]
    fn rgb_round_trip_at_full_depth() {
        let pf = PixelFormat::rgb888();
        let pixel = pf.pixel_from_rgb(12, 200, 99);
        assert_eq!(pf.rgb_from_pixel(pixel), (12, 200, 99));
    }
}
