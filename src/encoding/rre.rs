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

//! RRE (Rise-and-Run-length) encoding.
//!
//! A rectangle is a background colour plus a list of subrectangles with
//! their own colours. Cheap to decode and effective for large flat
//! regions; horrible for high-frequency content.

use bytes::{BufMut, BytesMut};

use super::common::{background_colour, find_subrects};
use super::{Encoder, EncoderFlags, RectPixels};
use crate::caps::PeerCaps;
use crate::error::Result;
use crate::palette::Palette;
use crate::protocol::{self, PixelFormat};

/// The RRE encoder.
pub struct RreEncoder;

impl Encoder for RreEncoder {
    fn encoding(&self) -> i32 {
        protocol::ENCODING_RRE
    }

    fn flags(&self) -> EncoderFlags {
        EncoderFlags::default()
    }

    fn is_supported(&self, caps: &PeerCaps) -> bool {
        caps.supports_encoding(protocol::ENCODING_RRE)
    }

    #[allow(clippy::cast_possible_truncation)] // subrect count bounded by rect area
    fn write_rect(
        &mut self,
        pixels: &RectPixels<'_>,
        palette: &Palette,
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        let values = pixels.to_u32();

        // The analyzer's palette lists colours by first appearance; the
        // dominant colour still has to be counted here.
        let bg = if palette.size() == 1 {
            palette.colour(0)
        } else {
            background_colour(&values)
        };

        let subrects = find_subrects(&values, pixels.width(), pixels.height(), bg);

        out.put_u32(subrects.len() as u32);
        pixels.format.write_pixel(out, bg);
        for sr in subrects {
            pixels.format.write_pixel(out, sr.colour);
            out.put_u16(sr.x);
            out.put_u16(sr.y);
            out.put_u16(sr.w);
            out.put_u16(sr.h);
        }
        Ok(())
    }

    fn write_solid_rect(
        &mut self,
        _width: i32,
        _height: i32,
        _format: &PixelFormat,
        colour: &[u8],
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        out.put_u32(0);
        out.extend_from_slice(colour);
        Ok(())
    }
}
