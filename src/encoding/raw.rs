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

//! Raw encoding: uncompressed pixel data in the peer's format.

use bytes::BytesMut;

use super::{Encoder, EncoderFlags, RectPixels};
use crate::caps::PeerCaps;
use crate::error::Result;
use crate::palette::Palette;
use crate::protocol::{self, PixelFormat};

/// The Raw encoder. Universally supported fallback; high bandwidth.
pub struct RawEncoder;

impl Encoder for RawEncoder {
    fn encoding(&self) -> i32 {
        protocol::ENCODING_RAW
    }

    fn flags(&self) -> EncoderFlags {
        EncoderFlags::default()
    }

    fn is_supported(&self, _caps: &PeerCaps) -> bool {
        true
    }

    fn write_rect(
        &mut self,
        pixels: &RectPixels<'_>,
        _palette: &Palette,
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        out.extend_from_slice(pixels.data);
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
        let count = width as usize * height as usize;
        out.reserve(count * colour.len());
        for _ in 0..count {
            out.extend_from_slice(colour);
        }
        Ok(())
    }
}
