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

//! Tight encoding, JPEG path.
//!
//! Shares the Tight wire id with the basic-compression codec but emits the
//! JPEG subencoding. Reads pixels in the surface's native format and does
//! its own RGB extraction, so no peer-format conversion happens upstream.

use bytes::BytesMut;

use super::{Encoder, EncoderFlags, RectPixels};
use crate::caps::{PeerCaps, Subsampling};
use crate::error::Result;
use crate::palette::Palette;
use crate::protocol::{self, PixelFormat};

const TIGHT_JPEG: u8 = 0x09;

/// Maps the protocol's 0..=9 quality levels onto libjpeg quality values.
const QUALITY_MAP: [u8; 10] = [15, 29, 41, 42, 62, 77, 79, 86, 92, 100];

/// The Tight JPEG encoder.
pub struct TightJpegEncoder {
    quality: i8,
    fine_quality: i8,
    subsampling: Subsampling,
}

impl TightJpegEncoder {
    /// Creates an encoder with unspecified quality.
    #[must_use]
    pub fn new() -> Self {
        Self {
            quality: -1,
            fine_quality: -1,
            subsampling: Subsampling::Undefined,
        }
    }

    /// Effective libjpeg quality: the fine-grained level when set, else
    /// the mapped coarse level, else a middle-of-the-road default.
    fn jpeg_quality(&self) -> u8 {
        if self.fine_quality >= 0 {
            #[allow(clippy::cast_sign_loss)] // checked non-negative
            return (self.fine_quality as u8).min(100);
        }
        match self.quality {
            0..=9 => QUALITY_MAP[self.quality as usize],
            _ => 80,
        }
    }

    fn rgb_from_native(pixels: &RectPixels<'_>) -> Vec<u8> {
        let pf = pixels.format;
        let mut rgb = Vec::with_capacity(pixels.width() * pixels.height() * 3);
        for chunk in pixels.data.chunks_exact(pf.bytes_per_pixel()) {
            let (r, g, b) = pf.rgb_from_pixel(pf.read_pixel(chunk));
            rgb.push(r);
            rgb.push(g);
            rgb.push(b);
        }
        rgb
    }

    #[cfg(feature = "turbojpeg")]
    #[allow(clippy::cast_possible_truncation)] // rect sides bounded by u16 on the wire
    fn compress(&self, rgb: &[u8], width: usize, height: usize, out: &mut BytesMut) -> Result<()> {
        use super::write_compact_length;
        use crate::error::EncodeError;
        use crate::jpeg::turbojpeg;
        use bytes::BufMut;

        let subsamp = match self.subsampling {
            Subsampling::Undefined | Subsampling::None => turbojpeg::TJSAMP_444,
            Subsampling::TwoX => turbojpeg::TJSAMP_422,
            Subsampling::FourX => turbojpeg::TJSAMP_420,
            Subsampling::EightX | Subsampling::SixteenX => turbojpeg::TJSAMP_411,
            Subsampling::Gray => turbojpeg::TJSAMP_GRAY,
        };

        let mut compressor = turbojpeg::TurboJpegCompressor::new()
            .map_err(EncodeError::CodecFailure)?;
        let jpeg = compressor
            .compress_rgb(
                rgb,
                width as u16,
                height as u16,
                self.jpeg_quality(),
                subsamp,
            )
            .map_err(EncodeError::CodecFailure)?;

        out.put_u8(TIGHT_JPEG << 4);
        write_compact_length(out, jpeg.len());
        out.extend_from_slice(&jpeg);
        Ok(())
    }

    #[cfg(not(feature = "turbojpeg"))]
    fn compress(
        &self,
        _rgb: &[u8],
        _width: usize,
        _height: usize,
        _out: &mut BytesMut,
    ) -> Result<()> {
        Err(crate::error::EncodeError::CodecFailure(
            "TurboJPEG support not compiled in".to_string(),
        ))
    }
}

impl Default for TightJpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for TightJpegEncoder {
    fn encoding(&self) -> i32 {
        protocol::ENCODING_TIGHT
    }

    fn flags(&self) -> EncoderFlags {
        EncoderFlags {
            ordered: false,
            native_pf: true,
        }
    }

    fn is_supported(&self, caps: &PeerCaps) -> bool {
        if !cfg!(feature = "turbojpeg") {
            return false;
        }
        if !caps.supports_encoding(protocol::ENCODING_TIGHT) {
            return false;
        }
        // Any of these signals JPEG is wanted.
        caps.quality_level != -1
            || caps.fine_quality_level != -1
            || caps.subsampling != Subsampling::Undefined
    }

    fn set_quality_level(&mut self, level: i8) {
        self.quality = level;
    }

    fn set_fine_quality_level(&mut self, level: i8, subsampling: Subsampling) {
        self.fine_quality = level;
        self.subsampling = subsampling;
    }

    fn write_rect(
        &mut self,
        pixels: &RectPixels<'_>,
        _palette: &Palette,
        _caps: &PeerCaps,
        out: &mut BytesMut,
    ) -> Result<()> {
        let rgb = Self::rgb_from_native(pixels);
        self.compress(&rgb, pixels.width(), pixels.height(), out)
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
        let (r, g, b) = format.rgb_from_pixel(format.read_pixel(colour));
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..width as usize * height as usize {
            rgb.push(r);
            rgb.push(g);
            rgb.push(b);
        }
        self.compress(&rgb, width as usize, height as usize, out)
    }
}
