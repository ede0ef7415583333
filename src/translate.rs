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

//! Pixel format translation.
//!
//! Converts packed pixel buffers between arbitrary true-colour formats
//! (8/16/32 bpp, either endianness) by unpacking to 8-bit RGB components
//! and repacking. Direct runtime conversion is used instead of lookup
//! tables; the optimizer produces tight code for the per-format inner
//! loops and nothing has to be cached per peer.

use crate::protocol::PixelFormat;
use bytes::BytesMut;

/// Translates a tightly packed pixel buffer from `src_pf` to `dst_pf`.
///
/// # Panics
///
/// Panics if `src` is not a whole number of `src_pf` pixels.
#[must_use]
pub fn translate_pixels(src: &[u8], src_pf: &PixelFormat, dst_pf: &PixelFormat) -> BytesMut {
    if src_pf == dst_pf {
        return BytesMut::from(src);
    }

    let src_bpp = src_pf.bytes_per_pixel();
    assert_eq!(src.len() % src_bpp, 0, "partial pixel in source buffer");

    let pixel_count = src.len() / src_bpp;
    let mut dst = BytesMut::with_capacity(pixel_count * dst_pf.bytes_per_pixel());

    for chunk in src.chunks_exact(src_bpp) {
        let pixel = src_pf.read_pixel(chunk);
        dst_pf.write_pixel(&mut dst, translate_pixel(pixel, src_pf, dst_pf));
    }

    dst
}

/// Translates a single pixel value between formats.
#[must_use]
pub fn translate_pixel(pixel: u32, src_pf: &PixelFormat, dst_pf: &PixelFormat) -> u32 {
    if src_pf == dst_pf {
        return pixel;
    }
    let (r, g, b) = src_pf.rgb_from_pixel(pixel);
    dst_pf.pixel_from_rgb(r, g, b)
}

/// Translates a single pixel given as raw native bytes, returning the
/// destination format's byte representation.
#[must_use]
pub fn translate_colour_bytes(src: &[u8], src_pf: &PixelFormat, dst_pf: &PixelFormat) -> Vec<u8> {
    let pixel = translate_pixel(src_pf.read_pixel(src), src_pf, dst_pf);
    let mut buf = BytesMut::with_capacity(dst_pf.bytes_per_pixel());
    dst_pf.write_pixel(&mut buf, pixel);
    buf.to_vec()
}
