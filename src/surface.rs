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

//! Pixel surface abstraction.
//!
//! A [`PixelSurface`] is a random-access read-only view of the current
//! framebuffer contents in a declared pixel format. The pipeline reads it
//! concurrently from worker threads during a single update, so
//! implementations must be `Send + Sync`.
//!
//! Stride values are measured in **pixels**, not bytes.

use crate::protocol::PixelFormat;
use crate::region::Rect;

/// Read-only view of framebuffer pixels.
pub trait PixelSurface: Send + Sync {
    /// The format pixels are stored in.
    fn pixel_format(&self) -> &PixelFormat;

    /// The rectangle this surface covers, in framebuffer coordinates.
    fn rect(&self) -> Rect;

    /// Copies the pixels of `rect` into `dst`, tightly packed
    /// (stride == rect width). `dst` must hold at least
    /// `rect.area() * bytes_per_pixel` bytes.
    fn get_image(&self, dst: &mut [u8], rect: Rect);

    /// Borrows the backing bytes starting at `rect`'s top-left corner.
    /// Returns the slice and the row stride in pixels. The slice spans from
    /// the first pixel of `rect` through the end of the last row of `rect`.
    fn get_buffer(&self, rect: Rect) -> (&[u8], usize);
}

/// A surface backed by an owned, tightly packed byte buffer.
///
/// Used by the pipeline for format-converted scratch buffers and by tests
/// as the pixel source.
#[derive(Debug, Clone)]
pub struct OwnedSurface {
    format: PixelFormat,
    rect: Rect,
    data: Vec<u8>,
}

impl OwnedSurface {
    /// Creates a surface over `data`, which must be `w * h *
    /// bytes_per_pixel` bytes, positioned at `rect.tl`.
    ///
    /// # Panics
    ///
    /// Panics if `data` does not match the rectangle's dimensions.
    #[must_use]
    pub fn new(format: PixelFormat, rect: Rect, data: Vec<u8>) -> Self {
        let expected = rect.area() as usize * format.bytes_per_pixel();
        assert_eq!(data.len(), expected, "surface buffer size mismatch");
        Self { format, rect, data }
    }

    /// Creates a zero-filled surface of the given size at the origin.
    #[must_use]
    pub fn blank(format: PixelFormat, width: i32, height: i32) -> Self {
        let rect = Rect::from_xywh(0, 0, width, height);
        let data = vec![0; rect.area() as usize * format.bytes_per_pixel()];
        Self { format, rect, data }
    }

    /// Fills `rect` with a single pixel value.
    pub fn fill_rect(&mut self, rect: Rect, pixel: u32) {
        let bpp = self.format.bytes_per_pixel();
        let mut value = bytes::BytesMut::with_capacity(4);
        self.format.write_pixel(&mut value, pixel);
        let stride = self.rect.width() as usize;
        for y in rect.tl.y..rect.br.y {
            for x in rect.tl.x..rect.br.x {
                let off = ((y - self.rect.tl.y) as usize * stride
                    + (x - self.rect.tl.x) as usize)
                    * bpp;
                self.data[off..off + bpp].copy_from_slice(&value);
            }
        }
    }

    /// Writes one pixel.
    pub fn set_pixel(&mut self, x: i32, y: i32, pixel: u32) {
        self.fill_rect(Rect::new(x, y, x + 1, y + 1), pixel);
    }

    /// The raw backing bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl PixelSurface for OwnedSurface {
    fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    fn rect(&self) -> Rect {
        self.rect
    }

    fn get_image(&self, dst: &mut [u8], rect: Rect) {
        debug_assert!(self.rect.encloses(&rect), "read outside surface");
        let bpp = self.format.bytes_per_pixel();
        let stride = self.rect.width() as usize;
        let row_bytes = rect.width() as usize * bpp;
        for (row, y) in (rect.tl.y..rect.br.y).enumerate() {
            let src = ((y - self.rect.tl.y) as usize * stride
                + (rect.tl.x - self.rect.tl.x) as usize)
                * bpp;
            dst[row * row_bytes..(row + 1) * row_bytes]
                .copy_from_slice(&self.data[src..src + row_bytes]);
        }
    }

    fn get_buffer(&self, rect: Rect) -> (&[u8], usize) {
        debug_assert!(self.rect.encloses(&rect), "read outside surface");
        let bpp = self.format.bytes_per_pixel();
        let stride = self.rect.width() as usize;
        let start = ((rect.tl.y - self.rect.tl.y) as usize * stride
            + (rect.tl.x - self.rect.tl.x) as usize)
            * bpp;
        let end = (((rect.br.y - 1) - self.rect.tl.y) as usize * stride
            + (rect.br.x - self.rect.tl.x) as usize)
            * bpp;
        (&self.data[start..end], stride)
    }
}

/// Copies `rect` out of a borrowed surface buffer into a tightly packed
/// vector. `buffer`/`stride` are as returned by
/// [`PixelSurface::get_buffer`].
#[must_use]
pub fn pack_rect(buffer: &[u8], stride: usize, rect: Rect, bpp: usize) -> Vec<u8> {
    let row_bytes = rect.width() as usize * bpp;
    let mut out = Vec::with_capacity(rect.height() as usize * row_bytes);
    for row in 0..rect.height() as usize {
        let src = row * stride * bpp;
        out.extend_from_slice(&buffer[src..src + row_bytes]);
    }
    out
}
