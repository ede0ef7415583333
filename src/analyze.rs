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

//! Per-rectangle content analysis.
//!
//! Scans a rectangle's pixels once, building the palette and counting
//! horizontal RLE runs, then classifies the content. The inner loop is
//! generic over the pixel word and monomorphized per depth; the public
//! functions dispatch on `bits_per_pixel`.

use crate::encoding::ContentClass;
use crate::palette::Palette;
use crate::protocol::PixelFormat;

/// Result of scanning one rectangle.
#[derive(Debug)]
pub struct RectAnalysis {
    /// Number of maximal horizontal equal-pixel spans, row-major.
    pub rle_runs: usize,
    /// Distinct colours in first-seen order; empty when the scan
    /// overflowed the colour budget.
    pub palette: Palette,
}

/// Native pixel word, read with host endianness (the surface lives in
/// host memory).
trait Pixel: Copy + Eq {
    const BYTES: usize;
    fn read(data: &[u8]) -> Self;
    fn widen(self) -> u32;
}

impl Pixel for u8 {
    const BYTES: usize = 1;
    fn read(data: &[u8]) -> Self {
        data[0]
    }
    fn widen(self) -> u32 {
        u32::from(self)
    }
}

impl Pixel for u16 {
    const BYTES: usize = 2;
    fn read(data: &[u8]) -> Self {
        u16::from_ne_bytes([data[0], data[1]])
    }
    fn widen(self) -> u32 {
        u32::from(self)
    }
}

impl Pixel for u32 {
    const BYTES: usize = 4;
    fn read(data: &[u8]) -> Self {
        u32::from_ne_bytes([data[0], data[1], data[2], data[3]])
    }
    fn widen(self) -> u32 {
        self
    }
}

/// Scans the rect. `buffer`/`stride` are a surface borrow positioned at
/// the rect's top-left corner; `stride` is in pixels. On palette overflow
/// the palette comes back empty and the run count covers only the scanned
/// prefix.
#[must_use]
pub fn analyse_rect(
    buffer: &[u8],
    stride: usize,
    width: usize,
    height: usize,
    pf: &PixelFormat,
    max_colours: usize,
) -> RectAnalysis {
    match pf.bits_per_pixel {
        8 => analyse_typed::<u8>(buffer, stride, width, height, max_colours),
        16 => analyse_typed::<u16>(buffer, stride, width, height, max_colours),
        _ => analyse_typed::<u32>(buffer, stride, width, height, max_colours),
    }
}

fn analyse_typed<T: Pixel>(
    buffer: &[u8],
    stride: usize,
    width: usize,
    height: usize,
    max_colours: usize,
) -> RectAnalysis {
    let mut palette = Palette::new();
    let mut rle_runs = 0usize;

    'scan: for y in 0..height {
        let row = &buffer[y * stride * T::BYTES..];
        let mut x = 0;
        while x < width {
            let colour = T::read(&row[x * T::BYTES..]);
            let mut run = 1;
            while x + run < width && T::read(&row[(x + run) * T::BYTES..]) == colour {
                run += 1;
            }
            rle_runs += 1;

            if !palette.insert(colour.widen()) || palette.size() > max_colours {
                palette.clear();
                break 'scan;
            }
            x += run;
        }
    }

    RectAnalysis { rle_runs, palette }
}

/// Decides the content class from the palette size and the RLE guess.
#[must_use]
pub fn classify(palette_size: usize, use_rle: bool) -> ContentClass {
    match palette_size {
        0 => ContentClass::FullColour,
        1 => ContentClass::Solid,
        2 => {
            if use_rle {
                ContentClass::BitmapRle
            } else {
                ContentClass::Bitmap
            }
        }
        _ => {
            if use_rle {
                ContentClass::IndexedRle
            } else {
                ContentClass::Indexed
            }
        }
    }
}

/// Checks whether every pixel of a surface borrow equals `colour` (given
/// as native bytes). Used by the solid-region search.
#[must_use]
pub fn is_solid_block(
    buffer: &[u8],
    stride: usize,
    width: usize,
    height: usize,
    pf: &PixelFormat,
    colour: &[u8],
) -> bool {
    match pf.bits_per_pixel {
        8 => solid_typed::<u8>(buffer, stride, width, height, colour),
        16 => solid_typed::<u16>(buffer, stride, width, height, colour),
        _ => solid_typed::<u32>(buffer, stride, width, height, colour),
    }
}

fn solid_typed<T: Pixel>(
    buffer: &[u8],
    stride: usize,
    width: usize,
    height: usize,
    colour: &[u8],
) -> bool {
    let wanted = T::read(colour);
    for y in 0..height {
        let row = &buffer[y * stride * T::BYTES..];
        for x in 0..width {
            if T::read(&row[x * T::BYTES..]) != wanted {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PixelFormat;

    fn packed(pixels: &[u32]) -> Vec<u8> {
        pixels.iter().flat_map(|p| p.to_ne_bytes()).collect()
    }

    #[test]
    fn run_counting_is_row_major() {
        // Two rows: [a a b] [b b b] -> runs: aa, b, bbb = 3
        let data = packed(&[1, 1, 2, 2, 2, 2]);
        let analysis = analyse_rect(&data, 3, 3, 2, &PixelFormat::rgb888(), 16);
        assert_eq!(analysis.rle_runs, 3);
        assert_eq!(analysis.palette.size(), 2);
    }

    #[test]
    fn stride_skips_pixels_outside_the_rect() {
        // 4-pixel-wide buffer, rect covers the left 2 columns.
        let data = packed(&[5, 5, 9, 9, 5, 5, 9, 9]);
        let analysis = analyse_rect(&data, 4, 2, 2, &PixelFormat::rgb888(), 16);
        assert_eq!(analysis.palette.size(), 1);
        assert_eq!(analysis.palette.colours(), &[5]);
    }

    #[test]
    fn overflow_clears_the_palette() {
        let data = packed(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let analysis = analyse_rect(&data, 8, 8, 1, &PixelFormat::rgb888(), 4);
        assert_eq!(analysis.palette.size(), 0);
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify(0, true), ContentClass::FullColour);
        assert_eq!(classify(1, true), ContentClass::Solid);
        assert_eq!(classify(2, true), ContentClass::BitmapRle);
        assert_eq!(classify(2, false), ContentClass::Bitmap);
        assert_eq!(classify(5, true), ContentClass::IndexedRle);
        assert_eq!(classify(5, false), ContentClass::Indexed);
    }

    #[test]
    fn solid_block_detects_the_odd_pixel_out() {
        let pf = PixelFormat::rgb565();
        let mut data: Vec<u8> = std::iter::repeat(0xAB12u16)
            .take(16)
            .flat_map(|p| p.to_ne_bytes())
            .collect();
        let colour = 0xAB12u16.to_ne_bytes();
        assert!(is_solid_block(&data, 4, 4, 4, &pf, &colour));
        data[2 * 5] ^= 0xFF;
        assert!(!is_solid_block(&data, 4, 4, 4, &pf, &colour));
    }
}
