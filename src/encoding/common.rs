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

//! Helper routines shared between encodings.

use flate2::{Compress, FlushCompress};
use std::collections::HashMap;
use std::io;

/// A subrectangle found inside a larger rect, in rect-local coordinates.
#[derive(Debug)]
pub struct Subrect {
    /// Pixel value of this subrectangle.
    pub colour: u32,
    /// Left edge, relative to the enclosing rect.
    pub x: u16,
    /// Top edge, relative to the enclosing rect.
    pub y: u16,
    /// Width in pixels.
    pub w: u16,
    /// Height in pixels.
    pub h: u16,
}

/// Returns the most common pixel value.
pub fn background_colour(pixels: &[u32]) -> u32 {
    if pixels.is_empty() {
        return 0;
    }
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &pixel in pixels {
        *counts.entry(pixel).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map_or(pixels[0], |(colour, _)| colour)
}

/// Greedily covers all non-background pixels with rectangles, trying both
/// a width-first and a height-first expansion from each seed and keeping
/// the larger.
#[allow(clippy::cast_possible_truncation)] // coordinates bounded by rect size
pub fn find_subrects(pixels: &[u32], width: usize, height: usize, bg: u32) -> Vec<Subrect> {
    let mut subrects = Vec::new();
    let mut marked = vec![false; pixels.len()];

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if marked[idx] || pixels[idx] == bg {
                continue;
            }
            let colour = pixels[idx];

            // Width-first: widest run on this row, then grow downward.
            let mut w1 = 0;
            for tx in x..width {
                let i = y * width + tx;
                if marked[i] || pixels[i] != colour {
                    break;
                }
                w1 = tx - x + 1;
            }
            let mut h1 = 1;
            'rows: for ty in (y + 1)..height {
                for tx in x..(x + w1) {
                    let i = ty * width + tx;
                    if marked[i] || pixels[i] != colour {
                        break 'rows;
                    }
                }
                h1 = ty - y + 1;
            }

            // Height-first: tallest run in this column, then grow rightward.
            let mut h2 = 0;
            for ty in y..height {
                let i = ty * width + x;
                if marked[i] || pixels[i] != colour {
                    break;
                }
                h2 = ty - y + 1;
            }
            let mut w2 = 1;
            'cols: for tx in (x + 1)..width {
                for ty in y..(y + h2) {
                    let i = ty * width + tx;
                    if marked[i] || pixels[i] != colour {
                        break 'cols;
                    }
                }
                w2 = tx - x + 1;
            }

            let (w, h) = if w2 * h2 > w1 * h1 { (w2, h2) } else { (w1, h1) };

            for dy in 0..h {
                for dx in 0..w {
                    marked[(y + dy) * width + (x + dx)] = true;
                }
            }

            subrects.push(Subrect {
                colour,
                x: x as u16,
                y: y as u16,
                w: w as u16,
                h: h as u16,
            });
        }
    }

    subrects
}

/// Classifies a tile's colours.
/// Returns `(is_solid, is_mono, background, foreground)`.
pub fn tile_colours(pixels: &[u32]) -> (bool, bool, u32, u32) {
    if pixels.is_empty() {
        return (true, true, 0, 0);
    }
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &pixel in pixels {
        *counts.entry(pixel).or_insert(0) += 1;
    }
    match counts.len() {
        1 => (true, true, pixels[0], 0),
        2 => {
            let mut sorted: Vec<_> = counts.into_iter().collect();
            sorted.sort_by_key(|&(colour, count)| (std::cmp::Reverse(count), colour));
            (false, true, sorted[0].0, sorted[1].0)
        }
        _ => (false, false, background_colour(pixels), 0),
    }
}

/// Copies a tile out of a packed `u32` pixel array.
pub fn extract_tile(
    pixels: &[u32],
    width: usize,
    x: usize,
    y: usize,
    tw: usize,
    th: usize,
) -> Vec<u32> {
    let mut tile = Vec::with_capacity(tw * th);
    for dy in 0..th {
        let row = (y + dy) * width + x;
        tile.extend_from_slice(&pixels[row..row + tw]);
    }
    tile
}

/// Runs `input` through a persistent zlib stream with a sync flush, so
/// the compressed block is self-contained while the dictionary carries
/// over to the next rectangle.
pub(crate) fn compress_sync(compressor: &mut Compress, input: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; input.len() / 2 + 4096];
    let mut consumed = 0usize;

    loop {
        let before_in = compressor.total_in();
        let before_out = compressor.total_out();
        compressor
            .compress(&input[consumed..], &mut buf, FlushCompress::Sync)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let used = (compressor.total_in() - before_in) as usize;
        let produced = (compressor.total_out() - before_out) as usize;
        consumed += used;
        out.extend_from_slice(&buf[..produced]);

        // Done once everything is consumed and the flush fit in the buffer.
        if consumed >= input.len() && produced < buf.len() {
            break;
        }
        if used == 0 && produced == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "zlib stream made no progress",
            ));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_sync_keeps_blocks_decodable_midstream() {
        use flate2::{Compression, Decompress, FlushDecompress};

        let mut compressor = Compress::new(Compression::new(6), true);
        let first = compress_sync(&mut compressor, b"hello hello hello").unwrap();
        let second = compress_sync(&mut compressor, b"hello again").unwrap();

        let mut decompressor = Decompress::new(true);
        let mut out = vec![0u8; 64];
        decompressor
            .decompress(&first, &mut out, FlushDecompress::Sync)
            .unwrap();
        assert_eq!(&out[..17], b"hello hello hello");

        let before = decompressor.total_out();
        decompressor
            .decompress(&second, &mut out, FlushDecompress::Sync)
            .unwrap();
        let produced = (decompressor.total_out() - before) as usize;
        assert_eq!(&out[..produced], b"hello again");
    }

    #[test]
    fn subrects_cover_all_foreground_pixels() {
        // 4x4: background 0 with an L of 1s
        let pixels = vec![
            1, 0, 0, 0, //
            1, 0, 0, 0, //
            1, 1, 0, 0, //
            0, 0, 0, 0,
        ];
        let subrects = find_subrects(&pixels, 4, 4, 0);
        let mut covered = vec![false; 16];
        for sr in &subrects {
            for dy in 0..sr.h {
                for dx in 0..sr.w {
                    covered[(sr.y + dy) as usize * 4 + (sr.x + dx) as usize] = true;
                }
            }
        }
        for (i, &p) in pixels.iter().enumerate() {
            assert_eq!(covered[i], p != 0, "pixel {i}");
        }
    }

    #[test]
    fn tile_colours_classifies() {
        assert_eq!(tile_colours(&[5, 5, 5]), (true, true, 5, 0));
        let (solid, mono, bg, fg) = tile_colours(&[5, 5, 7]);
        assert!(!solid && mono);
        assert_eq!((bg, fg), (5, 7));
        let (solid, mono, ..) = tile_colours(&[1, 2, 3]);
        assert!(!solid && !mono);
    }
}
