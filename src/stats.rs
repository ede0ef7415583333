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

//! Encoding statistics.
//!
//! One counter cell per (codec, content class) pair plus one for
//! CopyRect. `equivalent` is the hypothetical raw cost of the same rect
//! (`12 + area * bpp/8`), the baseline for the compression ratios in the
//! summary.

use crate::encoding::{CodecId, ContentClass};

/// Counters for one cell of the stats table.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncoderStats {
    /// Rectangles emitted.
    pub rects: u64,
    /// Pixels covered.
    pub pixels: u64,
    /// Bytes actually written to the wire.
    pub bytes: u64,
    /// Bytes a Raw encoding would have cost.
    pub equivalent: u64,
}

impl EncoderStats {
    fn absorb(&mut self, other: &EncoderStats) {
        self.rects += other.rects;
        self.pixels += other.pixels;
        self.bytes += other.bytes;
        self.equivalent += other.equivalent;
    }
}

/// The full stats table for one connection.
#[derive(Debug, Default)]
pub struct Stats {
    /// Framebuffer updates written.
    pub updates: u64,
    /// CopyRect counters.
    pub copy: EncoderStats,
    cells: [[EncoderStats; 6]; 6],
}

/// Raw-equivalent wire cost of a rect: header plus uncompressed pixels.
#[must_use]
pub fn equivalent_bytes(area: i64, bits_per_pixel: u8) -> u64 {
    12 + area as u64 * u64::from(bits_per_pixel) / 8
}

impl Stats {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable access to one (codec, class) cell.
    pub fn cell_mut(&mut self, codec: CodecId, class: ContentClass) -> &mut EncoderStats {
        &mut self.cells[codec.index()][class.index()]
    }

    /// One (codec, class) cell.
    #[must_use]
    pub fn cell(&self, codec: CodecId, class: ContentClass) -> &EncoderStats {
        &self.cells[codec.index()][class.index()]
    }

    /// Total payload bytes recorded, CopyRect included.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.copy.bytes
            + self
                .cells
                .iter()
                .flatten()
                .map(|cell| cell.bytes)
                .sum::<u64>()
    }

    /// Total rectangles recorded, CopyRect included.
    #[must_use]
    pub fn total_rects(&self) -> u64 {
        self.copy.rects
            + self
                .cells
                .iter()
                .flatten()
                .map(|cell| cell.rects)
                .sum::<u64>()
    }

    /// Emits the human-readable summary. Codecs that never produced a
    /// rect are omitted.
    pub fn log_summary(&self) {
        let mut total = EncoderStats::default();

        log::info!("Framebuffer updates: {}", self.updates);

        if self.copy.rects != 0 {
            total.absorb(&self.copy);
            log::info!("  CopyRect:");
            log::info!(
                "    Copies: {}, {}",
                si_prefix(self.copy.rects, "rects"),
                si_prefix(self.copy.pixels, "pixels")
            );
            log::info!(
                "            {} (1:{:.3} ratio)",
                iec_prefix(self.copy.bytes, "B"),
                ratio(self.copy.equivalent, self.copy.bytes)
            );
        }

        for codec in CodecId::ALL {
            let row = &self.cells[codec.index()];
            if row.iter().all(|cell| cell.rects == 0) {
                continue;
            }
            log::info!("  {}:", codec.name());
            for class in ContentClass::ALL {
                let cell = &row[class.index()];
                if cell.rects == 0 {
                    continue;
                }
                total.absorb(cell);
                log::info!(
                    "    {}: {}, {}",
                    class.name(),
                    si_prefix(cell.rects, "rects"),
                    si_prefix(cell.pixels, "pixels")
                );
                log::info!(
                    "      {} (1:{:.3} ratio)",
                    iec_prefix(cell.bytes, "B"),
                    ratio(cell.equivalent, cell.bytes)
                );
            }
        }

        log::info!(
            "  Total: {}, {}",
            si_prefix(total.rects, "rects"),
            si_prefix(total.pixels, "pixels")
        );
        log::info!(
            "         {} (1:{:.3} ratio)",
            iec_prefix(total.bytes, "B"),
            ratio(total.equivalent, total.bytes)
        );
    }
}

fn ratio(equivalent: u64, bytes: u64) -> f64 {
    if bytes == 0 {
        0.0
    } else {
        equivalent as f64 / bytes as f64
    }
}

fn si_prefix(value: u64, unit: &str) -> String {
    scaled(value, unit, 1000.0, &["", "k", "M", "G", "T"])
}

fn iec_prefix(value: u64, unit: &str) -> String {
    scaled(value, unit, 1024.0, &["", "Ki", "Mi", "Gi", "Ti"])
}

fn scaled(value: u64, unit: &str, base: f64, prefixes: &[&str]) -> String {
    let mut scaled = value as f64;
    let mut prefix = 0;
    while scaled >= base && prefix + 1 < prefixes.len() {
        scaled /= base;
        prefix += 1;
    }
    if prefix == 0 {
        format!("{value} {unit}")
    } else {
        format!("{scaled:.2} {}{unit}", prefixes[prefix])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_matches_raw_cost() {
        assert_eq!(equivalent_bytes(100, 32), 12 + 400);
        assert_eq!(equivalent_bytes(100, 8), 12 + 100);
    }

    #[test]
    fn totals_roll_up_all_cells() {
        let mut stats = Stats::new();
        stats.copy.rects = 1;
        stats.copy.bytes = 4;
        let cell = stats.cell_mut(CodecId::Zrle, ContentClass::FullColour);
        cell.rects = 2;
        cell.bytes = 100;
        assert_eq!(stats.total_rects(), 3);
        assert_eq!(stats.total_bytes(), 104);
    }

    #[test]
    fn prefixes_scale() {
        assert_eq!(si_prefix(999, "rects"), "999 rects");
        assert_eq!(si_prefix(1_500_000, "pixels"), "1.50 Mpixels");
        assert_eq!(iec_prefix(2048, "B"), "2.00 KiB");
    }
}
