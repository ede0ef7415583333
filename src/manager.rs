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

//! The encoding manager.
//!
//! Owns the worker pool and sequences each framebuffer update: CopyRect
//! records first, then solid rectangles carved out of the changed region,
//! then the remaining rectangles split and encoded in parallel, then an
//! optional rendered-cursor rectangle.

use std::sync::Arc;

use bytes::BytesMut;

use crate::caps::{PeerCaps, Subsampling};
use crate::encoding::{CodecId, ContentClass, EncoderFlags};
use crate::error::Result;
use crate::messages::UpdateWriter;
use crate::protocol;
use crate::region::{Point, Rect, Region};
use crate::stats::{equivalent_bytes, Stats};
use crate::surface::PixelSurface;
use crate::translate::translate_colour_bytes;
use crate::worker::{ManagerState, Selection, WorkItem, WorkerPool};

/// Rectangles queued for parallel encoding are split no larger than this
/// area and no wider than this width.
const SUB_RECT_MAX_AREA: i64 = 65536;
const SUB_RECT_MAX_WIDTH: i32 = 2048;

/// Side length of the blocks tested by the solid-region search.
const SOLID_SEARCH_BLOCK: i32 = 16;
/// Solid blocks smaller than this are not worth a separate rectangle.
const SOLID_BLOCK_MIN_AREA: i64 = 2048;

/// What changed since the peer's last update.
#[derive(Debug, Clone, Default)]
pub struct UpdateInfo {
    /// Pixels with new content.
    pub changed: Region,
    /// Pixels equal to a prior frame translated by `copy_delta`.
    pub copied: Region,
    /// Translation applied to `copied`; source = destination - delta.
    pub copy_delta: Point,
}

/// Server-side framebuffer encoding pipeline for one connection.
///
/// Construct once per connection and call
/// [`write_update`](EncodeManager::write_update) for every framebuffer
/// update. The worker pool lives as long as the manager; the stats
/// summary is logged when the manager is dropped.
pub struct EncodeManager {
    state: Arc<ManagerState>,
    pool: Option<WorkerPool>,
    stats: Stats,
}

impl EncodeManager {
    /// Creates the manager and spawns its worker pool.
    #[must_use]
    pub fn new() -> Self {
        let state = Arc::new(ManagerState::new());
        let pool = WorkerPool::new(Arc::clone(&state));
        Self {
            state,
            pool: Some(pool),
            stats: Stats::new(),
        }
    }

    /// Whether this pipeline can produce the given encoding at all.
    #[must_use]
    pub fn supported(encoding: i32) -> bool {
        matches!(
            encoding,
            protocol::ENCODING_RAW
                | protocol::ENCODING_RRE
                | protocol::ENCODING_HEXTILE
                | protocol::ENCODING_TIGHT
                | protocol::ENCODING_ZRLE
        )
    }

    /// Accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Emits the stats summary through the logger.
    pub fn log_stats(&self) {
        self.stats.log_summary();
    }

    /// Serializes one complete FramebufferUpdate message into `out`.
    ///
    /// Every pixel of `ui.changed` and `ui.copied` is covered by exactly
    /// one emitted rectangle. `rendered_cursor`, when present, is an
    /// extra surface whose rectangle is encoded after everything else.
    ///
    /// # Errors
    ///
    /// A codec failure aborts the current update; the pool stays usable
    /// for later updates.
    pub fn write_update(
        &mut self,
        ui: &UpdateInfo,
        surface: &Arc<dyn PixelSurface>,
        rendered_cursor: Option<&Arc<dyn PixelSurface>>,
        caps: &Arc<PeerCaps>,
        out: &mut BytesMut,
    ) -> Result<()> {
        self.stats.updates += 1;

        let selection = Arc::new(self.prepare_encoders(caps));

        let num_rects = if caps.supports_last_rect {
            protocol::LAST_RECT_SENTINEL
        } else {
            let mut count = ui.copied.num_rects() + compute_num_rects(&ui.changed);
            if rendered_cursor.is_some() {
                count += 1;
            }
            #[allow(clippy::cast_possible_truncation)] // protocol caps counts at u16
            {
                count as u16
            }
        };

        let mut writer = UpdateWriter::new(out, caps);
        writer.begin_update(num_rects);

        self.write_copy_rects(ui, caps, &mut writer);

        // Solid rects are carved out of the changed region first; only
        // possible when the rect count can stay open-ended.
        let mut changed = ui.changed.clone();
        if caps.supports_last_rect {
            self.write_solid_rects(&mut changed, surface, caps, &selection, &mut writer)?;
        }

        self.write_rects(&changed, surface, caps, &selection, &mut writer)?;

        if let Some(cursor) = rendered_cursor {
            self.state.queue_sub_rect(WorkItem {
                rect: cursor.rect(),
                surface: Arc::clone(cursor),
                caps: Arc::clone(caps),
                selection: Arc::clone(&selection),
            });
            self.flush(caps, &selection, &mut writer)?;
        }

        writer.end_update();
        Ok(())
    }

    /// Maps each content class to a codec, honoring the peer's preferred
    /// encoding and falling back by capability, and pushes the peer's
    /// levels into every selected codec.
    fn prepare_encoders(&self, caps: &PeerCaps) -> Selection {
        use CodecId::{Hextile, Raw, Rre, Tight, TightJpeg, Zrle};

        let supported =
            |codec: CodecId| self.state.with_encoder(codec, |enc| enc.is_supported(caps));
        let jpeg_ok = supported(TightJpeg) && caps.pixel_format.bits_per_pixel >= 16;

        let mut solid = Raw;
        let mut bitmap = Raw;
        let mut bitmap_rle = Raw;
        let mut indexed = Raw;
        let mut indexed_rle = Raw;
        let mut full_colour = Raw;

        // Try to respect the client's wishes.
        match caps.preferred_encoding {
            protocol::ENCODING_RRE => {
                // Horrible for anything high frequency and/or lots of colours
                bitmap_rle = Rre;
                indexed_rle = Rre;
            }
            protocol::ENCODING_HEXTILE => {
                // Slightly less horrible
                bitmap_rle = Hextile;
                indexed_rle = Hextile;
                full_colour = Hextile;
            }
            protocol::ENCODING_TIGHT => {
                full_colour = if jpeg_ok { TightJpeg } else { Tight };
                indexed = Tight;
                indexed_rle = Tight;
                bitmap = Tight;
                bitmap_rle = Tight;
            }
            protocol::ENCODING_ZRLE => {
                full_colour = Zrle;
                bitmap_rle = Zrle;
                indexed_rle = Zrle;
                bitmap = Zrle;
                indexed = Zrle;
            }
            _ => {}
        }

        // Any slots still unassigned?
        if full_colour == Raw {
            full_colour = if jpeg_ok {
                TightJpeg
            } else if supported(Zrle) {
                Zrle
            } else if supported(Tight) {
                Tight
            } else if supported(Hextile) {
                Hextile
            } else {
                Raw
            };
        }

        if indexed == Raw {
            indexed = if supported(Zrle) {
                Zrle
            } else if supported(Tight) {
                Tight
            } else if supported(Hextile) {
                Hextile
            } else {
                Raw
            };
        }

        if indexed_rle == Raw {
            indexed_rle = indexed;
        }
        if bitmap == Raw {
            bitmap = indexed;
        }
        if bitmap_rle == Raw {
            bitmap_rle = bitmap;
        }

        if solid == Raw {
            solid = if supported(Tight) {
                Tight
            } else if supported(Rre) {
                Rre
            } else if supported(Zrle) {
                Zrle
            } else if supported(Hextile) {
                Hextile
            } else {
                Raw
            };
        }

        // JPEG is the only codec that can reduce things to grayscale.
        if caps.subsampling == Subsampling::Gray && supported(TightJpeg) {
            solid = TightJpeg;
            bitmap = TightJpeg;
            bitmap_rle = TightJpeg;
            indexed = TightJpeg;
            indexed_rle = TightJpeg;
            full_colour = TightJpeg;
        }

        let active = [solid, bitmap, bitmap_rle, indexed, indexed_rle, full_colour];

        for codec in active {
            self.state.with_encoder(codec, |enc| {
                enc.set_compress_level(caps.compress_level);
                enc.set_quality_level(caps.quality_level);
                enc.set_fine_quality_level(caps.fine_quality_level, caps.subsampling);
            });
        }

        let mut flags = [EncoderFlags::default(); 6];
        let mut max_palette = [0usize; 6];
        let mut encodings = [0i32; 6];
        for codec in CodecId::ALL {
            self.state.with_encoder(codec, |enc| {
                flags[codec.index()] = enc.flags();
                max_palette[codec.index()] = enc.max_palette_size();
                encodings[codec.index()] = enc.encoding();
            });
        }

        Selection::new(active, flags, max_palette, encodings)
    }

    /// Emits CopyRect records, ordered against the copy direction so the
    /// peer never overwrites source pixels it still needs.
    fn write_copy_rects(&mut self, ui: &UpdateInfo, caps: &PeerCaps, writer: &mut UpdateWriter<'_>) {
        let before = writer.len();
        let rects = ui
            .copied
            .rects_ordered(ui.copy_delta.x <= 0, ui.copy_delta.y <= 0);
        for rect in rects {
            self.stats.copy.rects += 1;
            self.stats.copy.pixels += rect.area() as u64;
            self.stats.copy.equivalent +=
                equivalent_bytes(rect.area(), caps.pixel_format.bits_per_pixel);
            writer.copy_rect(
                rect,
                rect.tl.x - ui.copy_delta.x,
                rect.tl.y - ui.copy_delta.y,
            );
        }
        self.stats.copy.bytes += (writer.len() - before) as u64;
    }

    fn write_solid_rects(
        &mut self,
        changed: &mut Region,
        surface: &Arc<dyn PixelSurface>,
        caps: &Arc<PeerCaps>,
        selection: &Selection,
        writer: &mut UpdateWriter<'_>,
    ) -> Result<()> {
        let rects = changed.rects().to_vec();
        for rect in rects {
            self.find_solid_rect(rect, changed, surface, caps, selection, writer)?;
        }
        Ok(())
    }

    /// Searches `rect` for a large monochromatic block, extends it, writes
    /// it, subtracts it from `changed` and recurses into the leftovers.
    fn find_solid_rect(
        &mut self,
        rect: Rect,
        changed: &mut Region,
        surface: &Arc<dyn PixelSurface>,
        caps: &Arc<PeerCaps>,
        selection: &Selection,
        writer: &mut UpdateWriter<'_>,
    ) -> Result<()> {
        let bpp = surface.pixel_format().bytes_per_pixel();
        let mut colour = vec![0u8; bpp];

        let mut dy = rect.tl.y;
        while dy < rect.br.y {
            let dh = SOLID_SEARCH_BLOCK.min(rect.br.y - dy);
            let mut dx = rect.tl.x;
            while dx < rect.br.x {
                let dw = SOLID_SEARCH_BLOCK.min(rect.br.x - dx);

                surface.get_image(&mut colour, Rect::new(dx, dy, dx + 1, dy + 1));
                let block = Rect::new(dx, dy, dx + dw, dy + dh);
                if check_solid(surface, block, &colour) {
                    // Extend by whole blocks toward the rect's corner,
                    // keeping the width/height combination with the
                    // largest area.
                    let bounds = Rect::new(dx, dy, rect.br.x, rect.br.y);
                    let extended = extend_solid_area_by_block(surface, bounds, &colour);

                    let solid = if extended == rect {
                        extended
                    } else {
                        if extended.area() < SOLID_BLOCK_MIN_AREA {
                            dx += dw;
                            continue;
                        }
                        extend_solid_area_by_pixel(surface, rect, extended, &colour)
                    };

                    self.write_solid(solid, surface, &colour, caps, selection, writer)?;
                    changed.subtract_rect(solid);

                    // Search the leftovers by recursion. The strip left
                    // of the solid rect was already scanned one block
                    // high, so it only recurses when taller than that.
                    if solid.tl.x != rect.tl.x && solid.height() > SOLID_SEARCH_BLOCK {
                        let left = Rect::new(
                            rect.tl.x,
                            solid.tl.y + SOLID_SEARCH_BLOCK,
                            solid.tl.x,
                            solid.br.y,
                        );
                        self.find_solid_rect(left, changed, surface, caps, selection, writer)?;
                    }
                    if solid.br.x != rect.br.x {
                        let right = Rect::new(solid.br.x, solid.tl.y, rect.br.x, solid.br.y);
                        self.find_solid_rect(right, changed, surface, caps, selection, writer)?;
                    }
                    if solid.br.y != rect.br.y {
                        let below = Rect::new(rect.tl.x, solid.br.y, rect.br.x, rect.br.y);
                        self.find_solid_rect(below, changed, surface, caps, selection, writer)?;
                    }
                    return Ok(());
                }
                dx += dw;
            }
            dy += dh;
        }
        Ok(())
    }

    /// Writes one solid rectangle synchronously through the Solid codec.
    fn write_solid(
        &mut self,
        rect: Rect,
        surface: &Arc<dyn PixelSurface>,
        colour: &[u8],
        caps: &Arc<PeerCaps>,
        selection: &Selection,
        writer: &mut UpdateWriter<'_>,
    ) -> Result<()> {
        let codec = selection.codec_for(ContentClass::Solid);
        let before = writer.len();
        writer.start_rect(rect, selection.encoding_of(codec));

        let native_pf = surface.pixel_format();
        let mut payload = BytesMut::new();
        if selection.flags_of(codec).native_pf {
            self.state.with_encoder(codec, |enc| {
                enc.write_solid_rect(
                    rect.width(),
                    rect.height(),
                    native_pf,
                    colour,
                    caps,
                    &mut payload,
                )
            })?;
        } else {
            let converted = translate_colour_bytes(colour, native_pf, &caps.pixel_format);
            self.state.with_encoder(codec, |enc| {
                enc.write_solid_rect(
                    rect.width(),
                    rect.height(),
                    &caps.pixel_format,
                    &converted,
                    caps,
                    &mut payload,
                )
            })?;
        }
        writer.payload(&payload);

        let cell = self.stats.cell_mut(codec, ContentClass::Solid);
        cell.rects += 1;
        cell.pixels += rect.area() as u64;
        cell.bytes += (writer.len() - before) as u64;
        cell.equivalent += equivalent_bytes(rect.area(), caps.pixel_format.bits_per_pixel);
        Ok(())
    }

    /// Splits the remaining changed rects, queues them for the workers
    /// and drains the results.
    fn write_rects(
        &mut self,
        changed: &Region,
        surface: &Arc<dyn PixelSurface>,
        caps: &Arc<PeerCaps>,
        selection: &Arc<Selection>,
        writer: &mut UpdateWriter<'_>,
    ) -> Result<()> {
        for rect in changed.rects() {
            for sub in split_rect(*rect) {
                self.state.queue_sub_rect(WorkItem {
                    rect: sub,
                    surface: Arc::clone(surface),
                    caps: Arc::clone(caps),
                    selection: Arc::clone(selection),
                });
            }
        }
        self.flush(caps, selection, writer)
    }

    /// Drains worker output in submission order onto the wire.
    fn flush(
        &mut self,
        caps: &PeerCaps,
        selection: &Selection,
        writer: &mut UpdateWriter<'_>,
    ) -> Result<()> {
        let stats = &mut self.stats;
        let bpp = caps.pixel_format.bits_per_pixel;
        self.state.flush(|output| {
            let payload = output.result?;
            let before = writer.len();
            writer.start_rect(output.rect, selection.encoding_of(output.codec));
            writer.payload(&payload);

            let cell = stats.cell_mut(output.codec, output.class);
            cell.rects += 1;
            cell.pixels += output.rect.area() as u64;
            cell.bytes += (writer.len() - before) as u64;
            cell.equivalent += equivalent_bytes(output.rect.area(), bpp);
            Ok(())
        })
    }
}

impl Default for EncodeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EncodeManager {
    fn drop(&mut self) {
        // Stop the workers before the summary so the log reads in order.
        self.pool.take();
        self.log_stats();
    }
}

/// Equivalent to the standard library's (currently unstable) `i64::div_ceil`.
fn div_ceil_i64(a: i64, b: i64) -> i64 {
    let d = a / b;
    let r = a % b;
    if (r > 0 && b > 0) || (r < 0 && b < 0) {
        d + 1
    } else {
        d
    }
}

/// Number of rectangles the splitter will produce for a region.
#[must_use]
pub fn compute_num_rects(changed: &Region) -> usize {
    changed
        .rects()
        .iter()
        .map(|rect| {
            let w = i64::from(rect.width());
            let h = i64::from(rect.height());
            if w * h < SUB_RECT_MAX_AREA && w < i64::from(SUB_RECT_MAX_WIDTH) {
                1
            } else {
                let sw = w.min(i64::from(SUB_RECT_MAX_WIDTH));
                let sh = SUB_RECT_MAX_AREA / sw;
                (div_ceil_i64(w, sw) * div_ceil_i64(h, sh)) as usize
            }
        })
        .sum()
}

/// Splits a rect into sub-rects of bounded area and width, row-major.
fn split_rect(rect: Rect) -> Vec<Rect> {
    let w = i64::from(rect.width());
    let h = rect.height();

    if w * i64::from(h) < SUB_RECT_MAX_AREA && rect.width() < SUB_RECT_MAX_WIDTH {
        return vec![rect];
    }

    let sw = rect.width().min(SUB_RECT_MAX_WIDTH);
    let sh = (SUB_RECT_MAX_AREA / i64::from(sw)) as i32;

    let mut out = Vec::new();
    let mut y = rect.tl.y;
    while y < rect.br.y {
        let by = (y + sh).min(rect.br.y);
        let mut x = rect.tl.x;
        while x < rect.br.x {
            let bx = (x + sw).min(rect.br.x);
            out.push(Rect::new(x, y, bx, by));
            x = bx;
        }
        y = by;
    }
    out
}

fn check_solid(surface: &Arc<dyn PixelSurface>, rect: Rect, colour: &[u8]) -> bool {
    let (buffer, stride) = surface.get_buffer(rect);
    crate::analyze::is_solid_block(
        buffer,
        stride,
        rect.width() as usize,
        rect.height() as usize,
        surface.pixel_format(),
        colour,
    )
}

/// Grows a solid area block by block inside `bounds`. Width is searched
/// first, backing off when a different colour appears, then the next row
/// strip is tried under the narrowed width; the width/height pair with
/// the largest area wins.
fn extend_solid_area_by_block(
    surface: &Arc<dyn PixelSurface>,
    bounds: Rect,
    colour: &[u8],
) -> Rect {
    let mut w_prev = bounds.width();
    let mut w_best = 0;
    let mut h_best = 0;

    let mut dy = bounds.tl.y;
    while dy < bounds.br.y {
        let dh = SOLID_SEARCH_BLOCK.min(bounds.br.y - dy);

        // One block tested outside the x loop so the y loop can stop.
        let dw = SOLID_SEARCH_BLOCK.min(w_prev);
        if !check_solid(
            surface,
            Rect::new(bounds.tl.x, dy, bounds.tl.x + dw, dy + dh),
            colour,
        ) {
            break;
        }

        let mut dx = bounds.tl.x + dw;
        while dx < bounds.tl.x + w_prev {
            let dw = SOLID_SEARCH_BLOCK.min(bounds.tl.x + w_prev - dx);
            if !check_solid(surface, Rect::new(dx, dy, dx + dw, dy + dh), colour) {
                break;
            }
            dx += dw;
        }

        w_prev = dx - bounds.tl.x;
        let height = dy + dh - bounds.tl.y;
        if w_prev * height > w_best * h_best {
            w_best = w_prev;
            h_best = height;
        }

        dy += dh;
    }

    Rect::new(
        bounds.tl.x,
        bounds.tl.y,
        bounds.tl.x + w_best,
        bounds.tl.y + h_best,
    )
}

/// Grows a solid area one pixel row/column at a time, up, down, left,
/// right, bounded by `rect`.
fn extend_solid_area_by_pixel(
    surface: &Arc<dyn PixelSurface>,
    rect: Rect,
    start: Rect,
    colour: &[u8],
) -> Rect {
    let mut er = start;

    let mut cy = start.tl.y - 1;
    while cy >= rect.tl.y {
        if !check_solid(surface, Rect::new(start.tl.x, cy, start.br.x, cy + 1), colour) {
            break;
        }
        cy -= 1;
    }
    er.tl.y = cy + 1;

    let mut cy = start.br.y;
    while cy < rect.br.y {
        if !check_solid(surface, Rect::new(start.tl.x, cy, start.br.x, cy + 1), colour) {
            break;
        }
        cy += 1;
    }
    er.br.y = cy;

    let mut cx = start.tl.x - 1;
    while cx >= rect.tl.x {
        if !check_solid(surface, Rect::new(cx, er.tl.y, cx + 1, er.br.y), colour) {
            break;
        }
        cx -= 1;
    }
    er.tl.x = cx + 1;

    let mut cx = start.br.x;
    while cx < rect.br.x {
        if !check_solid(surface, Rect::new(cx, er.tl.y, cx + 1, er.br.y), colour) {
            break;
        }
        cx += 1;
    }
    er.br.x = cx;

    er
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_rects_are_not_split() {
        // Just under both limits.
        let rect = Rect::from_xywh(0, 0, 2047, 31);
        assert!(rect.area() < SUB_RECT_MAX_AREA);
        assert!(rect.width() < SUB_RECT_MAX_WIDTH);
        assert_eq!(split_rect(rect), vec![rect]);
        assert_eq!(compute_num_rects(&Region::from(rect)), 1);
    }

    #[test]
    fn split_count_matches_formula() {
        // 4000x40: sw=2048, sh=32 -> ceil(4000/2048)*ceil(40/32) = 4
        let rect = Rect::from_xywh(0, 0, 4000, 40);
        let subs = split_rect(rect);
        assert_eq!(subs.len(), 4);
        assert_eq!(compute_num_rects(&Region::from(rect)), 4);

        // Exactly at the area limit the split path runs but the formula
        // yields a single full-size piece.
        let rect = Rect::from_xywh(0, 0, 256, 256);
        assert_eq!(rect.area(), SUB_RECT_MAX_AREA);
        assert_eq!(split_rect(rect).len(), 1);
        assert_eq!(compute_num_rects(&Region::from(rect)), 1);

        // Just past it: 320x320, sw=320, sh=204 -> 1*2 pieces.
        let rect = Rect::from_xywh(0, 0, 320, 320);
        assert_eq!(split_rect(rect).len(), 2);
        assert_eq!(compute_num_rects(&Region::from(rect)), 2);

        // Maximum width with a short height still splits by rows.
        let rect = Rect::from_xywh(0, 0, 2048, 100);
        assert_eq!(split_rect(rect).len(), 4);
        assert_eq!(compute_num_rects(&Region::from(rect)), 4);
    }

    #[test]
    fn split_pieces_tile_the_rect_exactly() {
        let rect = Rect::from_xywh(13, 7, 3000, 500);
        let subs = split_rect(rect);
        let total: i64 = subs.iter().map(Rect::area).sum();
        assert_eq!(total, rect.area());
        assert_eq!(subs.len(), compute_num_rects(&Region::from(rect)));
        for sub in &subs {
            assert!(sub.area() <= SUB_RECT_MAX_AREA);
            assert!(sub.width() <= SUB_RECT_MAX_WIDTH);
            assert!(rect.encloses(sub));
        }
    }
}
