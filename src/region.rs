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

//! Rectangle and region geometry.
//!
//! A [`Region`] is a set of disjoint axis-aligned rectangles whose union is
//! the geometric region; all operations preserve disjointness. Rectangles
//! use an inclusive top-left / exclusive bottom-right convention.

/// A 2D point with integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

impl Point {
    /// Creates a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle: inclusive top-left, exclusive bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Top-left corner (inclusive).
    pub tl: Point,
    /// Bottom-right corner (exclusive).
    pub br: Point,
}

impl Rect {
    /// Creates a rectangle from its two corners.
    #[must_use]
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            tl: Point::new(x1, y1),
            br: Point::new(x2, y2),
        }
    }

    /// Creates a rectangle from position and dimensions.
    #[must_use]
    pub const fn from_xywh(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.br.x - self.tl.x
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.br.y - self.tl.y
    }

    /// Area in pixels.
    #[must_use]
    pub const fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Whether the rectangle covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tl.x >= self.br.x || self.tl.y >= self.br.y
    }

    /// Whether `p` lies inside the rectangle.
    #[must_use]
    pub const fn contains_point(&self, p: Point) -> bool {
        p.x >= self.tl.x && p.x < self.br.x && p.y >= self.tl.y && p.y < self.br.y
    }

    /// Whether `other` lies entirely inside this rectangle.
    #[must_use]
    pub const fn encloses(&self, other: &Rect) -> bool {
        other.tl.x >= self.tl.x
            && other.tl.y >= self.tl.y
            && other.br.x <= self.br.x
            && other.br.y <= self.br.y
    }

    /// Intersection of two rectangles; empty when they do not overlap.
    #[must_use]
    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect::new(
            self.tl.x.max(other.tl.x),
            self.tl.y.max(other.tl.y),
            self.br.x.min(other.br.x),
            self.br.y.min(other.br.y),
        );
        if r.is_empty() {
            Rect::default()
        } else {
            r
        }
    }

    /// Whether two rectangles overlap by at least one pixel.
    #[must_use]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.tl.x < other.br.x
            && other.tl.x < self.br.x
            && self.tl.y < other.br.y
            && other.tl.y < self.br.y
    }

    /// Rectangle translated by `(dx, dy)`.
    #[must_use]
    pub const fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.tl.x + dx, self.tl.y + dy, self.br.x + dx, self.br.y + dy)
    }

    /// The parts of `self` not covered by `other`, as up to four disjoint
    /// rectangles (top band, bottom band, left slice, right slice).
    fn subtract(&self, other: &Rect) -> Vec<Rect> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut out = Vec::with_capacity(4);
        let inner = self.intersect(other);
        if inner.tl.y > self.tl.y {
            out.push(Rect::new(self.tl.x, self.tl.y, self.br.x, inner.tl.y));
        }
        if inner.br.y < self.br.y {
            out.push(Rect::new(self.tl.x, inner.br.y, self.br.x, self.br.y));
        }
        if inner.tl.x > self.tl.x {
            out.push(Rect::new(self.tl.x, inner.tl.y, inner.tl.x, inner.br.y));
        }
        if inner.br.x < self.br.x {
            out.push(Rect::new(inner.br.x, inner.tl.y, self.br.x, inner.br.y));
        }
        out
    }
}

/// A set of disjoint rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// Creates an empty region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the region covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of rectangles in the canonical decomposition.
    #[must_use]
    pub fn num_rects(&self) -> usize {
        self.rects.len()
    }

    /// Total covered area in pixels.
    #[must_use]
    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Whether `p` is covered by the region.
    #[must_use]
    pub fn contains_point(&self, p: Point) -> bool {
        self.rects.iter().any(|r| r.contains_point(p))
    }

    /// Adds a rectangle to the region, keeping the decomposition disjoint.
    pub fn add_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        // Keep only the parts not already covered.
        let mut pieces = vec![rect];
        for existing in &self.rects {
            let mut next = Vec::with_capacity(pieces.len());
            for piece in pieces {
                next.extend(piece.subtract(existing));
            }
            pieces = next;
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
        self.normalize();
    }

    /// Unions another region into this one.
    pub fn add_region(&mut self, other: &Region) {
        for r in &other.rects {
            self.add_rect(*r);
        }
    }

    /// Removes a rectangle from the region.
    pub fn subtract_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut out = Vec::with_capacity(self.rects.len());
        for r in &self.rects {
            out.extend(r.subtract(&rect));
        }
        self.rects = out;
        self.normalize();
    }

    /// Removes another region from this one.
    pub fn subtract_region(&mut self, other: &Region) {
        for r in &other.rects {
            self.subtract_rect(*r);
        }
    }

    /// Canonical list of disjoint rectangles, top-down then left-to-right.
    #[must_use]
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Rectangles ordered for emission. When `left_to_right` or `top_down`
    /// is false the corresponding axis is reversed, which CopyRect emission
    /// uses to avoid the peer overwriting source pixels it still needs.
    #[must_use]
    pub fn rects_ordered(&self, left_to_right: bool, top_down: bool) -> Vec<Rect> {
        let mut out = self.rects.clone();
        out.sort_by(|a, b| {
            let ya = if top_down { a.tl.y } else { -a.tl.y };
            let yb = if top_down { b.tl.y } else { -b.tl.y };
            let xa = if left_to_right { a.tl.x } else { -a.tl.x };
            let xb = if left_to_right { b.tl.x } else { -b.tl.x };
            ya.cmp(&yb).then(xa.cmp(&xb))
        });
        out
    }

    fn normalize(&mut self) {
        self.rects.retain(|r| !r.is_empty());
        self.rects
            .sort_by(|a, b| a.tl.y.cmp(&b.tl.y).then(a.tl.x.cmp(&b.tl.x)));
        // Merge horizontally adjacent rects sharing a row band.
        let mut merged: Vec<Rect> = Vec::with_capacity(self.rects.len());
        for r in &self.rects {
            if let Some(last) = merged.last_mut() {
                if last.tl.y == r.tl.y && last.br.y == r.br.y && last.br.x == r.tl.x {
                    last.br.x = r.br.x;
                    continue;
                }
            }
            merged.push(*r);
        }
        self.rects = merged;
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        let mut region = Region::new();
        region.add_rect(rect);
        region
    }
}
