//! Rectangle sets
//!
//! Regions are used for damage, staged updates, and the opaque/input
//! regions pushed to the compositor. A region is kept as a list of
//! non-overlapping rectangles so area and iteration are exact.

/// An integer rectangle in surface-local logical coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// A rectangle with no area
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Overlap of two rectangles, if any
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let rect = Rect::new(x0, y0, x1 - x0, y1 - y0);
        (!rect.is_empty()).then_some(rect)
    }

    /// Pieces of `self` not covered by `other` (at most four)
    fn minus(&self, other: &Rect) -> Vec<Rect> {
        let Some(overlap) = self.intersection(other) else {
            return vec![*self];
        };

        let mut pieces = Vec::with_capacity(4);
        if overlap.y > self.y {
            pieces.push(Rect::new(self.x, self.y, self.width, overlap.y - self.y));
        }
        if overlap.bottom() < self.bottom() {
            pieces.push(Rect::new(
                self.x,
                overlap.bottom(),
                self.width,
                self.bottom() - overlap.bottom(),
            ));
        }
        if overlap.x > self.x {
            pieces.push(Rect::new(self.x, overlap.y, overlap.x - self.x, overlap.height));
        }
        if overlap.right() < self.right() {
            pieces.push(Rect::new(
                overlap.right(),
                overlap.y,
                self.right() - overlap.right(),
                overlap.height,
            ));
        }
        pieces
    }
}

/// A set of rectangles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    /// Non-overlapping, non-empty rectangles
    rects: Vec<Rect>,
}

impl Region {
    /// Create a new empty region
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// Create a region covering a single rectangle
    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    /// Add a rectangle to the region
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        let mut pieces = vec![rect];
        for existing in &self.rects {
            pieces = pieces.iter().flat_map(|p| p.minus(existing)).collect();
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
    }

    /// Union another region into this one
    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    /// Subtract a rectangle from the region
    pub fn subtract_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        self.rects = self.rects.iter().flat_map(|r| r.minus(&rect)).collect();
    }

    /// Subtract another region from this one
    pub fn subtract(&mut self, other: &Region) {
        for rect in &other.rects {
            self.subtract_rect(*rect);
        }
    }

    /// Check if the region is empty
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Covered area in square units
    pub fn area(&self) -> i64 {
        self.rects
            .iter()
            .map(|r| i64::from(r.width) * i64::from(r.height))
            .sum()
    }

    /// The rectangles making up the region
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Self::from_rect(rect)
    }
}
