//! Popup placement
//!
//! The rules sent through xdg_positioner. Placement is computed here as
//! well so the rectangle a popup asks for can be checked without a
//! compositor; the compositor is still free to slide or flip it.

use crate::state::Rect;

/// Placement rules for a popup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Positioner {
    pub size: (i32, i32),
    /// Anchor rectangle in parent surface coordinates
    pub anchor_rect: (i32, i32, i32, i32),
    pub anchor: Anchor,
    pub gravity: Gravity,
    pub offset: (i32, i32),
}

impl Positioner {
    /// Place a `width`x`height` popup with its top-left corner at (x, y)
    /// in the parent.
    ///
    /// The anchor is a 1x1 rectangle at the requested point, anchored at
    /// its top-left corner and growing towards the bottom right, which is
    /// how a menu opened at a point expects to be placed.
    pub fn at_point(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            size: (width.max(1), height.max(1)),
            anchor_rect: (x, y, 1, 1),
            anchor: Anchor::TopLeft,
            gravity: Gravity::BottomRight,
            offset: (0, 0),
        }
    }

    /// Where the popup lands relative to the parent when nothing has to
    /// be adjusted
    pub fn placement(&self) -> Rect {
        let (ax, ay, aw, ah) = self.anchor_rect;
        let (ex, ey) = self.anchor.edges();
        let point = (ax + aw * (ex + 1) / 2, ay + ah * (ey + 1) / 2);

        // Gravity points away from the anchor: right means the popup
        // starts at the anchor point, left means it ends there
        let (width, height) = self.size;
        let (gx, gy) = self.gravity.edges();
        let x = point.0 - width * (1 - gx) / 2;
        let y = point.1 - height * (1 - gy) / 2;

        Rect::new(x + self.offset.0, y + self.offset.1, width, height)
    }
}

/// Point of the anchor rectangle the popup is attached to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Anchor {
    /// Center
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Anchor {
    /// Horizontal and vertical edge: -1 left/top, 0 center, 1 right/bottom
    fn edges(self) -> (i32, i32) {
        match self {
            Anchor::None => (0, 0),
            Anchor::Top => (0, -1),
            Anchor::Bottom => (0, 1),
            Anchor::Left => (-1, 0),
            Anchor::Right => (1, 0),
            Anchor::TopLeft => (-1, -1),
            Anchor::TopRight => (1, -1),
            Anchor::BottomLeft => (-1, 1),
            Anchor::BottomRight => (1, 1),
        }
    }
}

/// Direction the popup extends from the anchor point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Gravity {
    /// Centered on the anchor point
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Gravity {
    fn edges(self) -> (i32, i32) {
        match self {
            Gravity::None => (0, 0),
            Gravity::Top => (0, -1),
            Gravity::Bottom => (0, 1),
            Gravity::Left => (-1, 0),
            Gravity::Right => (1, 0),
            Gravity::TopLeft => (-1, -1),
            Gravity::TopRight => (1, -1),
            Gravity::BottomLeft => (-1, 1),
            Gravity::BottomRight => (1, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_and_gravity() {
        let mut positioner = Positioner {
            size: (200, 100),
            anchor_rect: (0, 0, 100, 50),
            anchor: Anchor::BottomRight,
            gravity: Gravity::BottomRight,
            offset: (0, 0),
        };
        assert_eq!(positioner.placement(), Rect::new(100, 50, 200, 100));

        // Opening upwards to the left of a button
        positioner.anchor = Anchor::TopLeft;
        positioner.gravity = Gravity::TopLeft;
        assert_eq!(positioner.placement(), Rect::new(-200, -100, 200, 100));
    }

    #[test]
    fn test_at_point_places_top_left() {
        let positioner = Positioner::at_point(30, 40, 120, 80);
        assert_eq!(positioner.placement(), Rect::new(30, 40, 120, 80));

        // Degenerate sizes are never sent
        assert_eq!(Positioner::at_point(0, 0, 0, -5).size, (1, 1));
    }

    #[test]
    fn test_centered_gravity_with_offset() {
        let positioner = Positioner {
            size: (20, 10),
            anchor_rect: (0, 0, 100, 100),
            offset: (3, -2),
            ..Default::default()
        };

        assert_eq!(positioner.placement(), Rect::new(43, 43, 20, 10));
    }
}
