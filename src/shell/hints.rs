//! Geometry hints
//!
//! Size constraints a window asks the compositor to respect. Configure
//! sizes are clamped against these before they are applied.

use bitflags::bitflags;

use crate::state::Margins;

bitflags! {
    /// Which fields of [`GeometryHints`] are set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct HintFlags: u32 {
        const POS = 1 << 0;
        const MIN_SIZE = 1 << 1;
        const MAX_SIZE = 1 << 2;
        const BASE_SIZE = 1 << 3;
        const ASPECT = 1 << 4;
        const RESIZE_INC = 1 << 5;
        const WIN_GRAVITY = 1 << 6;
        const USER_POS = 1 << 7;
        const USER_SIZE = 1 << 8;
    }
}

/// Size constraints, in logical pixels including margins
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeometryHints {
    pub min_width: i32,
    pub min_height: i32,
    pub max_width: i32,
    pub max_height: i32,
    pub base_width: i32,
    pub base_height: i32,
    pub width_inc: i32,
    pub height_inc: i32,
    /// Width over height
    pub min_aspect: f64,
    pub max_aspect: f64,
}

/// Round `value` down to a multiple of `base`, towards zero
fn floor_to(value: f64, base: i32) -> i32 {
    (value / f64::from(base)) as i32 * base
}

/// Constrain a size to the hints selected by `flags`.
///
/// The result is at least 1x1.
pub fn constrain_size(hints: &GeometryHints, flags: HintFlags, width: i32, height: i32) -> (i32, i32) {
    let (mut base_width, mut base_height) = (0, 0);
    let (mut min_width, mut min_height) = (0, 0);
    let (mut max_width, mut max_height) = (i32::MAX, i32::MAX);
    let (mut xinc, mut yinc) = (1, 1);

    if flags.contains(HintFlags::BASE_SIZE) {
        base_width = hints.base_width;
        base_height = hints.base_height;
    } else if flags.contains(HintFlags::MIN_SIZE) {
        base_width = hints.min_width;
        base_height = hints.min_height;
    }

    if flags.contains(HintFlags::MIN_SIZE) {
        min_width = hints.min_width;
        min_height = hints.min_height;
    } else if flags.contains(HintFlags::BASE_SIZE) {
        min_width = hints.base_width;
        min_height = hints.base_height;
    }

    if flags.contains(HintFlags::MAX_SIZE) {
        max_width = hints.max_width;
        max_height = hints.max_height;
    }

    if flags.contains(HintFlags::RESIZE_INC) {
        xinc = xinc.max(hints.width_inc);
        yinc = yinc.max(hints.height_inc);
    }

    // Clamp without panicking when min > max
    let mut width = width.min(max_width).max(min_width);
    let mut height = height.min(max_height).max(min_height);

    width = base_width + floor_to(f64::from(width - base_width), xinc);
    height = base_height + floor_to(f64::from(height - base_height), yinc);

    if flags.contains(HintFlags::ASPECT) && hints.min_aspect > 0.0 && hints.max_aspect > 0.0 {
        let (w, h) = (f64::from(width), f64::from(height));
        if hints.min_aspect * h > w {
            let delta = floor_to(h - w / hints.min_aspect, yinc);
            if height - delta >= min_height {
                height -= delta;
            } else {
                let delta = floor_to(h * hints.min_aspect - w, xinc);
                if width.saturating_add(delta) <= max_width {
                    width += delta;
                }
            }
        }

        let (w, h) = (f64::from(width), f64::from(height));
        if hints.max_aspect * h < w {
            let delta = floor_to(w - h * hints.max_aspect, xinc);
            if width - delta >= min_width {
                width -= delta;
            } else {
                let delta = floor_to(w / hints.max_aspect - h, yinc);
                if height.saturating_add(delta) <= max_height {
                    height += delta;
                }
            }
        }
    }

    (width.max(1), height.max(1))
}

/// Minimum and maximum sizes to announce on a toplevel, margins removed.
///
/// Zero means unconstrained.
pub fn toplevel_size_limits(
    hints: &GeometryHints,
    flags: HintFlags,
    margins: &Margins,
) -> ((i32, i32), (i32, i32)) {
    let min = if flags.contains(HintFlags::MIN_SIZE) {
        (
            (hints.min_width - margins.horizontal()).max(0),
            (hints.min_height - margins.vertical()).max(0),
        )
    } else {
        (0, 0)
    };

    let max = if flags.contains(HintFlags::MAX_SIZE) {
        (
            (hints.max_width - margins.horizontal()).max(0),
            (hints.max_height - margins.vertical()).max(0),
        )
    } else {
        (0, 0)
    };

    (min, max)
}
