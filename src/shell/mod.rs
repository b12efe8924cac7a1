//! Shell roles
//!
//! A mapped surface gets exactly one role: an xdg toplevel, an xdg popup
//! attached to a parent, or a subsurface of its transient parent. This
//! module holds the role state and the pure decision logic; the
//! [`SurfaceController`](crate::surface::SurfaceController) carries the
//! decisions out against the compositor.

pub mod hints;
pub mod positioner;

pub use hints::{constrain_size, toplevel_size_limits, GeometryHints, HintFlags};
pub use positioner::{Anchor, Gravity, Positioner};

use bitflags::bitflags;

use crate::state::{SeatId, SeatManager, TypeHint, Window, WindowId, WindowManager, WindowState, WindowType};

/// Role of a window's surface
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShellRole {
    /// No role object yet
    #[default]
    Unrealized,
    Toplevel(ToplevelRole),
    Popup(PopupRole),
    Subsurface(SubsurfaceRole),
    /// The window is gone
    Destroyed,
}

/// State of an xdg toplevel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToplevelRole {
    /// Parent last sent with set_parent
    pub parent: Option<WindowId>,
    /// At least one configure was acked
    pub configured: bool,
}

/// State of an xdg popup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupRole {
    pub parent: WindowId,
    /// Seat that grabbed the popup
    pub seat: Option<SeatId>,
    /// The first configure was acked
    pub configured: bool,
}

/// State of a subsurface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsurfaceRole {
    pub parent: WindowId,
    /// Still synchronized with the parent, waiting for its next commit
    pub synchronized: bool,
}

bitflags! {
    /// States carried by an xdg_toplevel.configure
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ConfigureStates: u32 {
        const MAXIMIZED = 1 << 0;
        const FULLSCREEN = 1 << 1;
        const RESIZING = 1 << 2;
        const ACTIVATED = 1 << 3;
    }
}

impl ConfigureStates {
    /// Translate into window state flags; iconified is never reported
    pub fn to_window_state(self) -> WindowState {
        let mut state = WindowState::empty();
        if self.contains(ConfigureStates::FULLSCREEN) {
            state |= WindowState::FULLSCREEN;
        }
        if self.contains(ConfigureStates::MAXIMIZED) {
            state |= WindowState::MAXIMIZED;
        }
        if self.contains(ConfigureStates::ACTIVATED) {
            state |= WindowState::FOCUSED;
        }
        if self.contains(ConfigureStates::RESIZING) {
            state |= WindowState::RESIZING;
        }
        state
    }
}

/// Size to apply for a toplevel configure, margins included.
///
/// A 0x0 configure leaves the size to us: outside maximize and fullscreen
/// that means going back to the saved size. Resize increments are ignored
/// while the compositor dictates the size. `None` means keep the current
/// size.
pub fn configure_size(window: &Window, width: i32, height: i32, new_state: WindowState) -> Option<(i32, i32)> {
    let maximized_or_fullscreen = new_state.is_maximized_or_fullscreen();

    let (width, height) = match window.saved_size {
        Some(saved) if width == 0 && height == 0 && !maximized_or_fullscreen => saved,
        _ => (width, height),
    };

    if width <= 0 || height <= 0 {
        return None;
    }

    let mut mask = window.geometry_mask;
    if maximized_or_fullscreen {
        mask.remove(HintFlags::RESIZE_INC);
    }

    Some(constrain_size(
        &window.geometry_hints,
        mask,
        width + window.margins.horizontal(),
        height + window.margins.vertical(),
    ))
}

/// What a window becomes when it is mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDecision {
    /// Stays invisible
    Unmapped,
    /// Subsurface of the parent; without a parent it is created once one
    /// is set
    Subsurface { parent: Option<WindowId> },
    /// xdg popup
    Popup {
        parent: WindowId,
        seat: SeatId,
        /// Position to start at, in fake root coordinates
        position: Option<(i32, i32)>,
    },
    Toplevel,
}

/// Windows that must never get a surface role
pub fn should_be_mapped(window: &Window) -> bool {
    // Offscreen temporary windows are toolkit internals
    if window.window_type == WindowType::Popup && window.x < 0 && window.y < 0 {
        return false;
    }
    window.hint != TypeHint::Dnd
}

/// Popup-like by hint or by having a parent and a grab
pub fn should_map_as_popup(window: &Window) -> bool {
    if window.window_type == WindowType::Popup {
        if window.transient_for.is_some() {
            if window.grab_seat.is_some() {
                return true;
            }
        } else {
            log::info!(
                "Window {:?} is a temporary window without parent, it cannot be positioned",
                window.id
            );
        }
    }

    match window.hint {
        TypeHint::PopupMenu | TypeHint::DropdownMenu | TypeHint::Combo => true,
        TypeHint::Utility => window.window_type != WindowType::Popup,
        _ => false,
    }
}

/// Embedded in the parent surface
pub fn should_map_as_subsurface(windows: &WindowManager, window: &Window) -> bool {
    match window.window_type {
        WindowType::Subsurface | WindowType::Child => return true,
        WindowType::Popup => {}
        _ => return false,
    }

    if should_map_as_popup(window) {
        return false;
    }

    match windows.transient_for(window.id) {
        Some(parent) if windows.get(parent).is_some_and(|p| p.mapped) => true,
        Some(_) => {
            log::warn!(
                "Couldn't map window {:?} as subsurface because its parent is not mapped",
                window.id
            );
            false
        }
        None => false,
    }
}

/// Seat holding the grab for a popup.
///
/// Our own grab seat, then the grab-transfer window's, then the first
/// one up the transient chain starting at `parent`.
pub fn find_grab_seat(windows: &WindowManager, id: WindowId, parent: WindowId) -> Option<SeatId> {
    let window = windows.get(id)?;
    if let Some(seat) = window.grab_seat {
        return Some(seat);
    }

    if let Some(seat) = window
        .attached_grab_window
        .and_then(|w| windows.get(w))
        .and_then(|w| w.grab_seat)
    {
        return Some(seat);
    }

    std::iter::once(parent)
        .chain(windows.ancestors(parent))
        .find_map(|w| windows.get(w).and_then(|w| w.grab_seat))
}

/// Find where a parentless menu should go: the window under the pointer
/// of the grabbing seat.
///
/// Returns the popup parent and, unless the position was set explicitly,
/// the pointer position in fake root coordinates.
fn pointer_parent(
    windows: &WindowManager,
    seats: &SeatManager,
    window: &Window,
) -> Option<(WindowId, Option<(i32, i32)>)> {
    let seat = window.grab_seat.or_else(|| {
        window
            .attached_grab_window
            .and_then(|w| windows.get(w))
            .and_then(|w| w.grab_seat)
    })?;
    let seat = seats.get(seat)?;

    let focus = seat.pointer_focus().filter(|w| windows.contains(*w))?;
    let parent = windows.popup_parent(focus)?;

    let position = (!window.position_set).then(|| {
        let (px, py) = seat.pointer_position();
        let (fx, fy) = windows.fake_root_coords(focus);
        (fx + px as i32, fy + py as i32)
    });

    Some((parent, position))
}

/// Pick the role for a window about to be mapped
pub fn decide_role(windows: &WindowManager, seats: &SeatManager, id: WindowId) -> RoleDecision {
    let Some(window) = windows.get(id) else {
        return RoleDecision::Unmapped;
    };

    if !should_be_mapped(window) {
        return RoleDecision::Unmapped;
    }

    if should_map_as_subsurface(windows, window) {
        let parent = windows.transient_for(id);
        if parent.is_none() {
            log::warn!(
                "Couldn't map window {:?} as subsurface yet because it doesn't have a parent",
                id
            );
        }
        return RoleDecision::Subsurface { parent };
    }

    if !should_map_as_popup(window) {
        return RoleDecision::Toplevel;
    }

    let parentless_menu = windows.transient_for(id).is_none()
        && matches!(window.hint, TypeHint::PopupMenu | TypeHint::DropdownMenu);

    let (parent, position) = if parentless_menu {
        match pointer_parent(windows, seats, window) {
            Some((parent, position)) => (Some(parent), position),
            None => (None, None),
        }
    } else {
        let parent = windows
            .transient_for(id)
            .and_then(|parent| windows.popup_parent(parent));
        (parent, None)
    };

    let Some(parent) = parent else {
        log::warn!(
            "Couldn't map window {:?} as popup because it doesn't have a parent",
            id
        );
        return RoleDecision::Toplevel;
    };

    let seat = match find_grab_seat(windows, id, parent) {
        Some(seat) => seat,
        None => {
            log::warn!(
                "No grabbed seat found, using the default one to map popup {:?}; \
                 grab input when showing popups",
                id
            );
            match seats.default_seat() {
                Some(seat) => seat.id,
                None => {
                    log::warn!("No seat available for popup {:?}, mapping it as toplevel", id);
                    return RoleDecision::Toplevel;
                }
            }
        }
    };

    RoleDecision::Popup {
        parent,
        seat,
        position,
    }
}
