//! Window registry
//!
//! Every logical drawable is a [`Window`] stored in the [`WindowManager`]
//! arena and referred to by [`WindowId`]. Ids are never reused, so an id
//! held by a late compositor callback either resolves to the live window
//! or to nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::{OutputId, Region, SeatId};
use crate::frame::{FrameClock, FramePacer};
use crate::shell::{GeometryHints, HintFlags, ShellRole};

/// Unique identifier for windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl WindowId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        WindowId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Kind of window, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowType {
    /// Regular application window
    #[default]
    Toplevel,
    /// Temporary window (menus, tooltips, dropdowns)
    Popup,
    /// Child window embedded in its transient parent
    Child,
    /// Explicit subsurface of its transient parent
    Subsurface,
    /// Window created by someone else
    Foreign,
}

/// What the window is used for; drives the role decision at map time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeHint {
    #[default]
    Normal,
    Dialog,
    Menu,
    Toolbar,
    Splashscreen,
    Utility,
    Dock,
    Desktop,
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Notification,
    Combo,
    Dnd,
}

bitflags! {
    /// Window state as negotiated with the compositor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct WindowState: u32 {
        const ICONIFIED = 1 << 0;
        const MAXIMIZED = 1 << 1;
        const FULLSCREEN = 1 << 2;
        const FOCUSED = 1 << 3;
        const RESIZING = 1 << 4;
    }
}

impl WindowState {
    /// Maximized or fullscreen; the compositor dictates the size
    pub fn is_maximized_or_fullscreen(self) -> bool {
        self.intersects(WindowState::MAXIMIZED | WindowState::FULLSCREEN)
    }
}

/// Invisible shadow insets around the visible window geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Margins {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl Margins {
    /// Total horizontal inset
    pub fn horizontal(&self) -> i32 {
        self.left + self.right
    }

    /// Total vertical inset
    pub fn vertical(&self) -> i32 {
        self.top + self.bottom
    }
}

/// Attributes for creating a window
#[derive(Debug, Clone, Default)]
pub struct WindowAttributes {
    pub window_type: WindowType,
    pub hint: TypeHint,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub title: Option<String>,
    pub transient_for: Option<WindowId>,
}

impl WindowAttributes {
    /// Attributes for a window of the given type and size
    pub fn new(window_type: WindowType, width: i32, height: i32) -> Self {
        Self {
            window_type,
            width,
            height,
            ..Self::default()
        }
    }

    /// Set the type hint
    pub fn with_hint(mut self, hint: TypeHint) -> Self {
        self.hint = hint;
        self
    }

    /// Set the initial position
    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the transient parent
    pub fn with_transient_for(mut self, parent: WindowId) -> Self {
        self.transient_for = Some(parent);
        self
    }
}

/// A logical drawable
#[derive(Debug)]
pub struct Window {
    /// Unique identifier
    pub id: WindowId,
    pub window_type: WindowType,
    pub hint: TypeHint,
    /// Position; relative to the transient parent for popups/subsurfaces
    pub x: i32,
    pub y: i32,
    /// Size in logical pixels, margins included
    pub width: i32,
    pub height: i32,
    /// Buffer scale factor
    pub scale: i32,
    /// Weak reference; may name a window that no longer exists
    pub transient_for: Option<WindowId>,
    pub mapped: bool,
    pub margins: Margins,
    pub opaque_region: Option<Region>,
    pub input_region: Option<Region>,
    pub title: Option<String>,
    pub state: WindowState,
    pub geometry_hints: GeometryHints,
    pub geometry_mask: HintFlags,
    /// Last un-maximized size without margins, restored on a 0x0 configure
    pub saved_size: Option<(i32, i32)>,
    /// Seat that took a grab on this window
    pub grab_seat: Option<SeatId>,
    /// Grab-transfer window whose seat stands in for ours
    pub attached_grab_window: Option<WindowId>,
    /// An explicit position was requested
    pub position_set: bool,
    /// The application drives the role itself
    pub use_custom_surface: bool,
    /// Rendering goes through a GPU surface, not shm buffers
    pub use_gpu: bool,
    /// Monitor to go fullscreen on once the toplevel exists
    pub initial_fullscreen_monitor: Option<usize>,
    /// Outputs the surface currently intersects
    pub outputs: Vec<OutputId>,
    /// A protocol surface exists
    pub has_surface: bool,
    pub role: ShellRole,
    pub pacer: FramePacer,
    pub clock: FrameClock,
    /// One-shot listeners fired on this window's next commit
    pub commit_listeners: Vec<WindowId>,
}

impl Window {
    /// Create a new window
    pub fn new(attributes: WindowAttributes) -> Self {
        Self {
            id: WindowId::new(),
            window_type: attributes.window_type,
            hint: attributes.hint,
            x: attributes.x,
            y: attributes.y,
            width: attributes.width,
            height: attributes.height,
            scale: 1,
            transient_for: attributes.transient_for,
            mapped: false,
            margins: Margins::default(),
            opaque_region: None,
            input_region: None,
            title: attributes.title,
            state: WindowState::empty(),
            geometry_hints: GeometryHints::default(),
            geometry_mask: HintFlags::empty(),
            saved_size: None,
            grab_seat: None,
            attached_grab_window: None,
            position_set: false,
            use_custom_surface: false,
            use_gpu: false,
            initial_fullscreen_monitor: None,
            outputs: Vec::new(),
            has_surface: false,
            role: ShellRole::Unrealized,
            pacer: FramePacer::default(),
            clock: FrameClock::default(),
            commit_listeners: Vec::new(),
        }
    }

    /// Remember the current size for a later 0x0 configure
    pub fn save_size(&mut self) {
        if self.state.is_maximized_or_fullscreen() {
            return;
        }
        self.saved_size = Some((
            self.width - self.margins.horizontal(),
            self.height - self.margins.vertical(),
        ));
    }

    /// Forget the saved size
    pub fn clear_saved_size(&mut self) {
        if self.state.is_maximized_or_fullscreen() {
            return;
        }
        self.saved_size = None;
    }

    /// Has a toplevel or popup role, so popups can be parented to it
    pub fn can_parent_popups(&self) -> bool {
        matches!(self.role, ShellRole::Toplevel(_) | ShellRole::Popup(_))
    }
}

/// Manager for all windows
#[derive(Debug, Default)]
pub struct WindowManager {
    windows: HashMap<WindowId, Window>,
}

impl WindowManager {
    /// Create a new window manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a window and return its ID
    pub fn insert(&mut self, window: Window) -> WindowId {
        let id = window.id;
        self.windows.insert(id, window);
        id
    }

    /// Get a window by ID
    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    /// Get a mutable window by ID
    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    /// Is the window alive
    pub fn contains(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    /// Remove a window
    pub fn remove(&mut self, id: WindowId) -> Option<Window> {
        self.windows.remove(&id)
    }

    /// Live transient parent of a window
    pub fn transient_for(&self, id: WindowId) -> Option<WindowId> {
        self.get(id)
            .and_then(|w| w.transient_for)
            .filter(|parent| self.contains(*parent))
    }

    /// The live transient-parent chain, nearest first
    pub fn ancestors(&self, id: WindowId) -> Vec<WindowId> {
        let mut chain = Vec::new();
        let mut current = self.transient_for(id);
        while let Some(parent) = current {
            if chain.contains(&parent) || parent == id {
                break;
            }
            chain.push(parent);
            current = self.transient_for(parent);
        }
        chain
    }

    /// Would making `parent` the transient parent of `window` form a cycle
    pub fn would_create_loop(&self, window: WindowId, parent: Option<WindowId>) -> bool {
        match parent {
            None => false,
            Some(parent) if parent == window => true,
            Some(parent) => self.ancestors(parent).contains(&window),
        }
    }

    /// Position in "fake root" coordinates.
    ///
    /// Wayland has no global coordinate space. We pretend each toplevel
    /// sits at (0, 0) and popups and subsurfaces are offset from their
    /// transient parent, so this is the sum of positions along the
    /// transient chain. It is an approximation useful for placing popups
    /// relative to each other, never a real screen position.
    pub fn fake_root_coords(&self, id: WindowId) -> (i32, i32) {
        let Some(window) = self.get(id) else {
            return (0, 0);
        };

        let mut x = window.x;
        let mut y = window.y;
        for ancestor in self.ancestors(id) {
            if let Some(w) = self.get(ancestor) {
                x += w.x;
                y += w.y;
            }
        }
        (x, y)
    }

    /// Nearest window, starting at `id` itself, that has a toplevel or
    /// popup role
    pub fn popup_parent(&self, id: WindowId) -> Option<WindowId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|w| self.get(*w).is_some_and(Window::can_parent_popups))
    }

    /// Get all windows
    pub fn iter(&self) -> impl Iterator<Item = (&WindowId, &Window)> {
        self.windows.iter()
    }

    /// Get all windows mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&WindowId, &mut Window)> {
        self.windows.iter_mut()
    }

    /// Get count of windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(manager: &mut WindowManager, parent: Option<WindowId>, x: i32, y: i32) -> WindowId {
        let mut attributes = WindowAttributes::new(WindowType::Popup, 10, 10).with_position(x, y);
        attributes.transient_for = parent;
        manager.insert(Window::new(attributes))
    }

    #[test]
    fn test_window_id_unique() {
        let id1 = WindowId::new();
        let id2 = WindowId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_window_new() {
        let window = Window::new(WindowAttributes::new(WindowType::Toplevel, 800, 600).with_title("x"));
        assert_eq!(window.width, 800);
        assert_eq!(window.scale, 1);
        assert_eq!(window.role, ShellRole::Unrealized);
        assert_eq!(window.title.as_deref(), Some("x"));
    }

    #[test]
    fn test_fake_root_coords_sum_chain() {
        let mut manager = WindowManager::new();
        let root = chain(&mut manager, None, 0, 0);
        let menu = chain(&mut manager, Some(root), 10, 20);
        let submenu = chain(&mut manager, Some(menu), 100, 5);

        assert_eq!(manager.fake_root_coords(root), (0, 0));
        assert_eq!(manager.fake_root_coords(menu), (10, 20));
        assert_eq!(manager.fake_root_coords(submenu), (110, 25));
    }

    #[test]
    fn test_loop_detection() {
        let mut manager = WindowManager::new();
        let a = chain(&mut manager, None, 0, 0);
        let b = chain(&mut manager, Some(a), 0, 0);
        let c = chain(&mut manager, Some(b), 0, 0);

        assert!(manager.would_create_loop(a, Some(c)));
        assert!(manager.would_create_loop(a, Some(a)));
        assert!(!manager.would_create_loop(c, Some(a)));
        assert!(!manager.would_create_loop(a, None));
    }

    #[test]
    fn test_dead_parent_reads_as_none() {
        let mut manager = WindowManager::new();
        let a = chain(&mut manager, None, 0, 0);
        let b = chain(&mut manager, Some(a), 3, 4);
        manager.remove(a);

        assert_eq!(manager.transient_for(b), None);
        assert_eq!(manager.fake_root_coords(b), (3, 4));
    }

    #[test]
    fn test_saved_size_skips_maximized() {
        let mut window = Window::new(WindowAttributes::new(WindowType::Toplevel, 800, 600));
        window.margins = Margins {
            left: 10,
            right: 10,
            top: 5,
            bottom: 5,
        };
        window.save_size();
        assert_eq!(window.saved_size, Some((780, 590)));

        window.state = WindowState::MAXIMIZED;
        window.width = 1920;
        window.save_size();
        window.clear_saved_size();
        assert_eq!(window.saved_size, Some((780, 590)));
    }
}
