//! Input seat tracking
//!
//! Seats matter to the surface layer only for popups: a popup must name
//! the seat holding the grab, the serial of the input event that started
//! it, and (for parentless menus) the window under the seat's pointer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use super::WindowId;

/// Unique identifier for seats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeatId(pub u64);

impl SeatId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        SeatId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Seat capabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatCapabilities {
    pub keyboard: bool,
    pub pointer: bool,
    pub touch: bool,
}

impl SeatCapabilities {
    /// Create from Wayland capability flags
    pub fn from_wayland(flags: u32) -> Self {
        Self {
            pointer: flags & 1 != 0,
            keyboard: flags & 2 != 0,
            touch: flags & 4 != 0,
        }
    }
}

/// An input seat as seen by this client
#[derive(Debug)]
pub struct Seat {
    /// Unique identifier
    pub id: SeatId,
    /// Seat name
    name: String,
    /// Capabilities
    capabilities: SeatCapabilities,
    /// Window under the pointer
    pointer_focus: Option<WindowId>,
    /// Pointer position in the focused window's coordinates
    pointer_position: (f64, f64),
    /// Currently pressed buttons
    pressed_buttons: Vec<u32>,
    /// Serial of the last button press, which starts an implicit grab
    last_grab_serial: Option<u32>,
}

impl Seat {
    /// Create a new seat
    pub fn new(name: String) -> Self {
        Self {
            id: SeatId::new(),
            name,
            capabilities: SeatCapabilities::default(),
            pointer_focus: None,
            pointer_position: (0.0, 0.0),
            pressed_buttons: Vec::new(),
            last_grab_serial: None,
        }
    }

    /// Get the seat name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the seat name
    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Get seat capabilities
    pub fn capabilities(&self) -> SeatCapabilities {
        self.capabilities
    }

    /// Set seat capabilities
    pub fn set_capabilities(&mut self, capabilities: SeatCapabilities) {
        self.capabilities = capabilities;
    }

    /// Pointer entered a window
    pub fn pointer_enter(&mut self, window: WindowId, x: f64, y: f64) {
        self.pointer_focus = Some(window);
        self.pointer_position = (x, y);
        debug!("Seat {} pointer entered {:?} at ({}, {})", self.name, window, x, y);
    }

    /// Pointer left its window
    pub fn pointer_leave(&mut self) {
        self.pointer_focus = None;
        self.pressed_buttons.clear();
    }

    /// Pointer moved inside the focused window
    pub fn pointer_motion(&mut self, x: f64, y: f64) {
        self.pointer_position = (x, y);
    }

    /// Handle a button press or release
    pub fn pointer_button(&mut self, serial: u32, button: u32, pressed: bool) {
        if pressed {
            if !self.pressed_buttons.contains(&button) {
                self.pressed_buttons.push(button);
            }
            self.last_grab_serial = Some(serial);
        } else {
            self.pressed_buttons.retain(|b| *b != button);
        }
    }

    /// Window under the pointer
    pub fn pointer_focus(&self) -> Option<WindowId> {
        self.pointer_focus
    }

    /// Pointer position in the focused window
    pub fn pointer_position(&self) -> (f64, f64) {
        self.pointer_position
    }

    /// Serial of the last implicit grab, 0 if none was seen
    pub fn last_grab_serial(&self) -> u32 {
        self.last_grab_serial.unwrap_or(0)
    }

    /// Forget a window that is going away
    pub(crate) fn forget_window(&mut self, window: WindowId) {
        if self.pointer_focus == Some(window) {
            self.pointer_leave();
        }
    }
}

/// Manager for all seats
#[derive(Debug, Default)]
pub struct SeatManager {
    seats: HashMap<SeatId, Seat>,
    /// First advertised seat
    default_seat: Option<SeatId>,
}

impl SeatManager {
    /// Create a new seat manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a seat
    pub fn add(&mut self, seat: Seat) -> SeatId {
        let id = seat.id;
        self.seats.insert(id, seat);
        if self.default_seat.is_none() {
            self.default_seat = Some(id);
        }
        id
    }

    /// Remove a seat
    pub fn remove(&mut self, id: SeatId) -> Option<Seat> {
        let seat = self.seats.remove(&id);
        if self.default_seat == Some(id) {
            self.default_seat = self.seats.keys().next().copied();
        }
        seat
    }

    /// Get a seat by ID
    pub fn get(&self, id: SeatId) -> Option<&Seat> {
        self.seats.get(&id)
    }

    /// Get a mutable seat by ID
    pub fn get_mut(&mut self, id: SeatId) -> Option<&mut Seat> {
        self.seats.get_mut(&id)
    }

    /// The default seat
    pub fn default_seat(&self) -> Option<&Seat> {
        self.default_seat.and_then(|id| self.seats.get(&id))
    }

    /// Drop pointer focus on a window that is going away
    pub(crate) fn forget_window(&mut self, window: WindowId) {
        for seat in self.seats.values_mut() {
            seat.forget_window(window);
        }
    }

    /// Get count of seats
    pub fn len(&self) -> usize {
        self.seats.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_capabilities() {
        let caps = SeatCapabilities::from_wayland(3);
        assert!(caps.pointer);
        assert!(caps.keyboard);
        assert!(!caps.touch);
    }

    #[test]
    fn test_button_press_records_grab_serial() {
        let mut seat = Seat::new("seat0".to_string());
        assert_eq!(seat.last_grab_serial(), 0);

        seat.pointer_enter(WindowId(7), 10.0, 20.0);
        seat.pointer_button(42, 0x110, true);
        assert_eq!(seat.last_grab_serial(), 42);

        seat.pointer_button(43, 0x110, false);
        assert_eq!(seat.last_grab_serial(), 42);
        assert_eq!(seat.pointer_focus(), Some(WindowId(7)));
        assert_eq!(seat.pointer_position(), (10.0, 20.0));
    }

    #[test]
    fn test_default_seat_moves_on_remove() {
        let mut manager = SeatManager::new();
        let first = manager.add(Seat::new("seat0".to_string()));
        let second = manager.add(Seat::new("seat1".to_string()));
        assert_eq!(manager.default_seat().map(|s| s.id), Some(first));

        manager.remove(first);
        assert_eq!(manager.default_seat().map(|s| s.id), Some(second));
    }

    #[test]
    fn test_forget_window_clears_focus() {
        let mut manager = SeatManager::new();
        let id = manager.add(Seat::new("seat0".to_string()));
        manager
            .get_mut(id)
            .unwrap()
            .pointer_enter(WindowId(3), 1.0, 1.0);

        manager.forget_window(WindowId(3));
        assert_eq!(manager.get(id).unwrap().pointer_focus(), None);
    }
}
