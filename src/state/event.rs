//! Events delivered to the toolkit
//!
//! Compositor events are never acted on synchronously by the toolkit;
//! the surface layer translates them into [`WindowEvent`]s queued here and
//! the toolkit drains the queue from its main loop.

use std::collections::VecDeque;

use super::{Rect, WindowId, WindowState};

/// An event for the toolkit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    /// The window was resized or its scale changed
    Configure {
        window: WindowId,
        width: i32,
        height: i32,
        scale: i32,
    },
    /// The user asked to close the window
    Delete { window: WindowId },
    /// The window got mapped
    Map { window: WindowId },
    /// The window got unmapped
    Unmap { window: WindowId },
    /// Maximized/fullscreen/focused/resizing state changed
    StateChanged {
        window: WindowId,
        old: WindowState,
        new: WindowState,
    },
    /// An area needs to be redrawn
    Expose { window: WindowId, area: Rect },
}

impl WindowEvent {
    /// The window the event is for
    pub fn window(&self) -> WindowId {
        match self {
            WindowEvent::Configure { window, .. }
            | WindowEvent::Delete { window }
            | WindowEvent::Map { window }
            | WindowEvent::Unmap { window }
            | WindowEvent::StateChanged { window, .. }
            | WindowEvent::Expose { window, .. } => *window,
        }
    }
}

/// FIFO of pending toolkit events
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<WindowEvent>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event
    pub fn push(&mut self, event: WindowEvent) {
        self.events.push_back(event);
    }

    /// Take the oldest event
    pub fn pop(&mut self) -> Option<WindowEvent> {
        self.events.pop_front()
    }

    /// Take every queued event
    pub fn drain(&mut self) -> Vec<WindowEvent> {
        self.events.drain(..).collect()
    }

    /// Drop queued events for a window that is going away
    pub(crate) fn forget_window(&mut self, window: WindowId) {
        self.events.retain(|e| e.window() != window);
    }

    /// Get count of queued events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
