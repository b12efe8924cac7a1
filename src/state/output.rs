//! Monitors seen through wl_output
//!
//! A window remembers which outputs its surface is on. The scale and
//! refresh rate of those outputs decide its buffer scale and the frame
//! interval used for presentation prediction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub u64);

impl OutputId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OutputId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One video mode of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub width: i32,
    pub height: i32,
    /// mHz
    pub refresh: i32,
    pub current: bool,
    pub preferred: bool,
}

impl OutputMode {
    fn same_timing(&self, other: &OutputMode) -> bool {
        (self.width, self.height, self.refresh) == (other.width, other.height, other.refresh)
    }
}

/// A monitor
#[derive(Debug, Clone)]
pub struct Output {
    pub id: OutputId,
    /// Connector name such as "DP-2" once wl_output v4 sends it
    pub name: String,
    /// Make and model, for logs
    pub description: String,
    pub modes: Vec<OutputMode>,
    current: Option<usize>,
    /// Buffer scale the compositor asks for
    pub scale: i32,
}

impl Output {
    pub fn new(name: String) -> Self {
        Self {
            id: OutputId::new(),
            name,
            description: String::new(),
            modes: Vec::new(),
            current: None,
            scale: 1,
        }
    }

    pub fn current_mode(&self) -> Option<&OutputMode> {
        self.current.and_then(|i| self.modes.get(i))
    }

    /// mHz of the current mode; 0 until one is known
    pub fn refresh_rate(&self) -> i32 {
        self.current_mode().map_or(0, |m| m.refresh)
    }

    /// Merge a wl_output.mode event. A mode flagged current demotes the
    /// one that was current before.
    pub fn add_mode(&mut self, mode: OutputMode) {
        let index = match self.modes.iter().position(|m| m.same_timing(&mode)) {
            Some(index) => {
                self.modes[index] = mode;
                index
            }
            None => {
                self.modes.push(mode);
                self.modes.len() - 1
            }
        };

        if mode.current {
            if let Some(previous) = self.current.replace(index).filter(|p| *p != index) {
                self.modes[previous].current = false;
            }
        } else if self.current == Some(index) {
            self.current = None;
        }
    }
}

/// Manager for all outputs
#[derive(Debug, Default)]
pub struct OutputManager {
    outputs: HashMap<OutputId, Output>,
    /// Advertisement order; monitor indices refer to this
    order: Vec<OutputId>,
}

impl OutputManager {
    /// Create a new output manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output
    pub fn add(&mut self, output: Output) -> OutputId {
        let id = output.id;
        self.outputs.insert(id, output);
        self.order.push(id);
        id
    }

    /// Get an output by ID
    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    /// Get a mutable output by ID
    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.get_mut(&id)
    }

    /// Remove an output
    pub fn remove(&mut self, id: OutputId) -> Option<Output> {
        self.order.retain(|o| *o != id);
        self.outputs.remove(&id)
    }

    /// Output at a monitor index, in advertisement order
    pub fn nth(&self, index: usize) -> Option<&Output> {
        self.order.get(index).and_then(|id| self.outputs.get(id))
    }

    /// Scale of an output, 1 when unknown
    pub fn scale(&self, id: OutputId) -> i32 {
        self.get(id).map(|o| o.scale.max(1)).unwrap_or(1)
    }

    /// Refresh rate of an output in mHz, 0 when unknown
    pub fn refresh_rate(&self, id: OutputId) -> i32 {
        self.get(id).map(Output::refresh_rate).unwrap_or(0)
    }

    /// Get count of outputs
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
