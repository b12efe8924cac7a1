//! Client-side window state
//!
//! This module contains the plain data the surface layer works on:
//! - Window registry, types, hints and state flags
//! - Rectangle regions for damage and opaque/input areas
//! - Output (monitor) and seat tracking
//! - The event queue read by the toolkit

pub mod event;
pub mod output;
pub mod region;
pub mod seat;
pub mod window;

pub use event::{EventQueue, WindowEvent};
pub use output::{Output, OutputId, OutputManager, OutputMode};
pub use region::{Rect, Region};
pub use seat::{Seat, SeatCapabilities, SeatId, SeatManager};
pub use window::{
    Margins, TypeHint, Window, WindowAttributes, WindowId, WindowManager, WindowState, WindowType,
};
