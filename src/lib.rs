//! Waysurf - client-side Wayland window surfaces
//!
//! Waysurf gives each toolkit window a Wayland surface, decides which
//! shell role it plays, keeps its pixel buffers flowing to the compositor
//! and paces painting to the compositor's frame callbacks.
//!
//! # Architecture
//!
//! - **Surface Controller**: owns windows, outputs and seats; all state
//!   changes go through it
//! - **Shell Roles**: xdg_toplevel, xdg_popup or wl_subsurface per window
//! - **Buffer Manager**: staging/committed buffers with backfill
//! - **Frame Pacing**: frame clock freezing and presentation prediction
//! - **Protocol**: the seam between the core and a Wayland connection
//!
//! # Example
//!
//! ```no_run
//! use waysurf::client::{ClientState, EventLoop, WaylandClient};
//! use waysurf::state::{WindowAttributes, WindowType};
//! use waysurf::surface::DisplayConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let client = WaylandClient::connect(DisplayConfig::default())?;
//! let mut state = client.state;
//! let window = state
//!     .controller
//!     .create_window(WindowAttributes::new(WindowType::Toplevel, 640, 480));
//! state.controller.show(window)?;
//!
//! let mut event_loop = EventLoop::new()?;
//! event_loop.insert_connection(client.connection, client.event_queue)?;
//! event_loop.run(&mut state, ClientState::is_running)?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod shell;
pub mod state;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ProtocolError, ShmError, WindowError};
pub use protocol::{BufferId, Protocol};
pub use surface::{DisplayConfig, SurfaceController};
