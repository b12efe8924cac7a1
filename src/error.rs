//! Error types

use crate::state::WindowId;

/// Errors from window operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("Unknown window {0:?}")]
    UnknownWindow(WindowId),
    #[error("Setting {window:?} transient for {parent:?} would create a loop")]
    TransientLoop { window: WindowId, parent: WindowId },
}

/// Errors from shared memory buffer allocation
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("Invalid buffer size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },
    #[error("Failed to create shared memory file: {0}")]
    Memfd(#[source] std::io::Error),
    #[error("Failed to map shared memory: {0}")]
    Map(#[source] std::io::Error),
}

/// Errors raised by a protocol implementation
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Compositor does not advertise {0}")]
    MissingGlobal(&'static str),
    #[error(transparent)]
    Shm(#[from] ShmError),
    #[error("Wayland connection error: {0}")]
    Connection(String),
}
