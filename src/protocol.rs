//! Compositor protocol seam
//!
//! The surface layer talks to the compositor only through [`Protocol`].
//! Requests name objects by the ids the core already owns (one surface,
//! at most one role object and one subsurface per [`WindowId`]; buffers by
//! [`BufferId`]). The implementation maps ids to its protocol objects and
//! routes events carrying those ids back into the
//! [`SurfaceController`](crate::surface::SurfaceController).
//!
//! Requests are fire-and-forget, matching the wire protocol. Only buffer
//! allocation can fail synchronously.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ProtocolError;
use crate::shell::Positioner;
use crate::state::{OutputId, Rect, Region, SeatId, WindowId};

/// Unique identifier for pixel buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

impl BufferId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        BufferId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Bytes per pixel of every buffer we allocate (ARGB8888)
pub const BYTES_PER_PIXEL: i32 = 4;

/// Memory behind a pixel buffer
pub trait PixelStorage: std::fmt::Debug {
    /// Read access to the pixels
    fn pixels(&self) -> &[u8];

    /// Write access to the pixels
    fn pixels_mut(&mut self) -> &mut [u8];
}

/// Client-only pixel memory, never shared with the compositor
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    /// Zeroed storage for a `width`x`height` ARGB image
    pub fn new(width: i32, height: i32) -> Self {
        let len = width.max(0) as usize * height.max(0) as usize * BYTES_PER_PIXEL as usize;
        Self { data: vec![0; len] }
    }
}

impl PixelStorage for MemoryStorage {
    fn pixels(&self) -> &[u8] {
        &self.data
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Requests the surface layer issues to the compositor
pub trait Protocol {
    /// wl_compositor version; buffer scale needs 3 or later
    fn compositor_version(&self) -> u32;

    // wl_surface

    /// Create the surface for a window
    fn create_surface(&mut self, window: WindowId);
    /// Destroy the surface of a window
    fn destroy_surface(&mut self, window: WindowId);
    /// Attach a buffer (or none) with an offset
    fn attach(&mut self, window: WindowId, buffer: Option<BufferId>, dx: i32, dy: i32);
    fn set_buffer_scale(&mut self, window: WindowId, scale: i32);
    /// Damage in surface-local logical coordinates
    fn damage(&mut self, window: WindowId, rect: Rect);
    /// Ask for a frame callback; answered through
    /// [`SurfaceController::handle_frame_done`](crate::surface::SurfaceController::handle_frame_done)
    fn request_frame(&mut self, window: WindowId);
    fn commit(&mut self, window: WindowId);
    /// `None` unsets the region
    fn set_opaque_region(&mut self, window: WindowId, region: Option<&Region>);
    /// `None` unsets the region
    fn set_input_region(&mut self, window: WindowId, region: Option<&Region>);

    // wl_shm / wl_buffer

    /// Allocate a shareable `width`x`height` ARGB8888 buffer in physical pixels
    fn create_buffer(
        &mut self,
        buffer: BufferId,
        width: i32,
        height: i32,
    ) -> Result<Box<dyn PixelStorage>, ProtocolError>;
    fn destroy_buffer(&mut self, buffer: BufferId);

    // xdg_toplevel

    fn create_toplevel(&mut self, window: WindowId);
    fn set_parent(&mut self, window: WindowId, parent: Option<WindowId>);
    fn set_title(&mut self, window: WindowId, title: &str);
    fn set_app_id(&mut self, window: WindowId, app_id: &str);
    /// Visible geometry, excluding shadow margins
    fn set_window_geometry(&mut self, window: WindowId, geometry: Rect);
    /// Size limits without margins; 0 means unconstrained
    fn set_min_size(&mut self, window: WindowId, width: i32, height: i32);
    fn set_max_size(&mut self, window: WindowId, width: i32, height: i32);
    fn set_maximized(&mut self, window: WindowId, maximized: bool);
    fn set_fullscreen(&mut self, window: WindowId, output: Option<OutputId>);
    fn unset_fullscreen(&mut self, window: WindowId);
    fn set_minimized(&mut self, window: WindowId);
    fn ack_configure(&mut self, window: WindowId, serial: u32);

    // xdg_popup

    /// Create a popup relative to `parent`, grabbing with `seat` when given
    fn create_popup(
        &mut self,
        window: WindowId,
        parent: WindowId,
        seat: Option<SeatId>,
        serial: u32,
        positioner: &Positioner,
    );

    /// Destroy whichever role object (toplevel or popup) the window has
    fn destroy_role(&mut self, window: WindowId);

    // wl_subsurface

    fn create_subsurface(&mut self, window: WindowId, parent: WindowId);
    fn set_subsurface_position(&mut self, window: WindowId, x: i32, y: i32);
    fn set_subsurface_desync(&mut self, window: WindowId);
    fn destroy_subsurface(&mut self, window: WindowId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_id_unique() {
        assert_ne!(BufferId::new(), BufferId::new());
    }

    #[test]
    fn test_memory_storage_size() {
        let mut storage = MemoryStorage::new(3, 2);
        assert_eq!(storage.pixels().len(), 24);
        storage.pixels_mut()[0] = 0xff;
        assert_eq!(storage.pixels()[0], 0xff);

        assert!(MemoryStorage::new(-1, 5).pixels().is_empty());
    }
}
