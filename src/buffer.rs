//! Pixel buffer lifecycle
//!
//! Each window draws into a *staging* buffer. On commit the staging buffer
//! becomes the *committed* one and belongs to the compositor until it
//! sends a release. If we need to draw again before that, a fresh staging
//! buffer is allocated and the parts we did not redraw are copied over
//! from the committed buffer just before the next commit (*backfill*).
//!
//! A buffer is destroyed once no slot of its window refers to it and the
//! compositor is not holding it.

use std::collections::HashMap;

use crate::error::ProtocolError;
use crate::protocol::{BufferId, MemoryStorage, PixelStorage, Protocol, BYTES_PER_PIXEL};
use crate::state::{Rect, Region, Window, WindowId};

/// Where a buffer currently sits for its window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Being drawn into by the client
    Staging,
    /// Last buffer committed to the surface
    Committed,
    /// Kept only as the source for backfill
    Backfill,
    /// No longer referenced; waiting for the compositor to let go
    Free,
}

/// A client-allocated image
#[derive(Debug)]
pub struct PixelBuffer {
    pub id: BufferId,
    /// Owning window
    pub window: WindowId,
    /// Size in physical pixels
    pub width: i32,
    pub height: i32,
    pub scale: i32,
    /// Bytes per row
    pub stride: i32,
    storage: Box<dyn PixelStorage>,
    /// Held by the compositor between commit and release
    busy: bool,
    /// Backed by a protocol buffer (as opposed to client-only memory)
    shared: bool,
}

impl PixelBuffer {
    pub fn pixels(&self) -> &[u8] {
        self.storage.pixels()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.storage.pixels_mut()
    }

    /// The compositor may be reading from it
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Backed by a wl_buffer
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Fill the logical rectangle `rect` with one ARGB color
    pub fn fill_rect(&mut self, rect: Rect, argb: u32) {
        let bounds = Rect::new(0, 0, self.width, self.height);
        let physical = Rect::new(
            rect.x * self.scale,
            rect.y * self.scale,
            rect.width * self.scale,
            rect.height * self.scale,
        );
        let Some(area) = physical.intersection(&bounds) else {
            return;
        };

        let stride = self.stride as usize;
        let bytes = argb.to_ne_bytes();
        let pixels = self.storage.pixels_mut();
        for row in area.y..area.bottom() {
            let start = row as usize * stride + area.x as usize * BYTES_PER_PIXEL as usize;
            let end = start + area.width as usize * BYTES_PER_PIXEL as usize;
            if let Some(line) = pixels.get_mut(start..end) {
                for px in line.chunks_exact_mut(BYTES_PER_PIXEL as usize) {
                    px.copy_from_slice(&bytes);
                }
            }
        }
    }
}

/// Buffer slots of one window
#[derive(Debug, Default)]
pub struct WindowBuffers {
    pub staging: Option<BufferId>,
    pub committed: Option<BufferId>,
    pub backfill: Option<BufferId>,
    /// Areas drawn into staging while `committed` was still live
    pub staged_updates: Option<Region>,
    /// Staging was attached and waits for the next commit
    pub pending_buffer_attached: bool,
    /// Offset for the next attach
    pub pending_offset: (i32, i32),
}

impl WindowBuffers {
    fn references(&self, id: BufferId) -> bool {
        self.staging == Some(id) || self.committed == Some(id) || self.backfill == Some(id)
    }
}

/// Owner of every pixel buffer
#[derive(Debug, Default)]
pub struct BufferManager {
    buffers: HashMap<BufferId, PixelBuffer>,
    windows: HashMap<WindowId, WindowBuffers>,
}

impl BufferManager {
    /// Create a new buffer manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a buffer by ID
    pub fn get(&self, id: BufferId) -> Option<&PixelBuffer> {
        self.buffers.get(&id)
    }

    /// Get a mutable buffer by ID
    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut PixelBuffer> {
        self.buffers.get_mut(&id)
    }

    /// Slots of a window
    pub fn slots(&self, window: WindowId) -> Option<&WindowBuffers> {
        self.windows.get(&window)
    }

    /// Staging buffer of a window
    pub fn staging(&self, window: WindowId) -> Option<&PixelBuffer> {
        self.slots(window)
            .and_then(|s| s.staging)
            .and_then(|id| self.buffers.get(&id))
    }

    /// Staging buffer of a window, for drawing
    pub fn staging_mut(&mut self, window: WindowId) -> Option<&mut PixelBuffer> {
        let id = self.windows.get(&window).and_then(|s| s.staging)?;
        self.buffers.get_mut(&id)
    }

    /// Committed buffer of a window
    pub fn committed(&self, window: WindowId) -> Option<BufferId> {
        self.slots(window).and_then(|s| s.committed)
    }

    /// State of a buffer, `None` once destroyed
    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        let buffer = self.buffers.get(&id)?;
        let Some(slots) = self.windows.get(&buffer.window) else {
            return Some(BufferState::Free);
        };

        Some(if slots.staging == Some(id) {
            BufferState::Staging
        } else if slots.committed == Some(id) {
            BufferState::Committed
        } else if slots.backfill == Some(id) {
            BufferState::Backfill
        } else {
            BufferState::Free
        })
    }

    /// Number of live buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Make sure the window has a staging buffer matching its size and scale
    pub fn ensure_staging(
        &mut self,
        protocol: &mut dyn Protocol,
        window: &Window,
    ) -> Result<BufferId, ProtocolError> {
        let scale = window.scale.max(1);
        let staging = self.windows.entry(window.id).or_default().staging;

        if window.use_gpu {
            // Rendering happens elsewhere; a logical 1x1 image keeps paint code happy
            if let Some(id) = staging {
                match self.buffers.get(&id) {
                    Some(b) if !b.shared && b.scale == scale => return Ok(id),
                    _ => self.release_slot(protocol, window.id, id),
                }
            }

            let id = BufferId::new();
            self.buffers.insert(
                id,
                PixelBuffer {
                    id,
                    window: window.id,
                    width: scale,
                    height: scale,
                    scale,
                    stride: scale * BYTES_PER_PIXEL,
                    storage: Box::new(MemoryStorage::new(scale, scale)),
                    busy: false,
                    shared: false,
                },
            );
            self.windows.entry(window.id).or_default().staging = Some(id);
            return Ok(id);
        }

        if let Some(id) = staging {
            return Ok(id);
        }

        let (width, height) = (window.width * scale, window.height * scale);
        let id = BufferId::new();
        let storage = protocol.create_buffer(id, width, height)?;
        log::debug!(
            "Allocated buffer {:?} {}x{} for window {:?}",
            id,
            width,
            height,
            window.id
        );

        self.buffers.insert(
            id,
            PixelBuffer {
                id,
                window: window.id,
                width,
                height,
                scale,
                stride: width * BYTES_PER_PIXEL,
                storage,
                busy: false,
                shared: true,
            },
        );
        self.windows.entry(window.id).or_default().staging = Some(id);
        Ok(id)
    }

    /// Use (dx, dy) as the offset of the next attach
    pub fn offset_next_buffer(&mut self, window: WindowId, dx: i32, dy: i32) {
        self.windows.entry(window).or_default().pending_offset = (dx, dy);
    }

    /// Consume the pending attach offset
    pub fn take_pending_offset(&mut self, window: WindowId) -> (i32, i32) {
        self.windows
            .get_mut(&window)
            .map(|s| std::mem::take(&mut s.pending_offset))
            .unwrap_or_default()
    }

    /// Record that staging was attached and waits for the next commit
    pub fn mark_attached(&mut self, window: WindowId) {
        self.windows.entry(window).or_default().pending_buffer_attached = true;
    }

    /// Record `damage` drawn into staging.
    ///
    /// While a committed buffer is still live the damage accumulates as
    /// staged updates, and the committed buffer is kept as backfill source.
    pub fn record_staged_updates(&mut self, window: WindowId, damage: &Region) {
        let slots = self.windows.entry(window).or_default();
        let Some(committed) = slots.committed else {
            return;
        };
        match slots.staged_updates.as_mut() {
            Some(staged) => staged.union(damage),
            None => {
                slots.staged_updates = Some(damage.clone());
                slots.backfill = Some(committed);
            }
        }
    }

    /// Staging was attached and not yet committed
    pub fn has_pending_attach(&self, window: WindowId) -> bool {
        self.slots(window)
            .is_some_and(|s| s.pending_buffer_attached)
    }

    /// Copy whatever was not redrawn from the backfill buffer into staging,
    /// then forget the staged updates and the backfill reference
    pub fn read_back(&mut self, protocol: &mut dyn Protocol, window: &Window) {
        let Some(slots) = self.windows.get_mut(&window.id) else {
            return;
        };
        let staged = slots.staged_updates.take();
        let backfill = slots.backfill.take();
        let staging = slots.staging;

        if let (Some(source), Some(target), Some(staged)) = (backfill, staging, staged) {
            let mut area = Region::from_rect(Rect::new(0, 0, window.width, window.height));
            area.subtract(&staged);
            if !area.is_empty() {
                log::trace!(
                    "Backfilling area {} of {:?} from {:?}",
                    area.area(),
                    window.id,
                    source
                );
                self.copy_region(source, target, &area);
            }
        }

        if let Some(id) = backfill {
            self.maybe_free(protocol, id);
        }
    }

    fn copy_region(&mut self, source: BufferId, target: BufferId, area: &Region) {
        if source == target {
            return;
        }
        let Some(src) = self.buffers.remove(&source) else {
            return;
        };

        if let Some(dst) = self.buffers.get_mut(&target) {
            if src.width == dst.width && src.height == dst.height && src.scale == dst.scale {
                let scale = src.scale;
                let stride = src.stride as usize;
                let bounds = Rect::new(0, 0, src.width, src.height);

                for rect in area.rects() {
                    let physical = Rect::new(
                        rect.x * scale,
                        rect.y * scale,
                        rect.width * scale,
                        rect.height * scale,
                    );
                    let Some(physical) = physical.intersection(&bounds) else {
                        continue;
                    };

                    for row in physical.y..physical.bottom() {
                        let start =
                            row as usize * stride + physical.x as usize * BYTES_PER_PIXEL as usize;
                        let end = start + physical.width as usize * BYTES_PER_PIXEL as usize;
                        if let (Some(from), Some(to)) =
                            (src.pixels().get(start..end), dst.pixels_mut().get_mut(start..end))
                        {
                            to.copy_from_slice(from);
                        }
                    }
                }
            } else {
                log::debug!(
                    "Skipping backfill from {:?}: size differs from staging {:?}",
                    source,
                    target
                );
            }
        }

        self.buffers.insert(source, src);
    }

    /// Staging becomes committed and is handed to the compositor
    pub fn commit(&mut self, protocol: &mut dyn Protocol, window: WindowId) {
        let Some(slots) = self.windows.get_mut(&window) else {
            return;
        };
        if !slots.pending_buffer_attached {
            return;
        }
        slots.pending_buffer_attached = false;

        let Some(staging) = slots.staging.take() else {
            return;
        };
        let previous = slots.committed.replace(staging);

        if let Some(buffer) = self.buffers.get_mut(&staging) {
            buffer.busy = buffer.shared;
        }
        if let Some(previous) = previous.filter(|p| *p != staging) {
            // Freed on its release if still busy
            self.maybe_free(protocol, previous);
        }
    }

    /// The compositor no longer reads from `id`
    pub fn handle_release(&mut self, protocol: &mut dyn Protocol, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else {
            log::warn!("Release for unknown buffer {:?}", id);
            return;
        };
        buffer.busy = false;
        let owner = buffer.window;

        let Some(slots) = self.windows.get_mut(&owner) else {
            self.maybe_free(protocol, id);
            return;
        };

        if slots.committed != Some(id) {
            // Superseded by a later commit
            if slots.staging == Some(id) {
                log::warn!("Buffer {:?} was reused before the compositor released it", id);
            }
            self.maybe_free(protocol, id);
            return;
        }

        if let Some(staged) = &slots.staged_updates {
            if slots.staging.is_none() {
                log::warn!("Staged updates tracked for window {:?} without a staging buffer", owner);
            }

            if !staged.is_empty() {
                // Staging already diverged; the old buffer survives only as backfill
                slots.committed = None;
                self.maybe_free(protocol, id);
                return;
            }

            // Nothing staged yet: drop the fresh staging and reuse this one
            slots.staged_updates = None;
            let staging = slots.staging.take();
            let backfill = slots.backfill.take();
            for other in [staging, backfill].into_iter().flatten() {
                if other != id {
                    self.maybe_free(protocol, other);
                }
            }
        }

        let Some(slots) = self.windows.get_mut(&owner) else {
            return;
        };
        let stale = slots.staging.replace(id);
        slots.committed = None;
        if let Some(stale) = stale.filter(|s| *s != id) {
            self.maybe_free(protocol, stale);
        }
        log::debug!("Recycled buffer {:?} as staging for {:?}", id, owner);
    }

    /// Forget every buffer slot of a window.
    ///
    /// Buffers the compositor still holds die on their release.
    pub fn drop_window_buffers(&mut self, protocol: &mut dyn Protocol, window: WindowId) {
        let Some(slots) = self.windows.get_mut(&window) else {
            return;
        };
        let ids = [
            slots.staging.take(),
            slots.committed.take(),
            slots.backfill.take(),
        ];
        slots.staged_updates = None;
        slots.pending_buffer_attached = false;

        for id in ids.into_iter().flatten() {
            self.maybe_free(protocol, id);
        }
    }

    /// Drop all buffers and the slot record of a destroyed window
    pub fn remove_window(&mut self, protocol: &mut dyn Protocol, window: WindowId) {
        self.drop_window_buffers(protocol, window);
        self.windows.remove(&window);
    }

    fn release_slot(&mut self, protocol: &mut dyn Protocol, window: WindowId, id: BufferId) {
        if let Some(slots) = self.windows.get_mut(&window) {
            if slots.staging == Some(id) {
                slots.staging = None;
            }
        }
        self.maybe_free(protocol, id);
    }

    /// Destroy `id` if nothing refers to it any more
    fn maybe_free(&mut self, protocol: &mut dyn Protocol, id: BufferId) {
        let Some(buffer) = self.buffers.get(&id) else {
            return;
        };
        if buffer.busy {
            return;
        }
        if self
            .windows
            .get(&buffer.window)
            .is_some_and(|slots| slots.references(id))
        {
            return;
        }

        if buffer.shared {
            protocol.destroy_buffer(id);
        }
        self.buffers.remove(&id);
        log::debug!("Destroyed buffer {:?}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{WindowAttributes, WindowType};
    use crate::testing::{RecordingProtocol, Request};

    fn window(width: i32, height: i32, scale: i32) -> Window {
        let mut window = Window::new(WindowAttributes::new(WindowType::Toplevel, width, height));
        window.scale = scale;
        window
    }

    fn damage_all(w: &Window) -> Region {
        Region::from_rect(Rect::new(0, 0, w.width, w.height))
    }

    /// Allocate, draw everything, commit
    fn paint_and_commit(
        buffers: &mut BufferManager,
        protocol: &mut RecordingProtocol,
        w: &Window,
    ) -> BufferId {
        let id = buffers.ensure_staging(protocol, w).unwrap();
        buffers.mark_attached(w.id);
        buffers.record_staged_updates(w.id, &damage_all(w));
        buffers.read_back(protocol, w);
        buffers.commit(protocol, w.id);
        id
    }

    #[test]
    fn test_staging_allocated_at_physical_size() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(800, 600, 2);

        let id = buffers.ensure_staging(&mut protocol, &w).unwrap();
        let buffer = buffers.get(id).unwrap();
        assert_eq!((buffer.width, buffer.height), (1600, 1200));
        assert_eq!(buffer.stride, 6400);
        assert_eq!(buffers.state(id), Some(BufferState::Staging));

        // Reused until it is committed
        assert_eq!(buffers.ensure_staging(&mut protocol, &w).unwrap(), id);
        assert_eq!(protocol.count(|r| matches!(r, Request::CreateBuffer(..))), 1);
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        protocol.fail_allocations = true;

        assert!(buffers.ensure_staging(&mut protocol, &window(10, 10, 1)).is_err());
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_commit_then_release_recycles() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(10, 10, 1);

        let id = paint_and_commit(&mut buffers, &mut protocol, &w);
        assert_eq!(buffers.state(id), Some(BufferState::Committed));
        assert!(buffers.get(id).unwrap().is_busy());
        assert!(buffers.staging(w.id).is_none());

        buffers.handle_release(&mut protocol, id);
        assert_eq!(buffers.state(id), Some(BufferState::Staging));
        assert!(!buffers.get(id).unwrap().is_busy());
        assert_eq!(buffers.committed(w.id), None);
        assert!(!protocol.saw(&Request::DestroyBuffer(id)));
    }

    #[test]
    fn test_superseded_buffer_freed_not_recycled() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(10, 10, 1);

        let y = paint_and_commit(&mut buffers, &mut protocol, &w);

        // Draw part of the window into a fresh buffer and commit it
        let x = buffers.ensure_staging(&mut protocol, &w).unwrap();
        assert_ne!(x, y);
        buffers.mark_attached(w.id);
        buffers.record_staged_updates(w.id, &Region::from_rect(Rect::new(0, 0, 5, 5)));
        assert_eq!(buffers.state(y), Some(BufferState::Committed));
        buffers.read_back(&mut protocol, &w);
        buffers.commit(&mut protocol, w.id);

        assert_eq!(buffers.committed(w.id), Some(x));
        // Compositor still holds Y
        assert_eq!(buffers.state(y), Some(BufferState::Free));

        buffers.handle_release(&mut protocol, y);
        assert!(buffers.get(y).is_none());
        assert!(protocol.saw(&Request::DestroyBuffer(y)));
        assert_eq!(buffers.staging(w.id).map(|b| b.id), None);
    }

    #[test]
    fn test_release_with_staged_updates_keeps_backfill() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(4, 4, 1);

        let y = paint_and_commit(&mut buffers, &mut protocol, &w);
        if let Some(b) = buffers.get_mut(y) {
            b.fill_rect(Rect::new(0, 0, 4, 4), 0xff00_00ff);
        }

        let x = buffers.ensure_staging(&mut protocol, &w).unwrap();
        buffers.mark_attached(w.id);
        buffers.record_staged_updates(w.id, &Region::from_rect(Rect::new(0, 0, 2, 4)));

        // Y released before X is committed: not recycled, kept for backfill
        buffers.handle_release(&mut protocol, y);
        assert_eq!(buffers.committed(w.id), None);
        assert_eq!(buffers.state(y), Some(BufferState::Backfill));
        assert_eq!(buffers.staging(w.id).map(|b| b.id), Some(x));

        buffers.read_back(&mut protocol, &w);
        assert!(buffers.get(y).is_none());

        // Right half came from Y, left half untouched
        let staging = buffers.get(x).unwrap();
        let row = &staging.pixels()[..16];
        assert_eq!(&row[..8], &[0; 8]);
        assert_eq!(&row[8..12], &0xff00_00ffu32.to_ne_bytes());
    }

    #[test]
    fn test_release_with_nothing_staged_drops_new_staging() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(10, 10, 1);

        let y = paint_and_commit(&mut buffers, &mut protocol, &w);
        let x = buffers.ensure_staging(&mut protocol, &w).unwrap();
        buffers.record_staged_updates(w.id, &Region::new());

        buffers.handle_release(&mut protocol, y);
        assert!(buffers.get(x).is_none());
        assert_eq!(buffers.state(y), Some(BufferState::Staging));
        assert!(buffers.slots(w.id).unwrap().staged_updates.is_none());
    }

    #[test]
    fn test_unknown_release_ignored() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        buffers.handle_release(&mut protocol, BufferId::new());
        assert!(protocol.requests.is_empty());
    }

    #[test]
    fn test_release_of_live_staging_keeps_it() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(10, 10, 1);

        let old = paint_and_commit(&mut buffers, &mut protocol, &w);
        let current = paint_and_commit(&mut buffers, &mut protocol, &w);
        assert_ne!(old, current);

        // The superseded buffer went back into use before its release
        buffers.windows.get_mut(&w.id).unwrap().staging = Some(old);
        buffers.handle_release(&mut protocol, old);

        assert!(!protocol.saw(&Request::DestroyBuffer(old)));
        assert!(buffers.get(old).is_some());
        assert_eq!(buffers.staging(w.id).map(|b| b.id), Some(old));
        assert_eq!(buffers.committed(w.id), Some(current));
    }

    #[test]
    fn test_drop_buffers_defers_busy() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(10, 10, 1);

        let committed = paint_and_commit(&mut buffers, &mut protocol, &w);
        let staging = buffers.ensure_staging(&mut protocol, &w).unwrap();

        buffers.remove_window(&mut protocol, w.id);
        assert!(buffers.get(staging).is_none());
        assert!(buffers.get(committed).is_some());

        buffers.handle_release(&mut protocol, committed);
        assert!(buffers.is_empty());
        assert_eq!(protocol.count(|r| matches!(r, Request::DestroyBuffer(_))), 2);
    }

    #[test]
    fn test_at_most_one_committed() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let w = window(8, 8, 1);

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(paint_and_commit(&mut buffers, &mut protocol, &w));
        }
        for id in ids.iter().rev() {
            buffers.handle_release(&mut protocol, *id);
            let committed = ids
                .iter()
                .filter(|id| buffers.state(**id) == Some(BufferState::Committed))
                .count();
            assert!(committed <= 1);
        }
    }

    #[test]
    fn test_gpu_staging_is_client_memory() {
        let mut buffers = BufferManager::new();
        let mut protocol = RecordingProtocol::new();
        let mut w = window(800, 600, 2);

        let shm = buffers.ensure_staging(&mut protocol, &w).unwrap();
        w.use_gpu = true;
        let gpu = buffers.ensure_staging(&mut protocol, &w).unwrap();

        assert_ne!(shm, gpu);
        assert!(protocol.saw(&Request::DestroyBuffer(shm)));
        let buffer = buffers.get(gpu).unwrap();
        assert_eq!((buffer.width, buffer.height), (2, 2));
        assert!(!buffer.is_shared());
    }

    #[test]
    fn test_pending_offset_used_once() {
        let mut buffers = BufferManager::new();
        let id = WindowId(u64::MAX);
        buffers.offset_next_buffer(id, 3, -4);
        assert_eq!(buffers.take_pending_offset(id), (3, -4));
        assert_eq!(buffers.take_pending_offset(id), (0, 0));
    }
}
