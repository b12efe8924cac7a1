//! Painting and frame pacing
//!
//! A frame goes through these steps, driven by the toolkit:
//! 1. `begin_frame` starts a frame unless the clock is frozen
//! 2. `before_paint` predicts when the frame will be shown
//! 3. `begin_paint` hands out the staging buffer
//! 4. `damage_and_commit` attaches it and records the damage
//! 5. `after_paint` commits and freezes the clock until the compositor's
//!    frame callback arrives in `handle_frame_done`

use super::{SurfaceController, SURFACE_HAS_BUFFER_SCALE};
use crate::buffer::PixelBuffer;
use crate::error::ProtocolError;
use crate::frame::{monotonic_time, refresh_interval_from_mhz};
use crate::protocol::{BufferId, Protocol};
use crate::shell::ShellRole;
use crate::state::{Region, WindowId};

impl<P: Protocol> SurfaceController<P> {
    /// Start a new frame now. `None` while waiting for the compositor.
    pub fn begin_frame(&mut self, id: WindowId) -> Option<i64> {
        self.begin_frame_at(id, monotonic_time())
    }

    /// Start a new frame at `now` (microseconds)
    pub fn begin_frame_at(&mut self, id: WindowId, now: i64) -> Option<i64> {
        self.windows.get_mut(id)?.clock.begin_frame(now)
    }

    pub fn before_paint(&mut self, id: WindowId) {
        if let Some(window) = self.windows.get_mut(id) {
            window.clock.predict_presentation();
        }
    }

    /// The buffer to draw the next frame into, allocated on demand
    pub fn begin_paint(&mut self, id: WindowId) -> Result<Option<&mut PixelBuffer>, ProtocolError> {
        let Some(window) = self.windows.get(id) else {
            return Ok(None);
        };
        let buffer = self.buffers.ensure_staging(&mut self.protocol, window)?;
        Ok(self.buffers.get_mut(buffer))
    }

    /// Attach the staging buffer to the surface
    pub(crate) fn attach_staging(&mut self, id: WindowId) {
        let Some(window) = self.windows.get_mut(id).filter(|w| w.has_surface) else {
            return;
        };
        let Some((buffer, scale)) = self
            .buffers
            .staging(id)
            .filter(|b| b.is_shared())
            .map(|b| (b.id, b.scale))
        else {
            return;
        };

        let (dx, dy) = self.buffers.take_pending_offset(id);
        self.protocol.attach(id, Some(buffer), dx, dy);
        if self.protocol.compositor_version() >= SURFACE_HAS_BUFFER_SCALE {
            self.protocol.set_buffer_scale(id, scale);
        }
        self.buffers.mark_attached(id);

        window.pacer.pending_commit = true;
        window.clock.request_after_paint();
    }

    /// End of paint: hand `damage` of the staging buffer to the
    /// compositor. The commit itself waits for `after_paint`.
    pub fn damage_and_commit(&mut self, id: WindowId, damage: &Region) {
        let Some(window) = self.windows.get(id) else {
            return;
        };
        if window.use_gpu || damage.is_empty() {
            return;
        }
        if !window.has_surface || self.buffers.staging(id).is_none() {
            log::debug!("Nothing to attach for window {:?}", id);
            return;
        }

        self.attach_staging(id);
        self.buffers.record_staged_updates(id, damage);

        for rect in damage.rects() {
            self.protocol.damage(id, *rect);
        }

        if let Some(window) = self.windows.get_mut(id) {
            window.pacer.pending_commit = true;
            window.clock.request_after_paint();
        }
    }

    /// Commit whatever is pending and wait for the frame callback
    pub fn after_paint(&mut self, id: WindowId) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        window.clock.take_after_paint_request();
        if !window.pacer.pending_commit || !window.has_surface {
            return;
        }
        // One frame callback at a time; the commit goes out after the thaw
        if window.pacer.awaiting_frame {
            log::trace!("Commit of {:?} deferred until the frame callback", id);
            return;
        }

        self.protocol.request_frame(id);

        // Copy what was not redrawn from the previous frame
        if self.buffers.has_pending_attach(id) {
            self.buffers.read_back(&mut self.protocol, window);
        }

        self.protocol.commit(id);
        self.buffers.commit(&mut self.protocol, id);
        window.pacer.committed(&mut window.clock);

        self.notify_committed(id);
    }

    /// Run the one-shot listeners waiting for this window's commit
    fn notify_committed(&mut self, id: WindowId) {
        let listeners = self
            .windows
            .get_mut(id)
            .map(|w| std::mem::take(&mut w.commit_listeners))
            .unwrap_or_default();

        for child in listeners {
            let Some(window) = self.windows.get_mut(child) else {
                continue;
            };
            if let ShellRole::Subsurface(role) = &mut window.role {
                if role.parent == id && role.synchronized {
                    self.protocol.set_subsurface_desync(child);
                    role.synchronized = false;
                }
            }
        }
    }

    /// Refresh interval of the output the window was shown on last
    fn refresh_interval(&self, id: WindowId) -> i64 {
        self.windows
            .get(id)
            .and_then(|w| w.outputs.first())
            .and_then(|o| refresh_interval_from_mhz(self.outputs.refresh_rate(*o)))
            .unwrap_or(self.config.default_refresh_interval)
    }

    /// wl_callback.done for the frame requested in `after_paint`
    pub fn handle_frame_done(&mut self, id: WindowId, time_ms: u32) {
        self.handle_frame_done_at(id, time_ms, monotonic_time());
    }

    /// As [`handle_frame_done`](Self::handle_frame_done), with the current
    /// time given
    pub fn handle_frame_done_at(&mut self, id: WindowId, time_ms: u32, now: i64) {
        let refresh_interval = self.refresh_interval(id);
        let Some(window) = self.windows.get_mut(id) else {
            log::debug!("Frame callback for destroyed window {:?}", id);
            return;
        };

        if !window
            .pacer
            .frame_done(&mut window.clock, time_ms, now, refresh_interval)
        {
            log::debug!("Unexpected frame callback for window {:?}", id);
            return;
        }
        if window.pacer.pending_commit {
            window.clock.request_after_paint();
        }
    }

    /// wl_buffer.release
    pub fn handle_buffer_release(&mut self, buffer: BufferId) {
        self.buffers.handle_release(&mut self.protocol, buffer);
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::BufferState;
    use crate::state::{Output, OutputMode, Rect, Region, WindowAttributes, WindowType};
    use crate::surface::tests::controller;
    use crate::testing::Request;

    #[test]
    fn test_paint_commit_frame_cycle() {
        let mut c = controller();
        let mut output = Output::new("DP-1".to_string());
        output.add_mode(OutputMode {
            width: 1920,
            height: 1080,
            refresh: 50_000,
            current: true,
            preferred: true,
        });
        let output = c.outputs.add(output);

        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 100, 80));
        c.show(id).unwrap();
        c.handle_surface_enter(id, output);
        c.protocol_mut().take();

        let now = 5_000_000_000;
        assert_eq!(c.begin_frame_at(id, now), Some(1));
        c.before_paint(id);

        let buffer = match c.begin_paint(id).unwrap() {
            Some(b) => {
                b.fill_rect(Rect::new(0, 0, 100, 80), 0xff20_4060);
                b.id
            }
            None => panic!("no staging buffer"),
        };
        let damage = Region::from_rect(Rect::new(0, 0, 100, 80));
        c.damage_and_commit(id, &damage);

        assert_eq!(
            c.protocol_mut().take(),
            vec![
                Request::CreateBuffer(buffer, 100, 80),
                Request::Attach(id, Some(buffer), 0, 0),
                Request::SetBufferScale(id, 1),
                Request::Damage(id, Rect::new(0, 0, 100, 80)),
            ]
        );

        c.after_paint(id);
        assert_eq!(
            c.protocol_mut().take(),
            vec![Request::Frame(id), Request::Commit(id)]
        );
        assert_eq!(c.buffers().state(buffer), Some(BufferState::Committed));

        // Frozen until the frame callback
        assert_eq!(c.begin_frame_at(id, now + 1000), None);

        c.handle_frame_done_at(id, 4_999_990, now);
        let timings = c.window(id).unwrap().clock.timings(1).copied().unwrap();
        assert!(timings.complete);
        assert_eq!(timings.refresh_interval, 20_000);
        assert_eq!(timings.presentation_time, 4_999_990_000 + 20_000);
        assert!(timings.predicted_presentation_time > now);

        assert_eq!(c.begin_frame_at(id, now + 20_000), Some(2));
    }

    #[test]
    fn test_nothing_committed_without_damage() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        c.show(id).unwrap();
        c.begin_paint(id).unwrap();
        c.protocol_mut().take();

        c.damage_and_commit(id, &Region::new());
        c.after_paint(id);
        assert!(c.protocol().requests.is_empty());
        assert!(!c.window(id).unwrap().clock.is_frozen());
    }

    #[test]
    fn test_gpu_window_skips_attach() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        c.set_use_gpu(id, true).unwrap();
        c.show(id).unwrap();

        let buffer = c.begin_paint(id).unwrap().map(|b| b.is_shared());
        assert_eq!(buffer, Some(false));
        c.damage_and_commit(id, &Region::from_rect(Rect::new(0, 0, 10, 10)));
        assert_eq!(c.protocol().count(|r| matches!(r, Request::Attach(..))), 0);
        assert_eq!(c.protocol().count(|r| matches!(r, Request::CreateBuffer(..))), 0);
    }

    #[test]
    fn test_offset_applies_to_next_attach_only() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        c.show(id).unwrap();
        let damage = Region::from_rect(Rect::new(0, 0, 10, 10));

        c.offset_next_buffer(id, 3, -2).unwrap();
        c.begin_paint(id).unwrap();
        c.damage_and_commit(id, &damage);
        c.after_paint(id);
        c.handle_frame_done_at(id, 0, 0);

        c.begin_paint(id).unwrap();
        c.damage_and_commit(id, &damage);

        let offsets: Vec<(i32, i32)> = c
            .protocol()
            .requests
            .iter()
            .filter_map(|r| match r {
                Request::Attach(_, _, dx, dy) => Some((*dx, *dy)),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![(3, -2), (0, 0)]);
    }

    #[test]
    fn test_old_buffer_freed_after_backfill() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 4, 4));
        c.show(id).unwrap();

        let first = c.begin_paint(id).unwrap().map(|b| b.id).unwrap();
        c.damage_and_commit(id, &Region::from_rect(Rect::new(0, 0, 4, 4)));
        c.after_paint(id);
        c.handle_frame_done_at(id, 0, 0);

        // Redraw part of the window while the compositor still holds the first buffer
        let second = c.begin_paint(id).unwrap().map(|b| b.id).unwrap();
        assert_ne!(first, second);
        c.damage_and_commit(id, &Region::from_rect(Rect::new(0, 0, 2, 2)));

        // Release before the commit: the first buffer only lives as backfill
        c.handle_buffer_release(first);
        assert_eq!(c.buffers().state(first), Some(BufferState::Backfill));
        assert!(!c.protocol().saw(&Request::DestroyBuffer(first)));

        c.after_paint(id);
        assert!(c.protocol().saw(&Request::DestroyBuffer(first)));
        assert_eq!(c.buffers().committed(id), Some(second));
    }

    #[test]
    fn test_hide_while_awaiting_frame_thaws() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        c.show(id).unwrap();
        c.begin_frame_at(id, 1_000);
        c.begin_paint(id).unwrap();
        c.damage_and_commit(id, &Region::from_rect(Rect::new(0, 0, 10, 10)));
        c.after_paint(id);
        assert!(c.window(id).unwrap().pacer.awaiting_frame);

        c.hide(id).unwrap();
        let window = c.window(id).unwrap();
        assert!(!window.pacer.awaiting_frame);
        assert!(!window.clock.is_frozen());

        // Late callback is ignored
        c.handle_frame_done_at(id, 0, 0);
        c.destroy(id);
        c.handle_frame_done_at(id, 0, 0);
    }

    #[test]
    fn test_second_commit_waits_for_frame_callback() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        c.show(id).unwrap();
        let damage = Region::from_rect(Rect::new(0, 0, 10, 10));

        c.begin_paint(id).unwrap();
        c.damage_and_commit(id, &damage);
        c.after_paint(id);
        c.begin_paint(id).unwrap();
        c.damage_and_commit(id, &damage);
        c.after_paint(id);

        let is_frame = |r: &Request| matches!(r, Request::Frame(_));
        assert_eq!(c.protocol().count(is_frame), 1);
        assert!(c.window(id).unwrap().pacer.pending_commit);

        // The callback thaws and asks for the deferred commit
        c.handle_frame_done_at(id, 0, 0);
        assert!(!c.window(id).unwrap().clock.is_frozen());
        let window = c.windows.get_mut(id).unwrap();
        assert!(window.clock.take_after_paint_request());

        c.after_paint(id);
        assert_eq!(c.protocol().count(is_frame), 2);
        assert!(c.window(id).unwrap().clock.is_frozen());

        c.handle_frame_done_at(id, 0, 0);
        c.handle_frame_done_at(id, 0, 0);
        assert!(!c.window(id).unwrap().clock.is_frozen());
        assert!(!c.window(id).unwrap().pacer.pending_commit);
    }
}
