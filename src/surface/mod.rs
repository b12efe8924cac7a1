//! Surface controller
//!
//! The process-wide owner of every window, buffer, output and seat. All
//! compositor events are routed here on the event loop thread, validated
//! against the registry by id, and turned into state changes, protocol
//! requests and [`WindowEvent`]s for the toolkit.
//!
//! Window lifetime:
//! - `create_window` registers the window; nothing is sent yet
//! - `show` creates the surface and picks a shell role (see [`map`])
//! - painting goes through [`paint`]
//! - `hide` tears the surface down, `destroy` also drops the window

pub mod map;
pub mod paint;

use crate::buffer::BufferManager;
use crate::error::WindowError;
use crate::frame::{FrameClock, DEFAULT_HISTORY_LENGTH, DEFAULT_REFRESH_INTERVAL};
use crate::protocol::Protocol;
use crate::shell::{GeometryHints, HintFlags, ShellRole};
use crate::state::{
    EventQueue, Margins, OutputId, OutputManager, Rect, Region, SeatId, SeatManager, TypeHint,
    Window, WindowAttributes, WindowEvent, WindowId, WindowManager, WindowState, WindowType,
};

/// Minimum wl_compositor version with wl_surface.set_buffer_scale
pub const SURFACE_HAS_BUFFER_SCALE: u32 = 3;

/// Display-wide settings
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Sent as the xdg_toplevel app id
    pub app_id: String,
    /// Title for toplevels created without one
    pub default_title: String,
    /// Largest width or height a window may have
    pub max_window_dimension: i32,
    /// Refresh interval in microseconds when no output reports a rate
    pub default_refresh_interval: i64,
    /// Frames of timing history kept per window
    pub frame_history_length: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            app_id: env!("CARGO_PKG_NAME").to_string(),
            default_title: env!("CARGO_PKG_NAME").to_string(),
            max_window_dimension: 65535,
            default_refresh_interval: DEFAULT_REFRESH_INTERVAL,
            frame_history_length: DEFAULT_HISTORY_LENGTH,
        }
    }
}

/// Owner of all client-side window state
pub struct SurfaceController<P: Protocol> {
    pub(crate) protocol: P,
    config: DisplayConfig,
    pub(crate) windows: WindowManager,
    pub(crate) buffers: BufferManager,
    /// Outputs advertised by the compositor
    pub outputs: OutputManager,
    /// Seats advertised by the compositor
    pub seats: SeatManager,
    /// Events waiting for the toolkit
    pub events: EventQueue,
    /// Dialogs without a transient parent, re-parented to whichever
    /// toplevel gets focus
    pub(crate) orphan_dialogs: Vec<WindowId>,
}

impl<P: Protocol> SurfaceController<P> {
    /// Create a controller talking through `protocol`
    pub fn new(protocol: P, config: DisplayConfig) -> Self {
        Self {
            protocol,
            config,
            windows: WindowManager::new(),
            buffers: BufferManager::new(),
            outputs: OutputManager::new(),
            seats: SeatManager::new(),
            events: EventQueue::new(),
            orphan_dialogs: Vec::new(),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// All windows
    pub fn windows(&self) -> &WindowManager {
        &self.windows
    }

    /// Get a window by ID
    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(id)
    }

    /// All buffers
    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// Dialogs currently waiting for a parent
    pub fn orphan_dialogs(&self) -> &[WindowId] {
        &self.orphan_dialogs
    }

    /// Take every queued event
    pub fn drain_events(&mut self) -> Vec<WindowEvent> {
        self.events.drain()
    }

    fn window_mut(&mut self, id: WindowId) -> Result<&mut Window, WindowError> {
        self.windows.get_mut(id).ok_or(WindowError::UnknownWindow(id))
    }

    /// Register a new window. Nothing is sent to the compositor until it
    /// is shown.
    pub fn create_window(&mut self, attributes: WindowAttributes) -> WindowId {
        let mut attributes = attributes;
        let max = self.config.max_window_dimension;
        if attributes.width > max {
            log::warn!("Windows wider than {} pixels are not supported", max);
            attributes.width = max;
        }
        if attributes.height > max {
            log::warn!("Windows taller than {} pixels are not supported", max);
            attributes.height = max;
        }

        if attributes.title.is_none()
            && matches!(attributes.window_type, WindowType::Toplevel | WindowType::Popup)
        {
            attributes.title = Some(self.config.default_title.clone());
        }

        let mut window = Window::new(attributes);
        window.clock = FrameClock::new(self.config.frame_history_length);

        // More likely to be right than assuming 1
        if self.protocol.compositor_version() >= SURFACE_HAS_BUFFER_SCALE {
            if let Some(output) = self.outputs.nth(0) {
                window.scale = output.scale.max(1);
            }
        }

        let id = self.windows.insert(window);
        log::debug!("Created window {:?}", id);
        id
    }

    /// Create the protocol surface, once per window
    pub(crate) fn create_surface(&mut self, id: WindowId) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        if window.has_surface {
            return;
        }

        self.protocol.create_surface(id);
        window.has_surface = true;

        self.sync_opaque_region(id);
        self.sync_input_region(id);
    }

    /// Show the window: create its surface and give it a role
    pub fn show(&mut self, id: WindowId) -> Result<(), WindowError> {
        if !self.windows.contains(id) {
            return Err(WindowError::UnknownWindow(id));
        }

        self.create_surface(id);
        self.map(id);

        if self.windows.get(id).is_some_and(|w| w.mapped) {
            self.events.push(WindowEvent::Map { window: id });
        }

        if self.buffers.staging(id).is_some_and(|b| b.is_shared()) {
            self.attach_staging(id);
        }
        Ok(())
    }

    /// Hide the window and tear its surface down
    pub fn hide(&mut self, id: WindowId) -> Result<(), WindowError> {
        if !self.windows.contains(id) {
            return Err(WindowError::UnknownWindow(id));
        }
        self.unmap_window(id);
        Ok(())
    }

    /// Tear the surface down, reporting the unmap if it was mapped
    pub(crate) fn unmap_window(&mut self, id: WindowId) {
        let was_mapped = self.windows.get(id).is_some_and(|w| w.mapped);
        self.hide_surface(id);
        if was_mapped {
            self.events.push(WindowEvent::Unmap { window: id });
        }
    }

    /// Tear down the surface and everything hanging off it, in dependency
    /// order. Safe to call any number of times.
    pub(crate) fn hide_surface(&mut self, id: WindowId) {
        let Some(window) = self.windows.get(id) else {
            return;
        };

        if window.has_surface {
            // Popups and subsurfaces must go before their parent
            let dependents: Vec<WindowId> = self
                .windows
                .iter()
                .filter(|(_, w)| match &w.role {
                    ShellRole::Popup(role) => role.parent == id,
                    ShellRole::Subsurface(role) => role.parent == id,
                    _ => false,
                })
                .map(|(child, _)| *child)
                .collect();
            for child in dependents {
                self.unmap_window(child);
            }

            let Some(window) = self.windows.get_mut(id) else {
                return;
            };
            if matches!(window.role, ShellRole::Toplevel(_) | ShellRole::Popup(_)) {
                self.protocol.destroy_role(id);
                window.role = ShellRole::Unrealized;
            }

            self.unmap_subsurface(id);

            let Some(window) = self.windows.get_mut(id) else {
                return;
            };
            window.pacer.cancel(&mut window.clock);

            self.protocol.destroy_surface(id);
            window.has_surface = false;
            window.outputs.clear();

            if window.hint == TypeHint::Dialog && window.transient_for.is_none() {
                self.orphan_dialogs.retain(|d| *d != id);
            }
        }

        if let Some(window) = self.windows.get_mut(id) {
            window.clear_saved_size();
            window.pacer.pending_commit = false;
            window.mapped = false;
        }
    }

    /// Destroy a window. Destroying it again is a no-op.
    pub fn destroy(&mut self, id: WindowId) {
        if !self.windows.contains(id) {
            log::debug!("Window {:?} already destroyed", id);
            return;
        }

        self.hide_surface(id);
        self.buffers.remove_window(&mut self.protocol, id);

        self.windows.remove(id);

        // Nothing may keep referring to the window
        for (_, window) in self.windows.iter_mut() {
            if window.transient_for == Some(id) {
                window.transient_for = None;
            }
            if window.attached_grab_window == Some(id) {
                window.attached_grab_window = None;
            }
            window.commit_listeners.retain(|w| *w != id);
        }
        self.orphan_dialogs.retain(|d| *d != id);
        self.seats.forget_window(id);
        self.events.forget_window(id);

        log::debug!("Destroyed window {:?}", id);
    }

    /// The window was destroyed behind our back
    pub fn destroy_foreign(&mut self, id: WindowId) {
        match self.windows.get(id) {
            Some(window) if window.window_type != WindowType::Foreign => {
                log::warn!("Window {:?} unexpectedly destroyed", id);
            }
            Some(_) => {}
            None => return,
        }
        self.destroy(id);
    }

    /// Set or clear the transient parent.
    ///
    /// Assignments that would form a cycle are rejected and leave the
    /// window unchanged.
    pub fn set_transient_for(
        &mut self,
        id: WindowId,
        parent: Option<WindowId>,
    ) -> Result<(), WindowError> {
        if !self.windows.contains(id) {
            return Err(WindowError::UnknownWindow(id));
        }
        if let Some(parent) = parent {
            if !self.windows.contains(parent) {
                return Err(WindowError::UnknownWindow(parent));
            }
        }

        if self.windows.would_create_loop(id, parent) {
            let parent = parent.unwrap_or(id);
            log::warn!(
                "Setting {:?} transient for {:?} would create a loop",
                id,
                parent
            );
            return Err(WindowError::TransientLoop { window: id, parent });
        }

        self.unmap_subsurface(id);

        let previous = self.windows.transient_for(id);
        let window = self.window_mut(id)?;
        window.transient_for = parent;

        if window.hint == TypeHint::Dialog {
            if parent.is_none() {
                self.add_orphan_dialog(id);
            } else if previous.is_none() {
                self.orphan_dialogs.retain(|d| *d != id);
            }
        }

        self.sync_parent(id, None);

        let (mapped, as_subsurface) = match self.windows.get(id) {
            Some(window) => (
                window.mapped,
                crate::shell::should_map_as_subsurface(&self.windows, window),
            ),
            None => (false, false),
        };
        if as_subsurface && parent.is_some() && mapped {
            self.create_subsurface(id);
        }
        Ok(())
    }

    /// Move and/or resize. Toplevels have no position of their own.
    ///
    /// Sizes that are not positive leave the size alone.
    pub fn move_resize(
        &mut self,
        id: WindowId,
        position: Option<(i32, i32)>,
        width: i32,
        height: i32,
    ) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;

        if let Some((x, y)) = position {
            if window.window_type != WindowType::Toplevel {
                window.x = x;
                window.y = y;
                window.position_set = true;

                if matches!(window.role, ShellRole::Subsurface(_)) {
                    self.protocol.set_subsurface_position(id, x, y);
                    self.request_transient_parent_commit(id);
                }
            }
        }

        if width > 0 && height > 0 {
            let scale = self.window_mut(id)?.scale;
            self.configure(id, width, height, scale);
        }
        Ok(())
    }

    /// Resize or rescale, telling the toolkit
    pub(crate) fn configure(&mut self, id: WindowId, width: i32, height: i32, scale: i32) {
        self.events.push(WindowEvent::Configure {
            window: id,
            width,
            height,
            scale,
        });
        self.update_size(id, width, height, scale);
    }

    /// Apply a new size and scale. Buffers of the old size are dropped and
    /// the whole window is exposed.
    fn update_size(&mut self, id: WindowId, width: i32, height: i32, scale: i32) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        if window.width == width && window.height == height && window.scale == scale {
            return;
        }

        window.width = width;
        window.height = height;
        window.scale = scale;
        let gpu_surface = window.use_gpu && window.has_surface;

        self.buffers.drop_window_buffers(&mut self.protocol, id);

        if gpu_surface {
            self.protocol.set_buffer_scale(id, scale);
        }

        self.events.push(WindowEvent::Expose {
            window: id,
            area: Rect::new(0, 0, width, height),
        });
    }

    /// Push the opaque region; no-op without a surface
    pub(crate) fn sync_opaque_region(&mut self, id: WindowId) {
        if let Some(window) = self.windows.get(id).filter(|w| w.has_surface) {
            self.protocol
                .set_opaque_region(id, window.opaque_region.as_ref());
        }
    }

    /// Push the input region; no-op without a surface
    pub(crate) fn sync_input_region(&mut self, id: WindowId) {
        if let Some(window) = self.windows.get(id).filter(|w| w.has_surface) {
            self.protocol
                .set_input_region(id, window.input_region.as_ref());
        }
    }

    /// Area known to be opaque; `None` means nothing is
    pub fn set_opaque_region(&mut self, id: WindowId, region: Option<Region>) -> Result<(), WindowError> {
        self.window_mut(id)?.opaque_region = region;
        self.sync_opaque_region(id);
        Ok(())
    }

    /// Area accepting input; `None` means the whole surface
    pub fn set_input_region(&mut self, id: WindowId, region: Option<Region>) -> Result<(), WindowError> {
        self.window_mut(id)?.input_region = region;
        self.sync_input_region(id);
        Ok(())
    }

    pub fn set_title(&mut self, id: WindowId, title: &str) -> Result<(), WindowError> {
        self.window_mut(id)?.title = Some(title.to_string());
        self.sync_title(id);
        Ok(())
    }

    /// Takes effect on the next map
    pub fn set_type_hint(&mut self, id: WindowId, hint: TypeHint) -> Result<(), WindowError> {
        self.window_mut(id)?.hint = hint;
        Ok(())
    }

    /// Size constraints for toplevel windows
    pub fn set_geometry_hints(
        &mut self,
        id: WindowId,
        hints: GeometryHints,
        mask: HintFlags,
    ) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        if !matches!(window.window_type, WindowType::Toplevel | WindowType::Foreign) {
            return Ok(());
        }
        window.geometry_hints = hints;
        window.geometry_mask = mask;
        self.sync_size_limits(id);
        Ok(())
    }

    /// Invisible shadow around the window; the visible geometry is kept
    pub fn set_shadow_width(&mut self, id: WindowId, margins: Margins) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        let width = window.width - window.margins.horizontal() + margins.horizontal();
        let height = window.height - window.margins.vertical() + margins.vertical();
        let scale = window.scale;

        self.configure(id, width, height, scale);
        self.window_mut(id)?.margins = margins;
        self.sync_margin(id);
        Ok(())
    }

    /// Ask to be maximized; before mapping this only records the state
    pub fn maximize(&mut self, id: WindowId) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        window.save_size();
        if matches!(window.role, ShellRole::Toplevel(_)) {
            self.protocol.set_maximized(id, true);
        } else {
            let state = window.state | WindowState::MAXIMIZED;
            self.set_state(id, state);
        }
        Ok(())
    }

    pub fn unmaximize(&mut self, id: WindowId) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        if matches!(window.role, ShellRole::Toplevel(_)) {
            self.protocol.set_maximized(id, false);
        } else {
            let state = window.state - WindowState::MAXIMIZED;
            self.set_state(id, state);
        }
        Ok(())
    }

    /// Go fullscreen on whichever output the compositor picks
    pub fn fullscreen(&mut self, id: WindowId) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        window.initial_fullscreen_monitor = None;
        window.save_size();
        if matches!(window.role, ShellRole::Toplevel(_)) {
            self.protocol.set_fullscreen(id, None);
        } else {
            let state = window.state | WindowState::FULLSCREEN;
            self.set_state(id, state);
        }
        Ok(())
    }

    /// Go fullscreen on the `monitor`th output
    pub fn fullscreen_on_monitor(&mut self, id: WindowId, monitor: usize) -> Result<(), WindowError> {
        let output = self.outputs.nth(monitor).map(|o| o.id);
        let window = self.window_mut(id)?;
        window.initial_fullscreen_monitor = Some(monitor);
        window.save_size();
        if matches!(window.role, ShellRole::Toplevel(_)) {
            self.protocol.set_fullscreen(id, output);
        } else {
            let state = window.state | WindowState::FULLSCREEN;
            self.set_state(id, state);
        }
        Ok(())
    }

    pub fn unfullscreen(&mut self, id: WindowId) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        window.initial_fullscreen_monitor = None;
        if matches!(window.role, ShellRole::Toplevel(_)) {
            self.protocol.unset_fullscreen(id);
        } else {
            let state = window.state - WindowState::FULLSCREEN;
            self.set_state(id, state);
        }
        Ok(())
    }

    /// Ask to be minimized; only toplevels can be
    pub fn iconify(&mut self, id: WindowId) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        if matches!(window.role, ShellRole::Toplevel(_)) {
            self.protocol.set_minimized(id);
        }
        Ok(())
    }

    /// Replace the window state, telling the toolkit when it changed
    pub(crate) fn set_state(&mut self, id: WindowId, new: WindowState) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        let old = window.state;
        if old == new {
            return;
        }
        window.state = new;
        self.events.push(WindowEvent::StateChanged {
            window: id,
            old,
            new,
        });
    }

    /// Seat that grabbed input for this window, used when mapping popups
    pub fn set_grab_seat(&mut self, id: WindowId, seat: Option<SeatId>) -> Result<(), WindowError> {
        self.window_mut(id)?.grab_seat = seat;
        Ok(())
    }

    /// Grab-transfer window whose grab seat this window borrows
    pub fn set_attached_grab_window(
        &mut self,
        id: WindowId,
        grab_window: Option<WindowId>,
    ) -> Result<(), WindowError> {
        self.window_mut(id)?.attached_grab_window = grab_window;
        Ok(())
    }

    /// Render through a GPU surface instead of shm buffers
    pub fn set_use_gpu(&mut self, id: WindowId, use_gpu: bool) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        if window.use_gpu == use_gpu {
            return Ok(());
        }
        window.use_gpu = use_gpu;
        self.buffers.drop_window_buffers(&mut self.protocol, id);
        Ok(())
    }

    /// The application manages the role itself
    pub fn set_use_custom_surface(&mut self, id: WindowId) -> Result<(), WindowError> {
        self.window_mut(id)?.use_custom_surface = true;
        Ok(())
    }

    /// Offset the next attached buffer by (dx, dy)
    pub fn offset_next_buffer(&mut self, id: WindowId, dx: i32, dy: i32) -> Result<(), WindowError> {
        if !self.windows.contains(id) {
            return Err(WindowError::UnknownWindow(id));
        }
        self.buffers.offset_next_buffer(id, dx, dy);
        Ok(())
    }

    /// Position and size
    pub fn geometry(&self, id: WindowId) -> Option<Rect> {
        self.windows
            .get(id)
            .map(|w| Rect::new(w.x, w.y, w.width, w.height))
    }

    /// Fake root coordinates of a point in the window
    pub fn root_coords(&self, id: WindowId, x: i32, y: i32) -> (i32, i32) {
        let (ox, oy) = self.windows.fake_root_coords(id);
        (ox + x, oy + y)
    }

    /// Window rectangle in fake root coordinates
    pub fn frame_extents(&self, id: WindowId) -> Option<Rect> {
        let window = self.windows.get(id)?;
        let (x, y) = self.windows.fake_root_coords(id);
        Some(Rect::new(x, y, window.width, window.height))
    }

    /// Buffer scale; 1 for unknown windows
    pub fn scale_factor(&self, id: WindowId) -> i32 {
        self.windows.get(id).map_or(1, |w| w.scale)
    }

    /// The surface entered an output
    pub fn handle_surface_enter(&mut self, id: WindowId, output: OutputId) {
        if self.outputs.get(output).is_none() {
            log::debug!("Surface enter for unknown output {:?}", output);
            return;
        }
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        log::debug!("Window {:?} entered output {:?}", id, output);

        if !window.outputs.contains(&output) {
            window.outputs.insert(0, output);
        }
        self.update_scale(id);
    }

    /// The surface left an output
    pub fn handle_surface_leave(&mut self, id: WindowId, output: OutputId) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        log::debug!("Window {:?} left output {:?}", id, output);

        window.outputs.retain(|o| *o != output);
        self.update_scale(id);
    }

    /// An output changed its scale or other properties
    pub fn handle_output_changed(&mut self, output: OutputId) {
        let affected: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, w)| w.outputs.contains(&output))
            .map(|(id, _)| *id)
            .collect();
        for id in affected {
            self.update_scale(id);
        }
    }

    /// An output went away
    pub fn handle_output_removed(&mut self, output: OutputId) {
        let affected: Vec<WindowId> = self
            .windows
            .iter_mut()
            .filter_map(|(id, w)| {
                let before = w.outputs.len();
                w.outputs.retain(|o| *o != output);
                (w.outputs.len() != before).then_some(*id)
            })
            .collect();
        self.outputs.remove(output);
        for id in affected {
            self.update_scale(id);
        }
    }

    /// Recompute the scale as the largest of the outputs the window is on
    fn update_scale(&mut self, id: WindowId) {
        if self.protocol.compositor_version() < SURFACE_HAS_BUFFER_SCALE {
            return;
        }
        let Some(window) = self.windows.get(id) else {
            return;
        };

        let scale = window
            .outputs
            .iter()
            .map(|o| self.outputs.scale(*o))
            .fold(1, i32::max);

        if scale != window.scale {
            log::debug!("Window {:?} scale {} -> {}", id, window.scale, scale);
            let (width, height) = (window.width, window.height);
            self.configure(id, width, height, scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Output;
    use crate::testing::{RecordingProtocol, Request};

    pub(crate) fn controller() -> SurfaceController<RecordingProtocol> {
        SurfaceController::new(RecordingProtocol::new(), DisplayConfig::default())
    }

    #[test]
    fn test_create_clamps_size() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 70000, 100));
        let window = c.window(id).unwrap();
        assert_eq!((window.width, window.height), (65535, 100));
        assert_eq!(window.title.as_deref(), Some("waysurf"));
        assert!(c.protocol().requests.is_empty());
    }

    #[test]
    fn test_initial_scale_from_first_output() {
        let mut c = controller();
        let mut output = Output::new("DP-1".to_string());
        output.scale = 2;
        c.outputs.add(output);

        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        assert_eq!(c.scale_factor(id), 2);

        c.protocol_mut().version = 2;
        let old = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        assert_eq!(c.scale_factor(old), 1);
    }

    #[test]
    fn test_output_scale_change_reallocates() {
        let mut c = controller();
        let output = c.outputs.add(Output::new("DP-1".to_string()));
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 800, 600));
        c.show(id).unwrap();
        c.handle_surface_enter(id, output);
        assert_eq!(c.scale_factor(id), 1);

        let staging = c.begin_paint(id).unwrap().map(|b| b.id);
        assert!(staging.is_some());
        c.drain_events();

        if let Some(o) = c.outputs.get_mut(output) {
            o.scale = 2;
        }
        c.handle_output_changed(output);

        assert_eq!(c.scale_factor(id), 2);
        let events = c.drain_events();
        assert!(events.contains(&WindowEvent::Configure {
            window: id,
            width: 800,
            height: 600,
            scale: 2
        }));
        assert!(c.buffers().staging(id).is_none());

        let buffer = c.begin_paint(id).unwrap().map(|b| (b.width, b.height));
        assert_eq!(buffer, Some((1600, 1200)));
    }

    #[test]
    fn test_scale_is_max_of_outputs() {
        let mut c = controller();
        let mut hidpi = Output::new("eDP-1".to_string());
        hidpi.scale = 3;
        let hidpi = c.outputs.add(hidpi);
        let lodpi = c.outputs.add(Output::new("HDMI-1".to_string()));

        // Created with the first output's scale
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 100, 100));
        c.show(id).unwrap();
        c.handle_surface_enter(id, lodpi);
        assert_eq!(c.scale_factor(id), 1);
        c.handle_surface_enter(id, hidpi);
        assert_eq!(c.scale_factor(id), 3);
        c.handle_surface_leave(id, hidpi);
        assert_eq!(c.scale_factor(id), 1);

        c.handle_surface_enter(id, hidpi);
        c.handle_output_removed(hidpi);
        assert_eq!(c.scale_factor(id), 1);
    }

    #[test]
    fn test_regions_sent_on_surface_creation() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 100, 100));

        // No surface yet: stored only
        c.set_opaque_region(id, Some(Region::from_rect(Rect::new(0, 0, 10, 10))))
            .unwrap();
        assert!(c.protocol().requests.is_empty());

        c.show(id).unwrap();
        assert!(c.protocol().saw(&Request::SetOpaqueRegion(
            id,
            Some(Region::from_rect(Rect::new(0, 0, 10, 10)))
        )));
        assert!(c.protocol().saw(&Request::SetInputRegion(id, None)));

        // Explicit empty region is not the same as none
        c.set_input_region(id, Some(Region::new())).unwrap();
        assert!(c
            .protocol()
            .saw(&Request::SetInputRegion(id, Some(Region::new()))));
    }

    #[test]
    fn test_double_teardown() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 100, 100));
        c.show(id).unwrap();
        c.begin_paint(id).unwrap();
        c.damage_and_commit(id, &Region::from_rect(Rect::new(0, 0, 100, 100)));
        c.after_paint(id);

        c.hide(id).unwrap();
        c.hide(id).unwrap();
        assert_eq!(c.protocol().count(|r| matches!(r, Request::DestroySurface(_))), 1);
        assert_eq!(c.protocol().count(|r| matches!(r, Request::DestroyRole(_))), 1);
        assert!(!c.window(id).unwrap().clock.is_frozen());

        c.destroy(id);
        c.destroy(id);
        assert!(c.window(id).is_none());
        assert_eq!(c.protocol().count(|r| matches!(r, Request::DestroySurface(_))), 1);
    }

    #[test]
    fn test_destroy_clears_references() {
        let mut c = controller();
        let parent = c.create_window(WindowAttributes::new(WindowType::Toplevel, 100, 100));
        let child = c.create_window(
            WindowAttributes::new(WindowType::Toplevel, 50, 50).with_transient_for(parent),
        );
        c.set_attached_grab_window(child, Some(parent)).unwrap();
        c.events.push(WindowEvent::Delete { window: parent });

        c.destroy(parent);
        let window = c.window(child).unwrap();
        assert_eq!(window.transient_for, None);
        assert_eq!(window.attached_grab_window, None);
        assert!(c.events.is_empty());
    }

    #[test]
    fn test_unexpected_destruction_tears_down() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 20, 20));
        c.show(id).unwrap();
        let buffer = c.begin_paint(id).unwrap().map(|b| b.id).unwrap();
        c.damage_and_commit(id, &Region::from_rect(Rect::new(0, 0, 20, 20)));
        c.after_paint(id);

        c.destroy_foreign(id);
        assert!(c.window(id).is_none());
        assert_eq!(c.protocol().count(|r| matches!(r, Request::DestroyRole(_))), 1);
        assert_eq!(c.protocol().count(|r| matches!(r, Request::DestroySurface(_))), 1);

        // The compositor still held the buffer
        assert!(!c.protocol().saw(&Request::DestroyBuffer(buffer)));
        c.handle_buffer_release(buffer);
        assert!(c.protocol().saw(&Request::DestroyBuffer(buffer)));

        let requests = c.protocol().requests.len();
        c.destroy_foreign(id);
        assert_eq!(c.protocol().requests.len(), requests);
    }

    #[test]
    fn test_transient_loop_rejected() {
        let mut c = controller();
        let a = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        let b = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));
        let d = c.create_window(WindowAttributes::new(WindowType::Toplevel, 10, 10));

        c.set_transient_for(b, Some(a)).unwrap();
        c.set_transient_for(d, Some(b)).unwrap();

        assert_eq!(
            c.set_transient_for(a, Some(d)),
            Err(WindowError::TransientLoop { window: a, parent: d })
        );
        assert_eq!(c.window(a).unwrap().transient_for, None);
        assert_eq!(
            c.set_transient_for(a, Some(a)),
            Err(WindowError::TransientLoop { window: a, parent: a })
        );
        assert_eq!(
            c.set_transient_for(WindowId(u64::MAX), None),
            Err(WindowError::UnknownWindow(WindowId(u64::MAX)))
        );
    }

    #[test]
    fn test_shadow_width_keeps_geometry() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 400, 300));
        c.show(id).unwrap();

        let margins = Margins {
            left: 20,
            right: 20,
            top: 10,
            bottom: 30,
        };
        c.set_shadow_width(id, margins).unwrap();

        let window = c.window(id).unwrap();
        assert_eq!((window.width, window.height), (440, 340));
        assert!(c
            .protocol()
            .saw(&Request::SetWindowGeometry(id, Rect::new(20, 10, 400, 300))));
    }

    #[test]
    fn test_state_requests_before_map_are_recorded() {
        let mut c = controller();
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 400, 300));

        c.maximize(id).unwrap();
        assert!(c.window(id).unwrap().state.contains(WindowState::MAXIMIZED));
        assert_eq!(c.window(id).unwrap().saved_size, Some((400, 300)));

        c.show(id).unwrap();
        assert!(c.protocol().saw(&Request::SetMaximized(id, true)));

        c.unmaximize(id).unwrap();
        assert_eq!(c.protocol().count(|r| *r == Request::SetMaximized(id, false)), 1);
    }

    #[test]
    fn test_fullscreen_on_monitor() {
        let mut c = controller();
        c.outputs.add(Output::new("DP-1".to_string()));
        let second = c.outputs.add(Output::new("DP-2".to_string()));
        let id = c.create_window(WindowAttributes::new(WindowType::Toplevel, 400, 300));

        c.fullscreen_on_monitor(id, 1).unwrap();
        c.show(id).unwrap();
        assert!(c.protocol().saw(&Request::SetFullscreen(id, Some(second))));

        c.unfullscreen(id).unwrap();
        assert!(c.protocol().saw(&Request::UnsetFullscreen(id)));
        c.iconify(id).unwrap();
        assert!(c.protocol().saw(&Request::SetMinimized(id)));
    }

    #[test]
    fn test_move_resize_only_moves_non_toplevels() {
        let mut c = controller();
        let top = c.create_window(WindowAttributes::new(WindowType::Toplevel, 100, 100));
        let popup = c.create_window(WindowAttributes::new(WindowType::Popup, 10, 10));

        c.move_resize(top, Some((50, 60)), -1, -1).unwrap();
        assert_eq!(c.geometry(top), Some(Rect::new(0, 0, 100, 100)));

        c.move_resize(popup, Some((50, 60)), 20, 30).unwrap();
        assert_eq!(c.geometry(popup), Some(Rect::new(50, 60, 20, 30)));
        assert!(c.window(popup).unwrap().position_set);
    }
}
