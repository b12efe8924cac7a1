//! Shell role negotiation
//!
//! Mapping turns a window with a surface into a toplevel, popup or
//! subsurface according to [`decide_role`], and the configure handlers
//! keep the window in sync with what the compositor decided.

use super::SurfaceController;
use crate::protocol::Protocol;
use crate::shell::{
    configure_size, decide_role, toplevel_size_limits, ConfigureStates, PopupRole, Positioner,
    RoleDecision, ShellRole, SubsurfaceRole, ToplevelRole,
};
use crate::state::{Rect, SeatId, TypeHint, WindowEvent, WindowId, WindowState};

impl<P: Protocol> SurfaceController<P> {
    /// Give the window its shell role
    pub(crate) fn map(&mut self, id: WindowId) {
        let Some(window) = self.windows.get(id) else {
            return;
        };
        if window.mapped || window.use_custom_surface {
            return;
        }

        match decide_role(&self.windows, &self.seats, id) {
            RoleDecision::Unmapped => return,
            // Without a parent the subsurface is created by set_transient_for
            RoleDecision::Subsurface { parent } => {
                if parent.is_some() {
                    self.create_subsurface(id);
                }
            }
            RoleDecision::Popup {
                parent,
                seat,
                position,
            } => self.create_popup(id, parent, seat, position),
            RoleDecision::Toplevel => self.create_toplevel(id),
        }

        if let Some(window) = self.windows.get_mut(id) {
            window.mapped = true;
        }
    }

    fn create_toplevel(&mut self, id: WindowId) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        if !window.has_surface {
            return;
        }

        log::debug!("Creating toplevel for {:?}", id);
        self.protocol.create_toplevel(id);
        window.role = ShellRole::Toplevel(ToplevelRole::default());

        self.sync_parent(id, None);
        self.sync_title(id);
        self.sync_margin(id);
        self.sync_size_limits(id);

        let Some(window) = self.windows.get(id) else {
            return;
        };
        if window.state.contains(WindowState::MAXIMIZED) {
            self.protocol.set_maximized(id, true);
        }
        if window.state.contains(WindowState::FULLSCREEN) {
            let output = window
                .initial_fullscreen_monitor
                .and_then(|monitor| self.outputs.nth(monitor))
                .map(|o| o.id);
            self.protocol.set_fullscreen(id, output);
        }

        self.protocol.set_app_id(id, &self.config.app_id);

        if window.hint == TypeHint::Dialog && window.transient_for.is_none() {
            self.add_orphan_dialog(id);
        }

        // xdg_surface needs a commit without a buffer before the first configure
        self.protocol.commit(id);
    }

    fn create_popup(
        &mut self,
        id: WindowId,
        parent: WindowId,
        seat: SeatId,
        position: Option<(i32, i32)>,
    ) {
        let parent_ready = self.windows.get(parent).is_some_and(|p| p.has_surface);
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        if !window.has_surface || !parent_ready {
            log::warn!("Popup parent {:?} of {:?} has no surface", parent, id);
            return;
        }

        if let Some((x, y)) = position {
            window.x = x;
            window.y = y;
        }

        let (width, height) = (window.width, window.height);
        let (root_x, root_y) = self.windows.fake_root_coords(id);
        let (parent_x, parent_y) = self.windows.fake_root_coords(parent);
        let (x, y) = (root_x - parent_x, root_y - parent_y);
        let positioner = Positioner::at_point(x, y, width, height);
        let serial = self.seats.get(seat).map_or(0, |s| s.last_grab_serial());

        log::debug!(
            "Creating popup {:?} on {:?} at {:?} serial {}",
            id,
            parent,
            positioner.placement(),
            serial
        );
        self.protocol
            .create_popup(id, parent, Some(seat), serial, &positioner);

        if let Some(window) = self.windows.get_mut(id) {
            window.role = ShellRole::Popup(PopupRole {
                parent,
                seat: Some(seat),
                configured: false,
            });
        }
        self.protocol.commit(id);
    }

    /// Embed the window in its transient parent's surface.
    ///
    /// The subsurface starts synchronized and goes desynchronized on the
    /// parent's next commit, so its first frame shows with the parent's.
    pub(crate) fn create_subsurface(&mut self, id: WindowId) {
        let Some(parent) = self.windows.transient_for(id) else {
            return;
        };
        let parent_ready = self.windows.get(parent).is_some_and(|p| p.has_surface);

        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        // Created on show otherwise
        if !window.has_surface || matches!(window.role, ShellRole::Subsurface(_)) {
            return;
        }
        if !parent_ready {
            return;
        }

        self.protocol.create_subsurface(id, parent);
        self.protocol.set_subsurface_position(id, window.x, window.y);
        window.role = ShellRole::Subsurface(SubsurfaceRole {
            parent,
            synchronized: true,
        });

        if let Some(parent_window) = self.windows.get_mut(parent) {
            if !parent_window.commit_listeners.contains(&id) {
                parent_window.commit_listeners.push(id);
            }
        }
        self.request_transient_parent_commit(id);
    }

    /// Destroy the subsurface role, if any
    pub(crate) fn unmap_subsurface(&mut self, id: WindowId) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        let ShellRole::Subsurface(role) = &window.role else {
            return;
        };
        let parent = role.parent;

        self.protocol.destroy_subsurface(id);
        window.role = ShellRole::Unrealized;

        if let Some(parent_window) = self.windows.get_mut(parent) {
            parent_window.commit_listeners.retain(|w| *w != id);
        }
    }

    /// Make the transient parent commit on its next after-paint
    pub(crate) fn request_transient_parent_commit(&mut self, id: WindowId) {
        let Some(parent) = self.windows.transient_for(id) else {
            return;
        };
        let Some(parent_window) = self.windows.get_mut(parent) else {
            return;
        };
        if !parent_window.has_surface || parent_window.pacer.pending_commit {
            return;
        }

        parent_window.pacer.pending_commit = true;
        parent_window.clock.request_after_paint();
    }

    /// Tell the compositor about the toplevel parent. `fallback` is used
    /// when the window has no transient parent of its own.
    pub(crate) fn sync_parent(&mut self, id: WindowId, fallback: Option<WindowId>) {
        if !self
            .windows
            .get(id)
            .is_some_and(|w| matches!(w.role, ShellRole::Toplevel(_)))
        {
            return;
        }

        let parent = self.windows.transient_for(id).or(fallback);
        let parent = match parent.and_then(|p| self.windows.get(p)) {
            Some(p) if !p.has_surface => return,
            Some(p) => matches!(p.role, ShellRole::Toplevel(_)).then_some(p.id),
            None => None,
        };

        self.protocol.set_parent(id, parent);
    }

    pub(crate) fn sync_title(&mut self, id: WindowId) {
        let Some(window) = self
            .windows
            .get(id)
            .filter(|w| matches!(w.role, ShellRole::Toplevel(_)))
        else {
            return;
        };
        if let Some(title) = &window.title {
            self.protocol.set_title(id, title);
        }
    }

    /// Window geometry is the window minus its shadow
    pub(crate) fn sync_margin(&mut self, id: WindowId) {
        let Some(window) = self
            .windows
            .get(id)
            .filter(|w| matches!(w.role, ShellRole::Toplevel(_)))
        else {
            return;
        };

        let margins = window.margins;
        let geometry = Rect::new(
            margins.left,
            margins.top,
            window.width - margins.horizontal(),
            window.height - margins.vertical(),
        );
        self.protocol.set_window_geometry(id, geometry);
    }

    pub(crate) fn sync_size_limits(&mut self, id: WindowId) {
        let Some(window) = self
            .windows
            .get(id)
            .filter(|w| matches!(w.role, ShellRole::Toplevel(_)))
        else {
            return;
        };

        let ((min_w, min_h), (max_w, max_h)) =
            toplevel_size_limits(&window.geometry_hints, window.geometry_mask, &window.margins);
        self.protocol.set_min_size(id, min_w, min_h);
        self.protocol.set_max_size(id, max_w, max_h);
    }

    pub(crate) fn add_orphan_dialog(&mut self, id: WindowId) {
        if !self.orphan_dialogs.contains(&id) {
            self.orphan_dialogs.push(id);
        }
    }

    /// Parent every orphan dialog to `id`
    fn update_dialogs(&mut self, id: WindowId) {
        let dialogs: Vec<WindowId> = self
            .orphan_dialogs
            .iter()
            .copied()
            .filter(|d| *d != id)
            .filter(|d| {
                self.windows
                    .get(*d)
                    .is_some_and(|w| w.hint == TypeHint::Dialog && w.transient_for.is_none())
            })
            .collect();

        for dialog in dialogs {
            self.sync_parent(dialog, Some(id));
        }
    }

    /// xdg_toplevel.configure followed by xdg_surface.configure
    pub fn handle_toplevel_configure(
        &mut self,
        id: WindowId,
        width: i32,
        height: i32,
        states: ConfigureStates,
        serial: u32,
    ) {
        let Some(window) = self.windows.get(id) else {
            log::debug!("Configure for destroyed window {:?}", id);
            return;
        };
        if !matches!(window.role, ShellRole::Toplevel(_)) {
            log::debug!("Toplevel configure for {:?} without a toplevel role", id);
            return;
        }

        let new_state = states.to_window_state();
        let size = configure_size(window, width, height, new_state);
        let scale = window.scale;

        log::debug!(
            "Configure {:?} {}x{} states {:?} serial {}",
            id,
            width,
            height,
            states,
            serial
        );

        if let Some((width, height)) = size {
            self.configure(id, width, height, scale);

            if !new_state.is_maximized_or_fullscreen() {
                if let Some(window) = self.windows.get_mut(id) {
                    window.saved_size = Some((
                        width - window.margins.horizontal(),
                        height - window.margins.vertical(),
                    ));
                }
            }
        }

        self.set_state(id, new_state);
        self.sync_margin(id);
        self.protocol.ack_configure(id, serial);

        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        if let ShellRole::Toplevel(role) = &mut window.role {
            role.configured = true;
        }

        if window.hint != TypeHint::Dialog && new_state.contains(WindowState::FOCUSED) {
            self.update_dialogs(id);
        }
    }

    /// Popup geometry is fixed at creation; only acknowledge
    pub fn handle_popup_configure(&mut self, id: WindowId, serial: u32) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        if let ShellRole::Popup(role) = &mut window.role {
            role.configured = true;
            self.protocol.ack_configure(id, serial);
        }
    }

    /// Whether buffers may be attached: xdg surfaces must have acked a
    /// configure first, subsurfaces can be drawn into right away
    pub fn is_configured(&self, id: WindowId) -> bool {
        self.windows.get(id).is_some_and(|w| match &w.role {
            ShellRole::Toplevel(role) => role.configured,
            ShellRole::Popup(role) => role.configured,
            ShellRole::Subsurface(_) => true,
            ShellRole::Unrealized | ShellRole::Destroyed => false,
        })
    }

    /// The user asked to close a toplevel
    pub fn handle_close(&mut self, id: WindowId) {
        if self.windows.contains(id) {
            log::debug!("Close requested for {:?}", id);
            self.events.push(WindowEvent::Delete { window: id });
        }
    }

    /// The compositor dismissed a popup
    pub fn handle_popup_done(&mut self, id: WindowId) {
        log::debug!("Popup {:?} dismissed", id);
        self.unmap_window(id);
    }
}
