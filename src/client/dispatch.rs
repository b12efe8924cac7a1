//! Event dispatch
//!
//! Routes wayland-client events into the [`SurfaceController`]. Objects
//! carry the id of the window, buffer, output or seat they belong to as
//! user data.
//!
//! [`SurfaceController`]: crate::surface::SurfaceController

use log::{debug, trace};
use wayland_client::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_callback::{self, WlCallback},
    wl_compositor::WlCompositor,
    wl_output::{self, WlOutput},
    wl_pointer::{self, WlPointer},
    wl_region::WlRegion,
    wl_registry::{self, WlRegistry},
    wl_seat::{self, WlSeat},
    wl_shm::WlShm,
    wl_shm_pool::WlShmPool,
    wl_subcompositor::WlSubcompositor,
    wl_subsurface::WlSubsurface,
    wl_surface::{self, WlSurface},
};
use wayland_client::{delegate_noop, Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::shell::client::{
    xdg_popup::{self, XdgPopup},
    xdg_positioner::XdgPositioner,
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};

use super::{ClientState, PendingConfigure};
use crate::protocol::BufferId;
use crate::shell::{ConfigureStates, ShellRole};
use crate::state::{OutputId, OutputMode, SeatCapabilities, SeatId, WindowId};

/// Decode the state array of an xdg_toplevel.configure
pub(crate) fn decode_states(raw: &[u8]) -> ConfigureStates {
    raw.chunks_exact(4)
        .filter_map(|chunk| chunk.try_into().ok().map(u32::from_ne_bytes))
        .fold(ConfigureStates::empty(), |states, value| {
            match xdg_toplevel::State::try_from(value) {
                Ok(xdg_toplevel::State::Maximized) => states | ConfigureStates::MAXIMIZED,
                Ok(xdg_toplevel::State::Fullscreen) => states | ConfigureStates::FULLSCREEN,
                Ok(xdg_toplevel::State::Resizing) => states | ConfigureStates::RESIZING,
                Ok(xdg_toplevel::State::Activated) => states | ConfigureStates::ACTIVATED,
                _ => states,
            }
        })
}

impl Dispatch<WlRegistry, ()> for ClientState {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                trace!("Global {} {} v{}", name, interface, version);
                state.bind_global(registry, name, &interface, version, qh);
            }
            wl_registry::Event::GlobalRemove { name } => state.remove_global(name),
            _ => {}
        }
    }
}

impl Dispatch<WlSurface, WindowId> for ClientState {
    fn event(
        state: &mut Self,
        _: &WlSurface,
        event: wl_surface::Event,
        window: &WindowId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_surface::Event::Enter { output } => {
                if let Some(output) = output.data::<OutputId>() {
                    state.controller.handle_surface_enter(*window, *output);
                }
            }
            wl_surface::Event::Leave { output } => {
                if let Some(output) = output.data::<OutputId>() {
                    state.controller.handle_surface_leave(*window, *output);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlCallback, WindowId> for ClientState {
    fn event(
        state: &mut Self,
        _: &WlCallback,
        event: wl_callback::Event,
        window: &WindowId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            state.controller.handle_frame_done(*window, callback_data);
        }
    }
}

impl Dispatch<WlBuffer, BufferId> for ClientState {
    fn event(
        state: &mut Self,
        _: &WlBuffer,
        event: wl_buffer::Event,
        buffer: &BufferId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            state.controller.handle_buffer_release(*buffer);
        }
    }
}

impl Dispatch<XdgWmBase, ()> for ClientState {
    fn event(
        _: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, WindowId> for ClientState {
    fn event(
        state: &mut Self,
        _: &XdgSurface,
        event: xdg_surface::Event,
        window: &WindowId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let xdg_surface::Event::Configure { serial } = event else {
            return;
        };
        let window = *window;
        let is_toplevel = state
            .controller
            .window(window)
            .is_some_and(|w| matches!(w.role, ShellRole::Toplevel(_)));

        if is_toplevel {
            let pending = state
                .pending_configures
                .remove(&window)
                .unwrap_or_default();
            state.controller.handle_toplevel_configure(
                window,
                pending.width,
                pending.height,
                pending.states,
                serial,
            );
        } else {
            state.controller.handle_popup_configure(window, serial);
        }
    }
}

impl Dispatch<XdgToplevel, WindowId> for ClientState {
    fn event(
        state: &mut Self,
        _: &XdgToplevel,
        event: xdg_toplevel::Event,
        window: &WindowId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                state.pending_configures.insert(
                    *window,
                    PendingConfigure {
                        width,
                        height,
                        states: decode_states(&states),
                    },
                );
            }
            xdg_toplevel::Event::Close => state.controller.handle_close(*window),
            _ => {}
        }
    }
}

impl Dispatch<XdgPopup, WindowId> for ClientState {
    fn event(
        state: &mut Self,
        _: &XdgPopup,
        event: xdg_popup::Event,
        window: &WindowId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_popup::Event::Configure {
                x,
                y,
                width,
                height,
            } => {
                debug!(
                    "Popup {:?} placed at {},{} {}x{}",
                    window, x, y, width, height
                );
            }
            xdg_popup::Event::PopupDone => state.controller.handle_popup_done(*window),
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, OutputId> for ClientState {
    fn event(
        state: &mut Self,
        _: &WlOutput,
        event: wl_output::Event,
        id: &OutputId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_output::Event::Done = event {
            state.controller.handle_output_changed(*id);
            return;
        }

        let Some(output) = state.controller.outputs.get_mut(*id) else {
            return;
        };
        match event {
            wl_output::Event::Geometry { make, model, .. } => {
                output.description = format!("{} {}", make, model);
            }
            wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => {
                let flags = match flags {
                    WEnum::Value(flags) => flags,
                    WEnum::Unknown(_) => wl_output::Mode::empty(),
                };
                output.add_mode(OutputMode {
                    width,
                    height,
                    refresh,
                    current: flags.contains(wl_output::Mode::Current),
                    preferred: flags.contains(wl_output::Mode::Preferred),
                });
            }
            wl_output::Event::Scale { factor } => {
                debug!("Output {} scale {}", output.name, factor);
                output.scale = factor;
            }
            wl_output::Event::Name { name } => output.name = name,
            _ => {}
        }
    }
}

impl Dispatch<WlSeat, SeatId> for ClientState {
    fn event(
        state: &mut Self,
        seat: &WlSeat,
        event: wl_seat::Event,
        id: &SeatId,
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_seat::Event::Capabilities { capabilities } => {
                let capabilities = SeatCapabilities::from_wayland(match capabilities {
                    WEnum::Value(capabilities) => capabilities.bits(),
                    WEnum::Unknown(raw) => raw,
                });
                if let Some(seat) = state.controller.seats.get_mut(*id) {
                    seat.set_capabilities(capabilities);
                }

                if capabilities.pointer && !state.pointers.contains_key(id) {
                    state.pointers.insert(*id, seat.get_pointer(qh, *id));
                } else if !capabilities.pointer {
                    if let Some(pointer) = state.pointers.remove(id) {
                        if pointer.version() >= 3 {
                            pointer.release();
                        }
                    }
                }
            }
            wl_seat::Event::Name { name } => {
                if let Some(seat) = state.controller.seats.get_mut(*id) {
                    seat.set_name(name);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlPointer, SeatId> for ClientState {
    fn event(
        state: &mut Self,
        _: &WlPointer,
        event: wl_pointer::Event,
        id: &SeatId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(seat) = state.controller.seats.get_mut(*id) else {
            return;
        };
        match event {
            wl_pointer::Event::Enter {
                surface,
                surface_x,
                surface_y,
                ..
            } => {
                if let Some(window) = surface.data::<WindowId>() {
                    seat.pointer_enter(*window, surface_x, surface_y);
                }
            }
            wl_pointer::Event::Leave { .. } => seat.pointer_leave(),
            wl_pointer::Event::Motion {
                surface_x,
                surface_y,
                ..
            } => seat.pointer_motion(surface_x, surface_y),
            wl_pointer::Event::Button {
                serial,
                button,
                state: button_state,
                ..
            } => {
                let pressed = matches!(button_state, WEnum::Value(wl_pointer::ButtonState::Pressed));
                seat.pointer_button(serial, button, pressed);
            }
            _ => {}
        }
    }
}

delegate_noop!(ClientState: ignore WlCompositor);
delegate_noop!(ClientState: ignore WlShm);
delegate_noop!(ClientState: WlSubcompositor);
delegate_noop!(ClientState: WlSubsurface);
delegate_noop!(ClientState: WlShmPool);
delegate_noop!(ClientState: WlRegion);
delegate_noop!(ClientState: XdgPositioner);

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_states(states: &[u32]) -> Vec<u8> {
        states.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn test_decode_states() {
        let raw = raw_states(&[
            xdg_toplevel::State::Maximized as u32,
            xdg_toplevel::State::Activated as u32,
        ]);
        assert_eq!(
            decode_states(&raw),
            ConfigureStates::MAXIMIZED | ConfigureStates::ACTIVATED
        );
    }

    #[test]
    fn test_decode_states_skips_unknown() {
        let mut raw = raw_states(&[9999, xdg_toplevel::State::Fullscreen as u32]);
        // Trailing partial entry
        raw.push(1);
        assert_eq!(decode_states(&raw), ConfigureStates::FULLSCREEN);
        assert_eq!(decode_states(&[]), ConfigureStates::empty());
    }
}
