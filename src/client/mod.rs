//! Wayland client backend
//!
//! Connects to the compositor, binds the globals the surface layer needs
//! and feeds compositor events into a [`SurfaceController`] driving a
//! [`WaylandProtocol`].

pub mod dispatch;
pub mod event_loop;
pub mod protocol;
pub mod shm;

pub use event_loop::EventLoop;
pub use protocol::{Globals, WaylandProtocol};
pub use shm::ShmStorage;

use std::collections::HashMap;

use anyhow::{bail, Context};
use log::{debug, info, warn};
use wayland_client::protocol::{
    wl_compositor::WlCompositor, wl_output::WlOutput, wl_pointer::WlPointer,
    wl_registry::WlRegistry, wl_seat::WlSeat, wl_shm::WlShm, wl_subcompositor::WlSubcompositor,
};
use wayland_client::{Connection, EventQueue, Proxy, QueueHandle};
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase;

use crate::shell::ConfigureStates;
use crate::state::{Output, OutputId, Seat, SeatId, WindowId};
use crate::surface::{DisplayConfig, SurfaceController};

/// Highest versions we speak of each global
const COMPOSITOR_VERSION: u32 = 6;
const SUBCOMPOSITOR_VERSION: u32 = 1;
const SHM_VERSION: u32 = 1;
const WM_BASE_VERSION: u32 = 5;
const OUTPUT_VERSION: u32 = 4;
const SEAT_VERSION: u32 = 5;

/// xdg_toplevel.configure data waiting for its xdg_surface.configure
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PendingConfigure {
    pub width: i32,
    pub height: i32,
    pub states: ConfigureStates,
}

/// Dispatch state of the Wayland event queue
pub struct ClientState {
    /// Owner of all window state
    pub controller: SurfaceController<WaylandProtocol>,
    pub(crate) pending_configures: HashMap<WindowId, PendingConfigure>,
    /// Registry name -> output
    output_globals: HashMap<u32, OutputId>,
    /// Registry name -> seat
    seat_globals: HashMap<u32, SeatId>,
    pub(crate) pointers: HashMap<SeatId, WlPointer>,
    running: bool,
}

impl ClientState {
    /// Create the state for a queue
    pub fn new(qh: QueueHandle<ClientState>, config: DisplayConfig) -> Self {
        Self {
            controller: SurfaceController::new(WaylandProtocol::new(qh), config),
            pending_configures: HashMap::new(),
            output_globals: HashMap::new(),
            seat_globals: HashMap::new(),
            pointers: HashMap::new(),
            running: true,
        }
    }

    /// Whether the client should keep running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ask the event loop to exit
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub(crate) fn bind_global(
        &mut self,
        registry: &WlRegistry,
        name: u32,
        interface: &str,
        version: u32,
        qh: &QueueHandle<Self>,
    ) {
        let protocol = self.controller.protocol_mut();

        match interface {
            "wl_compositor" => {
                let version = version.min(COMPOSITOR_VERSION);
                protocol.globals.compositor =
                    Some(registry.bind::<WlCompositor, _, _>(name, version, qh, ()));
                debug!("Bound wl_compositor v{}", version);
            }
            "wl_subcompositor" => {
                protocol.globals.subcompositor = Some(registry.bind::<WlSubcompositor, _, _>(
                    name,
                    version.min(SUBCOMPOSITOR_VERSION),
                    qh,
                    (),
                ));
            }
            "wl_shm" => {
                protocol.globals.shm =
                    Some(registry.bind::<WlShm, _, _>(name, version.min(SHM_VERSION), qh, ()));
            }
            "xdg_wm_base" => {
                protocol.globals.wm_base = Some(registry.bind::<XdgWmBase, _, _>(
                    name,
                    version.min(WM_BASE_VERSION),
                    qh,
                    (),
                ));
            }
            "wl_output" => {
                let id = self
                    .controller
                    .outputs
                    .add(Output::new(format!("wl_output-{}", name)));
                let output =
                    registry.bind::<WlOutput, _, _>(name, version.min(OUTPUT_VERSION), qh, id);
                self.controller.protocol_mut().outputs.insert(id, output);
                self.output_globals.insert(name, id);
                debug!("Bound output {} as {:?}", name, id);
            }
            "wl_seat" => {
                let id = self
                    .controller
                    .seats
                    .add(Seat::new(format!("wl_seat-{}", name)));
                let seat = registry.bind::<WlSeat, _, _>(name, version.min(SEAT_VERSION), qh, id);
                self.controller.protocol_mut().seats.insert(id, seat);
                self.seat_globals.insert(name, id);
                debug!("Bound seat {} as {:?}", name, id);
            }
            _ => {}
        }
    }

    pub(crate) fn remove_global(&mut self, name: u32) {
        if let Some(id) = self.output_globals.remove(&name) {
            info!("Output {:?} removed", id);
            self.controller.handle_output_removed(id);
            if let Some(output) = self.controller.protocol_mut().outputs.remove(&id) {
                if output.version() >= 3 {
                    output.release();
                }
            }
        } else if let Some(id) = self.seat_globals.remove(&name) {
            info!("Seat {:?} removed", id);
            self.controller.seats.remove(id);
            if let Some(pointer) = self.pointers.remove(&id) {
                if pointer.version() >= 3 {
                    pointer.release();
                }
            }
            if let Some(seat) = self.controller.protocol_mut().seats.remove(&id) {
                if seat.version() >= 5 {
                    seat.release();
                }
            }
        }
    }
}

/// A connected client ready to be driven by an [`EventLoop`]
pub struct WaylandClient {
    pub connection: Connection,
    pub event_queue: EventQueue<ClientState>,
    pub state: ClientState,
}

impl WaylandClient {
    /// Connect to the compositor named by the environment and bind globals
    pub fn connect(config: DisplayConfig) -> anyhow::Result<Self> {
        let connection =
            Connection::connect_to_env().context("Failed to connect to a Wayland compositor")?;
        let mut event_queue = connection.new_event_queue();
        let qh = event_queue.handle();

        let display = connection.display();
        display.get_registry(&qh, ());

        let mut state = ClientState::new(qh, config);

        // Globals, then the initial output and seat state they send
        event_queue
            .roundtrip(&mut state)
            .context("Initial roundtrip failed")?;
        let missing = state.controller.protocol().globals().missing();
        if !missing.is_empty() {
            bail!("Compositor is missing {}", missing.join(", "));
        }
        if state.controller.protocol().globals().subcompositor.is_none() {
            warn!("No wl_subcompositor; child windows will not be shown");
        }
        event_queue
            .roundtrip(&mut state)
            .context("Output roundtrip failed")?;

        info!(
            "Connected with {} output(s) and {} seat(s)",
            state.controller.outputs.len(),
            state.controller.seats.len()
        );

        Ok(Self {
            connection,
            event_queue,
            state,
        })
    }
}
