//! Protocol requests over a real Wayland connection
//!
//! Maps the ids the surface layer uses onto wayland-client proxies. Every
//! proxy that emits events carries the id of its owner as user data so
//! the dispatchers in [`super::dispatch`] can route events back.

use std::collections::HashMap;
use std::os::unix::io::AsFd;

use log::{debug, warn};
use wayland_client::protocol::{
    wl_buffer::WlBuffer, wl_compositor::WlCompositor, wl_output::WlOutput, wl_region::WlRegion,
    wl_seat::WlSeat, wl_shm, wl_shm::WlShm, wl_subcompositor::WlSubcompositor,
    wl_subsurface::WlSubsurface, wl_surface::WlSurface,
};
use wayland_client::{Proxy, QueueHandle};
use wayland_protocols::xdg::shell::client::{
    xdg_popup::XdgPopup, xdg_positioner, xdg_surface::XdgSurface, xdg_toplevel::XdgToplevel,
    xdg_wm_base::XdgWmBase,
};

use super::shm::ShmStorage;
use super::ClientState;
use crate::error::ProtocolError;
use crate::protocol::{BufferId, PixelStorage, Protocol, BYTES_PER_PIXEL};
use crate::shell::{Anchor, Gravity, Positioner};
use crate::state::{OutputId, Rect, Region, SeatId, WindowId};

/// wl_surface version where attach offsets moved to wl_surface.offset
const SURFACE_OFFSET_SINCE: u32 = 5;

/// Globals bound from the registry
#[derive(Debug, Default)]
pub struct Globals {
    pub compositor: Option<WlCompositor>,
    pub subcompositor: Option<WlSubcompositor>,
    pub shm: Option<WlShm>,
    pub wm_base: Option<XdgWmBase>,
}

impl Globals {
    /// Names of required globals the compositor did not advertise.
    /// wl_subcompositor is optional; without it child surfaces stay unmapped.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.compositor.is_none() {
            missing.push("wl_compositor");
        }
        if self.shm.is_none() {
            missing.push("wl_shm");
        }
        if self.wm_base.is_none() {
            missing.push("xdg_wm_base");
        }
        missing
    }
}

/// xdg-shell objects of a mapped window
#[derive(Debug)]
struct XdgObjects {
    xdg_surface: XdgSurface,
    toplevel: Option<XdgToplevel>,
    popup: Option<XdgPopup>,
}

/// [`Protocol`] backed by wayland-client
pub struct WaylandProtocol {
    qh: QueueHandle<ClientState>,
    pub(crate) globals: Globals,
    surfaces: HashMap<WindowId, WlSurface>,
    xdg: HashMap<WindowId, XdgObjects>,
    subsurfaces: HashMap<WindowId, WlSubsurface>,
    buffers: HashMap<BufferId, WlBuffer>,
    pub(crate) outputs: HashMap<OutputId, WlOutput>,
    pub(crate) seats: HashMap<SeatId, WlSeat>,
}

impl WaylandProtocol {
    /// Create with no globals bound yet
    pub fn new(qh: QueueHandle<ClientState>) -> Self {
        Self {
            qh,
            globals: Globals::default(),
            surfaces: HashMap::new(),
            xdg: HashMap::new(),
            subsurfaces: HashMap::new(),
            buffers: HashMap::new(),
            outputs: HashMap::new(),
            seats: HashMap::new(),
        }
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    fn surface(&self, window: WindowId) -> Option<&WlSurface> {
        let surface = self.surfaces.get(&window);
        if surface.is_none() {
            warn!("No wl_surface for {:?}", window);
        }
        surface
    }

    fn toplevel(&self, window: WindowId) -> Option<&XdgToplevel> {
        self.xdg.get(&window).and_then(|xdg| xdg.toplevel.as_ref())
    }

    fn create_region(&self, region: &Region) -> Option<WlRegion> {
        let compositor = self.globals.compositor.as_ref()?;
        let wl_region = compositor.create_region(&self.qh, ());
        for rect in region.rects() {
            wl_region.add(rect.x, rect.y, rect.width, rect.height);
        }
        Some(wl_region)
    }

    fn create_xdg_surface(&self, window: WindowId) -> Option<XdgSurface> {
        let Some(wm_base) = self.globals.wm_base.as_ref() else {
            warn!("Cannot give {:?} a shell role without xdg_wm_base", window);
            return None;
        };
        let surface = self.surface(window)?;
        Some(wm_base.get_xdg_surface(surface, &self.qh, window))
    }
}

fn xdg_anchor(anchor: Anchor) -> xdg_positioner::Anchor {
    match anchor {
        Anchor::None => xdg_positioner::Anchor::None,
        Anchor::Top => xdg_positioner::Anchor::Top,
        Anchor::Bottom => xdg_positioner::Anchor::Bottom,
        Anchor::Left => xdg_positioner::Anchor::Left,
        Anchor::Right => xdg_positioner::Anchor::Right,
        Anchor::TopLeft => xdg_positioner::Anchor::TopLeft,
        Anchor::TopRight => xdg_positioner::Anchor::TopRight,
        Anchor::BottomLeft => xdg_positioner::Anchor::BottomLeft,
        Anchor::BottomRight => xdg_positioner::Anchor::BottomRight,
    }
}

fn xdg_gravity(gravity: Gravity) -> xdg_positioner::Gravity {
    match gravity {
        Gravity::None => xdg_positioner::Gravity::None,
        Gravity::Top => xdg_positioner::Gravity::Top,
        Gravity::Bottom => xdg_positioner::Gravity::Bottom,
        Gravity::Left => xdg_positioner::Gravity::Left,
        Gravity::Right => xdg_positioner::Gravity::Right,
        Gravity::TopLeft => xdg_positioner::Gravity::TopLeft,
        Gravity::TopRight => xdg_positioner::Gravity::TopRight,
        Gravity::BottomLeft => xdg_positioner::Gravity::BottomLeft,
        Gravity::BottomRight => xdg_positioner::Gravity::BottomRight,
    }
}

impl Protocol for WaylandProtocol {
    fn compositor_version(&self) -> u32 {
        self.globals.compositor.as_ref().map_or(0, |c| c.version())
    }

    fn create_surface(&mut self, window: WindowId) {
        let Some(compositor) = self.globals.compositor.as_ref() else {
            warn!("Cannot create a surface for {:?} without wl_compositor", window);
            return;
        };
        let surface = compositor.create_surface(&self.qh, window);
        debug!("Created {} for {:?}", surface.id(), window);
        self.surfaces.insert(window, surface);
    }

    fn destroy_surface(&mut self, window: WindowId) {
        if let Some(surface) = self.surfaces.remove(&window) {
            surface.destroy();
        }
    }

    fn attach(&mut self, window: WindowId, buffer: Option<BufferId>, dx: i32, dy: i32) {
        let wl_buffer = buffer.and_then(|id| self.buffers.get(&id));
        if buffer.is_some() && wl_buffer.is_none() {
            warn!("Attaching unknown buffer {:?} to {:?}", buffer, window);
            return;
        }
        let Some(surface) = self.surface(window) else {
            return;
        };

        if surface.version() >= SURFACE_OFFSET_SINCE {
            surface.attach(wl_buffer, 0, 0);
            if dx != 0 || dy != 0 {
                surface.offset(dx, dy);
            }
        } else {
            surface.attach(wl_buffer, dx, dy);
        }
    }

    fn set_buffer_scale(&mut self, window: WindowId, scale: i32) {
        if let Some(surface) = self.surface(window) {
            surface.set_buffer_scale(scale);
        }
    }

    fn damage(&mut self, window: WindowId, rect: Rect) {
        if let Some(surface) = self.surface(window) {
            surface.damage(rect.x, rect.y, rect.width, rect.height);
        }
    }

    fn request_frame(&mut self, window: WindowId) {
        if let Some(surface) = self.surface(window) {
            surface.frame(&self.qh, window);
        }
    }

    fn commit(&mut self, window: WindowId) {
        if let Some(surface) = self.surface(window) {
            surface.commit();
        }
    }

    fn set_opaque_region(&mut self, window: WindowId, region: Option<&Region>) {
        let wl_region = region.and_then(|r| self.create_region(r));
        if let Some(surface) = self.surface(window) {
            surface.set_opaque_region(wl_region.as_ref());
        }
        if let Some(wl_region) = wl_region {
            wl_region.destroy();
        }
    }

    fn set_input_region(&mut self, window: WindowId, region: Option<&Region>) {
        let wl_region = region.and_then(|r| self.create_region(r));
        if let Some(surface) = self.surface(window) {
            surface.set_input_region(wl_region.as_ref());
        }
        if let Some(wl_region) = wl_region {
            wl_region.destroy();
        }
    }

    fn create_buffer(
        &mut self,
        buffer: BufferId,
        width: i32,
        height: i32,
    ) -> Result<Box<dyn PixelStorage>, ProtocolError> {
        let shm = self
            .globals
            .shm
            .as_ref()
            .ok_or(ProtocolError::MissingGlobal("wl_shm"))?;
        let storage = ShmStorage::new(width, height)?;

        let pool = shm.create_pool(storage.as_fd(), storage.len() as i32, &self.qh, ());
        let wl_buffer = pool.create_buffer(
            0,
            width,
            height,
            width * BYTES_PER_PIXEL,
            wl_shm::Format::Argb8888,
            &self.qh,
            buffer,
        );
        // The buffer keeps the pool's memory alive
        pool.destroy();

        debug!("Created {}x{} shm buffer {:?}", width, height, buffer);
        self.buffers.insert(buffer, wl_buffer);
        Ok(Box::new(storage))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(wl_buffer) = self.buffers.remove(&buffer) {
            wl_buffer.destroy();
        }
    }

    fn create_toplevel(&mut self, window: WindowId) {
        let Some(xdg_surface) = self.create_xdg_surface(window) else {
            return;
        };
        let toplevel = xdg_surface.get_toplevel(&self.qh, window);
        self.xdg.insert(
            window,
            XdgObjects {
                xdg_surface,
                toplevel: Some(toplevel),
                popup: None,
            },
        );
    }

    fn set_parent(&mut self, window: WindowId, parent: Option<WindowId>) {
        let parent = parent.and_then(|p| self.toplevel(p));
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.set_parent(parent);
        }
    }

    fn set_title(&mut self, window: WindowId, title: &str) {
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.set_title(title.to_string());
        }
    }

    fn set_app_id(&mut self, window: WindowId, app_id: &str) {
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.set_app_id(app_id.to_string());
        }
    }

    fn set_window_geometry(&mut self, window: WindowId, geometry: Rect) {
        if let Some(xdg) = self.xdg.get(&window) {
            xdg.xdg_surface
                .set_window_geometry(geometry.x, geometry.y, geometry.width, geometry.height);
        }
    }

    fn set_min_size(&mut self, window: WindowId, width: i32, height: i32) {
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.set_min_size(width, height);
        }
    }

    fn set_max_size(&mut self, window: WindowId, width: i32, height: i32) {
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.set_max_size(width, height);
        }
    }

    fn set_maximized(&mut self, window: WindowId, maximized: bool) {
        if let Some(toplevel) = self.toplevel(window) {
            if maximized {
                toplevel.set_maximized();
            } else {
                toplevel.unset_maximized();
            }
        }
    }

    fn set_fullscreen(&mut self, window: WindowId, output: Option<OutputId>) {
        let output = output.and_then(|o| self.outputs.get(&o));
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.set_fullscreen(output);
        }
    }

    fn unset_fullscreen(&mut self, window: WindowId) {
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.unset_fullscreen();
        }
    }

    fn set_minimized(&mut self, window: WindowId) {
        if let Some(toplevel) = self.toplevel(window) {
            toplevel.set_minimized();
        }
    }

    fn ack_configure(&mut self, window: WindowId, serial: u32) {
        if let Some(xdg) = self.xdg.get(&window) {
            xdg.xdg_surface.ack_configure(serial);
        }
    }

    fn create_popup(
        &mut self,
        window: WindowId,
        parent: WindowId,
        seat: Option<SeatId>,
        serial: u32,
        positioner: &Positioner,
    ) {
        let Some(wm_base) = self.globals.wm_base.as_ref() else {
            warn!("Cannot create popup {:?} without xdg_wm_base", window);
            return;
        };
        let Some(parent_xdg) = self.xdg.get(&parent).map(|xdg| xdg.xdg_surface.clone()) else {
            warn!("Popup parent {:?} has no xdg_surface", parent);
            return;
        };

        let xdg_positioner = wm_base.create_positioner(&self.qh, ());
        let (width, height) = positioner.size;
        let (ax, ay, aw, ah) = positioner.anchor_rect;
        let (ox, oy) = positioner.offset;
        xdg_positioner.set_size(width, height);
        xdg_positioner.set_anchor_rect(ax, ay, aw.max(1), ah.max(1));
        xdg_positioner.set_anchor(xdg_anchor(positioner.anchor));
        xdg_positioner.set_gravity(xdg_gravity(positioner.gravity));
        xdg_positioner.set_offset(ox, oy);

        let Some(xdg_surface) = self.create_xdg_surface(window) else {
            xdg_positioner.destroy();
            return;
        };
        let popup = xdg_surface.get_popup(Some(&parent_xdg), &xdg_positioner, &self.qh, window);
        xdg_positioner.destroy();

        if let Some(wl_seat) = seat.and_then(|s| self.seats.get(&s)) {
            popup.grab(wl_seat, serial);
        }

        self.xdg.insert(
            window,
            XdgObjects {
                xdg_surface,
                toplevel: None,
                popup: Some(popup),
            },
        );
    }

    fn destroy_role(&mut self, window: WindowId) {
        let Some(xdg) = self.xdg.remove(&window) else {
            return;
        };
        if let Some(toplevel) = xdg.toplevel {
            toplevel.destroy();
        }
        if let Some(popup) = xdg.popup {
            popup.destroy();
        }
        xdg.xdg_surface.destroy();
    }

    fn create_subsurface(&mut self, window: WindowId, parent: WindowId) {
        let Some(subcompositor) = self.globals.subcompositor.as_ref() else {
            warn!("Cannot create subsurface {:?} without wl_subcompositor", window);
            return;
        };
        let (Some(surface), Some(parent_surface)) =
            (self.surfaces.get(&window), self.surfaces.get(&parent))
        else {
            warn!("Subsurface {:?} or parent {:?} has no surface", window, parent);
            return;
        };
        let subsurface = subcompositor.get_subsurface(surface, parent_surface, &self.qh, ());
        self.subsurfaces.insert(window, subsurface);
    }

    fn set_subsurface_position(&mut self, window: WindowId, x: i32, y: i32) {
        if let Some(subsurface) = self.subsurfaces.get(&window) {
            subsurface.set_position(x, y);
        }
    }

    fn set_subsurface_desync(&mut self, window: WindowId) {
        if let Some(subsurface) = self.subsurfaces.get(&window) {
            subsurface.set_desync();
        }
    }

    fn destroy_subsurface(&mut self, window: WindowId) {
        if let Some(subsurface) = self.subsurfaces.remove(&window) {
            subsurface.destroy();
        }
    }
}
