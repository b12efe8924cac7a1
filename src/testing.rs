//! Recording protocol used by unit tests

use crate::error::ProtocolError;
use crate::protocol::{BufferId, MemoryStorage, PixelStorage, Protocol};
use crate::shell::Positioner;
use crate::state::{OutputId, Rect, Region, SeatId, WindowId};

/// A request as seen by the compositor
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Request {
    CreateSurface(WindowId),
    DestroySurface(WindowId),
    Attach(WindowId, Option<BufferId>, i32, i32),
    SetBufferScale(WindowId, i32),
    Damage(WindowId, Rect),
    Frame(WindowId),
    Commit(WindowId),
    SetOpaqueRegion(WindowId, Option<Region>),
    SetInputRegion(WindowId, Option<Region>),
    CreateBuffer(BufferId, i32, i32),
    DestroyBuffer(BufferId),
    CreateToplevel(WindowId),
    SetParent(WindowId, Option<WindowId>),
    SetTitle(WindowId, String),
    SetAppId(WindowId, String),
    SetWindowGeometry(WindowId, Rect),
    SetMinSize(WindowId, i32, i32),
    SetMaxSize(WindowId, i32, i32),
    SetMaximized(WindowId, bool),
    SetFullscreen(WindowId, Option<OutputId>),
    UnsetFullscreen(WindowId),
    SetMinimized(WindowId),
    AckConfigure(WindowId, u32),
    CreatePopup {
        window: WindowId,
        parent: WindowId,
        seat: Option<SeatId>,
        serial: u32,
        positioner: Positioner,
    },
    DestroyRole(WindowId),
    CreateSubsurface(WindowId, WindowId),
    SetSubsurfacePosition(WindowId, i32, i32),
    SetSubsurfaceDesync(WindowId),
    DestroySubsurface(WindowId),
}

/// Protocol that logs every request and allocates buffers in memory
#[derive(Debug)]
pub(crate) struct RecordingProtocol {
    pub requests: Vec<Request>,
    pub version: u32,
    pub fail_allocations: bool,
}

impl RecordingProtocol {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            version: 6,
            fail_allocations: false,
        }
    }

    /// Take the recorded requests, leaving the log empty
    pub fn take(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    /// Count recorded requests matching a predicate
    pub fn count(&self, pred: impl Fn(&Request) -> bool) -> usize {
        self.requests.iter().filter(|r| pred(r)).count()
    }

    /// Was a request recorded
    pub fn saw(&self, request: &Request) -> bool {
        self.requests.contains(request)
    }
}

impl Protocol for RecordingProtocol {
    fn compositor_version(&self) -> u32 {
        self.version
    }

    fn create_surface(&mut self, window: WindowId) {
        self.requests.push(Request::CreateSurface(window));
    }

    fn destroy_surface(&mut self, window: WindowId) {
        self.requests.push(Request::DestroySurface(window));
    }

    fn attach(&mut self, window: WindowId, buffer: Option<BufferId>, dx: i32, dy: i32) {
        self.requests.push(Request::Attach(window, buffer, dx, dy));
    }

    fn set_buffer_scale(&mut self, window: WindowId, scale: i32) {
        self.requests.push(Request::SetBufferScale(window, scale));
    }

    fn damage(&mut self, window: WindowId, rect: Rect) {
        self.requests.push(Request::Damage(window, rect));
    }

    fn request_frame(&mut self, window: WindowId) {
        self.requests.push(Request::Frame(window));
    }

    fn commit(&mut self, window: WindowId) {
        self.requests.push(Request::Commit(window));
    }

    fn set_opaque_region(&mut self, window: WindowId, region: Option<&Region>) {
        self.requests
            .push(Request::SetOpaqueRegion(window, region.cloned()));
    }

    fn set_input_region(&mut self, window: WindowId, region: Option<&Region>) {
        self.requests
            .push(Request::SetInputRegion(window, region.cloned()));
    }

    fn create_buffer(
        &mut self,
        buffer: BufferId,
        width: i32,
        height: i32,
    ) -> Result<Box<dyn PixelStorage>, ProtocolError> {
        if self.fail_allocations {
            return Err(ProtocolError::MissingGlobal("wl_shm"));
        }
        self.requests.push(Request::CreateBuffer(buffer, width, height));
        Ok(Box::new(MemoryStorage::new(width, height)))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.requests.push(Request::DestroyBuffer(buffer));
    }

    fn create_toplevel(&mut self, window: WindowId) {
        self.requests.push(Request::CreateToplevel(window));
    }

    fn set_parent(&mut self, window: WindowId, parent: Option<WindowId>) {
        self.requests.push(Request::SetParent(window, parent));
    }

    fn set_title(&mut self, window: WindowId, title: &str) {
        self.requests
            .push(Request::SetTitle(window, title.to_string()));
    }

    fn set_app_id(&mut self, window: WindowId, app_id: &str) {
        self.requests
            .push(Request::SetAppId(window, app_id.to_string()));
    }

    fn set_window_geometry(&mut self, window: WindowId, geometry: Rect) {
        self.requests
            .push(Request::SetWindowGeometry(window, geometry));
    }

    fn set_min_size(&mut self, window: WindowId, width: i32, height: i32) {
        self.requests.push(Request::SetMinSize(window, width, height));
    }

    fn set_max_size(&mut self, window: WindowId, width: i32, height: i32) {
        self.requests.push(Request::SetMaxSize(window, width, height));
    }

    fn set_maximized(&mut self, window: WindowId, maximized: bool) {
        self.requests.push(Request::SetMaximized(window, maximized));
    }

    fn set_fullscreen(&mut self, window: WindowId, output: Option<OutputId>) {
        self.requests.push(Request::SetFullscreen(window, output));
    }

    fn unset_fullscreen(&mut self, window: WindowId) {
        self.requests.push(Request::UnsetFullscreen(window));
    }

    fn set_minimized(&mut self, window: WindowId) {
        self.requests.push(Request::SetMinimized(window));
    }

    fn ack_configure(&mut self, window: WindowId, serial: u32) {
        self.requests.push(Request::AckConfigure(window, serial));
    }

    fn create_popup(
        &mut self,
        window: WindowId,
        parent: WindowId,
        seat: Option<SeatId>,
        serial: u32,
        positioner: &Positioner,
    ) {
        self.requests.push(Request::CreatePopup {
            window,
            parent,
            seat,
            serial,
            positioner: positioner.clone(),
        });
    }

    fn destroy_role(&mut self, window: WindowId) {
        self.requests.push(Request::DestroyRole(window));
    }

    fn create_subsurface(&mut self, window: WindowId, parent: WindowId) {
        self.requests
            .push(Request::CreateSubsurface(window, parent));
    }

    fn set_subsurface_position(&mut self, window: WindowId, x: i32, y: i32) {
        self.requests
            .push(Request::SetSubsurfacePosition(window, x, y));
    }

    fn set_subsurface_desync(&mut self, window: WindowId) {
        self.requests.push(Request::SetSubsurfaceDesync(window));
    }

    fn destroy_subsurface(&mut self, window: WindowId) {
        self.requests.push(Request::DestroySubsurface(window));
    }
}
