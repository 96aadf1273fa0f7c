//! Wayland protocol dispatch implementations
//!
//! Implements the Dispatch trait for the core wl_* objects. Requests are
//! validated here and applied to the scene; protocol violations are posted
//! as errors on the offending object, which disconnects only that client.

use std::os::unix::io::AsFd;
use std::sync::{Mutex, PoisonError};

use log::{debug, trace, warn};
use wayland_server::backend::ClientId;
use wayland_server::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_keyboard, wl_output, wl_pointer,
    wl_region, wl_seat, wl_shm, wl_shm_pool, wl_surface,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, Resource, WEnum};

use crate::compositor::{
    lock_scene, BufferTransform, ConnectionId, FrameCallbackId, OutputId, Rect, SceneError,
    SurfaceId, SurfaceRole,
};
use crate::input::SceneNotice;
use crate::protocol::seat::SeatCapabilities;
use crate::protocol::shm::{ShmBuffer, ShmPoolId};
use crate::protocol::{KeymapFile, Region, ShmError, XdgShellError};

use super::client::connection_of;
use super::resources::lock_seat;
use super::xdg::{XdgRole, XdgSurfaceData};
use super::ServerState;

/// `wl_display.error` code for failures on the compositor side
pub(crate) const IMPLEMENTATION_ERROR: u32 = 3;

/// wl_keyboard.repeat_info: 25 keys per second after 600 ms
const REPEAT_RATE: i32 = 25;
const REPEAT_DELAY: i32 = 600;

/// wl_surface user data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceData {
    pub id: SurfaceId,
    pub owner: ConnectionId,
}

fn log_scene_error(request: &str, result: Result<(), SceneError>) {
    if let Err(e) = result {
        debug!("Ignoring {} for stale object: {}", request, e);
    }
}

/// Raw protocol value of an enum argument
pub(super) fn raw_enum<T: Into<u32>>(value: WEnum<T>) -> u32 {
    match value {
        WEnum::Value(v) => v.into(),
        WEnum::Unknown(raw) => raw,
    }
}

fn region_of(region: Option<&wl_region::WlRegion>) -> Option<Region> {
    region
        .and_then(|r| r.data::<Mutex<Region>>())
        .map(|r| r.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

// ============================================================================
// wl_compositor
// ============================================================================

impl Dispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wl_compositor::WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let Some(owner) = connection_of(client) else {
                    resource.post_error(IMPLEMENTATION_ERROR, "unknown client");
                    return;
                };
                let created = lock_scene(&state.scene).create_surface(owner);
                match created {
                    Ok(surface) => {
                        let wl_surface = data_init.init(id, SurfaceData { id: surface, owner });
                        lock_seat(&state.seat).add_surface(surface, wl_surface);
                        debug!("Created wl_surface {:?}", surface);
                    }
                    Err(e) => {
                        data_init.post_error(id, IMPLEMENTATION_ERROR, e.to_string());
                    }
                }
            }
            wl_compositor::Request::CreateRegion { id } => {
                data_init.init(id, Mutex::new(Region::new()));
            }
            _ => {}
        }
    }
}

// ============================================================================
// wl_surface
// ============================================================================

impl Dispatch<wl_surface::WlSurface, SurfaceData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        data: &SurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let id = data.id;
        match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                if resource.version() >= 5 && (x, y) != (0, 0) {
                    resource.post_error(
                        wl_surface::Error::InvalidOffset,
                        "attach offset must be zero since version 5",
                    );
                    return;
                }
                if (x, y) != (0, 0) {
                    log_scene_error("attach", lock_scene(&state.scene).set_offset(id, x, y));
                }
                state.pending_buffers.insert(id, buffer);
            }
            wl_surface::Request::Damage {
                x,
                y,
                width,
                height,
            } => {
                let rect = Rect::new(x, y, width, height);
                log_scene_error("damage", lock_scene(&state.scene).damage(id, rect));
            }
            wl_surface::Request::DamageBuffer {
                x,
                y,
                width,
                height,
            } => {
                let rect = Rect::new(x, y, width, height);
                log_scene_error("damage_buffer", lock_scene(&state.scene).damage_buffer(id, rect));
            }
            wl_surface::Request::Frame { callback } => {
                let callback_id = FrameCallbackId::new();
                let callback = data_init.init(callback, callback_id);
                match lock_scene(&state.scene).frame(id, callback_id) {
                    Ok(()) => {
                        state.callbacks.insert(callback_id, callback);
                    }
                    Err(e) => debug!("Frame callback on stale surface: {}", e),
                }
            }
            wl_surface::Request::SetOpaqueRegion { region } => {
                let region = region_of(region.as_ref());
                log_scene_error(
                    "set_opaque_region",
                    lock_scene(&state.scene).set_opaque_region(id, region),
                );
            }
            wl_surface::Request::SetInputRegion { region } => {
                let region = region_of(region.as_ref());
                log_scene_error(
                    "set_input_region",
                    lock_scene(&state.scene).set_input_region(id, region),
                );
            }
            wl_surface::Request::SetBufferTransform { transform } => {
                let raw = raw_enum(transform);
                let Some(transform) = BufferTransform::from_raw(raw) else {
                    resource.post_error(
                        wl_surface::Error::InvalidTransform,
                        format!("invalid buffer transform {}", raw),
                    );
                    return;
                };
                log_scene_error(
                    "set_buffer_transform",
                    lock_scene(&state.scene).set_buffer_transform(id, transform),
                );
            }
            wl_surface::Request::SetBufferScale { scale } => {
                if scale <= 0 {
                    resource.post_error(
                        wl_surface::Error::InvalidScale,
                        format!("invalid buffer scale {}", scale),
                    );
                    return;
                }
                log_scene_error(
                    "set_buffer_scale",
                    lock_scene(&state.scene).set_buffer_scale(id, scale),
                );
            }
            wl_surface::Request::Offset { x, y } => {
                log_scene_error("offset", lock_scene(&state.scene).set_offset(id, x, y));
            }
            wl_surface::Request::Commit => state.commit_surface(resource, data),
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &wl_surface::WlSurface,
        data: &SurfaceData,
    ) {
        state.surface_destroyed(data.id);
    }
}

impl ServerState {
    /// Apply a wl_surface.commit
    ///
    /// Attached shm contents are copied into an immutable scene buffer and
    /// the wl_buffer is released straight away.
    fn commit_surface(&mut self, surface: &wl_surface::WlSurface, data: &SurfaceData) {
        let id = data.id;
        let pending = self.pending_buffers.remove(&id);
        let xdg_surface = self.xdg_surfaces.get(&id).filter(|s| s.is_alive()).cloned();

        if let (Some(Some(_)), Some(xdg_surface)) = (&pending, &xdg_surface) {
            let configured = xdg_surface
                .data::<XdgSurfaceData>()
                .is_some_and(|d| d.is_configured());
            if !configured {
                let err = XdgShellError::UnconfiguredBuffer;
                xdg_surface.post_error(
                    wayland_protocols::xdg::shell::server::xdg_surface::Error::UnconfiguredBuffer,
                    err.to_string(),
                );
                return;
            }
        }

        match pending {
            Some(Some(buffer)) => {
                if let Err(e) = self.attach_buffer(id, data.owner, &buffer) {
                    warn!("Surface {:?} committed an unusable buffer: {}", id, e);
                    if buffer.is_alive() {
                        buffer.post_error(shm_error_code(&e), e.to_string());
                    } else {
                        surface.post_error(IMPLEMENTATION_ERROR, e.to_string());
                    }
                    return;
                }
            }
            Some(None) => log_scene_error("attach", lock_scene(&self.scene).attach(id, None)),
            None => {}
        }

        let outcome = match lock_scene(&self.scene).commit(id) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Commit on stale surface: {}", e);
                return;
            }
        };
        trace!("Surface {:?} committed frame {}", id, outcome.seq);
        if outcome.dropped_frame {
            debug!("Surface {:?} dropped an unrendered frame", id);
        }

        // the first commit of an xdg role is answered with its initial configure
        if let Some(xdg_surface) = &xdg_surface {
            if let Some(sd) = xdg_surface.data::<XdgSurfaceData>() {
                if let Some(window) = sd.window() {
                    if !sd.has_sent_configure() {
                        let configure = lock_scene(&self.scene).initial_configure(window);
                        match configure {
                            Ok(configure) => self.send_configure(configure),
                            Err(e) => debug!("No initial configure for {:?}: {}", window, e),
                        }
                    }
                }
            }
        }

        if outcome.mapped {
            if let Some(window) = outcome.window {
                let toplevel = matches!(
                    self.xdg_windows.get(&window).map(|w| &w.role),
                    Some(XdgRole::Toplevel(_))
                );
                if toplevel {
                    self.notify(SceneNotice::WindowMapped(window));
                }
            }
        }
        if outcome.unmapped {
            if let Some(window) = outcome.window {
                self.notify(SceneNotice::WindowUnmapped(window));
            }
        }
    }

    fn attach_buffer(
        &mut self,
        id: SurfaceId,
        owner: ConnectionId,
        buffer: &wl_buffer::WlBuffer,
    ) -> Result<(), ShmError> {
        let shm_buffer = buffer
            .data::<ShmBuffer>()
            .ok_or(ShmError::UnknownBuffer)?;
        let contents = self.shm.read_buffer(shm_buffer)?;
        {
            let mut scene = lock_scene(&self.scene);
            let imported = scene.import_buffer(owner, &contents);
            log_scene_error("attach", scene.attach(id, Some(imported)));
        }
        if buffer.is_alive() {
            buffer.release();
        }
        Ok(())
    }

    fn surface_destroyed(&mut self, id: SurfaceId) {
        self.pending_buffers.remove(&id);
        self.xdg_surfaces.remove(&id);
        let teardown = lock_scene(&self.scene).destroy_surface(id);
        match teardown {
            Ok(teardown) => {
                debug!("Surface {:?} destroyed", id);
                self.release(&teardown);
            }
            // already released with its connection
            Err(_) => lock_seat(&self.seat).remove_surface(id),
        }
    }
}

// ============================================================================
// wl_region
// ============================================================================

impl Dispatch<wl_region::WlRegion, Mutex<Region>> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_region::WlRegion,
        request: wl_region::Request,
        data: &Mutex<Region>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let mut region = data.lock().unwrap_or_else(PoisonError::into_inner);
        match request {
            wl_region::Request::Add {
                x,
                y,
                width,
                height,
            } => region.add(x, y, width, height),
            wl_region::Request::Subtract {
                x,
                y,
                width,
                height,
            } => region.subtract(x, y, width, height),
            _ => {}
        }
    }
}

// ============================================================================
// wl_callback
// ============================================================================

impl Dispatch<wl_callback::WlCallback, FrameCallbackId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_callback::WlCallback,
        _request: wl_callback::Request,
        _data: &FrameCallbackId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // wl_callback has no requests
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &wl_callback::WlCallback,
        data: &FrameCallbackId,
    ) {
        state.callbacks.remove(data);
    }
}

// ============================================================================
// wl_shm
// ============================================================================

impl Dispatch<wl_shm::WlShm, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_shm::Request::CreatePool { id, fd, size } = request {
            let Some(owner) = connection_of(client) else {
                return;
            };
            match state.shm.create_pool(owner, fd, size) {
                Ok(pool) => {
                    data_init.init(id, pool);
                }
                Err(e) => {
                    debug!("Rejecting shm pool: {}", e);
                    data_init.post_error(id, wl_shm::Error::InvalidFd, e.to_string());
                }
            }
        }
    }
}

// ============================================================================
// wl_shm_pool
// ============================================================================

fn shm_error_code(error: &ShmError) -> wl_shm::Error {
    match error {
        ShmError::InvalidFormat(_) => wl_shm::Error::InvalidFormat,
        ShmError::InvalidDimensions { .. }
        | ShmError::InvalidStride { .. }
        | ShmError::OutOfBounds { .. } => wl_shm::Error::InvalidStride,
        ShmError::InvalidSize(_)
        | ShmError::Shrink { .. }
        | ShmError::UnknownPool(_)
        | ShmError::UnknownBuffer
        | ShmError::Map(_) => wl_shm::Error::InvalidFd,
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ShmPoolId> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        pool: &ShmPoolId,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let format = raw_enum(format);
                match state
                    .shm
                    .create_buffer(*pool, offset, width, height, stride, format)
                {
                    Ok(buffer) => {
                        data_init.init(id, buffer);
                    }
                    Err(e) => {
                        debug!("Rejecting buffer from {:?}: {}", pool, e);
                        data_init.post_error(id, shm_error_code(&e), e.to_string());
                    }
                }
            }
            wl_shm_pool::Request::Resize { size } => {
                if let Err(e) = state.shm.resize_pool(*pool, size) {
                    resource.post_error(shm_error_code(&e), e.to_string());
                }
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &wl_shm_pool::WlShmPool,
        pool: &ShmPoolId,
    ) {
        state.shm.destroy_pool(*pool);
    }
}

// ============================================================================
// wl_buffer
// ============================================================================

impl Dispatch<wl_buffer::WlBuffer, ShmBuffer> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        _request: wl_buffer::Request,
        _data: &ShmBuffer,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // destroy is handled in `destroyed`
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &wl_buffer::WlBuffer,
        buffer: &ShmBuffer,
    ) {
        state.shm.destroy_buffer(buffer);
    }
}

// ============================================================================
// wl_seat
// ============================================================================

/// Capabilities advertised on every wl_seat
pub const SEAT_CAPABILITIES: SeatCapabilities = SeatCapabilities {
    pointer: true,
    keyboard: true,
    touch: false,
};

impl Dispatch<wl_seat::WlSeat, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &wl_seat::WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetPointer { id } => {
                let pointer = data_init.init(id, ());
                lock_seat(&state.seat).add_pointer(pointer);
            }
            wl_seat::Request::GetKeyboard { id } => {
                let keyboard = data_init.init(id, ());
                state.init_keyboard(keyboard);
            }
            wl_seat::Request::GetTouch { id } => {
                data_init.post_error(
                    id,
                    wl_seat::Error::MissingCapability,
                    "seat has no touch capability",
                );
            }
            _ => {}
        }
    }
}

impl ServerState {
    /// Send the keymap, repeat info and current focus to a new keyboard
    fn init_keyboard(&mut self, keyboard: wl_keyboard::WlKeyboard) {
        match KeymapFile::new(&self.keymap) {
            Ok(file) => keyboard.keymap(
                wl_keyboard::KeymapFormat::XkbV1,
                file.as_fd(),
                file.size(),
            ),
            Err(e) => warn!("Cannot create keymap file: {}", e),
        }
        if keyboard.version() >= 4 {
            keyboard.repeat_info(REPEAT_RATE, REPEAT_DELAY);
        }

        let serial = self.serial();
        let mut seat = lock_seat(&self.seat);
        if let Some((surface, modifiers)) = seat.focus_for(&keyboard) {
            keyboard.enter(serial, &surface, Vec::new());
            keyboard.modifiers(
                serial,
                modifiers.depressed,
                modifiers.latched,
                modifiers.locked,
                modifiers.group,
            );
        }
        seat.add_keyboard(keyboard);
    }
}

// ============================================================================
// wl_pointer
// ============================================================================

impl Dispatch<wl_pointer::WlPointer, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_pointer::WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_pointer::Request::SetCursor {
            surface: Some(surface),
            hotspot_x,
            hotspot_y,
            ..
        } = request
        {
            let Some(data) = surface.data::<SurfaceData>() else {
                return;
            };
            match lock_scene(&state.scene).set_role(data.id, SurfaceRole::Cursor) {
                Ok(()) => trace!(
                    "Cursor surface {:?}, hotspot ({}, {})",
                    data.id,
                    hotspot_x,
                    hotspot_y
                ),
                Err(SceneError::RoleConflict { .. }) => {
                    resource.post_error(wl_pointer::Error::Role, "surface already has a role");
                }
                Err(e) => debug!("set_cursor on stale surface: {}", e),
            }
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        resource: &wl_pointer::WlPointer,
        _data: &(),
    ) {
        lock_seat(&state.seat).remove_pointer(resource);
    }
}

// ============================================================================
// wl_keyboard
// ============================================================================

impl Dispatch<wl_keyboard::WlKeyboard, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_keyboard::WlKeyboard,
        _request: wl_keyboard::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // release is handled in `destroyed`
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        resource: &wl_keyboard::WlKeyboard,
        _data: &(),
    ) {
        lock_seat(&state.seat).remove_keyboard(resource);
    }
}

// ============================================================================
// wl_output
// ============================================================================

impl Dispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_output::WlOutput,
        _request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // release is handled in `destroyed`
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        resource: &wl_output::WlOutput,
        _data: &OutputId,
    ) {
        state.outputs.retain(|o| o != resource);
    }
}
