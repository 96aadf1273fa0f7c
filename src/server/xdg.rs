//! xdg_shell dispatch
//!
//! xdg_wm_base, xdg_positioner, xdg_surface, xdg_toplevel and xdg_popup.
//! Toplevels and popups become scene windows; configures are produced by
//! the scene and sent from [`ServerState::send_configures`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};
use wayland_protocols::xdg::shell::server::{
    xdg_popup, xdg_positioner, xdg_surface, xdg_toplevel, xdg_wm_base,
};
use wayland_server::backend::ClientId;
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, Resource};

use crate::compositor::{
    lock_scene, Configure, OutputId, Rect, SceneError, SurfaceId, SurfaceRole, WindowId, WindowKind,
};
use crate::input::SceneNotice;
use crate::protocol::shell::{encode_states, window_geometry, Anchor, ConfigureTracker, Gravity};
use crate::protocol::{XdgPositioner, XdgShellError};

use super::dispatch::{raw_enum, SurfaceData};
use super::ServerState;

/// xdg_toplevel.wm_capabilities values we honour
const WM_CAPABILITY_MAXIMIZE: u32 = 2;
const WM_CAPABILITY_FULLSCREEN: u32 = 3;

/// The role object behind a scene window
#[derive(Debug, Clone)]
pub enum XdgRole {
    Toplevel(xdg_toplevel::XdgToplevel),
    Popup(xdg_popup::XdgPopup),
}

/// Protocol objects for one scene window
#[derive(Debug, Clone)]
pub struct XdgWindow {
    pub surface: SurfaceId,
    pub xdg_surface: xdg_surface::XdgSurface,
    pub role: XdgRole,
}

/// xdg_surface user data
#[derive(Debug)]
pub struct XdgSurfaceData {
    pub surface: SurfaceId,
    role: Mutex<Option<WindowId>>,
    configures: Mutex<ConfigureTracker>,
}

impl XdgSurfaceData {
    fn new(surface: SurfaceId) -> Self {
        Self {
            surface,
            role: Mutex::new(None),
            configures: Mutex::new(ConfigureTracker::new()),
        }
    }

    /// Window of the live role object, if any
    pub fn window(&self) -> Option<WindowId> {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_window(&self, window: Option<WindowId>) {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner) = window;
    }

    fn tracker(&self) -> MutexGuard<'_, ConfigureTracker> {
        self.configures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_configured(&self) -> bool {
        self.tracker().is_configured()
    }

    pub fn has_sent_configure(&self) -> bool {
        self.tracker().has_sent()
    }
}

fn lock_positioner(positioner: &xdg_positioner::XdgPositioner) -> Option<XdgPositioner> {
    positioner
        .data::<Mutex<XdgPositioner>>()
        .map(|p| p.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

impl ServerState {
    /// Send one configure to its xdg_surface and role object
    pub(super) fn send_configure(&mut self, configure: Configure) {
        let Some(window) = self.xdg_windows.get(&configure.window()) else {
            return;
        };
        if !window.xdg_surface.is_alive() {
            return;
        }
        let serial = self.serial();
        match (&window.role, configure) {
            (XdgRole::Toplevel(toplevel), Configure::Toplevel { size, states, .. }) => {
                toplevel.configure(size.0, size.1, encode_states(states));
            }
            (XdgRole::Popup(popup), Configure::Popup { geometry, .. }) => {
                popup.configure(geometry.x, geometry.y, geometry.width, geometry.height);
            }
            _ => {
                warn!("Configure {:?} does not match the window role", configure);
                return;
            }
        }
        window.xdg_surface.configure(serial);
        if let Some(data) = window.xdg_surface.data::<XdgSurfaceData>() {
            data.tracker().sent(serial);
        }
        trace!("Sent configure {} for {:?}", serial, configure.window());
    }

    /// Popup geometry for `positioner`, relative to the parent window
    fn popup_geometry(
        &self,
        parent: WindowId,
        positioner: &XdgPositioner,
    ) -> Result<Rect, XdgShellError> {
        let scene = lock_scene(&self.scene);
        let bounds = scene
            .outputs
            .primary()
            .map(|o| o.logical_rect())
            .zip(scene.windows.position_of(parent));
        match bounds {
            Some((area, (px, py))) => positioner.constrained_geometry(area.translate(-px, -py)),
            None => positioner.geometry(),
        }
    }

    /// Forget a role object and destroy its scene window
    fn role_destroyed(&mut self, window: WindowId) {
        if let Some(xdg_window) = self.xdg_windows.remove(&window) {
            if let Some(data) = xdg_window.xdg_surface.data::<XdgSurfaceData>() {
                data.set_window(None);
            }
        }
        let teardown = lock_scene(&self.scene).destroy_window(window);
        if let Ok(teardown) = teardown {
            debug!("Destroyed window {:?}", window);
            for &gone in &teardown.windows {
                self.notify(SceneNotice::WindowUnmapped(gone));
            }
            self.release(&teardown);
        }
    }
}

// ============================================================================
// xdg_wm_base
// ============================================================================

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &xdg_wm_base::XdgWmBase,
        request: xdg_wm_base::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::CreatePositioner { id } => {
                data_init.init(id, Mutex::new(XdgPositioner::new()));
            }
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let Some(surface_data) = surface.data::<SurfaceData>().copied() else {
                    return;
                };
                let role = lock_scene(&state.scene)
                    .surfaces
                    .get(surface_data.id)
                    .map(|s| s.role);
                let xdg_role = matches!(
                    role,
                    Some(SurfaceRole::None | SurfaceRole::XdgToplevel | SurfaceRole::XdgPopup)
                );
                let taken = state
                    .xdg_surfaces
                    .get(&surface_data.id)
                    .is_some_and(|s| s.is_alive());
                if !xdg_role || taken {
                    data_init.post_error(
                        id,
                        xdg_wm_base::Error::Role,
                        "surface already has a role or an xdg_surface",
                    );
                    return;
                }
                let xdg_surface =
                    data_init.init(id, XdgSurfaceData::new(surface_data.id));
                state.xdg_surfaces.insert(surface_data.id, xdg_surface);
                debug!("Created xdg_surface for {:?}", surface_data.id);
            }
            xdg_wm_base::Request::Pong { serial } => {
                if let Some(base) = state.wm_bases.iter_mut().find(|b| &b.resource == resource) {
                    if !base.pings.pong(serial) {
                        debug!("Ignoring pong with unknown serial {}", serial);
                    }
                }
            }
            xdg_wm_base::Request::Destroy => {
                let remaining = state
                    .xdg_surfaces
                    .values()
                    .any(|s| s.is_alive() && s.id().same_client_as(&resource.id()));
                if remaining {
                    resource.post_error(
                        xdg_wm_base::Error::DefunctSurfaces,
                        "xdg_wm_base destroyed before its xdg_surfaces",
                    );
                }
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        resource: &xdg_wm_base::XdgWmBase,
        _data: &(),
    ) {
        state.wm_bases.retain(|b| &b.resource != resource);
    }
}

// ============================================================================
// xdg_positioner
// ============================================================================

impl Dispatch<xdg_positioner::XdgPositioner, Mutex<XdgPositioner>> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &xdg_positioner::XdgPositioner,
        request: xdg_positioner::Request,
        data: &Mutex<XdgPositioner>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let mut positioner = data.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match request {
            xdg_positioner::Request::SetSize { width, height } => {
                positioner.set_size(width, height)
            }
            xdg_positioner::Request::SetAnchorRect {
                x,
                y,
                width,
                height,
            } => positioner.set_anchor_rect(x, y, width, height),
            xdg_positioner::Request::SetAnchor { anchor } => {
                let raw = raw_enum(anchor);
                Anchor::from_raw(raw)
                    .map(|a| positioner.set_anchor(a))
                    .ok_or(XdgShellError::InvalidInput)
            }
            xdg_positioner::Request::SetGravity { gravity } => {
                let raw = raw_enum(gravity);
                Gravity::from_raw(raw)
                    .map(|g| positioner.set_gravity(g))
                    .ok_or(XdgShellError::InvalidInput)
            }
            xdg_positioner::Request::SetConstraintAdjustment {
                constraint_adjustment,
            } => {
                positioner.set_constraint_adjustment(raw_enum(constraint_adjustment));
                Ok(())
            }
            xdg_positioner::Request::SetOffset { x, y } => {
                positioner.set_offset(x, y);
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            resource.post_error(xdg_positioner::Error::InvalidInput, e.to_string());
        }
    }
}

// ============================================================================
// xdg_surface
// ============================================================================

impl Dispatch<xdg_surface::XdgSurface, XdgSurfaceData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &xdg_surface::XdgSurface,
        request: xdg_surface::Request,
        data: &XdgSurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                if data.window().is_some() {
                    data_init.post_error(
                        id,
                        xdg_surface::Error::AlreadyConstructed,
                        "xdg_surface already has a role object",
                    );
                    return;
                }
                let created = lock_scene(&state.scene).create_toplevel(data.surface);
                let window = match created {
                    Ok(window) => window,
                    Err(e) => {
                        data_init.post_error(id, xdg_wm_base::Error::Role, e.to_string());
                        return;
                    }
                };
                let toplevel = data_init.init(id, window);
                if toplevel.version() >= 5 {
                    let capabilities = [WM_CAPABILITY_MAXIMIZE, WM_CAPABILITY_FULLSCREEN]
                        .iter()
                        .flat_map(|c| c.to_ne_bytes())
                        .collect();
                    toplevel.wm_capabilities(capabilities);
                }
                data.set_window(Some(window));
                state.xdg_windows.insert(
                    window,
                    XdgWindow {
                        surface: data.surface,
                        xdg_surface: resource.clone(),
                        role: XdgRole::Toplevel(toplevel),
                    },
                );
            }
            xdg_surface::Request::GetPopup {
                id,
                parent,
                positioner,
            } => {
                if data.window().is_some() {
                    data_init.post_error(
                        id,
                        xdg_surface::Error::AlreadyConstructed,
                        "xdg_surface already has a role object",
                    );
                    return;
                }
                let parent = parent
                    .as_ref()
                    .and_then(|p| p.data::<XdgSurfaceData>())
                    .and_then(|p| p.window().map(|w| (p.surface, w)));
                let Some((parent_surface, parent_window)) = parent else {
                    data_init.post_error(
                        id,
                        xdg_wm_base::Error::InvalidPopupParent,
                        "popups need a parent with a role",
                    );
                    return;
                };
                let Some(positioner) = lock_positioner(&positioner).filter(|p| p.is_complete())
                else {
                    data_init.post_error(
                        id,
                        xdg_wm_base::Error::InvalidPositioner,
                        "positioner is missing a size or anchor rectangle",
                    );
                    return;
                };
                let created = state
                    .popup_geometry(parent_window, &positioner)
                    .map_err(|e| e.to_string())
                    .and_then(|geometry| {
                        lock_scene(&state.scene)
                            .create_popup(data.surface, parent_surface, geometry)
                            .map_err(|e| e.to_string())
                    });
                let window = match created {
                    Ok(window) => window,
                    Err(e) => {
                        data_init.post_error(id, xdg_wm_base::Error::InvalidPopupParent, e);
                        return;
                    }
                };
                let popup = data_init.init(id, window);
                data.set_window(Some(window));
                state.xdg_windows.insert(
                    window,
                    XdgWindow {
                        surface: data.surface,
                        xdg_surface: resource.clone(),
                        role: XdgRole::Popup(popup),
                    },
                );
            }
            xdg_surface::Request::SetWindowGeometry {
                x,
                y,
                width,
                height,
            } => {
                let Some(window) = data.window() else {
                    resource.post_error(
                        xdg_surface::Error::NotConstructed,
                        "xdg_surface has no role object yet",
                    );
                    return;
                };
                match window_geometry(x, y, width, height) {
                    Ok(geometry) => {
                        let result = lock_scene(&state.scene).set_window_geometry(window, geometry);
                        if let Err(e) = result {
                            debug!("set_window_geometry on stale window: {}", e);
                        }
                    }
                    Err(e) => resource.post_error(xdg_surface::Error::InvalidSize, e.to_string()),
                }
            }
            xdg_surface::Request::AckConfigure { serial } => {
                if let Err(e) = data.tracker().ack(serial) {
                    resource.post_error(xdg_surface::Error::InvalidSerial, e.to_string());
                }
            }
            xdg_surface::Request::Destroy => {
                if data.window().is_some() {
                    resource.post_error(
                        xdg_surface::Error::DefunctRoleObject,
                        "xdg_surface destroyed before its role object",
                    );
                }
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        resource: &xdg_surface::XdgSurface,
        data: &XdgSurfaceData,
    ) {
        if state.xdg_surfaces.get(&data.surface) == Some(resource) {
            state.xdg_surfaces.remove(&data.surface);
        }
    }
}

// ============================================================================
// xdg_toplevel
// ============================================================================

impl Dispatch<xdg_toplevel::XdgToplevel, WindowId> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &xdg_toplevel::XdgToplevel,
        request: xdg_toplevel::Request,
        window: &WindowId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let window = *window;
        let result: Result<(), SceneError> = match request {
            xdg_toplevel::Request::SetTitle { title } => {
                lock_scene(&state.scene).set_title(window, title)
            }
            xdg_toplevel::Request::SetAppId { app_id } => {
                lock_scene(&state.scene).set_app_id(window, app_id)
            }
            xdg_toplevel::Request::SetMinSize { width, height }
            | xdg_toplevel::Request::SetMaxSize { width, height }
                if width < 0 || height < 0 =>
            {
                resource.post_error(
                    xdg_toplevel::Error::InvalidSize,
                    format!("negative size {}x{}", width, height),
                );
                Ok(())
            }
            xdg_toplevel::Request::SetMinSize { width, height } => {
                lock_scene(&state.scene).set_min_size(window, width, height)
            }
            xdg_toplevel::Request::SetMaxSize { width, height } => {
                lock_scene(&state.scene).set_max_size(window, width, height)
            }
            xdg_toplevel::Request::SetMaximized => {
                lock_scene(&state.scene).set_maximized(window, true)
            }
            xdg_toplevel::Request::UnsetMaximized => {
                lock_scene(&state.scene).set_maximized(window, false)
            }
            xdg_toplevel::Request::SetFullscreen { output } => {
                let output = output.as_ref().and_then(|o| o.data::<OutputId>()).copied();
                lock_scene(&state.scene).set_fullscreen(window, true, output)
            }
            xdg_toplevel::Request::UnsetFullscreen => {
                lock_scene(&state.scene).set_fullscreen(window, false, None)
            }
            xdg_toplevel::Request::Move { .. } => {
                if let Some(xdg_window) = state.xdg_windows.get(&window) {
                    state.notify(SceneNotice::MoveRequested(xdg_window.surface));
                }
                Ok(())
            }
            xdg_toplevel::Request::Resize { edges, .. } => {
                debug!("Ignoring interactive resize of {:?} ({})", window, raw_enum(edges));
                Ok(())
            }
            xdg_toplevel::Request::SetMinimized => {
                debug!("Ignoring minimize of {:?}", window);
                Ok(())
            }
            xdg_toplevel::Request::ShowWindowMenu { .. } | xdg_toplevel::Request::SetParent { .. } => {
                trace!("Ignoring window menu or parent request for {:?}", window);
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!("xdg_toplevel request on stale window: {}", e);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &xdg_toplevel::XdgToplevel,
        window: &WindowId,
    ) {
        state.role_destroyed(*window);
    }
}

// ============================================================================
// xdg_popup
// ============================================================================

impl Dispatch<xdg_popup::XdgPopup, WindowId> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &xdg_popup::XdgPopup,
        request: xdg_popup::Request,
        window: &WindowId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let window = *window;
        match request {
            xdg_popup::Request::Grab { serial, .. } => {
                debug!("Popup {:?} asked for a grab (serial {})", window, serial);
            }
            xdg_popup::Request::Reposition { positioner, token } => {
                let Some(positioner) = lock_positioner(&positioner).filter(|p| p.is_complete())
                else {
                    resource.post_error(
                        xdg_wm_base::Error::InvalidPositioner,
                        "positioner is missing a size or anchor rectangle",
                    );
                    return;
                };
                let parent = {
                    let scene = lock_scene(&state.scene);
                    scene
                        .windows
                        .get(window)
                        .and_then(|w| match w.kind {
                            WindowKind::Popup { parent, .. } => Some(parent),
                            WindowKind::Toplevel => None,
                        })
                        .and_then(|parent| scene.windows.window_for_surface(parent))
                };
                let Some(parent) = parent else {
                    return;
                };
                let geometry = match state.popup_geometry(parent, &positioner) {
                    Ok(geometry) => geometry,
                    Err(e) => {
                        resource.post_error(xdg_wm_base::Error::InvalidPositioner, e.to_string());
                        return;
                    }
                };
                if resource.version() >= 3 {
                    resource.repositioned(token);
                }
                if let Err(e) = lock_scene(&state.scene).reposition_popup(window, geometry) {
                    debug!("Reposition of stale popup: {}", e);
                }
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &xdg_popup::XdgPopup,
        window: &WindowId,
    ) {
        state.role_destroyed(*window);
    }
}
