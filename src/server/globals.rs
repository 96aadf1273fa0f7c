//! Wayland global registry implementations
//!
//! Implements GlobalDispatch for advertising globals to clients.

use log::{debug, warn};
use wayland_protocols::xdg::shell::server::xdg_wm_base;
use wayland_server::protocol::{wl_compositor, wl_output, wl_seat, wl_shm};
use wayland_server::{Client, DataInit, DisplayHandle, GlobalDispatch, New, Resource};

use crate::compositor::{lock_scene, OutputId};
use crate::protocol::seat::SEAT_NAME;
use crate::protocol::shell::PingTracker;
use crate::protocol::{OutputInfo, ShmFormat};

use super::dispatch::SEAT_CAPABILITIES;
use super::{ServerState, WmBase};

// ============================================================================
// wl_compositor global
// ============================================================================

impl GlobalDispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_compositor");
        data_init.init(resource, ());
    }
}

// ============================================================================
// wl_shm global
// ============================================================================

impl GlobalDispatch<wl_shm::WlShm, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_shm::WlShm>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_shm");
        let shm = data_init.init(resource, ());

        for format in ShmFormat::SUPPORTED {
            match wl_shm::Format::try_from(format.to_wayland()) {
                Ok(format) => shm.format(format),
                Err(()) => warn!("No wl_shm format for {:?}", format),
            }
        }
    }
}

// ============================================================================
// wl_seat global
// ============================================================================

impl GlobalDispatch<wl_seat::WlSeat, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_seat::WlSeat>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_seat");
        let seat = data_init.init(resource, ());

        seat.capabilities(wl_seat::Capability::from_bits_truncate(
            SEAT_CAPABILITIES.to_wayland(),
        ));
        if seat.version() >= 2 {
            seat.name(SEAT_NAME.to_string());
        }
    }
}

// ============================================================================
// wl_output global
// ============================================================================

/// Send every event describing an output, ending with done
pub(super) fn send_output_info(output: &wl_output::WlOutput, info: &OutputInfo) {
    let subpixel =
        wl_output::Subpixel::try_from(info.geometry.subpixel).unwrap_or(wl_output::Subpixel::Unknown);
    output.geometry(
        info.geometry.x,
        info.geometry.y,
        info.geometry.physical_width,
        info.geometry.physical_height,
        subpixel,
        info.geometry.make.clone(),
        info.geometry.model.clone(),
        wl_output::Transform::Normal,
    );
    output.mode(
        wl_output::Mode::from_bits_truncate(info.mode.flags),
        info.mode.width,
        info.mode.height,
        info.mode.refresh,
    );
    if output.version() >= 2 {
        output.scale(info.scale);
    }
    if output.version() >= 4 {
        output.name(info.name.clone());
        output.description(info.description.clone());
    }
    if output.version() >= 2 {
        output.done();
    }
}

impl GlobalDispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_output::WlOutput>,
        global_data: &OutputId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_output for {:?}", global_data);
        let output = data_init.init(resource, *global_data);

        let info = lock_scene(&state.scene)
            .outputs
            .get(*global_data)
            .map(OutputInfo::from_output);
        match info {
            Some(info) => send_output_info(&output, &info),
            None => debug!("Output {:?} is gone", global_data),
        }
        state.outputs.push(output);
    }
}

// ============================================================================
// xdg_wm_base global
// ============================================================================

impl GlobalDispatch<xdg_wm_base::XdgWmBase, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<xdg_wm_base::XdgWmBase>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound xdg_wm_base");
        let resource = data_init.init(resource, ());
        state.wm_bases.push(WmBase {
            resource,
            pings: PingTracker::default(),
        });
    }
}
