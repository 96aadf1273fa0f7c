//! Wayland server
//!
//! Owns the Wayland display and listening socket, and the [`ServerState`]
//! every request handler runs against. All dispatch happens on the event
//! loop thread; scene mutations take the scene lock for the duration of a
//! single request.

mod client;
mod dispatch;
mod globals;
mod resources;
mod xdg;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use log::{debug, info, warn};
use wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface;
use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;
use wayland_server::backend::GlobalId;
use wayland_server::protocol::{wl_callback::WlCallback, wl_output::WlOutput};
use wayland_server::protocol::wl_buffer::WlBuffer;
use wayland_server::{BindError, Display, DisplayHandle, ListeningSocket, Resource};

use crate::compositor::{
    lock_scene, ConnectionId, FrameCallbackId, OutputId, SharedScene, SurfaceId, Teardown,
    WindowId,
};
use crate::input::{BridgeSender, SceneNotice};
use crate::protocol::shell::PingTracker;
use crate::protocol::{OutputInfo, ShmRegistry};
use crate::renderer::RenderEvent;

pub use client::{connection_of, ClientState, DisconnectQueue};
pub use resources::{lock_seat, SeatResources, SharedSeatResources, WaylandSink};
pub use xdg::{XdgRole, XdgSurfaceData, XdgWindow};

/// How often clients are pinged through xdg_wm_base
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Socket names tried when none is given
const AUTO_SOCKETS: std::ops::Range<u32> = 0..33;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot create Wayland display")]
    Display(#[from] wayland_server::backend::InitError),
    #[error("Wayland socket {} is already in use", .0.display())]
    SocketInUse(PathBuf),
    #[error("no free wayland-N socket in {}", .0.display())]
    NoFreeSocket(PathBuf),
    #[error("cannot bind Wayland socket {}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot register Wayland sources with the event loop")]
    EventLoop(#[from] calloop::Error),
}

/// The Wayland display and its listening socket
pub struct WaylandServer {
    display: Display<ServerState>,
    socket: ListeningSocket,
    socket_name: String,
    socket_path: PathBuf,
}

impl WaylandServer {
    /// Bind `name` in `runtime_dir`, or the first free `wayland-N`
    pub fn new(runtime_dir: &Path, name: Option<&str>) -> Result<Self, ServerError> {
        info!("Creating Wayland display server");
        let display: Display<ServerState> = Display::new()?;

        let (socket, socket_name) = match name {
            Some(name) => (bind_socket(runtime_dir, name)?, name.to_string()),
            None => bind_auto(runtime_dir)?,
        };
        let socket_path = runtime_dir.join(&socket_name);
        info!("Wayland socket: {}", socket_path.display());

        Ok(Self {
            display,
            socket,
            socket_name,
            socket_path,
        })
    }

    /// Name for WAYLAND_DISPLAY
    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn handle(&self) -> DisplayHandle {
        self.display.handle()
    }

    /// Register the listening socket and the display with an event loop
    ///
    /// After every dispatch the server reaps closed connections, sends
    /// pending configures and flushes.
    pub fn insert_into_loop<D>(self, handle: &LoopHandle<'static, D>) -> Result<(), ServerError>
    where
        D: AsMut<ServerState> + 'static,
    {
        let socket = self.socket;
        let socket_fd = socket.as_fd().try_clone_to_owned().map_err(calloop::Error::IoError)?;
        handle
            .insert_source(
                Generic::new(socket_fd, Interest::READ, Mode::Level),
                move |_, _, data: &mut D| {
                    while let Some(stream) = socket.accept()? {
                        data.as_mut().accept(stream);
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| e.error)?;

        let mut display = self.display;
        let display_fd = display
            .backend()
            .poll_fd()
            .try_clone_to_owned()
            .map_err(calloop::Error::IoError)?;
        handle
            .insert_source(
                Generic::new(display_fd, Interest::READ, Mode::Level),
                move |_, _, data: &mut D| {
                    let state = data.as_mut();
                    display.dispatch_clients(state)?;
                    state.after_dispatch();
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| e.error)?;
        Ok(())
    }

    /// Accept, dispatch and flush once without an event loop
    pub fn dispatch(&mut self, state: &mut ServerState) -> io::Result<()> {
        while let Some(stream) = self.socket.accept()? {
            state.accept(stream);
        }
        self.display.dispatch_clients(state)?;
        state.after_dispatch();
        Ok(())
    }

    /// Dispatch requests already queued by connected clients
    pub fn dispatch_clients(&mut self, state: &mut ServerState) -> io::Result<()> {
        self.display.dispatch_clients(state)?;
        state.after_dispatch();
        Ok(())
    }
}

fn bind_socket(runtime_dir: &Path, name: &str) -> Result<ListeningSocket, ServerError> {
    let path = runtime_dir.join(name);
    ListeningSocket::bind_absolute(path.clone()).map_err(|e| match e {
        BindError::AlreadyInUse => ServerError::SocketInUse(path),
        BindError::Io(source) => ServerError::Bind { path, source },
        BindError::PermissionDenied => ServerError::Bind {
            path,
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        },
        BindError::RuntimeDirNotSet => ServerError::Bind {
            path,
            source: io::Error::from(io::ErrorKind::NotFound),
        },
    })
}

fn bind_auto(runtime_dir: &Path) -> Result<(ListeningSocket, String), ServerError> {
    for n in AUTO_SOCKETS {
        let name = format!("wayland-{}", n);
        match bind_socket(runtime_dir, &name) {
            Ok(socket) => return Ok((socket, name)),
            Err(ServerError::SocketInUse(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(ServerError::NoFreeSocket(runtime_dir.to_path_buf()))
}

/// A client's xdg_wm_base and its ping state
#[derive(Debug)]
pub struct WmBase {
    pub resource: XdgWmBase,
    pub pings: PingTracker,
}

/// State passed to every Wayland request handler
pub struct ServerState {
    pub scene: SharedScene,
    display: DisplayHandle,
    shm: ShmRegistry,
    seat: SharedSeatResources,
    /// XKB keymap text sent to every wl_keyboard
    keymap: String,
    bridge: Option<BridgeSender>,
    disconnected: DisconnectQueue,
    callbacks: HashMap<FrameCallbackId, WlCallback>,
    /// Buffers attached since the last commit; `Some(None)` detaches
    pending_buffers: HashMap<SurfaceId, Option<WlBuffer>>,
    xdg_surfaces: HashMap<SurfaceId, XdgSurface>,
    xdg_windows: HashMap<WindowId, XdgWindow>,
    wm_bases: Vec<WmBase>,
    output_globals: HashMap<OutputId, GlobalId>,
    outputs: Vec<WlOutput>,
    started: Instant,
}

impl ServerState {
    pub fn new(
        scene: SharedScene,
        display: DisplayHandle,
        seat: SharedSeatResources,
        keymap: String,
        bridge: Option<BridgeSender>,
    ) -> Self {
        let mut state = Self {
            scene,
            display,
            shm: ShmRegistry::new(),
            seat,
            keymap,
            bridge,
            disconnected: Arc::new(Mutex::new(Vec::new())),
            callbacks: HashMap::new(),
            pending_buffers: HashMap::new(),
            xdg_surfaces: HashMap::new(),
            xdg_windows: HashMap::new(),
            wm_bases: Vec::new(),
            output_globals: HashMap::new(),
            outputs: Vec::new(),
            started: Instant::now(),
        };
        state.register_globals();
        state
    }

    pub fn display(&self) -> &DisplayHandle {
        &self.display
    }

    pub fn seat(&self) -> &SharedSeatResources {
        &self.seat
    }

    pub fn set_bridge(&mut self, bridge: BridgeSender) {
        self.bridge = Some(bridge);
    }

    /// Hand an accepted stream to the display as a new client
    pub fn accept(&mut self, stream: UnixStream) {
        let connection = lock_scene(&self.scene).open_connection();
        let data = Arc::new(ClientState::new(connection, self.disconnected.clone()));
        if let Err(e) = self.display.insert_client(stream, data) {
            warn!("Failed to insert client: {}", e);
            lock_scene(&self.scene).close_connection(connection);
        }
    }

    /// Milliseconds since startup, for event timestamps
    pub fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn serial(&self) -> u32 {
        lock_scene(&self.scene).next_serial()
    }

    fn notify(&self, notice: SceneNotice) {
        if let Some(bridge) = &self.bridge {
            if bridge.notify(notice).is_err() {
                debug!("Input bridge is gone, dropping scene notice");
            }
        }
    }

    /// Reap closed clients, send configures and flush
    pub fn after_dispatch(&mut self) {
        self.reap_connections();
        self.send_configures();
        self.flush();
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.display.flush_clients() {
            warn!("Failed to flush clients: {}", e);
        }
    }

    fn reap_connections(&mut self) {
        let closed: Vec<ConnectionId> = std::mem::take(
            &mut *self
                .disconnected
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if closed.is_empty() {
            return;
        }

        for connection in closed {
            let teardown = lock_scene(&self.scene).close_connection(connection);
            let pools = self.shm.remove_connection(connection);
            debug!(
                "Reaped {:?}: {} surfaces, {} shm pools",
                connection,
                teardown.surfaces.len(),
                pools
            );
            self.release(&teardown);
            self.notify(SceneNotice::ConnectionClosed(connection));
        }

        lock_seat(&self.seat).prune();
        self.callbacks.retain(|_, cb| cb.is_alive());
        self.xdg_surfaces.retain(|_, s| s.is_alive());
        self.wm_bases.retain(|b| b.resource.is_alive());
        self.outputs.retain(|o| o.is_alive());
    }

    /// Forget protocol objects for scene objects that are gone
    fn release(&mut self, teardown: &Teardown) {
        for callback in &teardown.callbacks {
            self.callbacks.remove(callback);
        }
        for window in &teardown.windows {
            if let Some(XdgWindow {
                role: XdgRole::Popup(popup),
                ..
            }) = self.xdg_windows.remove(window)
            {
                if popup.is_alive() {
                    popup.popup_done();
                }
            }
        }
        {
            let mut seat = lock_seat(&self.seat);
            for surface in &teardown.surfaces {
                self.pending_buffers.remove(surface);
                seat.remove_surface(*surface);
            }
        }
        for surface in &teardown.surfaces {
            self.notify(SceneNotice::SurfaceDestroyed(*surface));
        }
    }

    /// Send every configure the scene has queued
    pub fn send_configures(&mut self) {
        let configures = lock_scene(&self.scene).take_configures();
        for configure in configures {
            self.send_configure(configure);
        }
    }

    /// Apply renderer results
    pub fn handle_render_events(&mut self, events: Vec<RenderEvent>) {
        for event in events {
            match event {
                RenderEvent::FrameDone { callbacks, time } => self.frame_done(&callbacks, time),
                RenderEvent::OutputFault { output, reason } => {
                    warn!("Output {:?} stopped presenting: {}", output, reason);
                }
            }
        }
        self.flush();
    }

    fn frame_done(&mut self, callbacks: &[FrameCallbackId], time: u32) {
        for id in callbacks {
            if let Some(callback) = self.callbacks.remove(id) {
                callback.done(time);
            }
        }
    }

    /// Ping every client's xdg_wm_base
    pub fn ping_clients(&mut self) {
        let serial = self.serial();
        for base in self.wm_bases.iter_mut().filter(|b| b.resource.is_alive()) {
            let missed = base.pings.ping(serial);
            if missed > 0 {
                warn!(
                    "Client {:?} missed {} pings",
                    base.resource.client().map(|c| c.id()),
                    missed
                );
            }
            base.resource.ping(serial);
        }
        self.flush();
    }

    /// Advertise a wl_output global for every scene output, and retract
    /// globals of removed outputs
    pub fn sync_outputs(&mut self) {
        let ids: Vec<OutputId> = lock_scene(&self.scene)
            .outputs
            .iter()
            .map(|o| o.id)
            .collect();
        for id in &ids {
            if !self.output_globals.contains_key(id) {
                let global = self
                    .display
                    .create_global::<ServerState, WlOutput, OutputId>(4, *id);
                self.output_globals.insert(*id, global);
            }
        }
        let gone: Vec<OutputId> = self
            .output_globals
            .keys()
            .filter(|id| !ids.contains(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(global) = self.output_globals.remove(&id) {
                self.display.remove_global::<ServerState>(global);
            }
        }
    }

    /// Resend an output's description after the host changed it
    pub fn output_changed(&mut self, id: OutputId) {
        let Some(info) = lock_scene(&self.scene)
            .outputs
            .get(id)
            .map(OutputInfo::from_output)
        else {
            return;
        };
        for output in self
            .outputs
            .iter()
            .filter(|o| o.is_alive() && o.data::<OutputId>() == Some(&id))
        {
            globals::send_output_info(output, &info);
        }
        self.send_configures();
        self.flush();
    }

    fn register_globals(&mut self) {
        use wayland_protocols::xdg::shell::server::xdg_wm_base;
        use wayland_server::protocol::{wl_compositor, wl_seat, wl_shm};

        self.display
            .create_global::<ServerState, wl_compositor::WlCompositor, ()>(6, ());
        self.display
            .create_global::<ServerState, wl_shm::WlShm, ()>(1, ());
        self.display
            .create_global::<ServerState, wl_seat::WlSeat, ()>(7, ());
        self.display
            .create_global::<ServerState, xdg_wm_base::XdgWmBase, ()>(6, ());
        self.sync_outputs();
        info!("Registered Wayland globals: wl_compositor, wl_shm, wl_seat, wl_output, xdg_wm_base");
    }
}

impl AsMut<ServerState> for ServerState {
    fn as_mut(&mut self) -> &mut ServerState {
        self
    }
}
