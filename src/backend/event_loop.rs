//! Event loop integration
//!
//! One calloop loop on the main thread drives everything that touches
//! Wayland objects: client dispatch, the render timer, xdg_wm_base pings,
//! and the wake-up ping the input bridge uses after queueing events.

use std::env;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use calloop::ping::make_ping;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop as CalLoop, LoopHandle};
use log::{debug, info, warn};

use crate::compositor::{lock_scene, OutputId, OutputMode, SharedScene};
use crate::config::RunConfig;
use crate::error::StartupError;
use crate::input::{compile_keymap, HostInputEvent, InputBridge};
use crate::renderer::{Presenter, Renderer};
use crate::server::{SeatResources, ServerState, WaylandServer, WaylandSink, PING_INTERVAL};

/// Everything the loop callbacks operate on
pub struct LoopState {
    pub server: ServerState,
    pub renderer: Renderer<Box<dyn Presenter>>,
    bridge: Option<InputBridge>,
}

impl LoopState {
    /// Render a frame if the scene changed or a present is being retried
    pub fn render(&mut self, now: Instant) {
        let dirty = lock_scene(&self.server.scene).needs_frame();
        if !dirty && !self.renderer.retry_pending() {
            return;
        }
        let events = self.renderer.tick(&self.server.scene, now);
        self.server.handle_render_events(events);
    }

    /// Forward host input to the bridge thread
    pub fn host_input(&self, event: HostInputEvent) {
        if let Some(bridge) = &self.bridge {
            if let Err(e) = bridge.host(event) {
                debug!("Dropping host input: {}", e);
            }
        }
    }

    /// The host resized an output's window
    pub fn resize_output(&mut self, id: OutputId, mode: OutputMode, scale: f64) {
        if let Err(e) = lock_scene(&self.server.scene).resize_output(id, mode, scale) {
            warn!("Cannot resize output: {}", e);
            return;
        }
        self.server.output_changed(id);
    }

    /// Stop the input bridge
    pub fn shutdown(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown();
        }
    }
}

impl AsMut<ServerState> for LoopState {
    fn as_mut(&mut self) -> &mut ServerState {
        &mut self.server
    }
}

/// Cocoa-way event loop wrapper
pub struct EventLoop {
    /// Calloop event loop
    event_loop: CalLoop<'static, LoopState>,
}

impl EventLoop {
    pub fn new() -> Result<Self, StartupError> {
        let event_loop = CalLoop::try_new().map_err(StartupError::EventLoop)?;
        Ok(Self { event_loop })
    }

    /// Get a handle to register event sources
    pub fn handle(&self) -> LoopHandle<'static, LoopState> {
        self.event_loop.handle()
    }

    /// Run one iteration of the event loop
    pub fn dispatch(
        &mut self,
        timeout: Option<Duration>,
        state: &mut LoopState,
    ) -> anyhow::Result<()> {
        self.event_loop
            .dispatch(timeout, state)
            .context("event loop dispatch failed")
    }

    /// Run the event loop until stopped
    pub fn run(&mut self, state: &mut LoopState) -> anyhow::Result<()> {
        debug!("Starting event loop");
        self.event_loop
            .run(None, state, |_| {})
            .context("event loop failed")
    }
}

/// A bound Wayland socket with the loop and state serving it
pub struct Session {
    event_loop: EventLoop,
    state: LoopState,
    socket_name: String,
}

impl Session {
    /// Bind the socket, start the input bridge and register every loop
    /// source
    pub fn new(
        config: &RunConfig,
        scene: SharedScene,
        presenter: Box<dyn Presenter>,
    ) -> Result<Self, StartupError> {
        let server = WaylandServer::new(&config.runtime_dir, config.socket.as_deref())?;
        let socket_name = server.socket_name().to_string();
        let keymap = compile_keymap(&config.xkb_layout)?;

        let event_loop = EventLoop::new()?;
        let handle = event_loop.handle();

        let (wake, wake_source) =
            make_ping().map_err(|e| StartupError::EventLoop(calloop::Error::IoError(e)))?;
        handle
            .insert_source(wake_source, |_, _, state: &mut LoopState| {
                state.server.send_configures();
                state.server.flush();
            })
            .map_err(|e| StartupError::EventLoop(e.error))?;

        let seat = SeatResources::new().into_shared();
        let bridge = InputBridge::spawn(
            scene.clone(),
            WaylandSink::new(seat.clone(), wake),
            keymap.clone(),
        )?;
        let server_state = ServerState::new(
            scene,
            server.handle(),
            seat,
            keymap,
            Some(bridge.sender()),
        );
        server.insert_into_loop(&handle)?;

        handle
            .insert_source(Timer::immediate(), |_, _, state: &mut LoopState| {
                let now = Instant::now();
                state.render(now);
                TimeoutAction::ToDuration(state.renderer.clock().interval())
            })
            .map_err(|e| StartupError::EventLoop(e.error))?;
        handle
            .insert_source(
                Timer::from_duration(PING_INTERVAL),
                |_, _, state: &mut LoopState| {
                    state.server.ping_clients();
                    TimeoutAction::ToDuration(PING_INTERVAL)
                },
            )
            .map_err(|e| StartupError::EventLoop(e.error))?;

        let renderer = Renderer::new(presenter, config.present_retries, Instant::now());
        Ok(Self {
            event_loop,
            state: LoopState {
                server: server_state,
                renderer,
                bridge: Some(bridge),
            },
            socket_name,
        })
    }

    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    pub fn state(&mut self) -> &mut LoopState {
        &mut self.state
    }

    /// Publish the socket to processes started from this one
    pub fn export_environment(&self, runtime_dir: &Path) {
        env::set_var("WAYLAND_DISPLAY", &self.socket_name);
        env::set_var("XDG_RUNTIME_DIR", runtime_dir);
        info!("WAYLAND_DISPLAY={}", self.socket_name);
    }

    /// Run one loop iteration
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> anyhow::Result<()> {
        self.event_loop.dispatch(timeout, &mut self.state)
    }

    /// Serve until the loop is stopped
    pub fn run(mut self) -> anyhow::Result<()> {
        info!("Wayland clients can connect to: {}", self.socket_name);
        let result = self.event_loop.run(&mut self.state);
        self.state.shutdown();
        result
    }
}
