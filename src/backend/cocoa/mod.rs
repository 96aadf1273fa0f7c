//! Cocoa backend for macOS
//!
//! This module provides the macOS-specific implementation using:
//! - NSApplication for the application lifecycle
//! - One NSWindow per output, each holding a view with a CAMetalLayer
//! - NSEvent handling, translated to evdev codes for the input bridge
//!
//! AppKit objects only talk to the compositor through a [`HostEvents`]
//! queue, which the main loop drains between AppKit and Wayland dispatch.

pub mod app;
pub mod view;
pub mod window;

pub use app::CocoaApp;
pub use view::CocoaView;
pub use window::OutputWindow;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info};
use objc2_foundation::MainThreadMarker;

use crate::compositor::{lock_scene, OutputId};
use crate::config::RunConfig;
use crate::error::StartupError;
use crate::input::HostInputEvent;
use crate::renderer::metal::MetalPresenter;

use super::{build_scene, LoopState, Session};

/// Longest the Wayland side may block before AppKit events are pumped again
const DISPATCH_SLICE: Duration = Duration::from_millis(4);

/// Something AppKit reported for the compositor
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Input on an output's view; pointer positions are view-local
    Input {
        output: OutputId,
        event: HostInputEvent,
    },
    /// The window's size or backing scale may have changed
    Resized(OutputId),
    /// The user closed an output window
    Closed(OutputId),
    /// The user asked the application to quit
    Quit,
}

/// Main-thread queue shared by the AppKit delegates and views
#[derive(Debug, Clone, Default)]
pub struct HostEvents(Rc<RefCell<VecDeque<HostEvent>>>);

impl HostEvents {
    pub fn push(&self, event: HostEvent) {
        self.0.borrow_mut().push_back(event);
    }

    pub fn pop(&self) -> Option<HostEvent> {
        self.0.borrow_mut().pop_front()
    }
}

pub fn run(config: &RunConfig) -> anyhow::Result<()> {
    let mtm = MainThreadMarker::new().ok_or_else(|| {
        StartupError::Backend("the cocoa backend must run on the main thread".into())
    })?;

    let events = HostEvents::default();
    let app = CocoaApp::new(mtm, events.clone());

    let (scene, outputs) = build_scene(config, "COCOA");
    let mut presenter = MetalPresenter::new()
        .map_err(|e| StartupError::Backend(format!("Metal is unavailable: {e:#}")))?;

    let mut windows = Vec::new();
    {
        let scene = lock_scene(&scene);
        for id in outputs {
            let Some(output) = scene.outputs.get(id) else {
                continue;
            };
            let window = OutputWindow::new(mtm, output, events.clone());
            presenter.attach_layer(id, window.metal_layer());
            windows.push(window);
        }
    }

    let mut session = Session::new(config, scene, Box::new(presenter))?;
    session.export_environment(&config.runtime_dir);
    info!("Wayland clients can connect to: {}", session.socket_name());

    for window in &windows {
        window.show();
        events.push(HostEvent::Resized(window.output()));
    }
    app.activate();

    loop {
        app.pump();
        while let Some(event) = events.pop() {
            if !apply(session.state(), &windows, event) {
                info!("Shutting down");
                session.state().shutdown();
                return Ok(());
            }
        }
        session.dispatch(Some(DISPATCH_SLICE))?;
    }
}

/// Apply one host event; false once the compositor should stop
fn apply(state: &mut LoopState, windows: &[OutputWindow], event: HostEvent) -> bool {
    match event {
        HostEvent::Input { output, event } => {
            let event = match event {
                HostInputEvent::PointerMotion { x, y, time } => {
                    let origin = lock_scene(&state.server.scene)
                        .outputs
                        .get(output)
                        .map(|o| o.logical_rect());
                    let Some(origin) = origin else {
                        return true;
                    };
                    HostInputEvent::PointerMotion {
                        x: origin.x as f64 + x,
                        y: origin.y as f64 + y,
                        time,
                    }
                }
                other => other,
            };
            state.host_input(event);
        }
        HostEvent::Resized(output) => {
            let Some(window) = windows.iter().find(|w| w.output() == output) else {
                return true;
            };
            if let Some((mode, scale)) = window.take_resize() {
                debug!("Host resized {:?} to {}x{} @{}", output, mode.width, mode.height, scale);
                state.resize_output(output, mode, scale);
            }
        }
        HostEvent::Closed(output) => {
            info!("Output window for {:?} closed", output);
            return false;
        }
        HostEvent::Quit => return false,
    }
    true
}
