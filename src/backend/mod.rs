//! Backend module
//!
//! This module contains the host backends:
//! - Headless backend, presenting into memory or PPM dumps
//! - Cocoa backend for macOS (NSWindow per output, Metal presentation)
//! - Event loop integration with calloop

#[cfg(target_os = "macos")]
pub mod cocoa;
pub mod event_loop;
pub mod headless;

pub use event_loop::{EventLoop, LoopState, Session};

use log::info;

use crate::compositor::{CompositorState, OutputId, SharedScene};
use crate::config::{BackendKind, RunConfig};
use crate::error::StartupError;

/// Build the scene with one output per configured mode
///
/// Outputs are named `<prefix>-1`, `<prefix>-2` and so on.
pub fn build_scene(config: &RunConfig, prefix: &str) -> (SharedScene, Vec<OutputId>) {
    let mut scene = CompositorState::new(config.scene);
    let outputs = config
        .outputs
        .iter()
        .enumerate()
        .map(|(i, mode)| scene.add_output(format!("{}-{}", prefix, i + 1), *mode, config.scale))
        .collect();
    (scene.into_shared(), outputs)
}

/// Run the compositor on the configured backend until it stops
pub fn run(config: &RunConfig) -> anyhow::Result<()> {
    info!("Starting cocoa-way with the {:?} backend", config.backend);
    match config.backend {
        BackendKind::Headless => headless::run(config),
        #[cfg(target_os = "macos")]
        BackendKind::Cocoa | BackendKind::Auto => cocoa::run(config),
        #[cfg(not(target_os = "macos"))]
        BackendKind::Cocoa | BackendKind::Auto => Err(StartupError::Backend(
            "the cocoa backend requires macOS".into(),
        )
        .into()),
    }
}
