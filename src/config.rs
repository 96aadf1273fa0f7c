//! Command line and runtime configuration
//!
//! The CLI is parsed with clap and resolved into plain config structs; no
//! configuration file is read.

use std::env;
use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, warn};

use crate::compositor::{LayoutMode, OutputMode, SceneConfig};
use crate::renderer::DEFAULT_PRESENT_RETRIES;
use crate::transport::Endpoint;

/// Largest accepted output edge in pixels
const MAX_OUTPUT_EDGE: u32 = 16384;

/// Output used when none is given
pub const DEFAULT_OUTPUT: OutputMode = OutputMode {
    width: 1280,
    height: 800,
    refresh: 60_000,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid output {0:?} (expected WIDTHxHEIGHT[@HZ])")]
    InvalidOutput(String),
    #[error("invalid output scale {0}")]
    InvalidScale(f64),
    #[error("commit queue depth must be at least 1")]
    InvalidQueueDepth,
    #[error("cannot create runtime directory {}", path.display())]
    RuntimeDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Parser)]
#[command(name = "cocoa-way", version, about = "Wayland compositor for macOS")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the compositor (default)
    Run(RunArgs),
    /// Relay Wayland traffic between two endpoints
    Relay(RelayArgs),
}

impl Cli {
    /// The subcommand to execute; no subcommand means `run`
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Run(self.run))
    }
}

/// Which host presents the outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// Cocoa on macOS, headless elsewhere
    #[default]
    Auto,
    Cocoa,
    Headless,
}

impl BackendKind {
    /// Resolve `Auto` for the platform we are running on
    pub fn resolve(self) -> BackendKind {
        match self {
            BackendKind::Auto if cfg!(target_os = "macos") => BackendKind::Cocoa,
            BackendKind::Auto => BackendKind::Headless,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Socket name (default: first free wayland-N)
    #[arg(short, long, value_name = "NAME")]
    pub socket: Option<String>,

    /// Runtime directory
    #[arg(long, value_name = "DIR", env = "XDG_RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t, env = "COCOA_WAY_BACKEND")]
    pub backend: BackendKind,

    /// Output mode, repeatable (default 1280x800@60)
    #[arg(long = "output", value_name = "WxH[@HZ]", value_parser = parse_output)]
    pub outputs: Vec<OutputMode>,

    /// Output scale factor
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    #[arg(long, value_enum, default_value_t)]
    pub layout: LayoutMode,

    /// Per-surface pending commit queue
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub commit_queue_depth: usize,

    /// Failed presents before an output faults
    #[arg(long, value_name = "N", default_value_t = DEFAULT_PRESENT_RETRIES)]
    pub present_retries: u32,

    /// Keyboard layout
    #[arg(long, value_name = "LAYOUT", default_value = "us")]
    pub xkb_layout: String,

    /// Headless: write presented frames as PPM
    #[arg(long, value_name = "DIR")]
    pub dump_frames: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RelayArgs {
    /// Endpoint to accept connections on
    #[arg(long, value_name = "ENDPOINT")]
    pub listen: Endpoint,

    /// Endpoint every accepted connection is relayed to
    #[arg(long, value_name = "ENDPOINT")]
    pub connect: Endpoint,
}

/// Parse `WIDTHxHEIGHT` with an optional `@HZ` refresh rate
pub fn parse_output(s: &str) -> Result<OutputMode, ConfigError> {
    let invalid = || ConfigError::InvalidOutput(s.to_string());
    let (size, refresh) = match s.split_once('@') {
        Some((size, hz)) => {
            let hz: f64 = hz.parse().map_err(|_| invalid())?;
            if !(1.0..=1000.0).contains(&hz) {
                return Err(invalid());
            }
            (size, (hz * 1000.0).round() as u32)
        }
        None => (s, DEFAULT_OUTPUT.refresh),
    };
    let (width, height) = size.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = width.parse().map_err(|_| invalid())?;
    let height: u32 = height.parse().map_err(|_| invalid())?;
    let edge = 1..=MAX_OUTPUT_EDGE;
    if !edge.contains(&width) || !edge.contains(&height) {
        return Err(invalid());
    }
    Ok(OutputMode::new(width, height, refresh))
}

/// Resolved settings for running the compositor
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub socket: Option<String>,
    pub runtime_dir: PathBuf,
    pub backend: BackendKind,
    pub outputs: Vec<OutputMode>,
    pub scale: f64,
    pub scene: SceneConfig,
    pub present_retries: u32,
    pub xkb_layout: String,
    pub dump_frames: Option<PathBuf>,
}

impl RunArgs {
    /// Validate the arguments and make sure the runtime directory exists
    pub fn resolve(self) -> Result<RunConfig, ConfigError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ConfigError::InvalidScale(self.scale));
        }
        if self.commit_queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }
        let outputs = if self.outputs.is_empty() {
            vec![DEFAULT_OUTPUT]
        } else {
            self.outputs
        };
        let runtime_dir = match self.runtime_dir.filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => dir,
            None => fallback_runtime_dir()?,
        };

        Ok(RunConfig {
            socket: self.socket,
            runtime_dir,
            backend: self.backend.resolve(),
            outputs,
            scale: self.scale,
            scene: SceneConfig {
                commit_queue_depth: self.commit_queue_depth,
                layout: self.layout,
                ..SceneConfig::default()
            },
            present_retries: self.present_retries,
            xkb_layout: self.xkb_layout,
            dump_frames: self.dump_frames,
        })
    }
}

/// `$TMPDIR/cocoa-way`, created private to the user
///
/// macOS has no XDG_RUNTIME_DIR, so this is the usual case there.
fn fallback_runtime_dir() -> Result<PathBuf, ConfigError> {
    let dir = env::temp_dir().join("cocoa-way");
    warn!("XDG_RUNTIME_DIR is not set, using {}", dir.display());
    create_private_dir(&dir)?;
    Ok(dir)
}

fn create_private_dir(dir: &Path) -> Result<(), ConfigError> {
    debug!("Creating runtime directory {}", dir.display());
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|source| ConfigError::RuntimeDir {
            path: dir.to_path_buf(),
            source,
        })
}
