//! cocoa-way - A Wayland compositor bridging guest clients to a host
//! windowing system
//!
//! Wayland clients connect over a local socket; their committed surfaces
//! are composited into one host window per output (Cocoa and Metal on
//! macOS, or a headless presenter elsewhere), and host input is fed back
//! to them through the seat.
//!
//! # Architecture
//!
//! - **Protocol Server** ([`server`]): wayland-server dispatch, globals and
//!   client lifecycle, backed by the protocol helpers in [`protocol`]
//! - **Scene Graph** ([`compositor`]): surfaces, buffers, windows and
//!   outputs, shared behind one lock
//! - **Renderer** ([`renderer`]): fixed-cadence software compositing with
//!   bounded present retries
//! - **Input Bridge** ([`input`]): a dedicated thread owning pointer and
//!   keyboard focus
//! - **Transport Shim** ([`transport`]): frame-preserving relay of Wayland
//!   byte streams, framed by [`wire`]
//!
//! # Example
//!
//! ```no_run
//! use cocoa_way::compositor::{CompositorState, SceneConfig};
//!
//! let scene = CompositorState::new(SceneConfig::default()).into_shared();
//! // The compositor is typically run via the main binary
//! // See src/main.rs for the entry point
//! # drop(scene);
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod error;
pub mod input;
pub mod protocol;
pub mod renderer;
pub mod server;
pub mod transport;
pub mod wire;
