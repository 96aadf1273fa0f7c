//! Compositor core module
//!
//! This module contains the scene graph:
//! - Client connections and the objects they own
//! - Surfaces, their commit queues and damage tracking
//! - Immutable pixel buffers shared with the renderer
//! - Window stacking, focus and placement
//! - Output/display management
//! - Snapshots handed to the renderer each frame

pub mod buffer;
pub mod connection;
pub mod damage;
pub mod layout;
pub mod output;
pub mod snapshot;
pub mod state;
pub mod surface;
pub mod window;

pub use buffer::{Buffer, BufferId, BufferStore};
pub use connection::{Connection, ConnectionId, ConnectionRegistry};
pub use damage::{DamageRegion, Rect};
pub use layout::{LayoutMode, TileParams};
pub use output::{Output, OutputHealth, OutputId, OutputManager, OutputMode};
pub use snapshot::{SceneSnapshot, SnapshotOutput, SnapshotSurface};
pub use state::{
    lock_scene, CommitOutcome, CompositorState, Configure, HitTarget, SceneConfig, SceneError,
    SharedScene, Teardown,
};
pub use surface::{
    BufferTransform, FrameCallbackId, Surface, SurfaceId, SurfaceManager, SurfaceRole,
};
pub use window::{Window, WindowId, WindowKind, WindowManager, WindowStates};
