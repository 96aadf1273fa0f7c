//! Immutable scene views handed to the renderer

use std::sync::Arc;

use crate::compositor::{
    Buffer, BufferTransform, ConnectionId, DamageRegion, FrameCallbackId, OutputId, OutputMode,
    Rect, SurfaceId, WindowId,
};

/// A mapped surface as it should appear this frame
#[derive(Debug, Clone)]
pub struct SnapshotSurface {
    pub surface: SurfaceId,
    pub owner: ConnectionId,
    pub window: WindowId,
    /// Global logical position of the surface origin
    pub origin: (i32, i32),
    /// Logical size
    pub size: (i32, i32),
    pub buffer: Arc<Buffer>,
    pub scale: i32,
    pub transform: BufferTransform,
    /// Commit this content came from
    pub seq: u64,
}

impl SnapshotSurface {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.origin.0, self.origin.1, self.size.0, self.size.1)
    }
}

/// An output as it should be composited this frame
#[derive(Debug, Clone)]
pub struct SnapshotOutput {
    pub id: OutputId,
    /// Area in global logical coordinates
    pub rect: Rect,
    pub mode: OutputMode,
    pub scale: f64,
    pub faulted: bool,
}

/// Everything the renderer needs for one frame
///
/// Built under the scene lock by cloning `Arc` handles only; pixels are
/// never copied here.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    /// Monotonic frame counter
    pub frame: u64,
    /// Mapped surfaces, bottom first
    pub surfaces: Vec<SnapshotSurface>,
    pub outputs: Vec<SnapshotOutput>,
    /// Global damage since the previous snapshot
    pub damage: DamageRegion,
    /// Frame callbacks to complete once this frame is shown
    pub callbacks: Vec<FrameCallbackId>,
}

impl SceneSnapshot {
    /// Topmost surface covering a global point
    pub fn surface_at(&self, x: i32, y: i32) -> Option<&SnapshotSurface> {
        self.surfaces
            .iter()
            .rev()
            .find(|s| s.bounds().contains(x, y))
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&SnapshotSurface> {
        self.surfaces.iter().find(|s| s.surface == id)
    }

    /// Surfaces overlapping a rectangle, bottom first
    pub fn surfaces_in(&self, rect: Rect) -> impl Iterator<Item = &SnapshotSurface> {
        self.surfaces
            .iter()
            .filter(move |s| s.bounds().intersects(&rect))
    }
}
