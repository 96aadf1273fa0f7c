//! Surface management
//!
//! This module handles double-buffered surface state, damage tracking,
//! and the per-surface queue of committed frames waiting for the renderer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use crate::compositor::{Buffer, ConnectionId, DamageRegion, Rect, SceneError};
use crate::protocol::Region;

/// Unique identifier for surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        SurfaceId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Unique identifier for frame callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameCallbackId(pub u64);

impl FrameCallbackId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        FrameCallbackId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for FrameCallbackId {
    fn default() -> Self {
        Self::new()
    }
}

/// Surface role determines how the surface is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceRole {
    /// No role assigned yet
    #[default]
    None,
    /// XDG toplevel window
    XdgToplevel,
    /// XDG popup
    XdgPopup,
    /// Cursor image
    Cursor,
}

/// wl_output.transform applied to buffer contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferTransform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl BufferTransform {
    /// Parse a wl_output.transform value
    pub fn from_raw(value: u32) -> Option<Self> {
        Some(match value {
            0 => BufferTransform::Normal,
            1 => BufferTransform::Rotate90,
            2 => BufferTransform::Rotate180,
            3 => BufferTransform::Rotate270,
            4 => BufferTransform::Flipped,
            5 => BufferTransform::Flipped90,
            6 => BufferTransform::Flipped180,
            7 => BufferTransform::Flipped270,
            _ => return None,
        })
    }

    /// Whether width and height trade places
    pub fn swaps_axes(&self) -> bool {
        matches!(
            self,
            BufferTransform::Rotate90
                | BufferTransform::Rotate270
                | BufferTransform::Flipped90
                | BufferTransform::Flipped270
        )
    }

    /// Map a surface-space pixel to buffer space
    ///
    /// `w` and `h` are the buffer dimensions.
    pub fn to_buffer(&self, x: u32, y: u32, w: u32, h: u32) -> (u32, u32) {
        match self {
            BufferTransform::Normal => (x, y),
            BufferTransform::Rotate90 => (w - 1 - y, x),
            BufferTransform::Rotate180 => (w - 1 - x, h - 1 - y),
            BufferTransform::Rotate270 => (y, h - 1 - x),
            BufferTransform::Flipped => (w - 1 - x, y),
            BufferTransform::Flipped90 => (y, x),
            BufferTransform::Flipped180 => (x, h - 1 - y),
            BufferTransform::Flipped270 => (w - 1 - y, h - 1 - x),
        }
    }
}

/// Buffer attachment waiting for commit
#[derive(Debug, Clone)]
pub enum BufferChange {
    Attach(Arc<Buffer>),
    Detach,
}

/// Pending state for a surface (not yet committed)
#[derive(Debug, Default)]
pub struct PendingState {
    pub buffer: Option<BufferChange>,
    /// Damage in surface-local coordinates
    pub damage: DamageRegion,
    /// Damage in buffer coordinates
    pub buffer_damage: DamageRegion,
    pub scale: Option<i32>,
    pub transform: Option<BufferTransform>,
    pub offset: (i32, i32),
    pub opaque_region: Option<Option<Region>>,
    pub input_region: Option<Option<Region>>,
    pub frame_callbacks: Vec<FrameCallbackId>,
}

/// State as of the latest commit
#[derive(Debug, Clone)]
pub struct CommittedState {
    pub buffer: Option<Arc<Buffer>>,
    pub scale: i32,
    pub transform: BufferTransform,
    pub opaque_region: Option<Region>,
    pub input_region: Option<Region>,
    /// Commit sequence number, 0 before the first commit
    pub seq: u64,
}

impl Default for CommittedState {
    fn default() -> Self {
        Self {
            buffer: None,
            scale: 1,
            transform: BufferTransform::Normal,
            opaque_region: None,
            input_region: None,
            seq: 0,
        }
    }
}

impl CommittedState {
    /// Surface size in logical coordinates
    pub fn size(&self) -> (i32, i32) {
        surface_size(self.buffer.as_deref(), self.scale, self.transform)
    }

    /// Whether a surface-local point accepts input
    pub fn accepts_input(&self, x: i32, y: i32) -> bool {
        let (w, h) = self.size();
        if !Rect::new(0, 0, w, h).contains(x, y) {
            return false;
        }
        match &self.input_region {
            Some(region) => region.contains(x, y),
            None => true,
        }
    }
}

fn surface_size(buffer: Option<&Buffer>, scale: i32, transform: BufferTransform) -> (i32, i32) {
    let Some(buffer) = buffer else {
        return (0, 0);
    };
    let scale = scale.max(1);
    let (w, h) = (buffer.width as i32 / scale, buffer.height as i32 / scale);
    if transform.swaps_axes() {
        (h, w)
    } else {
        (w, h)
    }
}

/// One committed frame waiting to be displayed
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub seq: u64,
    pub buffer: Option<Arc<Buffer>>,
    pub scale: i32,
    pub transform: BufferTransform,
    /// Surface-local damage accumulated for this frame
    pub damage: DamageRegion,
    pub callbacks: Vec<FrameCallbackId>,
}

impl QueuedFrame {
    pub fn size(&self) -> (i32, i32) {
        surface_size(self.buffer.as_deref(), self.scale, self.transform)
    }

    fn absorb(&mut self, older: QueuedFrame) {
        self.damage.merge(&older.damage);
        let mut callbacks = older.callbacks;
        callbacks.append(&mut self.callbacks);
        self.callbacks = callbacks;
    }
}

/// Client damage outside this box cannot touch any surface
const DAMAGE_LIMIT: Rect = Rect::new(i32::MIN / 2, i32::MIN / 2, i32::MAX, i32::MAX);

/// Bounded FIFO of committed frames not yet picked up by the renderer
///
/// When full, the oldest frame is dropped. Its damage and frame callbacks
/// move to the next frame in line so nothing a client waits on is lost.
#[derive(Debug)]
pub struct CommitQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
    dropped: u64,
}

impl CommitQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueue a frame, returning true if an older frame was dropped
    pub fn push(&mut self, mut frame: QueuedFrame) -> bool {
        let mut dropped = false;
        if self.frames.len() >= self.capacity {
            if let Some(oldest) = self.frames.pop_front() {
                match self.frames.front_mut() {
                    Some(next) => next.absorb(oldest),
                    None => frame.absorb(oldest),
                }
                self.dropped += 1;
                dropped = true;
            }
        }
        self.frames.push_back(frame);
        dropped
    }

    /// Take the newest frame, folding everything older into it
    pub fn take_latest(&mut self) -> Option<QueuedFrame> {
        let mut latest = self.frames.pop_back()?;
        while let Some(older) = self.frames.pop_back() {
            latest.absorb(older);
        }
        Some(latest)
    }

    /// Empty the queue, returning the callbacks it held
    pub fn clear(&mut self) -> Vec<FrameCallbackId> {
        self.frames.drain(..).flat_map(|f| f.callbacks).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// What a commit changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCommit {
    pub seq: u64,
    /// An undisplayed frame was dropped to make room
    pub dropped_frame: bool,
    /// Has a buffer now
    pub has_buffer: bool,
    /// Had a buffer before this commit
    pub had_buffer: bool,
    /// wl_surface.offset accumulated since the previous commit
    pub offset: (i32, i32),
}

/// A Wayland surface
#[derive(Debug)]
pub struct Surface {
    pub id: SurfaceId,
    pub owner: ConnectionId,
    pub role: SurfaceRole,
    pub pending: PendingState,
    pub current: CommittedState,
    pub queue: CommitQueue,
    /// Frame the renderer showed last
    pub displayed: Option<QueuedFrame>,
}

impl Surface {
    pub fn new(owner: ConnectionId, queue_depth: usize) -> Self {
        Self {
            id: SurfaceId::new(),
            owner,
            role: SurfaceRole::None,
            pending: PendingState::default(),
            current: CommittedState::default(),
            queue: CommitQueue::new(queue_depth),
            displayed: None,
        }
    }

    pub fn attach(&mut self, buffer: Option<Arc<Buffer>>) {
        self.pending.buffer = Some(match buffer {
            Some(b) => BufferChange::Attach(b),
            None => BufferChange::Detach,
        });
    }

    pub fn damage(&mut self, rect: Rect) {
        if let Some(rect) = rect.intersection(&DAMAGE_LIMIT) {
            self.pending.damage.add(rect);
        }
    }

    pub fn damage_buffer(&mut self, rect: Rect) {
        if let Some(rect) = rect.intersection(&DAMAGE_LIMIT) {
            self.pending.buffer_damage.add(rect);
        }
    }

    pub fn frame(&mut self, callback: FrameCallbackId) {
        self.pending.frame_callbacks.push(callback);
    }

    pub fn set_scale(&mut self, scale: i32) -> Result<(), SceneError> {
        if scale <= 0 {
            return Err(SceneError::InvalidScale(scale));
        }
        self.pending.scale = Some(scale);
        Ok(())
    }

    pub fn set_transform(&mut self, transform: BufferTransform) {
        self.pending.transform = Some(transform);
    }

    pub fn set_offset(&mut self, x: i32, y: i32) {
        self.pending.offset = (x, y);
    }

    pub fn set_opaque_region(&mut self, region: Option<Region>) {
        self.pending.opaque_region = Some(region);
    }

    pub fn set_input_region(&mut self, region: Option<Region>) {
        self.pending.input_region = Some(region);
    }

    /// Set the surface role
    pub fn set_role(&mut self, role: SurfaceRole) -> Result<(), SceneError> {
        if self.role != SurfaceRole::None && self.role != role {
            return Err(SceneError::RoleConflict {
                surface: self.id,
                existing: self.role,
                requested: role,
            });
        }
        self.role = role;
        Ok(())
    }

    /// Promote pending state to committed state and queue a frame
    pub fn commit(&mut self, seq: u64) -> SurfaceCommit {
        let pending = std::mem::take(&mut self.pending);
        let had_buffer = self.current.buffer.is_some();
        let old_size = self.current.size();

        match pending.buffer {
            Some(BufferChange::Attach(buffer)) => self.current.buffer = Some(buffer),
            Some(BufferChange::Detach) => self.current.buffer = None,
            None => {}
        }
        if let Some(scale) = pending.scale {
            self.current.scale = scale;
        }
        if let Some(transform) = pending.transform {
            self.current.transform = transform;
        }
        if let Some(region) = pending.opaque_region {
            self.current.opaque_region = region;
        }
        if let Some(region) = pending.input_region {
            self.current.input_region = region;
        }
        self.current.seq = seq;

        let new_size = self.current.size();
        let mut damage = pending.damage;
        let full = Rect::new(0, 0, new_size.0, new_size.1);
        if old_size != new_size || (!had_buffer && self.current.buffer.is_some()) {
            damage.add(Rect::new(0, 0, old_size.0, old_size.1));
            damage.add(full);
        } else if !pending.buffer_damage.is_empty() {
            if self.current.transform == BufferTransform::Normal {
                let scale = 1.0 / self.current.scale as f64;
                for rect in pending.buffer_damage.rects() {
                    damage.add(rect.scale_out(scale));
                }
            } else {
                damage.add(full);
            }
        }
        let damage = damage.clip(&full.union(&Rect::new(0, 0, old_size.0, old_size.1)));

        let dropped_frame = self.queue.push(QueuedFrame {
            seq,
            buffer: self.current.buffer.clone(),
            scale: self.current.scale,
            transform: self.current.transform,
            damage,
            callbacks: pending.frame_callbacks,
        });
        if dropped_frame {
            debug!(
                "Surface {:?} commit queue full, dropped oldest frame ({} total)",
                self.id,
                self.queue.dropped()
            );
        }

        SurfaceCommit {
            seq,
            dropped_frame,
            has_buffer: self.current.buffer.is_some(),
            had_buffer,
            offset: pending.offset,
        }
    }
}

/// Manager for all surfaces
#[derive(Debug, Default)]
pub struct SurfaceManager {
    surfaces: HashMap<SurfaceId, Surface>,
}

impl SurfaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new surface and return its ID
    pub fn create_surface(&mut self, owner: ConnectionId, queue_depth: usize) -> SurfaceId {
        let surface = Surface::new(owner, queue_depth);
        let id = surface.id;
        self.surfaces.insert(id, surface);
        id
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.get_mut(&id)
    }

    pub fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        self.surfaces.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SurfaceId, &Surface)> {
        self.surfaces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SurfaceId, &mut Surface)> {
        self.surfaces.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}
