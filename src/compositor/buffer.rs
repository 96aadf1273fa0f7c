//! Pixel buffers handed from clients to the renderer
//!
//! Buffer contents are copied out of client memory at commit time, so a
//! `Buffer` is immutable for its whole life and can be shared with the
//! renderer through an `Arc` without further synchronisation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::trace;

use crate::compositor::ConnectionId;
use crate::protocol::shm::{ShmContents, ShmFormat};

/// Unique identifier for buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl BufferId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        BufferId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// An immutable snapshot of client pixels
#[derive(Debug)]
pub struct Buffer {
    pub id: BufferId,
    /// Connection the contents came from
    pub owner: ConnectionId,
    pub width: u32,
    pub height: u32,
    pub format: ShmFormat,
    /// Packed 0xAARRGGBB pixels, `width * height` long
    pixels: Vec<u32>,
}

impl Buffer {
    /// Build a buffer from already packed pixels
    ///
    /// Missing pixels are filled with transparent black and extra ones are
    /// dropped, so the pixel count always matches the dimensions.
    pub fn from_pixels(
        owner: ConnectionId,
        width: u32,
        height: u32,
        format: ShmFormat,
        mut pixels: Vec<u32>,
    ) -> Self {
        pixels.resize(width as usize * height as usize, 0);
        Self {
            id: BufferId::new(),
            owner,
            width,
            height,
            format,
            pixels,
        }
    }

    /// Convert raw shm rows into packed pixels
    pub fn from_shm(owner: ConnectionId, contents: &ShmContents) -> Self {
        let width = contents.width as usize;
        let stride = contents.stride as usize;
        let mut pixels = Vec::with_capacity(width * contents.height as usize);
        for row in contents.data.chunks(stride).take(contents.height as usize) {
            pixels.extend(
                row.chunks_exact(4)
                    .take(width)
                    .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]])),
            );
        }
        Self::from_pixels(owner, contents.width, contents.height, contents.format, pixels)
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Whether the alpha channel can be ignored
    pub fn is_opaque(&self) -> bool {
        self.format == ShmFormat::Xrgb8888
    }
}

/// Tracks every buffer still alive anywhere in the process
///
/// Entries are weak, so the store never keeps pixels alive itself. It exists
/// to answer "does anything still hold this connection's buffers?".
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: HashMap<BufferId, (ConnectionId, Weak<Buffer>)>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created buffer and hand out the first reference
    pub fn insert(&mut self, buffer: Buffer) -> Arc<Buffer> {
        let buffer = Arc::new(buffer);
        trace!(
            "Registered buffer {:?} ({}x{}) for {:?}",
            buffer.id,
            buffer.width,
            buffer.height,
            buffer.owner
        );
        self.buffers
            .insert(buffer.id, (buffer.owner, Arc::downgrade(&buffer)));
        self.prune();
        buffer
    }

    /// Forget buffers whose last strong reference is gone
    pub fn prune(&mut self) {
        self.buffers.retain(|_, (_, weak)| weak.strong_count() > 0);
    }

    /// Number of buffers still referenced somewhere
    pub fn live_count(&self) -> usize {
        self.buffers
            .values()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    /// Number of live buffers that came from `owner`
    pub fn live_for(&self, owner: ConnectionId) -> usize {
        self.buffers
            .values()
            .filter(|(o, weak)| *o == owner && weak.strong_count() > 0)
            .count()
    }
}
