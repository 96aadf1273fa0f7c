//! wl_shm pool and buffer bookkeeping
//!
//! Pools are client-provided file descriptors mapped read-only. Buffer
//! contents are copied out of the mapping when a surface commits, so the
//! renderer never reads client memory directly.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use memmap2::{Mmap, MmapOptions};

use crate::compositor::ConnectionId;

/// Unique identifier for shm pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmPoolId(pub u64);

impl ShmPoolId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ShmPoolId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmFormat {
    /// 32-bit ARGB (A in high byte)
    Argb8888,
    /// 32-bit XRGB (X in high byte, alpha ignored)
    Xrgb8888,
}

impl ShmFormat {
    /// Formats advertised on every wl_shm global
    pub const SUPPORTED: [ShmFormat; 2] = [ShmFormat::Argb8888, ShmFormat::Xrgb8888];

    /// Create from Wayland format value
    pub fn from_wayland(format: u32) -> Option<Self> {
        match format {
            0 => Some(ShmFormat::Argb8888),
            1 => Some(ShmFormat::Xrgb8888),
            _ => None,
        }
    }

    /// Convert to Wayland format value
    pub fn to_wayland(&self) -> u32 {
        match self {
            ShmFormat::Argb8888 => 0,
            ShmFormat::Xrgb8888 => 1,
        }
    }

    /// Get bytes per pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }
}

/// SHM errors
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("invalid pool size {0}")]
    InvalidSize(i32),
    #[error("pool cannot shrink from {current} to {requested} bytes")]
    Shrink { current: usize, requested: i32 },
    #[error("unsupported format {0:#x}")]
    InvalidFormat(u32),
    #[error("invalid buffer size {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },
    #[error("stride {stride} too small for width {width}")]
    InvalidStride { stride: i32, width: i32 },
    #[error("buffer ends at byte {end}, pool holds {size}")]
    OutOfBounds { end: i64, size: usize },
    #[error("unknown pool {0:?}")]
    UnknownPool(ShmPoolId),
    #[error("not an shm buffer")]
    UnknownBuffer,
    #[error("failed to map pool")]
    Map(#[source] std::io::Error),
}

/// Pixels copied out of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmContents {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: ShmFormat,
    /// `stride * height` bytes
    pub data: Vec<u8>,
}

/// A validated wl_buffer inside a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmBuffer {
    pub pool: ShmPoolId,
    pub offset: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: ShmFormat,
}

impl ShmBuffer {
    /// Get the size of the buffer data in bytes
    pub fn data_size(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// A shared memory pool
#[derive(Debug)]
pub struct ShmPool {
    pub id: ShmPoolId,
    pub owner: ConnectionId,
    fd: OwnedFd,
    map: Mmap,
}

impl ShmPool {
    /// Map a client fd
    pub fn new(owner: ConnectionId, fd: OwnedFd, size: i32) -> Result<Self, ShmError> {
        let map = map_fd(&fd, size)?;
        Ok(Self {
            id: ShmPoolId::new(),
            owner,
            fd,
            map,
        })
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Grow the pool, remapping the fd
    pub fn resize(&mut self, size: i32) -> Result<(), ShmError> {
        if size < 0 || (size as usize) < self.size() {
            return Err(ShmError::Shrink {
                current: self.size(),
                requested: size,
            });
        }
        if size as usize == self.size() {
            return Ok(());
        }
        self.map = map_fd(&self.fd, size)?;
        Ok(())
    }

    fn read(&self, buffer: &ShmBuffer) -> Result<ShmContents, ShmError> {
        let start = buffer.offset as usize;
        let end = start + buffer.data_size();
        let data = self
            .map
            .get(start..end)
            .ok_or(ShmError::OutOfBounds {
                end: end as i64,
                size: self.size(),
            })?
            .to_vec();
        Ok(ShmContents {
            width: buffer.width,
            height: buffer.height,
            stride: buffer.stride,
            format: buffer.format,
            data,
        })
    }
}

fn map_fd(fd: &OwnedFd, size: i32) -> Result<Mmap, ShmError> {
    if size <= 0 {
        return Err(ShmError::InvalidSize(size));
    }
    // SAFETY: the mapping is read-only and only ever copied from. A client
    // truncating its file under us can still fault the read.
    unsafe { MmapOptions::new().len(size as usize).map(fd) }.map_err(ShmError::Map)
}

struct PoolEntry {
    pool: ShmPool,
    /// wl_buffers created from the pool that are still alive
    buffers: usize,
    /// The client destroyed the wl_shm_pool
    destroyed: bool,
}

/// All shm pools, across connections
///
/// A pool stays mapped until both the wl_shm_pool and every wl_buffer
/// created from it are gone.
#[derive(Default)]
pub struct ShmRegistry {
    pools: HashMap<ShmPoolId, PoolEntry>,
}

impl ShmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_pool(
        &mut self,
        owner: ConnectionId,
        fd: OwnedFd,
        size: i32,
    ) -> Result<ShmPoolId, ShmError> {
        let pool = ShmPool::new(owner, fd, size)?;
        let id = pool.id;
        self.pools.insert(
            id,
            PoolEntry {
                pool,
                buffers: 0,
                destroyed: false,
            },
        );
        debug!("Created shm pool {:?}, size {}", id, size);
        Ok(id)
    }

    pub fn resize_pool(&mut self, id: ShmPoolId, size: i32) -> Result<(), ShmError> {
        let entry = self.pools.get_mut(&id).ok_or(ShmError::UnknownPool(id))?;
        entry.pool.resize(size)?;
        debug!("Resized shm pool {:?} to {}", id, size);
        Ok(())
    }

    pub fn destroy_pool(&mut self, id: ShmPoolId) {
        if let Some(entry) = self.pools.get_mut(&id) {
            entry.destroyed = true;
        }
        self.release_if_unused(id);
    }

    /// Validate and register a buffer
    pub fn create_buffer(
        &mut self,
        pool: ShmPoolId,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: u32,
    ) -> Result<ShmBuffer, ShmError> {
        let entry = self
            .pools
            .get_mut(&pool)
            .ok_or(ShmError::UnknownPool(pool))?;
        let format = ShmFormat::from_wayland(format).ok_or(ShmError::InvalidFormat(format))?;
        if width <= 0 || height <= 0 {
            return Err(ShmError::InvalidDimensions { width, height });
        }
        let min_stride = width as i64 * format.bytes_per_pixel() as i64;
        if (stride as i64) < min_stride {
            return Err(ShmError::InvalidStride { stride, width });
        }
        let end = offset as i64 + stride as i64 * height as i64;
        if offset < 0 || end > entry.pool.size() as i64 {
            return Err(ShmError::OutOfBounds {
                end,
                size: entry.pool.size(),
            });
        }

        entry.buffers += 1;
        let buffer = ShmBuffer {
            pool,
            offset: offset as u32,
            width: width as u32,
            height: height as u32,
            stride: stride as u32,
            format,
        };
        debug!(
            "Created shm buffer in {:?}, {}x{}, format {:?}",
            pool, width, height, format
        );
        Ok(buffer)
    }

    pub fn destroy_buffer(&mut self, buffer: &ShmBuffer) {
        if let Some(entry) = self.pools.get_mut(&buffer.pool) {
            entry.buffers = entry.buffers.saturating_sub(1);
        }
        self.release_if_unused(buffer.pool);
    }

    /// Copy a buffer's current pixels
    pub fn read_buffer(&self, buffer: &ShmBuffer) -> Result<ShmContents, ShmError> {
        let entry = self
            .pools
            .get(&buffer.pool)
            .ok_or(ShmError::UnknownPool(buffer.pool))?;
        entry.pool.read(buffer)
    }

    /// Unmap every pool a connection created, returning how many
    pub fn remove_connection(&mut self, owner: ConnectionId) -> usize {
        let before = self.pools.len();
        self.pools.retain(|_, entry| entry.pool.owner != owner);
        before - self.pools.len()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn release_if_unused(&mut self, id: ShmPoolId) {
        let unused = self
            .pools
            .get(&id)
            .is_some_and(|e| e.destroyed && e.buffers == 0);
        if unused {
            self.pools.remove(&id);
            debug!("Released shm pool {:?}", id);
        }
    }
}
