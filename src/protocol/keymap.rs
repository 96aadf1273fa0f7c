//! Keymap files for wl_keyboard.keymap
//!
//! Each keyboard gets its own anonymous shared-memory file holding the
//! NUL-terminated XKB text keymap, so one client cannot scribble over
//! another client's copy.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};

use rustix::fs::Mode;
use rustix::shm;

/// An unlinked shm file containing a keymap
#[derive(Debug)]
pub struct KeymapFile {
    fd: OwnedFd,
    size: u32,
}

impl KeymapFile {
    pub fn new(keymap: &str) -> io::Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        // macOS limits shm names to 31 bytes
        let name = format!(
            "/cw-km-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let fd = shm::open(
            name.as_str(),
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )?;
        shm::unlink(name.as_str())?;

        let mut contents = keymap.as_bytes().to_vec();
        contents.push(0);
        rustix::fs::ftruncate(&fd, contents.len() as u64)?;

        let mut file = File::from(fd);
        file.write_all(&contents)?;
        Ok(Self {
            fd: OwnedFd::from(file),
            size: contents.len() as u32,
        })
    }

    /// Size including the trailing NUL
    pub fn size(&self) -> u32 {
        self.size
    }
}

impl AsFd for KeymapFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
