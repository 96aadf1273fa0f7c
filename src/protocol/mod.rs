//! Protocol-level state that does not depend on a live connection
//!
//! - wl_shm pools and buffer validation
//! - wl_region contents
//! - xdg_shell positioners, configure tracking and ping bookkeeping
//! - wl_seat and wl_output event data
//! - wl_keyboard keymap files

pub mod keymap;
pub mod output;
pub mod region;
pub mod seat;
pub mod shell;
pub mod shm;

pub use keymap::KeymapFile;
pub use output::OutputInfo;
pub use region::Region;
pub use seat::{KeyboardEvent, PointerEvent};
pub use shell::{XdgPositioner, XdgShellError};
pub use shm::{ShmContents, ShmError, ShmFormat, ShmRegistry};
