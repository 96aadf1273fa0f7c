//! Input handling
//!
//! Host events are translated to evdev codes ([`keymap`]) and handed to the
//! [`InputBridge`], whose thread owns the [`Seat`] and with it all pointer
//! and keyboard focus.

pub mod bridge;
pub mod keyboard;
pub mod keymap;
pub mod pointer;
pub mod seat;

pub use bridge::{
    BridgeError, BridgeMessage, BridgeSender, GuestSink, HostInputEvent, InputBridge, SceneNotice,
};
pub use keyboard::{compile_keymap, Keyboard, KeyboardError, KeyboardFocus};
pub use pointer::{Pointer, PointerFocus};
pub use seat::Seat;
