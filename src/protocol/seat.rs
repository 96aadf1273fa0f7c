//! wl_seat event model
//!
//! Guest-side input events as the input bridge produces them. The server
//! turns each one into a wl_pointer or wl_keyboard event on the target
//! client's resources.

use crate::compositor::SurfaceId;

/// Name advertised through wl_seat.name
pub const SEAT_NAME: &str = "seat0";

/// Linux evdev button codes
pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;
pub const BTN_MIDDLE: u32 = 0x112;
pub const BTN_SIDE: u32 = 0x113;
pub const BTN_EXTRA: u32 = 0x114;

/// Seat capabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatCapabilities {
    pub pointer: bool,
    pub keyboard: bool,
    pub touch: bool,
}

impl SeatCapabilities {
    /// Convert to Wayland capability bitmask
    pub fn to_wayland(&self) -> u32 {
        let mut caps = 0u32;
        if self.pointer {
            caps |= 1; // WL_SEAT_CAPABILITY_POINTER
        }
        if self.keyboard {
            caps |= 2; // WL_SEAT_CAPABILITY_KEYBOARD
        }
        if self.touch {
            caps |= 4; // WL_SEAT_CAPABILITY_TOUCH
        }
        caps
    }
}

/// Keyboard modifier state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

/// Key state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Released = 0,
    Pressed = 1,
}

/// Button state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Released = 0,
    Pressed = 1,
}

/// Axis type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisType {
    VerticalScroll = 0,
    HorizontalScroll = 1,
}

/// Where scroll events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSource {
    Wheel = 0,
    Finger = 1,
    Continuous = 2,
}

/// Keyboard events to send to clients
#[derive(Debug, Clone, PartialEq)]
pub enum KeyboardEvent {
    /// Keyboard focus entered a surface
    Enter {
        surface: SurfaceId,
        serial: u32,
        pressed_keys: Vec<u32>,
    },
    /// Keyboard focus left a surface
    Leave { surface: SurfaceId, serial: u32 },
    /// Key press or release
    Key {
        serial: u32,
        time: u32,
        key: u32,
        state: KeyState,
    },
    /// Modifier state changed
    Modifiers { serial: u32, state: ModifierState },
}

/// Pointer events to send to clients
#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    /// Pointer entered a surface
    Enter {
        surface: SurfaceId,
        serial: u32,
        x: f64,
        y: f64,
    },
    /// Pointer left a surface
    Leave { surface: SurfaceId, serial: u32 },
    /// Pointer motion in surface-local coordinates
    Motion { time: u32, x: f64, y: f64 },
    /// Button press or release
    Button {
        serial: u32,
        time: u32,
        button: u32,
        state: ButtonState,
    },
    /// Axis (scroll) event
    Axis {
        time: u32,
        axis: AxisType,
        value: f64,
    },
    AxisSource(AxisSource),
    /// End of a scroll gesture on one axis
    AxisStop { time: u32, axis: AxisType },
    /// Frame delimiter
    Frame,
}
