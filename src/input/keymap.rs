//! Host (macOS) input codes to Linux evdev codes

use crate::protocol::seat::{BTN_EXTRA, BTN_LEFT, BTN_MIDDLE, BTN_RIGHT, BTN_SIDE};

/// Translate a macOS virtual key code (`kVK_*`) to an evdev keycode
pub fn macos_keycode_to_evdev(keycode: u16) -> Option<u32> {
    Some(match keycode {
        0x00 => 30,  // A
        0x01 => 31,  // S
        0x02 => 32,  // D
        0x03 => 33,  // F
        0x04 => 35,  // H
        0x05 => 34,  // G
        0x06 => 44,  // Z
        0x07 => 45,  // X
        0x08 => 46,  // C
        0x09 => 47,  // V
        0x0A => 86,  // ISO section (102ND)
        0x0B => 48,  // B
        0x0C => 16,  // Q
        0x0D => 17,  // W
        0x0E => 18,  // E
        0x0F => 19,  // R
        0x10 => 21,  // Y
        0x11 => 20,  // T
        0x12 => 2,   // 1
        0x13 => 3,   // 2
        0x14 => 4,   // 3
        0x15 => 5,   // 4
        0x16 => 7,   // 6
        0x17 => 6,   // 5
        0x18 => 13,  // =
        0x19 => 10,  // 9
        0x1A => 8,   // 7
        0x1B => 12,  // -
        0x1C => 9,   // 8
        0x1D => 11,  // 0
        0x1E => 27,  // ]
        0x1F => 24,  // O
        0x20 => 22,  // U
        0x21 => 26,  // [
        0x22 => 23,  // I
        0x23 => 25,  // P
        0x24 => 28,  // Return
        0x25 => 38,  // L
        0x26 => 36,  // J
        0x27 => 40,  // '
        0x28 => 37,  // K
        0x29 => 39,  // ;
        0x2A => 43,  // \
        0x2B => 51,  // ,
        0x2C => 53,  // /
        0x2D => 49,  // N
        0x2E => 50,  // M
        0x2F => 52,  // .
        0x30 => 15,  // Tab
        0x31 => 57,  // Space
        0x32 => 41,  // `
        0x33 => 14,  // Backspace
        0x35 => 1,   // Escape
        0x36 => 126, // Right Command
        0x37 => 125, // Left Command
        0x38 => 42,  // Left Shift
        0x39 => 58,  // Caps Lock
        0x3A => 56,  // Left Option
        0x3B => 29,  // Left Control
        0x3C => 54,  // Right Shift
        0x3D => 100, // Right Option
        0x3E => 97,  // Right Control
        0x40 => 187, // F17
        0x41 => 83,  // Keypad .
        0x43 => 55,  // Keypad *
        0x45 => 78,  // Keypad +
        0x47 => 69,  // Keypad Clear (NumLock)
        0x48 => 115, // Volume Up
        0x49 => 114, // Volume Down
        0x4A => 113, // Mute
        0x4B => 98,  // Keypad /
        0x4C => 96,  // Keypad Enter
        0x4E => 74,  // Keypad -
        0x4F => 188, // F18
        0x50 => 189, // F19
        0x51 => 117, // Keypad =
        0x52 => 82,  // Keypad 0
        0x53 => 79,  // Keypad 1
        0x54 => 80,  // Keypad 2
        0x55 => 81,  // Keypad 3
        0x56 => 75,  // Keypad 4
        0x57 => 76,  // Keypad 5
        0x58 => 77,  // Keypad 6
        0x59 => 71,  // Keypad 7
        0x5A => 190, // F20
        0x5B => 72,  // Keypad 8
        0x5C => 73,  // Keypad 9
        0x60 => 63,  // F5
        0x61 => 64,  // F6
        0x62 => 65,  // F7
        0x63 => 61,  // F3
        0x64 => 66,  // F8
        0x65 => 67,  // F9
        0x67 => 87,  // F11
        0x69 => 183, // F13
        0x6A => 186, // F16
        0x6B => 184, // F14
        0x6D => 68,  // F10
        0x6F => 88,  // F12
        0x71 => 185, // F15
        0x72 => 110, // Help -> Insert
        0x73 => 102, // Home
        0x74 => 104, // Page Up
        0x75 => 111, // Forward Delete
        0x76 => 62,  // F4
        0x77 => 107, // End
        0x78 => 60,  // F2
        0x79 => 109, // Page Down
        0x7A => 59,  // F1
        0x7B => 105, // Left
        0x7C => 106, // Right
        0x7D => 108, // Down
        0x7E => 103, // Up
        _ => return None,
    })
}

/// Translate an `NSEvent.buttonNumber` to an evdev button code
pub fn macos_button_to_evdev(button: i64) -> u32 {
    match button {
        0 => BTN_LEFT,
        1 => BTN_RIGHT,
        2 => BTN_MIDDLE,
        3 => BTN_SIDE,
        4 => BTN_EXTRA,
        // Further buttons continue the evdev BTN_MOUSE range
        n if (5..16).contains(&n) => BTN_LEFT + n as u32,
        _ => BTN_LEFT,
    }
}

/// `NSEventModifierFlags` bits for the keys that only report through
/// flagsChanged events
pub const MODIFIER_KEYS: [(u16, u64); 9] = [
    (0x39, 1 << 16), // Caps Lock
    (0x38, 1 << 17), // Left Shift
    (0x3C, 1 << 17), // Right Shift
    (0x3B, 1 << 18), // Left Control
    (0x3E, 1 << 18), // Right Control
    (0x3A, 1 << 19), // Left Option
    (0x3D, 1 << 19), // Right Option
    (0x37, 1 << 20), // Left Command
    (0x36, 1 << 20), // Right Command
];

/// Whether a flagsChanged event for `keycode` is a press
///
/// Returns `None` for keys that are not modifiers.
pub fn modifier_pressed(keycode: u16, flags: u64) -> Option<bool> {
    MODIFIER_KEYS
        .iter()
        .find(|(code, _)| *code == keycode)
        .map(|(_, mask)| flags & mask != 0)
}
