//! Keyboard state and XKB integration
//!
//! The keymap is compiled once on the main thread from RMLVO names and
//! handed around as text: clients receive it through `wl_keyboard.keymap`
//! and the input bridge recompiles it into its own `xkb::State`, since XKB
//! objects cannot cross threads.

use log::{debug, info};
use xkbcommon::xkb;

use crate::compositor::{ConnectionId, SurfaceId, WindowId};
use crate::protocol::seat::ModifierState;

/// wl_keyboard.repeat_info rate (keys per second)
pub const REPEAT_RATE: i32 = 25;
/// wl_keyboard.repeat_info delay (ms)
pub const REPEAT_DELAY: i32 = 600;

/// evdev codes are offset by 8 in XKB
const EVDEV_OFFSET: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum KeyboardError {
    #[error("cannot compile XKB keymap for layout {0:?}")]
    Layout(String),
    #[error("cannot parse XKB keymap")]
    Keymap,
}

/// Compile the keymap for an XKB layout name and return it as text
pub fn compile_keymap(layout: &str) -> Result<String, KeyboardError> {
    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
    let keymap = xkb::Keymap::new_from_names(
        &context,
        "",
        "",
        layout,
        "",
        None,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )
    .ok_or_else(|| KeyboardError::Layout(layout.to_string()))?;
    info!("Compiled XKB keymap for layout {:?}", layout);
    Ok(keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1))
}

/// Surface holding keyboard focus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardFocus {
    pub surface: SurfaceId,
    pub owner: ConnectionId,
    pub window: WindowId,
}

/// What a key event changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    /// False for a repeated press or a release of a key that was not down
    pub forward: bool,
    /// New modifier state, if it changed
    pub modifiers: Option<ModifierState>,
}

/// Keyboard state for the seat
pub struct Keyboard {
    keymap: xkb::Keymap,
    state: xkb::State,
    focus: Option<KeyboardFocus>,
    pressed: Vec<u32>,
    modifiers: ModifierState,
}

impl Keyboard {
    /// Build keyboard state from keymap text
    pub fn from_keymap(text: &str) -> Result<Self, KeyboardError> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_string(
            &context,
            text.to_string(),
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or(KeyboardError::Keymap)?;
        let state = xkb::State::new(&keymap);
        Ok(Self {
            keymap,
            state,
            focus: None,
            pressed: Vec::new(),
            modifiers: ModifierState::default(),
        })
    }

    pub fn focus(&self) -> Option<KeyboardFocus> {
        self.focus
    }

    /// Replace the focus, returning the previous one
    pub fn set_focus(&mut self, focus: Option<KeyboardFocus>) -> Option<KeyboardFocus> {
        std::mem::replace(&mut self.focus, focus)
    }

    /// Keys currently held, as evdev codes
    pub fn pressed_keys(&self) -> &[u32] {
        &self.pressed
    }

    pub fn modifiers(&self) -> ModifierState {
        self.modifiers
    }

    /// Feed a key press or release (evdev code)
    pub fn key(&mut self, key: u32, pressed: bool) -> KeyUpdate {
        let forward = if pressed {
            if self.pressed.contains(&key) {
                false
            } else {
                self.pressed.push(key);
                true
            }
        } else if let Some(idx) = self.pressed.iter().position(|&k| k == key) {
            self.pressed.remove(idx);
            true
        } else {
            false
        };

        if !forward {
            return KeyUpdate {
                forward,
                modifiers: None,
            };
        }

        let direction = if pressed {
            xkb::KeyDirection::Down
        } else {
            xkb::KeyDirection::Up
        };
        self.state
            .update_key(xkb::Keycode::from(key + EVDEV_OFFSET), direction);
        KeyUpdate {
            forward,
            modifiers: self.refresh_modifiers(),
        }
    }

    /// Forget every held key, e.g. when the host window loses focus
    ///
    /// Locked modifiers (Caps Lock) survive.
    pub fn release_all(&mut self) -> Option<ModifierState> {
        if self.pressed.is_empty() {
            return None;
        }
        debug!("Releasing {} held keys", self.pressed.len());
        self.pressed.clear();
        let locked = self.modifiers.locked;
        self.state = xkb::State::new(&self.keymap);
        self.state.update_mask(0, 0, locked, 0, 0, self.modifiers.group);
        self.refresh_modifiers()
    }

    fn refresh_modifiers(&mut self) -> Option<ModifierState> {
        let current = ModifierState {
            depressed: self.state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
            latched: self.state.serialize_mods(xkb::STATE_MODS_LATCHED),
            locked: self.state.serialize_mods(xkb::STATE_MODS_LOCKED),
            group: self.state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
        };
        if current == self.modifiers {
            None
        } else {
            self.modifiers = current;
            Some(current)
        }
    }
}

impl std::fmt::Debug for Keyboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyboard")
            .field("focus", &self.focus)
            .field("pressed", &self.pressed)
            .field("modifiers", &self.modifiers)
            .finish()
    }
}

/// Self-contained keymap that compiles without system XKB data
#[cfg(test)]
pub(crate) const TEST_KEYMAP: &str = r#"xkb_keymap {
    xkb_keycodes "test" {
        minimum = 8;
        maximum = 255;
        <AC01> = 38;
        <LFSH> = 50;
        <CAPS> = 66;
    };
    xkb_types "test" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
        type "TWO_LEVEL" {
            modifiers = Shift;
            map[Shift] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Shift";
        };
        type "ALPHABETIC" {
            modifiers = Shift+Lock;
            map[Shift] = Level2;
            map[Lock] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Caps";
        };
    };
    xkb_compat "test" {
        interpret Shift_L {
            action = SetMods(modifiers=Shift);
        };
        interpret Caps_Lock {
            action = LockMods(modifiers=Lock);
        };
    };
    xkb_symbols "test" {
        key <AC01> { [ a, A ] };
        key <LFSH> { [ Shift_L ] };
        key <CAPS> { [ Caps_Lock ] };
        modifier_map Shift { <LFSH> };
        modifier_map Lock { <CAPS> };
    };
};
"#;

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: u32 = 30;
    const KEY_LEFTSHIFT: u32 = 42;
    const KEY_CAPSLOCK: u32 = 58;

    fn keyboard() -> Keyboard {
        Keyboard::from_keymap(TEST_KEYMAP).unwrap()
    }

    #[test]
    fn test_press_release() {
        let mut kb = keyboard();
        assert!(kb.key(KEY_A, true).forward);
        assert_eq!(kb.pressed_keys(), &[KEY_A]);
        // Host autorepeat is not forwarded; clients repeat themselves
        assert!(!kb.key(KEY_A, true).forward);
        assert!(kb.key(KEY_A, false).forward);
        assert!(!kb.key(KEY_A, false).forward);
        assert!(kb.pressed_keys().is_empty());
    }

    #[test]
    fn test_shift_sets_depressed() {
        let mut kb = keyboard();
        let update = kb.key(KEY_LEFTSHIFT, true);
        assert_eq!(update.modifiers.map(|m| m.depressed), Some(1));
        // Plain keys leave modifiers alone
        assert_eq!(kb.key(KEY_A, true).modifiers, None);
        let update = kb.key(KEY_LEFTSHIFT, false);
        assert_eq!(update.modifiers.map(|m| m.depressed), Some(0));
    }

    #[test]
    fn test_caps_lock_locks() {
        let mut kb = keyboard();
        kb.key(KEY_CAPSLOCK, true);
        kb.key(KEY_CAPSLOCK, false);
        assert_eq!(kb.modifiers().locked, 2);
    }

    #[test]
    fn test_release_all_keeps_locks() {
        let mut kb = keyboard();
        kb.key(KEY_CAPSLOCK, true);
        kb.key(KEY_CAPSLOCK, false);
        kb.key(KEY_LEFTSHIFT, true);
        kb.key(KEY_A, true);

        let mods = kb.release_all().unwrap();
        assert!(kb.pressed_keys().is_empty());
        assert_eq!(mods.depressed, 0);
        assert_eq!(mods.locked, 2);
        assert_eq!(kb.release_all(), None);
    }

    #[test]
    fn test_focus_replace() {
        let mut kb = keyboard();
        let focus = KeyboardFocus {
            surface: SurfaceId(1),
            owner: ConnectionId(1),
            window: WindowId(1),
        };
        assert_eq!(kb.set_focus(Some(focus)), None);
        assert_eq!(kb.set_focus(None), Some(focus));
    }

    #[test]
    fn test_bad_keymap_rejected() {
        assert!(matches!(
            Keyboard::from_keymap("not a keymap"),
            Err(KeyboardError::Keymap)
        ));
    }
}
