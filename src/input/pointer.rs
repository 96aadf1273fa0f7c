//! Pointer (mouse/trackpad) state

use log::debug;

use crate::compositor::{ConnectionId, SurfaceId, WindowId};

/// Surface under the pointer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerFocus {
    pub surface: SurfaceId,
    pub owner: ConnectionId,
    pub window: WindowId,
    /// Global position of the surface's top-left corner
    pub origin: (i32, i32),
}

impl PointerFocus {
    /// Surface-local coordinates of a global point
    pub fn local(&self, (x, y): (f64, f64)) -> (f64, f64) {
        (x - self.origin.0 as f64, y - self.origin.1 as f64)
    }
}

/// Interactive move in progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveGrab {
    pub window: WindowId,
    /// Pointer position when the grab started
    pub start: (f64, f64),
    /// Window position when the grab started
    pub window_start: (i32, i32),
}

impl MoveGrab {
    /// Where the window goes for the current pointer position
    pub fn target(&self, (x, y): (f64, f64)) -> (i32, i32) {
        (
            self.window_start.0 + (x - self.start.0).round() as i32,
            self.window_start.1 + (y - self.start.1).round() as i32,
        )
    }
}

/// Pointer state for the seat
#[derive(Debug, Default)]
pub struct Pointer {
    /// Global logical position
    position: (f64, f64),
    focus: Option<PointerFocus>,
    pressed: Vec<u32>,
    grab: Option<MoveGrab>,
    /// Axes that received motion since the last stop, [vertical, horizontal]
    scrolling: [bool; 2],
}

impl Pointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    pub fn motion(&mut self, x: f64, y: f64) {
        self.position = (x, y);
    }

    pub fn focus(&self) -> Option<PointerFocus> {
        self.focus
    }

    /// Replace the focus, returning the previous one
    pub fn set_focus(&mut self, focus: Option<PointerFocus>) -> Option<PointerFocus> {
        std::mem::replace(&mut self.focus, focus)
    }

    /// Record a button change; false if it changed nothing
    pub fn button(&mut self, button: u32, pressed: bool) -> bool {
        if pressed {
            if self.pressed.contains(&button) {
                return false;
            }
            self.pressed.push(button);
        } else {
            let Some(idx) = self.pressed.iter().position(|&b| b == button) else {
                return false;
            };
            self.pressed.remove(idx);
        }
        debug!("Button {:#x} {}", button, if pressed { "pressed" } else { "released" });
        true
    }

    pub fn pressed_buttons(&self) -> &[u32] {
        &self.pressed
    }

    pub fn has_button_pressed(&self) -> bool {
        !self.pressed.is_empty()
    }

    pub fn start_move(&mut self, window: WindowId, window_start: (i32, i32)) {
        debug!("Move grab on {:?} from {:?}", window, window_start);
        self.grab = Some(MoveGrab {
            window,
            start: self.position,
            window_start,
        });
    }

    pub fn grab(&self) -> Option<MoveGrab> {
        self.grab
    }

    pub fn end_grab(&mut self) -> Option<MoveGrab> {
        self.grab.take()
    }

    /// Note scroll motion on an axis (0 vertical, 1 horizontal)
    pub fn scroll(&mut self, axis: usize) {
        self.scrolling[axis] = true;
    }

    /// Axes that need an axis_stop, clearing them
    pub fn stop_scrolling(&mut self) -> [bool; 2] {
        std::mem::take(&mut self.scrolling)
    }
}
