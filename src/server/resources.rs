//! Seat resources shared with the input bridge
//!
//! The bridge thread delivers events by surface id. This registry maps
//! those ids back to live `wl_surface` objects and finds the client's
//! `wl_pointer` and `wl_keyboard` objects to send on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use calloop::ping::Ping;
use log::trace;
use wayland_server::protocol::{wl_keyboard, wl_pointer, wl_surface::WlSurface};
use wayland_server::Resource;

use crate::compositor::SurfaceId;
use crate::input::GuestSink;
use crate::protocol::seat::{
    AxisSource, AxisType, ButtonState, KeyState, KeyboardEvent, ModifierState, PointerEvent,
};

pub type SharedSeatResources = Arc<Mutex<SeatResources>>;

pub fn lock_seat(seat: &Mutex<SeatResources>) -> MutexGuard<'_, SeatResources> {
    seat.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wayland objects input is delivered through
#[derive(Debug, Default)]
pub struct SeatResources {
    surfaces: HashMap<SurfaceId, WlSurface>,
    pointers: Vec<wl_pointer::WlPointer>,
    keyboards: Vec<wl_keyboard::WlKeyboard>,
    /// Mirror of the bridge's keyboard focus, for keyboards bound later
    keyboard_focus: Option<SurfaceId>,
    modifiers: ModifierState,
}

impl SeatResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedSeatResources {
        Arc::new(Mutex::new(self))
    }

    pub fn add_surface(&mut self, id: SurfaceId, surface: WlSurface) {
        self.surfaces.insert(id, surface);
    }

    pub fn remove_surface(&mut self, id: SurfaceId) {
        self.surfaces.remove(&id);
        if self.keyboard_focus == Some(id) {
            self.keyboard_focus = None;
        }
    }

    pub fn add_pointer(&mut self, pointer: wl_pointer::WlPointer) {
        self.pointers.push(pointer);
    }

    pub fn add_keyboard(&mut self, keyboard: wl_keyboard::WlKeyboard) {
        self.keyboards.push(keyboard);
    }

    pub fn remove_pointer(&mut self, pointer: &wl_pointer::WlPointer) {
        self.pointers.retain(|p| p != pointer);
    }

    pub fn remove_keyboard(&mut self, keyboard: &wl_keyboard::WlKeyboard) {
        self.keyboards.retain(|k| k != keyboard);
    }

    /// Drop everything belonging to dead clients
    pub fn prune(&mut self) {
        self.surfaces.retain(|_, s| s.is_alive());
        self.pointers.retain(|p| p.is_alive());
        self.keyboards.retain(|k| k.is_alive());
    }

    /// Focused surface, if `keyboard` belongs to the same client
    pub fn focus_for(&self, keyboard: &wl_keyboard::WlKeyboard) -> Option<(WlSurface, ModifierState)> {
        let surface = self.surfaces.get(&self.keyboard_focus?)?;
        surface
            .id()
            .same_client_as(&keyboard.id())
            .then(|| (surface.clone(), self.modifiers))
    }

    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }

    pub fn keyboard_count(&self) -> usize {
        self.keyboards.len()
    }

    fn live_surface(&self, id: SurfaceId) -> Option<WlSurface> {
        self.surfaces.get(&id).filter(|s| s.is_alive()).cloned()
    }

    fn send_pointer(&self, surface: &WlSurface, event: &PointerEvent) {
        for pointer in self
            .pointers
            .iter()
            .filter(|p| p.is_alive() && p.id().same_client_as(&surface.id()))
        {
            send_pointer_event(pointer, surface, event);
        }
    }

    fn send_keyboard(&mut self, target: SurfaceId, surface: &WlSurface, event: &KeyboardEvent) {
        match event {
            KeyboardEvent::Enter { .. } => self.keyboard_focus = Some(target),
            KeyboardEvent::Leave { .. } if self.keyboard_focus == Some(target) => {
                self.keyboard_focus = None;
            }
            KeyboardEvent::Modifiers { state, .. } => self.modifiers = *state,
            _ => {}
        }
        for keyboard in self
            .keyboards
            .iter()
            .filter(|k| k.is_alive() && k.id().same_client_as(&surface.id()))
        {
            send_keyboard_event(keyboard, surface, event);
        }
    }
}

fn send_pointer_event(pointer: &wl_pointer::WlPointer, surface: &WlSurface, event: &PointerEvent) {
    let v5 = pointer.version() >= 5;
    match *event {
        PointerEvent::Enter { serial, x, y, .. } => pointer.enter(serial, surface, x, y),
        PointerEvent::Leave { serial, .. } => pointer.leave(serial, surface),
        PointerEvent::Motion { time, x, y } => pointer.motion(time, x, y),
        PointerEvent::Button {
            serial,
            time,
            button,
            state,
        } => {
            let state = match state {
                ButtonState::Pressed => wl_pointer::ButtonState::Pressed,
                ButtonState::Released => wl_pointer::ButtonState::Released,
            };
            pointer.button(serial, time, button, state);
        }
        PointerEvent::Axis { time, axis, value } => pointer.axis(time, wl_axis(axis), value),
        PointerEvent::AxisSource(source) if v5 => {
            let source = match source {
                AxisSource::Wheel => wl_pointer::AxisSource::Wheel,
                AxisSource::Finger => wl_pointer::AxisSource::Finger,
                AxisSource::Continuous => wl_pointer::AxisSource::Continuous,
            };
            pointer.axis_source(source);
        }
        PointerEvent::AxisStop { time, axis } if v5 => pointer.axis_stop(time, wl_axis(axis)),
        PointerEvent::Frame if v5 => pointer.frame(),
        _ => {}
    }
}

fn wl_axis(axis: AxisType) -> wl_pointer::Axis {
    match axis {
        AxisType::VerticalScroll => wl_pointer::Axis::VerticalScroll,
        AxisType::HorizontalScroll => wl_pointer::Axis::HorizontalScroll,
    }
}

fn send_keyboard_event(
    keyboard: &wl_keyboard::WlKeyboard,
    surface: &WlSurface,
    event: &KeyboardEvent,
) {
    match event {
        KeyboardEvent::Enter {
            serial,
            pressed_keys,
            ..
        } => {
            let keys = pressed_keys.iter().flat_map(|k| k.to_ne_bytes()).collect();
            keyboard.enter(*serial, surface, keys);
        }
        KeyboardEvent::Leave { serial, .. } => keyboard.leave(*serial, surface),
        KeyboardEvent::Key {
            serial,
            time,
            key,
            state,
        } => {
            let state = match state {
                KeyState::Pressed => wl_keyboard::KeyState::Pressed,
                KeyState::Released => wl_keyboard::KeyState::Released,
            };
            keyboard.key(*serial, *time, *key, state);
        }
        KeyboardEvent::Modifiers { serial, state } => keyboard.modifiers(
            *serial,
            state.depressed,
            state.latched,
            state.locked,
            state.group,
        ),
    }
}

/// Delivers bridge events to Wayland clients
///
/// Sending only queues events on the client connections; `flush` wakes the
/// event loop, which writes them out and sends any configures the focus
/// changes produced.
pub struct WaylandSink {
    seat: SharedSeatResources,
    wake: Ping,
}

impl WaylandSink {
    pub fn new(seat: SharedSeatResources, wake: Ping) -> Self {
        Self { seat, wake }
    }
}

impl GuestSink for WaylandSink {
    fn pointer(&mut self, target: SurfaceId, event: PointerEvent) -> bool {
        let seat = lock_seat(&self.seat);
        let Some(surface) = seat.live_surface(target) else {
            return false;
        };
        trace!("Pointer event for {:?}: {:?}", target, event);
        seat.send_pointer(&surface, &event);
        true
    }

    fn keyboard(&mut self, target: SurfaceId, event: KeyboardEvent) -> bool {
        let mut seat = lock_seat(&self.seat);
        let Some(surface) = seat.live_surface(target) else {
            return false;
        };
        trace!("Keyboard event for {:?}: {:?}", target, event);
        seat.send_keyboard(target, &surface, &event);
        true
    }

    fn flush(&mut self) {
        self.wake.ping();
    }
}
