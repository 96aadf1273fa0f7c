//! Focus tracking and event routing for the seat
//!
//! Runs on the bridge thread. Focus only changes here, and every event is
//! addressed to the focus current at the moment it is sent, so nothing can
//! reach a surface after focus has moved away from it.
//!
//! The scene lock is taken for hit testing and window management and is
//! always released before the sink is called.

use log::{debug, trace};

use crate::compositor::{
    lock_scene, ConnectionId, HitTarget, SharedScene, SurfaceId, WindowId,
};
use crate::protocol::seat::{
    AxisSource, AxisType, ButtonState, KeyState, KeyboardEvent, PointerEvent, BTN_LEFT,
};

use super::bridge::{GuestSink, HostInputEvent, SceneNotice};
use super::keyboard::{Keyboard, KeyboardFocus};
use super::pointer::{Pointer, PointerFocus};

pub struct Seat<S> {
    scene: SharedScene,
    sink: S,
    keyboard: Keyboard,
    pointer: Pointer,
    /// Keyboard focus parked while the host window is inactive
    suspended: Option<KeyboardFocus>,
}

impl<S: GuestSink> Seat<S> {
    pub fn new(scene: SharedScene, sink: S, keyboard: Keyboard) -> Self {
        Self {
            scene,
            sink,
            keyboard,
            pointer: Pointer::new(),
            suspended: None,
        }
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn flush(&mut self) {
        self.sink.flush();
    }

    pub fn host_event(&mut self, event: HostInputEvent) {
        trace!("Host input: {:?}", event);
        match event {
            HostInputEvent::PointerMotion { x, y, time } => self.pointer_motion(x, y, time),
            HostInputEvent::PointerButton {
                button,
                pressed,
                time,
            } => self.pointer_button(button, pressed, time),
            HostInputEvent::Scroll {
                horizontal,
                vertical,
                source,
                time,
            } => self.scroll(horizontal, vertical, source, time),
            HostInputEvent::ScrollEnd { time } => self.scroll_end(time),
            HostInputEvent::PointerLeft => {
                if !self.pointer.has_button_pressed() {
                    self.set_pointer_focus(None, 0);
                }
            }
            HostInputEvent::Key { key, pressed, time } => self.key(key, pressed, time),
            HostInputEvent::FocusLost => self.host_focus_lost(),
            HostInputEvent::FocusGained => {
                if let Some(focus) = self.suspended.take() {
                    self.set_keyboard_focus(Some(focus));
                }
            }
        }
    }

    pub fn scene_notice(&mut self, notice: SceneNotice) {
        debug!("Scene notice: {:?}", notice);
        match notice {
            SceneNotice::SurfaceDestroyed(surface) => {
                self.forget(|s, _| s == surface);
            }
            SceneNotice::ConnectionClosed(conn) => {
                self.forget(|_, owner| owner == conn);
            }
            SceneNotice::WindowMapped(window) => {
                let target = {
                    let mut scene = lock_scene(&self.scene);
                    let Some(w) = scene.windows.get(window).filter(|w| w.is_toplevel()) else {
                        return;
                    };
                    let target = KeyboardFocus {
                        surface: w.surface_id,
                        owner: w.owner,
                        window,
                    };
                    scene.focus(Some(window));
                    target
                };
                self.set_keyboard_focus(Some(target));
            }
            SceneNotice::WindowUnmapped(window) => self.window_unmapped(window),
            SceneNotice::MoveRequested(surface) => self.start_move(surface),
        }
    }

    /// Take focus away from a window that is no longer shown
    ///
    /// Its surface still exists, so leave events are sent.
    fn window_unmapped(&mut self, window: WindowId) {
        if self.pointer.grab().is_some_and(|g| g.window == window) {
            self.pointer.end_grab();
        }
        if self.pointer.focus().is_some_and(|p| p.window == window) {
            self.set_pointer_focus(None, 0);
        }
        if self.keyboard.focus().is_some_and(|k| k.window == window) {
            self.set_keyboard_focus(None);
        }
        if self.suspended.is_some_and(|k| k.window == window) {
            self.suspended = None;
        }
    }

    // ---------------------------------------------------------------------
    // Pointer
    // ---------------------------------------------------------------------

    fn pointer_motion(&mut self, x: f64, y: f64, time: u32) {
        self.pointer.motion(x, y);

        if let Some(grab) = self.pointer.grab() {
            let moved = lock_scene(&self.scene).move_window(grab.window, grab.target((x, y)));
            if moved.is_err() {
                self.pointer.end_grab();
            }
            return;
        }

        let target = if self.pointer.has_button_pressed() {
            // Implicit grab: the pressed surface keeps the pointer
            self.current_pointer_focus()
        } else {
            self.focus_at(x, y)
        };
        self.set_pointer_focus(target, time);
    }

    fn pointer_button(&mut self, button: u32, pressed: bool, time: u32) {
        if !self.pointer.button(button, pressed) {
            return;
        }

        if self.pointer.grab().is_some() {
            if !self.pointer.has_button_pressed() {
                debug!("Move grab ended");
                self.pointer.end_grab();
                self.refocus_pointer(time);
            }
            return;
        }

        if pressed && button == BTN_LEFT {
            if let Some(focus) = self.pointer.focus() {
                self.click_to_focus(focus);
            }
        }

        if let Some(focus) = self.pointer.focus() {
            let serial = self.serial();
            let state = if pressed {
                ButtonState::Pressed
            } else {
                ButtonState::Released
            };
            self.send_pointer(
                focus.surface,
                PointerEvent::Button {
                    serial,
                    time,
                    button,
                    state,
                },
            );
            self.send_pointer(focus.surface, PointerEvent::Frame);
        }

        if !pressed && !self.pointer.has_button_pressed() {
            self.refocus_pointer(time);
        }
    }

    fn scroll(&mut self, horizontal: f64, vertical: f64, source: AxisSource, time: u32) {
        let Some(focus) = self.pointer.focus() else {
            return;
        };
        self.send_pointer(focus.surface, PointerEvent::AxisSource(source));
        if vertical != 0.0 {
            self.pointer.scroll(0);
            self.send_pointer(
                focus.surface,
                PointerEvent::Axis {
                    time,
                    axis: AxisType::VerticalScroll,
                    value: vertical,
                },
            );
        }
        if horizontal != 0.0 {
            self.pointer.scroll(1);
            self.send_pointer(
                focus.surface,
                PointerEvent::Axis {
                    time,
                    axis: AxisType::HorizontalScroll,
                    value: horizontal,
                },
            );
        }
        self.send_pointer(focus.surface, PointerEvent::Frame);
    }

    fn scroll_end(&mut self, time: u32) {
        let stopped = self.pointer.stop_scrolling();
        let Some(focus) = self.pointer.focus() else {
            return;
        };
        let axes = [AxisType::VerticalScroll, AxisType::HorizontalScroll];
        let mut sent = false;
        for (axis, _) in axes.into_iter().zip(stopped).filter(|(_, s)| *s) {
            self.send_pointer(focus.surface, PointerEvent::AxisStop { time, axis });
            sent = true;
        }
        if sent {
            self.send_pointer(focus.surface, PointerEvent::Frame);
        }
    }

    fn start_move(&mut self, surface: SurfaceId) {
        if !self.pointer.pressed_buttons().contains(&BTN_LEFT) {
            debug!("Ignoring move request for {:?} without a held button", surface);
            return;
        }
        let target = {
            let scene = lock_scene(&self.scene);
            scene
                .windows
                .window_for_surface(surface)
                .and_then(|w| scene.toplevel_of(w))
                .and_then(|w| Some((w, scene.windows.get(w)?.position)))
        };
        if let Some((window, position)) = target {
            // The client sees the pointer leave for the duration of the move
            self.set_pointer_focus(None, 0);
            self.pointer.start_move(window, position);
        }
    }

    /// The current focus with its origin refreshed, if it still exists
    fn current_pointer_focus(&self) -> Option<PointerFocus> {
        let focus = self.pointer.focus()?;
        let origin = lock_scene(&self.scene)
            .windows
            .surface_origin(focus.window)?;
        Some(PointerFocus { origin, ..focus })
    }

    fn focus_at(&self, x: f64, y: f64) -> Option<PointerFocus> {
        let scene = lock_scene(&self.scene);
        let HitTarget {
            surface,
            owner,
            window,
            ..
        } = scene.hit_test(x, y)?;
        let origin = scene.windows.surface_origin(window)?;
        Some(PointerFocus {
            surface,
            owner,
            window,
            origin,
        })
    }

    fn refocus_pointer(&mut self, time: u32) {
        let (x, y) = self.pointer.position();
        let target = self.focus_at(x, y);
        if target.map(|t| t.surface) != self.pointer.focus().map(|f| f.surface) {
            self.set_pointer_focus(target, time);
        }
    }

    fn set_pointer_focus(&mut self, target: Option<PointerFocus>, time: u32) {
        let position = self.pointer.position();
        let old = self.pointer.set_focus(target);

        match (old, target) {
            (Some(old), Some(new)) if old.surface == new.surface => {
                let (x, y) = new.local(position);
                self.send_pointer(new.surface, PointerEvent::Motion { time, x, y });
                self.send_pointer(new.surface, PointerEvent::Frame);
            }
            _ => {
                if let Some(old) = old {
                    let serial = self.serial();
                    self.send_pointer(
                        old.surface,
                        PointerEvent::Leave {
                            surface: old.surface,
                            serial,
                        },
                    );
                    self.send_pointer(old.surface, PointerEvent::Frame);
                }
                if let Some(new) = target {
                    let serial = self.serial();
                    let (x, y) = new.local(position);
                    self.send_pointer(
                        new.surface,
                        PointerEvent::Enter {
                            surface: new.surface,
                            serial,
                            x,
                            y,
                        },
                    );
                    self.send_pointer(new.surface, PointerEvent::Frame);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Keyboard
    // ---------------------------------------------------------------------

    fn click_to_focus(&mut self, focus: PointerFocus) {
        {
            let mut scene = lock_scene(&self.scene);
            let Some(toplevel) = scene.toplevel_of(focus.window) else {
                return;
            };
            if scene.raise(toplevel).is_ok() {
                scene.focus(Some(toplevel));
            }
        }
        self.set_keyboard_focus(Some(KeyboardFocus {
            surface: focus.surface,
            owner: focus.owner,
            window: focus.window,
        }));
    }

    fn key(&mut self, key: u32, pressed: bool, time: u32) {
        let update = self.keyboard.key(key, pressed);
        if !update.forward {
            return;
        }
        let Some(focus) = self.keyboard.focus() else {
            return;
        };
        let serial = self.serial();
        let state = if pressed {
            KeyState::Pressed
        } else {
            KeyState::Released
        };
        self.send_keyboard(
            focus.surface,
            KeyboardEvent::Key {
                serial,
                time,
                key,
                state,
            },
        );
        if let Some(modifiers) = update.modifiers {
            let serial = self.serial();
            self.send_keyboard(
                focus.surface,
                KeyboardEvent::Modifiers {
                    serial,
                    state: modifiers,
                },
            );
        }
    }

    fn set_keyboard_focus(&mut self, target: Option<KeyboardFocus>) {
        if self.keyboard.focus() == target {
            return;
        }
        let old = self.keyboard.set_focus(target);
        if let Some(old) = old {
            let serial = self.serial();
            self.send_keyboard(
                old.surface,
                KeyboardEvent::Leave {
                    surface: old.surface,
                    serial,
                },
            );
        }
        if let Some(new) = target {
            let serial = self.serial();
            self.send_keyboard(
                new.surface,
                KeyboardEvent::Enter {
                    surface: new.surface,
                    serial,
                    pressed_keys: self.keyboard.pressed_keys().to_vec(),
                },
            );
            self.send_keyboard(
                new.surface,
                KeyboardEvent::Modifiers {
                    serial,
                    state: self.keyboard.modifiers(),
                },
            );
        }
    }

    fn host_focus_lost(&mut self) {
        let modifiers = self.keyboard.release_all();
        let Some(focus) = self.keyboard.focus() else {
            return;
        };
        if let Some(state) = modifiers {
            let serial = self.serial();
            self.send_keyboard(focus.surface, KeyboardEvent::Modifiers { serial, state });
        }
        self.set_keyboard_focus(None);
        self.suspended = Some(focus);
    }

    /// Drop every focus matching `gone` without sending leave events; the
    /// resources behind it are already dead
    fn forget(&mut self, gone: impl Fn(SurfaceId, ConnectionId) -> bool) {
        if let Some(focus) = self.pointer.focus() {
            if gone(focus.surface, focus.owner) {
                self.pointer.set_focus(None);
            }
        }
        if let Some(focus) = self.keyboard.focus() {
            if gone(focus.surface, focus.owner) {
                self.keyboard.set_focus(None);
            }
        }
        if let Some(focus) = self.suspended {
            if gone(focus.surface, focus.owner) {
                self.suspended = None;
            }
        }
        if let Some(grab) = self.pointer.grab() {
            if lock_scene(&self.scene).windows.get(grab.window).is_none() {
                self.pointer.end_grab();
            }
        }
    }

    // ---------------------------------------------------------------------
    // Delivery
    // ---------------------------------------------------------------------

    fn serial(&self) -> u32 {
        lock_scene(&self.scene).next_serial()
    }

    fn send_pointer(&mut self, target: SurfaceId, event: PointerEvent) {
        if !self.sink.pointer(target, event) {
            trace!("Pointer event for vanished {:?} dropped", target);
        }
    }

    fn send_keyboard(&mut self, target: SurfaceId, event: KeyboardEvent) {
        if !self.sink.keyboard(target, event) {
            trace!("Keyboard event for vanished {:?} dropped", target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{CompositorState, OutputMode, SceneConfig, WindowId};
    use crate::input::keyboard::TEST_KEYMAP;
    use crate::protocol::{ShmContents, ShmFormat};

    #[derive(Debug, Clone, PartialEq)]
    enum Delivered {
        Pointer(PointerEvent),
        Keyboard(KeyboardEvent),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<(SurfaceId, Delivered)>,
    }

    impl RecordingSink {
        fn take(&mut self) -> Vec<(SurfaceId, Delivered)> {
            std::mem::take(&mut self.events)
        }
    }

    impl GuestSink for RecordingSink {
        fn pointer(&mut self, target: SurfaceId, event: PointerEvent) -> bool {
            self.events.push((target, Delivered::Pointer(event)));
            true
        }

        fn keyboard(&mut self, target: SurfaceId, event: KeyboardEvent) -> bool {
            self.events.push((target, Delivered::Keyboard(event)));
            true
        }

        fn flush(&mut self) {}
    }

    struct Fixture {
        seat: Seat<RecordingSink>,
        scene: SharedScene,
        a: (SurfaceId, WindowId, ConnectionId),
        b: (SurfaceId, WindowId, ConnectionId),
    }

    fn map_window(scene: &mut CompositorState) -> (SurfaceId, WindowId, ConnectionId) {
        let conn = scene.open_connection();
        let surface = scene.create_surface(conn).unwrap();
        let window = scene.create_toplevel(surface).unwrap();
        scene.initial_configure(window).unwrap();
        let buffer = scene.import_buffer(
            conn,
            &ShmContents {
                width: 100,
                height: 80,
                stride: 400,
                format: ShmFormat::Xrgb8888,
                data: vec![0; 100 * 80 * 4],
            },
        );
        scene.attach(surface, Some(buffer)).unwrap();
        scene.commit(surface).unwrap();
        (surface, window, conn)
    }

    /// Window A at (0,0), window B above it at (50,50), both 100x80
    fn fixture() -> Fixture {
        let mut scene = CompositorState::new(SceneConfig::default());
        scene.add_output("HOST-1".into(), OutputMode::new(800, 600, 60000), 1.0);
        let a = map_window(&mut scene);
        let b = map_window(&mut scene);
        let scene = scene.into_shared();
        let keyboard = Keyboard::from_keymap(TEST_KEYMAP).unwrap();
        Fixture {
            seat: Seat::new(scene.clone(), RecordingSink::default(), keyboard),
            scene,
            a,
            b,
        }
    }

    fn motion(x: f64, y: f64) -> HostInputEvent {
        HostInputEvent::PointerMotion { x, y, time: 1 }
    }

    fn button(pressed: bool) -> HostInputEvent {
        HostInputEvent::PointerButton {
            button: BTN_LEFT,
            pressed,
            time: 2,
        }
    }

    fn key(key: u32, pressed: bool) -> HostInputEvent {
        HostInputEvent::Key {
            key,
            pressed,
            time: 3,
        }
    }

    #[test]
    fn test_motion_enters_and_leaves() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 20.0));
        let events = f.seat.sink.take();
        assert!(matches!(
            &events[0],
            (s, Delivered::Pointer(PointerEvent::Enter { x, y, .. }))
                if *s == f.a.0 && *x == 10.0 && *y == 20.0
        ));
        assert_eq!(events[1], (f.a.0, Delivered::Pointer(PointerEvent::Frame)));

        f.seat.host_event(motion(12.0, 20.0));
        assert_eq!(
            f.seat.sink.take()[0],
            (
                f.a.0,
                Delivered::Pointer(PointerEvent::Motion {
                    time: 1,
                    x: 12.0,
                    y: 20.0
                })
            )
        );

        // B is stacked above A where they overlap
        f.seat.host_event(motion(60.0, 60.0));
        let events = f.seat.sink.take();
        let targets: Vec<SurfaceId> = events.iter().map(|(s, _)| *s).collect();
        assert_eq!(targets, vec![f.a.0, f.a.0, f.b.0, f.b.0]);
        assert!(matches!(
            events[0].1,
            Delivered::Pointer(PointerEvent::Leave { .. })
        ));
        assert!(matches!(
            events[2].1,
            Delivered::Pointer(PointerEvent::Enter { x, y, .. }) if x == 10.0 && y == 10.0
        ));
    }

    #[test]
    fn test_click_focuses_raises_and_activates() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.host_event(button(true));

        assert_eq!(f.seat.keyboard().focus().map(|k| k.surface), Some(f.a.0));
        {
            let scene = lock_scene(&f.scene);
            assert_eq!(scene.windows.stack().last(), Some(&f.a.1));
            assert_eq!(scene.windows.focused(), Some(f.a.1));
        }
        let events = f.seat.sink.take();
        assert!(events.iter().any(|e| matches!(
            e,
            (s, Delivered::Keyboard(KeyboardEvent::Enter { .. })) if *s == f.a.0
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            (_, Delivered::Pointer(PointerEvent::Button { state: ButtonState::Pressed, .. }))
        )));
    }

    #[test]
    fn test_no_key_reaches_old_focus_after_reassignment() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.host_event(button(true));
        f.seat.host_event(button(false));
        f.seat.host_event(key(30, true));

        f.seat.host_event(motion(120.0, 120.0));
        f.seat.host_event(button(true));
        f.seat.sink.take();

        f.seat.host_event(key(30, false));
        f.seat.host_event(key(31, true));
        let events = f.seat.sink.take();
        assert!(!events.is_empty());
        assert!(events.iter().all(|(s, _)| *s == f.b.0));
    }

    #[test]
    fn test_focus_change_sends_leave_then_enter_with_held_keys() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.host_event(button(true));
        f.seat.host_event(button(false));
        f.seat.host_event(key(30, true));
        f.seat.host_event(motion(120.0, 120.0));
        f.seat.sink.take();

        f.seat.host_event(button(true));
        let keyboard: Vec<(SurfaceId, KeyboardEvent)> = f
            .seat
            .sink
            .take()
            .into_iter()
            .filter_map(|(s, e)| match e {
                Delivered::Keyboard(k) => Some((s, k)),
                _ => None,
            })
            .collect();
        assert!(matches!(keyboard[0], (s, KeyboardEvent::Leave { .. }) if s == f.a.0));
        assert!(matches!(
            &keyboard[1],
            (s, KeyboardEvent::Enter { pressed_keys, .. }) if *s == f.b.0 && pressed_keys == &vec![30]
        ));
    }

    #[test]
    fn test_implicit_grab_keeps_focus_until_release() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.host_event(button(true));
        f.seat.sink.take();

        // Dragging over B still reports to A, in A's coordinates
        f.seat.host_event(motion(120.0, 120.0));
        assert_eq!(
            f.seat.sink.take()[0],
            (
                f.a.0,
                Delivered::Pointer(PointerEvent::Motion {
                    time: 1,
                    x: 120.0,
                    y: 120.0
                })
            )
        );

        f.seat.host_event(button(false));
        let events = f.seat.sink.take();
        assert!(matches!(
            events[0],
            (s, Delivered::Pointer(PointerEvent::Button { state: ButtonState::Released, .. }))
                if s == f.a.0
        ));
        assert_eq!(f.seat.pointer().focus().map(|p| p.surface), Some(f.b.0));
    }

    #[test]
    fn test_move_grab_moves_window() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.host_event(button(true));
        f.seat.scene_notice(SceneNotice::MoveRequested(f.a.0));
        f.seat.sink.take();

        f.seat.host_event(motion(40.0, 30.0));
        assert!(f.seat.sink.take().is_empty());
        assert_eq!(
            lock_scene(&f.scene).windows.get(f.a.1).unwrap().position,
            (30, 20)
        );

        f.seat.host_event(button(false));
        assert!(f.seat.pointer().grab().is_none());
        // Pointer re-enters the window it was dragging
        assert_eq!(f.seat.pointer().focus().map(|p| p.surface), Some(f.a.0));
    }

    #[test]
    fn test_move_without_button_ignored() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.scene_notice(SceneNotice::MoveRequested(f.a.0));
        assert!(f.seat.pointer().grab().is_none());
    }

    #[test]
    fn test_destroyed_surface_loses_focus_silently() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.host_event(button(true));
        f.seat.host_event(button(false));
        f.seat.sink.take();

        lock_scene(&f.scene).destroy_surface(f.a.0).unwrap();
        f.seat.scene_notice(SceneNotice::SurfaceDestroyed(f.a.0));
        assert!(f.seat.keyboard().focus().is_none());
        assert!(f.seat.pointer().focus().is_none());

        f.seat.host_event(key(30, true));
        assert!(f.seat.sink.take().is_empty());
    }

    #[test]
    fn test_unmapped_window_gets_no_keys() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.host_event(button(true));
        f.seat.host_event(button(false));
        assert_eq!(f.seat.keyboard().focus().map(|k| k.surface), Some(f.a.0));
        f.seat.sink.take();

        lock_scene(&f.scene).attach(f.a.0, None).unwrap();
        lock_scene(&f.scene).commit(f.a.0).unwrap();
        f.seat.scene_notice(SceneNotice::WindowUnmapped(f.a.1));
        assert!(f.seat.keyboard().focus().is_none());
        assert!(f.seat.pointer().focus().is_none());
        let events = f.seat.sink.take();
        assert!(events.iter().any(|e| matches!(
            e,
            (s, Delivered::Keyboard(KeyboardEvent::Leave { .. })) if *s == f.a.0
        )));

        f.seat.host_event(key(30, true));
        f.seat.host_event(key(30, false));
        assert!(f.seat.sink.take().iter().all(|(s, _)| *s != f.a.0));
    }

    #[test]
    fn test_connection_closed_clears_focus() {
        let mut f = fixture();
        f.seat.scene_notice(SceneNotice::WindowMapped(f.b.1));
        assert_eq!(f.seat.keyboard().focus().map(|k| k.owner), Some(f.b.2));
        f.seat.scene_notice(SceneNotice::ConnectionClosed(f.b.2));
        assert!(f.seat.keyboard().focus().is_none());
    }

    #[test]
    fn test_scroll_events() {
        let mut f = fixture();
        f.seat.host_event(motion(10.0, 10.0));
        f.seat.sink.take();

        f.seat.host_event(HostInputEvent::Scroll {
            horizontal: 0.0,
            vertical: 5.0,
            source: AxisSource::Finger,
            time: 9,
        });
        f.seat.host_event(HostInputEvent::ScrollEnd { time: 10 });
        let events: Vec<Delivered> = f.seat.sink.take().into_iter().map(|(_, e)| e).collect();
        assert_eq!(
            events,
            vec![
                Delivered::Pointer(PointerEvent::AxisSource(AxisSource::Finger)),
                Delivered::Pointer(PointerEvent::Axis {
                    time: 9,
                    axis: AxisType::VerticalScroll,
                    value: 5.0
                }),
                Delivered::Pointer(PointerEvent::Frame),
                Delivered::Pointer(PointerEvent::AxisStop {
                    time: 10,
                    axis: AxisType::VerticalScroll
                }),
                Delivered::Pointer(PointerEvent::Frame),
            ]
        );
    }

    #[test]
    fn test_host_focus_round_trip() {
        let mut f = fixture();
        f.seat.scene_notice(SceneNotice::WindowMapped(f.a.1));
        f.seat.host_event(key(30, true));
        f.seat.sink.take();

        f.seat.host_event(HostInputEvent::FocusLost);
        assert!(f.seat.keyboard().focus().is_none());
        assert!(f.seat.keyboard().pressed_keys().is_empty());
        assert!(matches!(
            f.seat.sink.take().last(),
            Some((_, Delivered::Keyboard(KeyboardEvent::Leave { .. })))
        ));

        f.seat.host_event(HostInputEvent::FocusGained);
        assert_eq!(f.seat.keyboard().focus().map(|k| k.surface), Some(f.a.0));
    }
}
