//! Layer-backed NSView presenting an output and reporting its input

use log::trace;
use objc2::rc::Retained;
use objc2::{define_class, msg_send, MainThreadOnly};
use objc2_app_kit::{NSEvent, NSEventPhase, NSView};
use objc2_foundation::{CGRect, MainThreadMarker, NSObjectProtocol};
use objc2_quartz_core::CAMetalLayer;

use crate::compositor::OutputId;
use crate::input::keymap::{macos_button_to_evdev, macos_keycode_to_evdev, modifier_pressed};
use crate::input::HostInputEvent;
use crate::protocol::seat::AxisSource;

use super::{HostEvent, HostEvents};

/// Line-based wheels report in lines; clients expect roughly pixels
const WHEEL_STEP: f64 = 10.0;

pub struct ViewIvars {
    output: OutputId,
    events: HostEvents,
    layer: Retained<CAMetalLayer>,
}

define_class!(
    #[unsafe(super(NSView))]
    #[thread_kind = MainThreadOnly]
    #[name = "CocoaWayView"]
    #[ivars = ViewIvars]
    pub struct CocoaView;

    unsafe impl NSObjectProtocol for CocoaView {}

    impl CocoaView {
        /// Top-left origin, like Wayland
        #[unsafe(method(isFlipped))]
        fn is_flipped(&self) -> bool {
            true
        }

        #[unsafe(method(wantsUpdateLayer))]
        fn wants_update_layer(&self) -> bool {
            true
        }

        #[unsafe(method(isOpaque))]
        fn is_opaque(&self) -> bool {
            true
        }

        #[unsafe(method(acceptsFirstResponder))]
        fn accepts_first_responder(&self) -> bool {
            true
        }

        #[unsafe(method(acceptsFirstMouse:))]
        fn accepts_first_mouse(&self, _event: Option<&NSEvent>) -> bool {
            true
        }

        #[unsafe(method(updateLayer))]
        fn update_layer(&self) {
            // Frames arrive from the renderer, not from AppKit redraws
        }

        #[unsafe(method(mouseMoved:))]
        fn mouse_moved(&self, event: &NSEvent) {
            self.motion(event);
        }

        #[unsafe(method(mouseDragged:))]
        fn mouse_dragged(&self, event: &NSEvent) {
            self.motion(event);
        }

        #[unsafe(method(rightMouseDragged:))]
        fn right_mouse_dragged(&self, event: &NSEvent) {
            self.motion(event);
        }

        #[unsafe(method(otherMouseDragged:))]
        fn other_mouse_dragged(&self, event: &NSEvent) {
            self.motion(event);
        }

        #[unsafe(method(mouseDown:))]
        fn mouse_down(&self, event: &NSEvent) {
            self.button(event, true);
        }

        #[unsafe(method(mouseUp:))]
        fn mouse_up(&self, event: &NSEvent) {
            self.button(event, false);
        }

        #[unsafe(method(rightMouseDown:))]
        fn right_mouse_down(&self, event: &NSEvent) {
            self.button(event, true);
        }

        #[unsafe(method(rightMouseUp:))]
        fn right_mouse_up(&self, event: &NSEvent) {
            self.button(event, false);
        }

        #[unsafe(method(otherMouseDown:))]
        fn other_mouse_down(&self, event: &NSEvent) {
            self.button(event, true);
        }

        #[unsafe(method(otherMouseUp:))]
        fn other_mouse_up(&self, event: &NSEvent) {
            self.button(event, false);
        }

        #[unsafe(method(scrollWheel:))]
        fn scroll_wheel(&self, event: &NSEvent) {
            let time = timestamp(event);
            if phase_ended(event.phase()) || phase_ended(event.momentumPhase()) {
                self.push(HostInputEvent::ScrollEnd { time });
                return;
            }

            let (dx, dy) = (event.scrollingDeltaX(), event.scrollingDeltaY());
            let (source, factor) = if event.hasPreciseScrollingDeltas() {
                (AxisSource::Finger, 1.0)
            } else {
                (AxisSource::Wheel, WHEEL_STEP)
            };
            if dx == 0.0 && dy == 0.0 {
                return;
            }
            // AppKit deltas move content; Wayland axis values move the view
            self.push(HostInputEvent::Scroll {
                horizontal: -dx * factor,
                vertical: -dy * factor,
                source,
                time,
            });
        }

        #[unsafe(method(keyDown:))]
        fn key_down(&self, event: &NSEvent) {
            // Clients repeat keys themselves from wl_keyboard.repeat_info
            if event.isARepeat() {
                return;
            }
            self.key(event, true);
        }

        #[unsafe(method(keyUp:))]
        fn key_up(&self, event: &NSEvent) {
            self.key(event, false);
        }

        #[unsafe(method(flagsChanged:))]
        fn flags_changed(&self, event: &NSEvent) {
            let keycode = event.keyCode();
            let flags = event.modifierFlags().0 as u64;
            if let Some(pressed) = modifier_pressed(keycode, flags) {
                self.key(event, pressed);
            }
        }
    }
);

impl CocoaView {
    pub fn new(
        mtm: MainThreadMarker,
        frame: CGRect,
        output: OutputId,
        events: HostEvents,
    ) -> Retained<Self> {
        let layer = unsafe { CAMetalLayer::new() };
        let this = Self::alloc(mtm).set_ivars(ViewIvars {
            output,
            events,
            layer: layer.clone(),
        });
        let this: Retained<Self> = unsafe { msg_send![super(this), initWithFrame: frame] };

        unsafe {
            let _: () = msg_send![&*this, setLayer: &*layer];
            let _: () = msg_send![&*this, setWantsLayer: true];
        }
        this
    }

    pub fn metal_layer(&self) -> Retained<CAMetalLayer> {
        self.ivars().layer.clone()
    }

    fn push(&self, event: HostInputEvent) {
        let ivars = self.ivars();
        trace!("Host input on {:?}: {:?}", ivars.output, event);
        ivars.events.push(HostEvent::Input {
            output: ivars.output,
            event,
        });
    }

    fn motion(&self, event: &NSEvent) {
        let point = self.convertPoint_fromView(event.locationInWindow(), None);
        self.push(HostInputEvent::PointerMotion {
            x: point.x,
            y: point.y,
            time: timestamp(event),
        });
    }

    fn button(&self, event: &NSEvent, pressed: bool) {
        // Make sure the bridge has hit-tested the click position
        self.motion(event);
        self.push(HostInputEvent::PointerButton {
            button: macos_button_to_evdev(event.buttonNumber() as i64),
            pressed,
            time: timestamp(event),
        });
    }

    fn key(&self, event: &NSEvent, pressed: bool) {
        let keycode = event.keyCode();
        match macos_keycode_to_evdev(keycode) {
            Some(key) => self.push(HostInputEvent::Key {
                key,
                pressed,
                time: timestamp(event),
            }),
            None => trace!("No evdev key for macOS keycode {:#x}", keycode),
        }
    }
}

fn phase_ended(phase: NSEventPhase) -> bool {
    phase.0 & (NSEventPhase::Ended.0 | NSEventPhase::Cancelled.0) != 0
}

/// Event time in milliseconds, wrapping like Wayland timestamps
fn timestamp(event: &NSEvent) -> u32 {
    (event.timestamp() * 1000.0) as u64 as u32
}
