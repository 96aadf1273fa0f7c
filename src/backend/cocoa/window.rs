//! NSWindow hosting one output

use std::cell::Cell;

use log::debug;
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2::{define_class, msg_send, MainThreadOnly};
use objc2_app_kit::{
    NSBackingStoreType, NSResponder, NSView, NSWindow, NSWindowDelegate, NSWindowStyleMask,
};
use objc2_foundation::{
    CGPoint, CGRect, CGSize, MainThreadMarker, NSNotification, NSObject, NSObjectProtocol,
    NSString,
};
use objc2_quartz_core::CAMetalLayer;

use crate::compositor::{Output, OutputId, OutputMode};
use crate::input::HostInputEvent;

use super::view::CocoaView;
use super::{HostEvent, HostEvents};

/// A host window showing one output
pub struct OutputWindow {
    window: Retained<NSWindow>,
    view: Retained<CocoaView>,
    /// NSWindow only keeps a weak reference
    _delegate: Retained<OutputWindowDelegate>,
    output: OutputId,
    refresh: u32,
    /// Last size and scale handed to the scene
    applied: Cell<Option<(u32, u32, f64)>>,
}

impl OutputWindow {
    /// Create a hidden window sized to the output's logical size
    pub fn new(mtm: MainThreadMarker, output: &Output, events: HostEvents) -> Self {
        let (width, height) = output.logical_size();
        let frame = CGRect::new(
            CGPoint::new(0.0, 0.0),
            CGSize::new(width as f64, height as f64),
        );

        let style = NSWindowStyleMask::Titled
            | NSWindowStyleMask::Closable
            | NSWindowStyleMask::Miniaturizable
            | NSWindowStyleMask::Resizable;

        let window = unsafe {
            NSWindow::initWithContentRect_styleMask_backing_defer(
                mtm.alloc(),
                frame,
                style,
                NSBackingStoreType::Buffered,
                false,
            )
        };
        // Dropping the Retained is what releases the window
        unsafe { window.setReleasedWhenClosed(false) };
        window.setTitle(&NSString::from_str(&format!("cocoa-way: {}", output.name)));
        window.setAcceptsMouseMovedEvents(true);
        window.center();

        let view = CocoaView::new(mtm, frame, output.id, events.clone());
        view.metal_layer().setContentsScale(window.backingScaleFactor());
        let content: &NSView = &view;
        window.setContentView(Some(content));
        let responder: &NSResponder = &view;
        window.makeFirstResponder(Some(responder));

        let delegate = OutputWindowDelegate::new(mtm, output.id, events);
        let delegate_obj: &ProtocolObject<dyn NSWindowDelegate> =
            ProtocolObject::from_ref(&*delegate);
        window.setDelegate(Some(delegate_obj));

        debug!(
            "Created host window for {} ({:?}), {}x{}",
            output.name, output.id, width, height
        );

        Self {
            window,
            view,
            _delegate: delegate,
            output: output.id,
            refresh: output.mode.refresh,
            applied: Cell::new(None),
        }
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn metal_layer(&self) -> Retained<CAMetalLayer> {
        self.view.metal_layer()
    }

    pub fn show(&self) {
        unsafe {
            self.window.makeKeyAndOrderFront(None);
        }
    }

    /// Current mode and scale, if they changed since last taken
    ///
    /// The mode is the content area in backing pixels; the scale is the
    /// window's backing scale factor.
    pub fn take_resize(&self) -> Option<(OutputMode, f64)> {
        let content = self.window.contentRectForFrameRect(self.window.frame());
        let scale = self.window.backingScaleFactor();
        let width = (content.size.width * scale).round().max(1.0) as u32;
        let height = (content.size.height * scale).round().max(1.0) as u32;

        let current = Some((width, height, scale));
        if self.applied.get() == current {
            return None;
        }
        self.applied.set(current);
        self.view.metal_layer().setContentsScale(scale);
        Some((OutputMode::new(width, height, self.refresh), scale))
    }
}

impl Drop for OutputWindow {
    fn drop(&mut self) {
        self.window.setDelegate(None);
        self.window.close();
    }
}

struct WindowDelegateIvars {
    output: OutputId,
    events: HostEvents,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[name = "CocoaWayWindowDelegate"]
    #[ivars = WindowDelegateIvars]
    struct OutputWindowDelegate;

    unsafe impl NSObjectProtocol for OutputWindowDelegate {}

    unsafe impl NSWindowDelegate for OutputWindowDelegate {
        #[unsafe(method(windowDidBecomeKey:))]
        fn window_did_become_key(&self, _notification: &NSNotification) {
            debug!("Window for {:?} became key", self.ivars().output);
            self.input(HostInputEvent::FocusGained);
        }

        #[unsafe(method(windowDidResignKey:))]
        fn window_did_resign_key(&self, _notification: &NSNotification) {
            debug!("Window for {:?} resigned key", self.ivars().output);
            self.input(HostInputEvent::FocusLost);
        }

        #[unsafe(method(windowWillClose:))]
        fn window_will_close(&self, _notification: &NSNotification) {
            let ivars = self.ivars();
            ivars.events.push(HostEvent::Closed(ivars.output));
        }

        #[unsafe(method(windowDidResize:))]
        fn window_did_resize(&self, _notification: &NSNotification) {
            let ivars = self.ivars();
            ivars.events.push(HostEvent::Resized(ivars.output));
        }

        #[unsafe(method(windowDidChangeBackingProperties:))]
        fn window_did_change_backing_properties(&self, _notification: &NSNotification) {
            let ivars = self.ivars();
            ivars.events.push(HostEvent::Resized(ivars.output));
        }

        #[unsafe(method(windowDidMiniaturize:))]
        fn window_did_miniaturize(&self, _notification: &NSNotification) {
            debug!("Window for {:?} did miniaturize", self.ivars().output);
        }
    }
);

impl OutputWindowDelegate {
    fn new(mtm: MainThreadMarker, output: OutputId, events: HostEvents) -> Retained<Self> {
        let this = Self::alloc(mtm).set_ivars(WindowDelegateIvars { output, events });
        unsafe { msg_send![super(this), init] }
    }

    fn input(&self, event: HostInputEvent) {
        let ivars = self.ivars();
        ivars.events.push(HostEvent::Input {
            output: ivars.output,
            event,
        });
    }
}
