//! NSApplication delegate and event pumping

use log::{debug, info};
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2::{define_class, msg_send, sel, MainThreadOnly};
use objc2_app_kit::{
    NSApplication, NSApplicationActivationPolicy, NSApplicationDelegate,
    NSApplicationTerminateReply, NSEventMask, NSMenu, NSMenuItem,
};
use objc2_foundation::{
    ns_string, MainThreadMarker, NSNotification, NSObject, NSObjectProtocol, NSString,
};

use super::{HostEvent, HostEvents};

/// The shared NSApplication, driven by our own loop instead of `run`
pub struct CocoaApp {
    app: Retained<NSApplication>,
    /// NSApplication only keeps a weak reference
    _delegate: Retained<CocoaAppDelegate>,
}

impl CocoaApp {
    pub fn new(mtm: MainThreadMarker, events: HostEvents) -> Self {
        info!("Initializing Cocoa application");
        let app = NSApplication::sharedApplication(mtm);

        // Regular apps show in the dock and can own key windows
        app.setActivationPolicy(NSApplicationActivationPolicy::Regular);

        let delegate = CocoaAppDelegate::new(mtm, events);
        let delegate_obj: &ProtocolObject<dyn NSApplicationDelegate> =
            ProtocolObject::from_ref(&*delegate);
        app.setDelegate(Some(delegate_obj));

        Self::setup_menu_bar(mtm, &app);
        unsafe { app.finishLaunching() };

        Self {
            app,
            _delegate: delegate,
        }
    }

    fn setup_menu_bar(mtm: MainThreadMarker, app: &NSApplication) {
        let main_menu = NSMenu::new(mtm);
        let app_menu_item = NSMenuItem::new(mtm);
        let app_menu = NSMenu::new(mtm);

        let quit_item = unsafe {
            NSMenuItem::initWithTitle_action_keyEquivalent(
                mtm.alloc(),
                &NSString::from_str("Quit cocoa-way"),
                Some(sel!(terminate:)),
                &NSString::from_str("q"),
            )
        };
        app_menu.addItem(&quit_item);
        app_menu_item.setSubmenu(Some(&app_menu));
        main_menu.addItem(&app_menu_item);
        app.setMainMenu(Some(&main_menu));
    }

    pub fn activate(&self) {
        #[allow(deprecated)]
        self.app.activateIgnoringOtherApps(true);
    }

    /// Deliver every queued AppKit event without blocking
    pub fn pump(&self) {
        loop {
            let event = self.app.nextEventMatchingMask_untilDate_inMode_dequeue(
                NSEventMask::Any,
                None,
                ns_string!("kCFRunLoopDefaultMode"),
                true,
            );
            match event {
                Some(event) => self.app.sendEvent(&event),
                None => break,
            }
        }
        self.app.updateWindows();
    }
}

struct AppDelegateIvars {
    events: HostEvents,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[name = "CocoaWayAppDelegate"]
    #[ivars = AppDelegateIvars]
    struct CocoaAppDelegate;

    unsafe impl NSObjectProtocol for CocoaAppDelegate {}

    unsafe impl NSApplicationDelegate for CocoaAppDelegate {
        #[unsafe(method(applicationShouldTerminate:))]
        fn application_should_terminate(&self, _app: &NSApplication) -> NSApplicationTerminateReply {
            debug!("Quit requested");
            self.ivars().events.push(HostEvent::Quit);
            // The main loop tears down Wayland state and returns from main
            NSApplicationTerminateReply::TerminateCancel
        }

        #[unsafe(method(applicationWillTerminate:))]
        fn application_will_terminate(&self, _notification: &NSNotification) {
            info!("Application will terminate");
        }

        #[unsafe(method(applicationShouldTerminateAfterLastWindowClosed:))]
        fn application_should_terminate_after_last_window_closed(
            &self,
            _app: &NSApplication,
        ) -> bool {
            false
        }
    }
);

impl CocoaAppDelegate {
    fn new(mtm: MainThreadMarker, events: HostEvents) -> Retained<Self> {
        let this = Self::alloc(mtm).set_ivars(AppDelegateIvars { events });
        unsafe { msg_send![super(this), init] }
    }
}
