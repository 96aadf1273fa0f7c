//! The input bridge thread
//!
//! Host input and scene notifications arrive on one channel and are
//! handled strictly in order by a single thread that owns all focus state.
//! Events reach clients through a [`GuestSink`].

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::compositor::{ConnectionId, SharedScene, SurfaceId, WindowId};
use crate::protocol::seat::{AxisSource, KeyboardEvent, PointerEvent};

use super::keyboard::{Keyboard, KeyboardError};
use super::seat::Seat;

/// Input as reported by the host, already translated to evdev codes and
/// global logical coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum HostInputEvent {
    PointerMotion { x: f64, y: f64, time: u32 },
    PointerButton { button: u32, pressed: bool, time: u32 },
    Scroll {
        horizontal: f64,
        vertical: f64,
        source: AxisSource,
        time: u32,
    },
    /// End of a scroll gesture (fingers lifted)
    ScrollEnd { time: u32 },
    /// The pointer left every host window
    PointerLeft,
    Key { key: u32, pressed: bool, time: u32 },
    /// The host window lost keyboard focus
    FocusLost,
    FocusGained,
}

/// Scene changes the bridge has to know about
#[derive(Debug, Clone, PartialEq)]
pub enum SceneNotice {
    SurfaceDestroyed(SurfaceId),
    ConnectionClosed(ConnectionId),
    /// A toplevel committed a buffer after having none
    WindowMapped(WindowId),
    /// A window lost its buffer or its role
    WindowUnmapped(WindowId),
    /// `xdg_toplevel.move` on this surface
    MoveRequested(SurfaceId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Host(HostInputEvent),
    Scene(SceneNotice),
    Shutdown,
}

/// Where the bridge delivers guest input
///
/// Each call names the surface the event is for; implementations drop the
/// event and return false when that surface no longer exists.
pub trait GuestSink: Send + 'static {
    fn pointer(&mut self, target: SurfaceId, event: PointerEvent) -> bool;
    fn keyboard(&mut self, target: SurfaceId, event: KeyboardEvent) -> bool;
    /// Make delivered events visible to clients
    fn flush(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to start input bridge thread: {0}")]
    Spawn(#[from] io::Error),
    #[error(transparent)]
    Keyboard(#[from] KeyboardError),
    #[error("input bridge has stopped")]
    Stopped,
}

/// Cheap handle for feeding the bridge from other threads
#[derive(Debug, Clone)]
pub struct BridgeSender {
    sender: Sender<BridgeMessage>,
}

impl BridgeSender {
    pub fn host(&self, event: HostInputEvent) -> Result<(), BridgeError> {
        self.send(BridgeMessage::Host(event))
    }

    pub fn notify(&self, notice: SceneNotice) -> Result<(), BridgeError> {
        self.send(BridgeMessage::Scene(notice))
    }

    fn send(&self, message: BridgeMessage) -> Result<(), BridgeError> {
        self.sender.send(message).map_err(|_| BridgeError::Stopped)
    }
}

/// The running bridge; stopped and joined on drop
pub struct InputBridge {
    sender: BridgeSender,
    thread: Option<JoinHandle<()>>,
}

impl InputBridge {
    /// Start the bridge thread
    ///
    /// `keymap` is XKB text; it is compiled on the bridge thread and this
    /// call fails if it does not compile.
    pub fn spawn<S: GuestSink>(
        scene: SharedScene,
        sink: S,
        keymap: String,
    ) -> Result<Self, BridgeError> {
        let (sender, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("input-bridge".into())
            .spawn(move || {
                let keyboard = match Keyboard::from_keymap(&keymap) {
                    Ok(keyboard) => {
                        let _ = ready_tx.send(Ok(()));
                        keyboard
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run(Seat::new(scene, sink, keyboard), receiver);
            })?;

        let bridge = Self {
            sender: BridgeSender { sender },
            thread: Some(thread),
        };
        ready_rx.recv().map_err(|_| BridgeError::Stopped)??;
        info!("Input bridge running");
        Ok(bridge)
    }

    pub fn sender(&self) -> BridgeSender {
        self.sender.clone()
    }

    pub fn host(&self, event: HostInputEvent) -> Result<(), BridgeError> {
        self.sender.host(event)
    }

    pub fn notify(&self, notice: SceneNotice) -> Result<(), BridgeError> {
        self.sender.notify(notice)
    }

    /// Stop the thread after it drains what is already queued
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.sender.send(BridgeMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Input bridge thread panicked");
            }
        }
    }
}

impl Drop for InputBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: GuestSink>(mut seat: Seat<S>, receiver: Receiver<BridgeMessage>) {
    while let Ok(message) = receiver.recv() {
        match message {
            BridgeMessage::Host(event) => seat.host_event(event),
            BridgeMessage::Scene(notice) => seat.scene_notice(notice),
            BridgeMessage::Shutdown => break,
        }
        seat.flush();
    }
    debug!("Input bridge stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::compositor::{CompositorState, OutputMode, SceneConfig};
    use crate::input::keyboard::TEST_KEYMAP;

    #[derive(Clone, Default)]
    struct SharedSink {
        events: Arc<Mutex<Vec<(SurfaceId, String)>>>,
        flushes: Arc<Mutex<usize>>,
    }

    impl GuestSink for SharedSink {
        fn pointer(&mut self, target: SurfaceId, event: PointerEvent) -> bool {
            self.events.lock().unwrap().push((target, format!("{:?}", event)));
            true
        }

        fn keyboard(&mut self, target: SurfaceId, event: KeyboardEvent) -> bool {
            self.events.lock().unwrap().push((target, format!("{:?}", event)));
            true
        }

        fn flush(&mut self) {
            *self.flushes.lock().unwrap() += 1;
        }
    }

    fn scene_with_window() -> (SharedScene, SurfaceId, WindowId) {
        let mut scene = CompositorState::new(SceneConfig::default());
        scene.add_output("HOST-1".into(), OutputMode::new(800, 600, 60000), 1.0);
        let conn = scene.open_connection();
        let surface = scene.create_surface(conn).unwrap();
        let window = scene.create_toplevel(surface).unwrap();
        scene.initial_configure(window).unwrap();
        let buffer = scene.import_buffer(
            conn,
            &crate::protocol::ShmContents {
                width: 100,
                height: 80,
                stride: 400,
                format: crate::protocol::ShmFormat::Xrgb8888,
                data: vec![0; 100 * 80 * 4],
            },
        );
        scene.attach(surface, Some(buffer)).unwrap();
        scene.commit(surface).unwrap();
        (scene.into_shared(), surface, window)
    }

    #[test]
    fn test_bridge_delivers_in_order() {
        let (scene, surface, window) = scene_with_window();
        let sink = SharedSink::default();
        let bridge = InputBridge::spawn(scene, sink.clone(), TEST_KEYMAP.to_string()).unwrap();

        bridge.notify(SceneNotice::WindowMapped(window)).unwrap();
        bridge
            .host(HostInputEvent::Key {
                key: 30,
                pressed: true,
                time: 5,
            })
            .unwrap();
        bridge.shutdown();

        let events = sink.events.lock().unwrap();
        assert!(events.iter().all(|(target, _)| *target == surface));
        let kinds: Vec<&str> = events
            .iter()
            .map(|(_, e)| e.split_whitespace().next().unwrap_or(""))
            .collect();
        assert_eq!(kinds, vec!["Enter", "Modifiers", "Key"]);
        assert_eq!(*sink.flushes.lock().unwrap(), 2);
    }

    #[test]
    fn test_bad_keymap_fails_spawn() {
        let (scene, _, _) = scene_with_window();
        let result = InputBridge::spawn(scene, SharedSink::default(), "garbage".into());
        assert!(matches!(result, Err(BridgeError::Keyboard(_))));
    }

    #[test]
    fn test_sender_fails_after_shutdown() {
        let (scene, _, _) = scene_with_window();
        let bridge =
            InputBridge::spawn(scene, SharedSink::default(), TEST_KEYMAP.to_string()).unwrap();
        let sender = bridge.sender();
        bridge.shutdown();
        assert!(matches!(
            sender.host(HostInputEvent::PointerLeft),
            Err(BridgeError::Stopped)
        ));
    }
}
