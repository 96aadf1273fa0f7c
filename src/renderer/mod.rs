//! Frame production
//!
//! Each tick takes a snapshot of the scene, composites the damaged part of
//! every healthy output on the CPU and hands the result to a [`Presenter`].
//! Failed presents keep their damage and are retried on the next tick;
//! an output whose presents keep failing is marked faulted and skipped
//! until the scene restores it.

pub mod clock;
pub mod framebuffer;
pub mod presenter;
pub mod software;

#[cfg(target_os = "macos")]
pub mod metal;

pub use clock::FrameClock;
pub use framebuffer::Framebuffer;
pub use presenter::{HeadlessPresenter, PresentError, Presenter};
pub use software::SoftwareCompositor;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::compositor::{
    lock_scene, CompositorState, DamageRegion, FrameCallbackId, OutputId, SnapshotOutput,
};

/// Default number of consecutive failed presents before an output faults
pub const DEFAULT_PRESENT_RETRIES: u32 = 3;

/// Something the rest of the compositor has to act on after a tick
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// Complete these frame callbacks with `time` (ms)
    FrameDone {
        callbacks: Vec<FrameCallbackId>,
        time: u32,
    },
    /// An output stopped accepting frames
    OutputFault { output: OutputId, reason: String },
}

/// Per-output render target
#[derive(Debug)]
struct OutputTarget {
    framebuffer: Framebuffer,
    /// Global logical damage not yet on screen
    pending: DamageRegion,
    failures: u32,
    faulted: bool,
}

impl OutputTarget {
    fn new(output: &SnapshotOutput) -> Self {
        Self {
            framebuffer: Framebuffer::new(output.mode.width, output.mode.height),
            pending: DamageRegion::from_rect(output.rect),
            failures: 0,
            faulted: false,
        }
    }

    /// Follow mode changes; a resized target is redrawn completely
    fn sync(&mut self, output: &SnapshotOutput) {
        let fb = &self.framebuffer;
        if fb.width() != output.mode.width || fb.height() != output.mode.height {
            debug!(
                "Output {:?} framebuffer {}x{} -> {}x{}",
                output.id,
                fb.width(),
                fb.height(),
                output.mode.width,
                output.mode.height
            );
            self.framebuffer
                .resize(output.mode.width, output.mode.height);
            self.pending = DamageRegion::from_rect(output.rect);
        }
    }
}

/// Drives compositing and presentation for every output
pub struct Renderer<P> {
    presenter: P,
    compositor: SoftwareCompositor,
    clock: FrameClock,
    targets: HashMap<OutputId, OutputTarget>,
    max_failures: u32,
    /// Callbacks waiting for a frame to actually reach the screen
    deferred: Vec<FrameCallbackId>,
}

impl<P: Presenter> Renderer<P> {
    pub fn new(presenter: P, present_retries: u32, now: Instant) -> Self {
        Self {
            presenter,
            compositor: SoftwareCompositor::new(),
            clock: FrameClock::new(clock::DEFAULT_REFRESH_MHZ, now),
            targets: HashMap::new(),
            max_failures: present_retries.max(1),
            deferred: Vec::new(),
        }
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// How long the event loop may sleep before the next tick
    pub fn time_until_next(&self, now: Instant) -> Duration {
        self.clock.time_until_next(now)
    }

    /// Whether a failed present is waiting for its retry
    pub fn retry_pending(&self) -> bool {
        self.targets
            .values()
            .any(|t| !t.faulted && t.failures > 0)
    }

    /// Produce one frame
    ///
    /// The scene lock is held only while the snapshot is taken, and again
    /// briefly if an output has to be marked faulted.
    pub fn tick(&mut self, scene: &Mutex<CompositorState>, now: Instant) -> Vec<RenderEvent> {
        let snapshot = lock_scene(scene).snapshot();
        self.clock.begin_frame(now);
        self.deferred.extend(snapshot.callbacks.iter().copied());

        let fastest = snapshot.outputs.iter().map(|o| o.mode.refresh).max();
        if let Some(refresh) = fastest {
            self.clock.set_refresh(refresh);
        }

        let live: HashSet<OutputId> = snapshot.outputs.iter().map(|o| o.id).collect();
        let presenter = &mut self.presenter;
        self.targets.retain(|id, _| {
            let keep = live.contains(id);
            if !keep {
                debug!("Dropping render target for removed output {:?}", id);
                presenter.remove_output(*id);
            }
            keep
        });

        let mut events = Vec::new();
        let mut retrying = false;

        for output in &snapshot.outputs {
            let target = self
                .targets
                .entry(output.id)
                .or_insert_with(|| OutputTarget::new(output));
            target.sync(output);

            if output.faulted {
                target.faulted = true;
                continue;
            }
            if target.faulted {
                info!("Output {:?} restored, redrawing", output.id);
                target.faulted = false;
                target.failures = 0;
                target.pending.add(output.rect);
            }

            target.pending.merge(&snapshot.damage.clip(&output.rect));
            if target.pending.is_empty() {
                continue;
            }

            let damage = self.compositor.composite(
                &mut target.framebuffer,
                output,
                &snapshot.surfaces,
                &target.pending,
            );
            match self.presenter.present(output.id, &target.framebuffer, &damage) {
                Ok(()) => {
                    target.pending.clear();
                    target.failures = 0;
                }
                Err(err) => {
                    target.failures += 1;
                    if target.failures >= self.max_failures {
                        error!(
                            "Output {:?} faulted after {} failed presents: {}",
                            output.id, target.failures, err
                        );
                        target.faulted = true;
                        target.pending.clear();
                        let reason = err.to_string();
                        if let Err(e) = lock_scene(scene).fault_output(output.id, reason.clone()) {
                            warn!("Could not mark output faulted: {}", e);
                        }
                        events.push(RenderEvent::OutputFault {
                            output: output.id,
                            reason,
                        });
                    } else {
                        warn!(
                            "Present on {:?} failed ({}/{}), retrying: {}",
                            output.id, target.failures, self.max_failures, err
                        );
                        retrying = true;
                    }
                }
            }
        }

        if !retrying && !self.deferred.is_empty() {
            events.push(RenderEvent::FrameDone {
                callbacks: std::mem::take(&mut self.deferred),
                time: self.clock.timestamp_ms(now),
            });
        }

        self.clock.end_frame(now);
        events
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::compositor::{ConnectionId, OutputMode, SceneConfig, SurfaceId};
    use crate::protocol::{ShmContents, ShmFormat};

    /// Presenter that fails according to a script, then succeeds
    #[derive(Default)]
    struct ScriptedPresenter {
        script: VecDeque<bool>,
        presented: Vec<(OutputId, Framebuffer)>,
        attempts: usize,
    }

    impl ScriptedPresenter {
        fn failing(times: usize) -> Self {
            Self {
                script: std::iter::repeat(false).take(times).collect(),
                ..Self::default()
            }
        }
    }

    impl Presenter for ScriptedPresenter {
        fn present(
            &mut self,
            output: OutputId,
            frame: &Framebuffer,
            _damage: &DamageRegion,
        ) -> Result<(), PresentError> {
            self.attempts += 1;
            if self.script.pop_front() == Some(false) {
                return Err(PresentError::DeviceLost);
            }
            self.presented.push((output, frame.clone()));
            Ok(())
        }
    }

    fn scene() -> (Mutex<CompositorState>, OutputId) {
        let mut scene = CompositorState::new(SceneConfig::default());
        let output = scene.add_output("HOST-1".into(), OutputMode::new(64, 48, 60000), 1.0);
        (Mutex::new(scene), output)
    }

    fn show_window(scene: &Mutex<CompositorState>, color: u32) -> (ConnectionId, SurfaceId) {
        let mut scene = lock_scene(scene);
        let conn = scene.open_connection();
        let surface = scene.create_surface(conn).unwrap();
        let window = scene.create_toplevel(surface).unwrap();
        scene.initial_configure(window).unwrap();
        let buffer = solid(&mut scene, conn, 8, 8, color);
        scene.attach(surface, Some(buffer)).unwrap();
        scene.commit(surface).unwrap();
        (conn, surface)
    }

    fn solid(
        scene: &mut CompositorState,
        owner: ConnectionId,
        w: u32,
        h: u32,
        color: u32,
    ) -> std::sync::Arc<crate::compositor::Buffer> {
        let data = color.to_le_bytes().repeat((w * h) as usize);
        scene.import_buffer(
            owner,
            &ShmContents {
                width: w,
                height: h,
                stride: w * 4,
                format: ShmFormat::Xrgb8888,
                data,
            },
        )
    }

    #[test]
    fn test_first_tick_paints_everything() {
        let (scene, output) = scene();
        let (_, _surface) = show_window(&scene, 0x00AA_0000);
        let mut renderer = Renderer::new(HeadlessPresenter::new(), 3, Instant::now());

        renderer.tick(&scene, Instant::now());
        let frame = renderer.presenter().frame(output).unwrap();
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.pixel(0, 0), 0xFFAA_0000);
        assert_eq!(frame.pixel(63, 47), software::BACKGROUND);
    }

    #[test]
    fn test_idle_tick_presents_nothing() {
        let (scene, _) = scene();
        let mut renderer = Renderer::new(HeadlessPresenter::new(), 3, Instant::now());
        renderer.tick(&scene, Instant::now());
        assert_eq!(renderer.presenter().presented(), 1);
        let events = renderer.tick(&scene, Instant::now());
        assert!(events.is_empty());
        assert_eq!(renderer.presenter().presented(), 1);
    }

    #[test]
    fn test_only_committed_content_is_shown() {
        let (scene, output) = scene();
        let (conn, surface) = show_window(&scene, 0x00AA_0000);
        let mut renderer = Renderer::new(HeadlessPresenter::new(), 3, Instant::now());
        renderer.tick(&scene, Instant::now());

        {
            let mut guard = lock_scene(&scene);
            let next = solid(&mut guard, conn, 8, 8, 0x0000_BB00);
            guard.attach(surface, Some(next)).unwrap();
            guard.damage(surface, crate::compositor::Rect::new(0, 0, 8, 8)).unwrap();
        }
        renderer.tick(&scene, Instant::now());
        assert_eq!(renderer.presenter().frame(output).unwrap().pixel(0, 0), 0xFFAA_0000);

        lock_scene(&scene).commit(surface).unwrap();
        renderer.tick(&scene, Instant::now());
        assert_eq!(renderer.presenter().frame(output).unwrap().pixel(0, 0), 0xFF00_BB00);
    }

    #[test]
    fn test_callbacks_fire_after_present() {
        let (scene, _) = scene();
        let (_, surface) = show_window(&scene, 0x00AA_0000);
        let callback = FrameCallbackId::new();
        {
            let mut guard = lock_scene(&scene);
            guard.frame(surface, callback).unwrap();
            guard.commit(surface).unwrap();
        }
        let mut renderer = Renderer::new(HeadlessPresenter::new(), 3, Instant::now());
        let events = renderer.tick(&scene, Instant::now());
        assert!(matches!(
            &events[..],
            [RenderEvent::FrameDone { callbacks, .. }] if callbacks == &vec![callback]
        ));
    }

    #[test]
    fn test_failed_present_retried_with_callbacks_held() {
        let (scene, output) = scene();
        let (_, surface) = show_window(&scene, 0x00AA_0000);
        let callback = FrameCallbackId::new();
        {
            let mut guard = lock_scene(&scene);
            guard.frame(surface, callback).unwrap();
            guard.commit(surface).unwrap();
        }
        let mut renderer = Renderer::new(ScriptedPresenter::failing(1), 3, Instant::now());

        assert!(renderer.tick(&scene, Instant::now()).is_empty());
        assert!(renderer.retry_pending());

        let events = renderer.tick(&scene, Instant::now());
        assert!(matches!(
            &events[..],
            [RenderEvent::FrameDone { callbacks, .. }] if callbacks == &vec![callback]
        ));
        let presented = &renderer.presenter().presented;
        assert_eq!(presented.len(), 1);
        assert_eq!(presented[0].0, output);
        // The retry repaints what the failed attempt could not show
        assert_eq!(presented[0].1.pixel(0, 0), 0xFFAA_0000);
    }

    #[test]
    fn test_repeated_failure_faults_output() {
        let (scene, output) = scene();
        show_window(&scene, 0x00AA_0000);
        let mut renderer = Renderer::new(ScriptedPresenter::failing(10), 3, Instant::now());

        assert!(renderer.tick(&scene, Instant::now()).is_empty());
        assert!(renderer.tick(&scene, Instant::now()).is_empty());
        let events = renderer.tick(&scene, Instant::now());
        assert!(events.iter().any(|e| matches!(
            e,
            RenderEvent::OutputFault { output: o, .. } if *o == output
        )));
        assert!(lock_scene(&scene).outputs.get(output).unwrap().is_faulted());

        // Faulted outputs are skipped
        let attempts = renderer.presenter().attempts;
        renderer.tick(&scene, Instant::now());
        assert_eq!(renderer.presenter().attempts, attempts);
        assert!(!renderer.retry_pending());
    }

    #[test]
    fn test_restored_output_redrawn() {
        let (scene, output) = scene();
        show_window(&scene, 0x00AA_0000);
        let mut renderer = Renderer::new(ScriptedPresenter::failing(1), 1, Instant::now());

        let events = renderer.tick(&scene, Instant::now());
        assert!(matches!(&events[..], [RenderEvent::OutputFault { .. }]));

        lock_scene(&scene).restore_output(output).unwrap();
        renderer.tick(&scene, Instant::now());
        let presented = &renderer.presenter().presented;
        assert_eq!(presented.len(), 1);
        assert_eq!(presented[0].1.pixel(0, 0), 0xFFAA_0000);
    }

    #[test]
    fn test_resized_output_gets_new_framebuffer() {
        let (scene, output) = scene();
        let mut renderer = Renderer::new(HeadlessPresenter::new(), 3, Instant::now());
        renderer.tick(&scene, Instant::now());

        lock_scene(&scene)
            .resize_output(output, OutputMode::new(32, 16, 120000), 1.0)
            .unwrap();
        renderer.tick(&scene, Instant::now());
        let frame = renderer.presenter().frame(output).unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 16));
        assert_eq!(renderer.clock().interval(), Duration::from_nanos(8_333_333));
    }
}
