//! Putting composited frames on screen

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use log::{debug, trace};

use crate::compositor::{DamageRegion, OutputId};

use super::Framebuffer;

/// Why a frame did not reach the screen
#[derive(Debug, thiserror::Error)]
pub enum PresentError {
    /// The host surface changed size while the frame was in flight
    #[error("host surface resized during present")]
    Resized,
    #[error("rendering device lost")]
    DeviceLost,
    #[error("present failed: {0}")]
    Other(String),
}

/// A host-side sink for finished frames
pub trait Presenter {
    /// Show `frame` on `output`; `damage` is in framebuffer pixels
    fn present(
        &mut self,
        output: OutputId,
        frame: &Framebuffer,
        damage: &DamageRegion,
    ) -> Result<(), PresentError>;

    /// The output is gone and its host resources can be released
    fn remove_output(&mut self, _output: OutputId) {}
}

impl<P: Presenter + ?Sized> Presenter for Box<P> {
    fn present(
        &mut self,
        output: OutputId,
        frame: &Framebuffer,
        damage: &DamageRegion,
    ) -> Result<(), PresentError> {
        (**self).present(output, frame, damage)
    }

    fn remove_output(&mut self, output: OutputId) {
        (**self).remove_output(output)
    }
}

/// Presenter for running without a display
///
/// Keeps the last frame of every output and can write each presented frame
/// to disk as a PPM image.
#[derive(Debug, Default)]
pub struct HeadlessPresenter {
    frames: HashMap<OutputId, Framebuffer>,
    presented: u64,
    dump_dir: Option<PathBuf>,
}

impl HeadlessPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every presented frame to `dir`
    pub fn with_dump_dir(dir: PathBuf) -> Self {
        Self {
            dump_dir: Some(dir),
            ..Self::default()
        }
    }

    /// Last frame shown on an output
    pub fn frame(&self, output: OutputId) -> Option<&Framebuffer> {
        self.frames.get(&output)
    }

    /// Number of successful presents across all outputs
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Presenter for HeadlessPresenter {
    fn present(
        &mut self,
        output: OutputId,
        frame: &Framebuffer,
        damage: &DamageRegion,
    ) -> Result<(), PresentError> {
        trace!("Headless present on {:?}: {} damage rects", output, damage.rects().len());
        self.presented += 1;

        if let Some(dir) = &self.dump_dir {
            let path = dir.join(format!("output-{}-{:06}.ppm", output.0, self.presented));
            fs::write(&path, frame.to_ppm())
                .map_err(|e| PresentError::Other(format!("{}: {}", path.display(), e)))?;
            debug!("Dumped frame to {}", path.display());
        }

        self.frames.insert(output, frame.clone());
        Ok(())
    }

    fn remove_output(&mut self, output: OutputId) {
        self.frames.remove(&output);
    }
}
