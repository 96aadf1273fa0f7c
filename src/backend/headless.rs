//! Headless backend
//!
//! Serves clients without a host window system. Frames stay in memory, or
//! are written as PPM files with `--dump-frames`.

use std::fs;

use anyhow::Context;

use crate::config::RunConfig;
use crate::renderer::HeadlessPresenter;

use super::{build_scene, Session};

pub fn run(config: &RunConfig) -> anyhow::Result<()> {
    let presenter = match &config.dump_frames {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create frame dump directory {}", dir.display()))?;
            HeadlessPresenter::with_dump_dir(dir.clone())
        }
        None => HeadlessPresenter::new(),
    };

    let (scene, _) = build_scene(config, "HEADLESS");
    let session = Session::new(config, scene, Box::new(presenter))?;
    session.export_environment(&config.runtime_dir);
    session.run()
}
