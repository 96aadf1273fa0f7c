//! Output/display management
//!
//! Outputs are host display targets. Each one covers a rectangle of the
//! global logical coordinate space; outputs are laid out left to right.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::compositor::Rect;

/// Unique identifier for outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u64);

impl OutputId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OutputId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Output subpixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subpixel {
    #[default]
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

/// An output mode (resolution + refresh rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    /// Width in physical pixels
    pub width: u32,
    /// Height in physical pixels
    pub height: u32,
    /// Refresh rate in mHz (e.g., 60000 for 60Hz)
    pub refresh: u32,
}

impl OutputMode {
    pub fn new(width: u32, height: u32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }
}

/// Whether the renderer can currently present to an output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputHealth {
    #[default]
    Healthy,
    /// Presentation kept failing; skipped until restored
    Faulted { reason: String },
}

/// A display output (monitor)
#[derive(Debug, Clone)]
pub struct Output {
    pub id: OutputId,
    /// Output name (e.g., "HOST-1")
    pub name: String,
    pub make: String,
    pub model: String,
    /// Position in global logical coordinates
    pub x: i32,
    pub y: i32,
    /// Physical size in millimeters
    pub physical_width: u32,
    pub physical_height: u32,
    pub subpixel: Subpixel,
    pub mode: OutputMode,
    /// Scale factor from logical to physical pixels
    pub scale: f64,
    pub health: OutputHealth,
}

impl Output {
    pub fn new(name: String, mode: OutputMode, scale: f64) -> Self {
        Self {
            id: OutputId::new(),
            name,
            make: String::from("cocoa-way"),
            model: String::from("Host Display"),
            x: 0,
            y: 0,
            physical_width: 0,
            physical_height: 0,
            subpixel: Subpixel::Unknown,
            mode,
            scale: sanitize_scale(scale),
            health: OutputHealth::Healthy,
        }
    }

    /// Size in logical coordinates
    pub fn logical_size(&self) -> (i32, i32) {
        (
            (self.mode.width as f64 / self.scale).round() as i32,
            (self.mode.height as f64 / self.scale).round() as i32,
        )
    }

    /// Area covered in the global logical space
    pub fn logical_rect(&self) -> Rect {
        let (w, h) = self.logical_size();
        Rect::new(self.x, self.y, w, h)
    }

    /// Integer scale advertised through wl_output.scale
    pub fn integer_scale(&self) -> i32 {
        self.scale.ceil() as i32
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.health, OutputHealth::Faulted { .. })
    }
}

fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

/// Manager for all outputs
#[derive(Debug, Default)]
pub struct OutputManager {
    outputs: BTreeMap<OutputId, Output>,
}

impl OutputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an output to the right of the existing ones
    pub fn create_output(&mut self, name: String, mode: OutputMode, scale: f64) -> OutputId {
        let mut output = Output::new(name, mode, scale);
        output.x = self
            .outputs
            .values()
            .map(|o| o.logical_rect().right())
            .max()
            .unwrap_or(0);
        self.add(output)
    }

    pub fn add(&mut self, output: Output) -> OutputId {
        let id = output.id;
        self.outputs.insert(id, output);
        id
    }

    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.get_mut(&id)
    }

    pub fn remove(&mut self, id: OutputId) -> Option<Output> {
        self.outputs.remove(&id)
    }

    /// The output created first
    pub fn primary(&self) -> Option<&Output> {
        self.outputs.values().next()
    }

    /// Re-pack outputs left to right after a size change
    pub fn relayout(&mut self) {
        let mut x = 0;
        for output in self.outputs.values_mut() {
            output.x = x;
            output.y = 0;
            x += output.logical_size().0;
        }
    }

    /// Output containing a global point
    pub fn output_at(&self, x: i32, y: i32) -> Option<&Output> {
        self.outputs
            .values()
            .find(|o| o.logical_rect().contains(x, y))
    }

    /// Outputs in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_id_unique() {
        assert_ne!(OutputId::new(), OutputId::new());
    }

    #[test]
    fn test_logical_size_uses_scale() {
        let output = Output::new("test".into(), OutputMode::new(2560, 1600, 60000), 2.0);
        assert_eq!(output.logical_size(), (1280, 800));
        assert_eq!(output.integer_scale(), 2);

        let output = Output::new("test".into(), OutputMode::new(1920, 1080, 60000), 1.5);
        assert_eq!(output.logical_size(), (1280, 720));
        assert_eq!(output.integer_scale(), 2);
    }

    #[test]
    fn test_bad_scale_falls_back() {
        let output = Output::new("test".into(), OutputMode::new(100, 100, 60000), 0.0);
        assert_eq!(output.scale, 1.0);
    }

    #[test]
    fn test_outputs_laid_out_horizontally() {
        let mut manager = OutputManager::new();
        let a = manager.create_output("A".into(), OutputMode::new(1280, 800, 60000), 1.0);
        let b = manager.create_output("B".into(), OutputMode::new(2000, 1000, 60000), 2.0);
        assert_eq!(manager.get(b).unwrap().x, 1280);
        assert_eq!(manager.output_at(1300, 10).map(|o| o.id), Some(b));
        assert_eq!(manager.primary().map(|o| o.id), Some(a));

        manager.get_mut(a).unwrap().mode = OutputMode::new(640, 480, 60000);
        manager.relayout();
        assert_eq!(manager.get(b).unwrap().x, 640);
    }
}
