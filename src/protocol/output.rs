//! wl_output event data
//!
//! What a client learns about an output when it binds the global, or again
//! after the host resizes it.

use crate::compositor::output::Subpixel;
use crate::compositor::Output;

/// wl_output.mode flags
pub const MODE_CURRENT: u32 = 1;
pub const MODE_PREFERRED: u32 = 2;

/// Output geometry event data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGeometryEvent {
    pub x: i32,
    pub y: i32,
    pub physical_width: i32,
    pub physical_height: i32,
    pub subpixel: u32,
    pub make: String,
    pub model: String,
}

/// Output mode event data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputModeEvent {
    pub flags: u32,
    pub width: i32,
    pub height: i32,
    pub refresh: i32,
}

/// Every event describing one output, in the order they are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub geometry: OutputGeometryEvent,
    pub mode: OutputModeEvent,
    /// wl_output v2+
    pub scale: i32,
    /// wl_output v4+
    pub name: String,
    pub description: String,
}

impl OutputInfo {
    pub fn from_output(output: &Output) -> Self {
        Self {
            geometry: OutputGeometryEvent {
                x: output.x,
                y: output.y,
                physical_width: output.physical_width as i32,
                physical_height: output.physical_height as i32,
                subpixel: subpixel_to_wayland(output.subpixel),
                make: output.make.clone(),
                model: output.model.clone(),
            },
            mode: OutputModeEvent {
                flags: MODE_CURRENT | MODE_PREFERRED,
                width: output.mode.width as i32,
                height: output.mode.height as i32,
                refresh: output.mode.refresh as i32,
            },
            scale: output.integer_scale(),
            name: output.name.clone(),
            description: format!("{} {}", output.make, output.model),
        }
    }
}

fn subpixel_to_wayland(subpixel: Subpixel) -> u32 {
    match subpixel {
        Subpixel::Unknown => 0,
        Subpixel::None => 1,
        Subpixel::HorizontalRgb => 2,
        Subpixel::HorizontalBgr => 3,
        Subpixel::VerticalRgb => 4,
        Subpixel::VerticalBgr => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::OutputMode;

    #[test]
    fn test_output_info() {
        let mut output = Output::new("HOST-1".to_string(), OutputMode::new(2560, 1600, 60000), 2.0);
        output.make = "Test".to_string();
        output.model = "Monitor".to_string();
        output.x = 1280;

        let info = OutputInfo::from_output(&output);
        assert_eq!(info.geometry.make, "Test");
        assert_eq!(info.geometry.x, 1280);
        assert_eq!(info.scale, 2);
        assert_eq!(info.description, "Test Monitor");
        assert_eq!(info.mode.width, 2560);
        assert_eq!(info.mode.flags, 3); // CURRENT | PREFERRED
    }
}
