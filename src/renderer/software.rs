//! CPU compositing of a scene snapshot into an output framebuffer
//!
//! Only damaged areas are touched. Each damaged rectangle is cleared to the
//! background and every overlapping surface is drawn over it, bottom first.
//! Sampling is nearest-neighbour at pixel centres, which keeps integer
//! scales exact and fractional ones stable from frame to frame.

use crate::compositor::{DamageRegion, Rect, SnapshotOutput, SnapshotSurface};

use super::Framebuffer;

/// Desktop colour behind every window
pub const BACKGROUND: u32 = 0xFF1E_1E2E;

#[derive(Debug, Clone)]
pub struct SoftwareCompositor {
    background: u32,
}

impl SoftwareCompositor {
    pub fn new() -> Self {
        Self::with_background(BACKGROUND)
    }

    pub fn with_background(background: u32) -> Self {
        Self {
            background: background | 0xFF00_0000,
        }
    }

    pub fn background(&self) -> u32 {
        self.background
    }

    /// Repaint the parts of `output` covered by `damage`
    ///
    /// `damage` is in global logical coordinates. Returns the framebuffer
    /// area actually repainted, in physical pixels.
    pub fn composite(
        &self,
        framebuffer: &mut Framebuffer,
        output: &SnapshotOutput,
        surfaces: &[SnapshotSurface],
        damage: &DamageRegion,
    ) -> DamageRegion {
        let mut repainted = DamageRegion::new();
        for rect in damage.clip(&output.rect).rects() {
            let Some(area) = to_physical(rect, output).intersection(&framebuffer.bounds()) else {
                continue;
            };
            framebuffer.fill_rect(area, self.background);
            for surface in surfaces {
                if let Some(visible) = to_physical(&surface.bounds(), output).intersection(&area) {
                    draw_surface(framebuffer, output, surface, visible);
                }
            }
            repainted.add(area);
        }
        repainted
    }
}

impl Default for SoftwareCompositor {
    fn default() -> Self {
        Self::new()
    }
}

fn to_physical(rect: &Rect, output: &SnapshotOutput) -> Rect {
    rect.translate(-output.rect.x, -output.rect.y)
        .scale_out(output.scale)
}

fn draw_surface(
    framebuffer: &mut Framebuffer,
    output: &SnapshotOutput,
    surface: &SnapshotSurface,
    area: Rect,
) {
    let buffer = &surface.buffer;
    if buffer.width == 0 || buffer.height == 0 {
        return;
    }
    let (tw, th) = if surface.transform.swaps_axes() {
        (buffer.height, buffer.width)
    } else {
        (buffer.width, buffer.height)
    };
    let (w, h) = (surface.size.0 as f64, surface.size.1 as f64);
    let buffer_scale = surface.scale.max(1) as f64;
    let origin_x = (output.rect.x - surface.origin.0) as f64;
    let origin_y = (output.rect.y - surface.origin.1) as f64;
    let opaque = buffer.is_opaque();

    for py in area.y..area.bottom() {
        let ly = origin_y + (py as f64 + 0.5) / output.scale;
        if ly < 0.0 || ly >= h {
            continue;
        }
        let sy = ((ly * buffer_scale) as u32).min(th - 1);
        for px in area.x..area.right() {
            let lx = origin_x + (px as f64 + 0.5) / output.scale;
            if lx < 0.0 || lx >= w {
                continue;
            }
            let sx = ((lx * buffer_scale) as u32).min(tw - 1);
            let (bx, by) = surface
                .transform
                .to_buffer(sx, sy, buffer.width, buffer.height);
            let src = buffer.pixel(bx, by);
            let dst = framebuffer.pixel_mut(px as u32, py as u32);
            *dst = if opaque {
                src | 0xFF00_0000
            } else {
                blend(src, *dst)
            };
        }
    }
}

/// Premultiplied source-over
fn blend(src: u32, dst: u32) -> u32 {
    let alpha = src >> 24;
    if alpha == 0xFF {
        return src;
    }
    let inv = 255 - alpha;
    let channel = |shift: u32| {
        let s = (src >> shift) & 0xFF;
        let d = (dst >> shift) & 0xFF;
        (s + (d * inv + 127) / 255).min(255) << shift
    };
    channel(24) | channel(16) | channel(8) | channel(0)
}
