//! CPU-side output image

use crate::compositor::Rect;

/// One output's pixels in physical resolution, packed 0xAARRGGBB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    /// Change size; contents are reset
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width as usize * height as usize, 0);
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub(crate) fn pixel_mut(&mut self, x: u32, y: u32) -> &mut u32 {
        &mut self.pixels[(y * self.width + x) as usize]
    }

    /// Fill a rectangle, clipped to the framebuffer
    pub fn fill_rect(&mut self, rect: Rect, color: u32) {
        let Some(rect) = rect.intersection(&self.bounds()) else {
            return;
        };
        for y in rect.y..rect.bottom() {
            let start = (y as u32 * self.width + rect.x as u32) as usize;
            self.pixels[start..start + rect.width as usize].fill(color);
        }
    }

    /// Rows of BGRA bytes, the layout Metal and CoreGraphics expect
    pub fn to_bgra(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    }

    /// Binary PPM (P6) image, alpha dropped
    pub fn to_ppm(&self) -> Vec<u8> {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.pixels.len() * 3);
        out.extend_from_slice(header.as_bytes());
        for p in &self.pixels {
            out.push((p >> 16) as u8);
            out.push((p >> 8) as u8);
            out.push(*p as u8);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_rect_clips() {
        let mut fb = Framebuffer::new(4, 4);
        fb.fill_rect(Rect::new(2, 2, 10, 10), 0xFF00FF00);
        assert_eq!(fb.pixel(1, 1), 0);
        assert_eq!(fb.pixel(2, 2), 0xFF00FF00);
        assert_eq!(fb.pixel(3, 3), 0xFF00FF00);

        fb.fill_rect(Rect::new(-5, -5, 2, 2), 0xFFFFFFFF);
        assert!(fb.pixels().iter().all(|&p| p != 0xFFFFFFFF));
    }

    #[test]
    fn test_resize_resets() {
        let mut fb = Framebuffer::new(2, 2);
        fb.fill_rect(fb.bounds(), 0xFF123456);
        fb.resize(3, 1);
        assert_eq!(fb.pixels(), &[0, 0, 0]);
    }

    #[test]
    fn test_ppm() {
        let mut fb = Framebuffer::new(2, 1);
        fb.fill_rect(Rect::new(0, 0, 1, 1), 0xFF102030);
        let ppm = fb.to_ppm();
        assert!(ppm.starts_with(b"P6\n2 1\n255\n"));
        assert_eq!(&ppm[ppm.len() - 6..], &[0x10, 0x20, 0x30, 0, 0, 0]);
    }

    #[test]
    fn test_bgra_bytes() {
        let mut fb = Framebuffer::new(1, 1);
        fb.fill_rect(fb.bounds(), 0xFF102030);
        assert_eq!(fb.to_bgra(), vec![0x30, 0x20, 0x10, 0xFF]);
    }
}
