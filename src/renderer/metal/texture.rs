//! GPU copy of an output framebuffer

use std::ffi::c_void;
use std::ptr::NonNull;

use log::debug;
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{
    MTLDevice, MTLOrigin, MTLPixelFormat, MTLRegion, MTLSize, MTLTexture, MTLTextureDescriptor,
    MTLTextureUsage,
};

use crate::compositor::{DamageRegion, Rect};
use crate::renderer::{Framebuffer, PresentError};

use super::MetalDevice;

/// A BGRA texture mirroring one framebuffer
pub struct FrameTexture {
    texture: Retained<ProtocolObject<dyn MTLTexture>>,
    width: u32,
    height: u32,
}

impl FrameTexture {
    pub fn new(device: &MetalDevice, width: u32, height: u32) -> Result<Self, PresentError> {
        let descriptor = MTLTextureDescriptor::new();
        unsafe {
            descriptor.setWidth(width.max(1) as usize);
            descriptor.setHeight(height.max(1) as usize);
        }
        descriptor.setPixelFormat(MTLPixelFormat::BGRA8Unorm);
        descriptor.setUsage(MTLTextureUsage::ShaderRead);

        let texture = device
            .raw()
            .newTextureWithDescriptor(&descriptor)
            .ok_or(PresentError::DeviceLost)?;
        debug!("Created {}x{} frame texture", width, height);
        Ok(Self {
            texture,
            width,
            height,
        })
    }

    pub fn matches(&self, frame: &Framebuffer) -> bool {
        self.width == frame.width() && self.height == frame.height()
    }

    pub fn raw(&self) -> &ProtocolObject<dyn MTLTexture> {
        &self.texture
    }

    /// Copy the damaged rectangles of `frame` into the texture
    pub fn upload(&self, frame: &Framebuffer, damage: &DamageRegion) {
        let stride = frame.width() as usize * 4;
        for rect in damage.rects() {
            let Some(rect) = rect.intersection(&frame.bounds()) else {
                continue;
            };
            self.upload_rect(frame, rect, stride);
        }
    }

    fn upload_rect(&self, frame: &Framebuffer, rect: Rect, stride: usize) {
        let first = rect.y as usize * frame.width() as usize + rect.x as usize;
        let pixels = &frame.pixels()[first..];
        let region = MTLRegion {
            origin: MTLOrigin {
                x: rect.x as usize,
                y: rect.y as usize,
                z: 0,
            },
            size: MTLSize {
                width: rect.width as usize,
                height: rect.height as usize,
                depth: 1,
            },
        };
        // Little-endian 0xAARRGGBB words are BGRA bytes in memory
        let Some(bytes) = NonNull::new(pixels.as_ptr() as *mut c_void) else {
            return;
        };
        unsafe {
            self.texture
                .replaceRegion_mipmapLevel_withBytes_bytesPerRow(region, 0, bytes, stride);
        }
    }
}
