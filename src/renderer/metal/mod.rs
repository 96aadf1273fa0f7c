//! Metal presentation on macOS
//!
//! Frames are composited on the CPU; this module uploads the damaged part
//! of each output framebuffer into a texture and blits it onto the
//! output's `CAMetalLayer`.

pub mod device;
pub mod pipeline;
pub mod texture;

pub use device::MetalDevice;
pub use pipeline::BlitPipeline;
pub use texture::FrameTexture;

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;

use log::{debug, info};
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_foundation::CGSize;
use objc2_metal::{
    MTLClearColor, MTLCommandBuffer, MTLCommandEncoder, MTLDrawable, MTLLoadAction,
    MTLPixelFormat, MTLPrimitiveType, MTLRenderCommandEncoder, MTLRenderPassDescriptor,
    MTLStoreAction,
};
use objc2_quartz_core::{CAMetalDrawable, CAMetalLayer};

use crate::compositor::{DamageRegion, OutputId};

use super::{Framebuffer, PresentError, Presenter};

struct OutputLayer {
    layer: Retained<CAMetalLayer>,
    texture: Option<FrameTexture>,
}

/// Presents framebuffers through Metal, one layer per output
pub struct MetalPresenter {
    device: MetalDevice,
    pipeline: BlitPipeline,
    layers: HashMap<OutputId, OutputLayer>,
}

impl MetalPresenter {
    pub fn new() -> anyhow::Result<Self> {
        let device = MetalDevice::new()?;
        let pipeline = BlitPipeline::new(&device)?;
        info!("Metal presenter using {}", device.name());
        Ok(Self {
            device,
            pipeline,
            layers: HashMap::new(),
        })
    }

    /// Route an output's frames to a host layer
    pub fn attach_layer(&mut self, output: OutputId, layer: Retained<CAMetalLayer>) {
        layer.setDevice(Some(&self.device.retained()));
        layer.setPixelFormat(MTLPixelFormat::BGRA8Unorm);
        layer.setFramebufferOnly(true);
        self.layers.insert(
            output,
            OutputLayer {
                layer,
                texture: None,
            },
        );
    }
}

impl Presenter for MetalPresenter {
    fn present(
        &mut self,
        output: OutputId,
        frame: &Framebuffer,
        damage: &DamageRegion,
    ) -> Result<(), PresentError> {
        let target = self
            .layers
            .get_mut(&output)
            .ok_or_else(|| PresentError::Other(format!("no host layer for {:?}", output)))?;

        let size = target.layer.drawableSize();
        if size.width as u32 != frame.width() || size.height as u32 != frame.height() {
            debug!(
                "Drawable {}x{} does not match frame {}x{}",
                size.width,
                size.height,
                frame.width(),
                frame.height()
            );
            target
                .layer
                .setDrawableSize(CGSize::new(frame.width() as f64, frame.height() as f64));
            return Err(PresentError::Resized);
        }

        let texture = match target.texture.take() {
            Some(texture) if texture.matches(frame) => {
                texture.upload(frame, damage);
                texture
            }
            _ => {
                let texture = FrameTexture::new(&self.device, frame.width(), frame.height())?;
                texture.upload(frame, &DamageRegion::from_rect(frame.bounds()));
                texture
            }
        };

        let drawable = target
            .layer
            .nextDrawable()
            .ok_or_else(|| PresentError::Other("no drawable available".into()))?;
        let command_buffer = self
            .device
            .new_command_buffer()
            .ok_or(PresentError::DeviceLost)?;
        encode_blit(&self.pipeline, &command_buffer, &drawable, &texture)?;

        let drawable: &ProtocolObject<dyn MTLDrawable> = ProtocolObject::from_ref(&*drawable);
        command_buffer.presentDrawable(drawable);
        command_buffer.commit();

        target.texture = Some(texture);
        Ok(())
    }

    fn remove_output(&mut self, output: OutputId) {
        self.layers.remove(&output);
    }
}

fn encode_blit(
    pipeline: &BlitPipeline,
    command_buffer: &ProtocolObject<dyn MTLCommandBuffer>,
    drawable: &ProtocolObject<dyn CAMetalDrawable>,
    texture: &FrameTexture,
) -> Result<(), PresentError> {
    let pass = MTLRenderPassDescriptor::new();
    unsafe {
        let attachment = pass.colorAttachments().objectAtIndexedSubscript(0);
        attachment.setTexture(Some(&drawable.texture()));
        attachment.setLoadAction(MTLLoadAction::DontCare);
        attachment.setStoreAction(MTLStoreAction::Store);
        attachment.setClearColor(MTLClearColor {
            red: 0.0,
            green: 0.0,
            blue: 0.0,
            alpha: 1.0,
        });
    }

    let encoder = command_buffer
        .renderCommandEncoderWithDescriptor(&pass)
        .ok_or(PresentError::DeviceLost)?;
    encoder.setRenderPipelineState(pipeline.state());

    let vertices = &pipeline::FULLSCREEN_QUAD;
    let Some(bytes) = NonNull::new(vertices.as_ptr() as *mut c_void) else {
        encoder.endEncoding();
        return Err(PresentError::Other("null vertex data".into()));
    };
    unsafe {
        encoder.setVertexBytes_length_atIndex(bytes, std::mem::size_of_val(vertices), 0);
        encoder.setFragmentTexture_atIndex(Some(texture.raw()), 0);
        encoder.drawPrimitives_vertexStart_vertexCount(
            MTLPrimitiveType::Triangle,
            0,
            vertices.len(),
        );
    }
    encoder.endEncoding();
    Ok(())
}
