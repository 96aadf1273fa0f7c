//! Full-screen blit pipeline

use log::{debug, info};
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_foundation::NSString;
use objc2_metal::{
    MTLDevice, MTLFunction, MTLLibrary, MTLPixelFormat, MTLRenderPipelineDescriptor,
    MTLRenderPipelineState,
};

use super::MetalDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

/// Two triangles covering the whole drawable
pub const FULLSCREEN_QUAD: [Vertex; 6] = [
    Vertex { position: [-1.0, 1.0], tex_coord: [0.0, 0.0] },
    Vertex { position: [1.0, 1.0], tex_coord: [1.0, 0.0] },
    Vertex { position: [-1.0, -1.0], tex_coord: [0.0, 1.0] },
    Vertex { position: [1.0, 1.0], tex_coord: [1.0, 0.0] },
    Vertex { position: [1.0, -1.0], tex_coord: [1.0, 1.0] },
    Vertex { position: [-1.0, -1.0], tex_coord: [0.0, 1.0] },
];

/// Copies a composited frame texture onto a drawable
pub struct BlitPipeline {
    state: Retained<ProtocolObject<dyn MTLRenderPipelineState>>,
}

impl BlitPipeline {
    pub fn new(device: &MetalDevice) -> anyhow::Result<Self> {
        info!("Compiling blit pipeline");

        let source = NSString::from_str(include_str!("../shaders/blit.metal"));
        let library = unsafe { device.raw().newLibraryWithSource_options_error(&source, None) }
            .map_err(|e| anyhow::anyhow!("Failed to compile shaders: {:?}", e))?;

        let vertex = function(&library, "vertex_main")?;
        let fragment = function(&library, "fragment_main")?;

        let descriptor = MTLRenderPipelineDescriptor::new();
        descriptor.setVertexFunction(Some(&vertex));
        descriptor.setFragmentFunction(Some(&fragment));
        // Frames are already composited; no blending at this stage
        unsafe {
            descriptor
                .colorAttachments()
                .objectAtIndexedSubscript(0)
                .setPixelFormat(MTLPixelFormat::BGRA8Unorm);
        }

        let state = unsafe {
            device
                .raw()
                .newRenderPipelineStateWithDescriptor_error(&descriptor)
        }
        .map_err(|e| anyhow::anyhow!("Failed to create pipeline state: {:?}", e))?;
        debug!("Blit pipeline ready");

        Ok(Self { state })
    }

    pub fn state(&self) -> &ProtocolObject<dyn MTLRenderPipelineState> {
        &self.state
    }
}

fn function(
    library: &ProtocolObject<dyn MTLLibrary>,
    name: &str,
) -> anyhow::Result<Retained<ProtocolObject<dyn MTLFunction>>> {
    library
        .newFunctionWithName(&NSString::from_str(name))
        .ok_or_else(|| anyhow::anyhow!("Shader function {} not found", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_covers_clip_space() {
        assert_eq!(FULLSCREEN_QUAD[0].position, [-1.0, 1.0]);
        assert_eq!(FULLSCREEN_QUAD[0].tex_coord, [0.0, 0.0]);
        assert_eq!(FULLSCREEN_QUAD[4].position, [1.0, -1.0]);
        assert_eq!(FULLSCREEN_QUAD[4].tex_coord, [1.0, 1.0]);
    }
}
