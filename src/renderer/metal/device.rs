//! Metal device setup

use log::{debug, info};
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{MTLCommandBuffer, MTLCommandQueue, MTLCreateSystemDefaultDevice, MTLDevice};

/// The system GPU and its command queue
pub struct MetalDevice {
    device: Retained<ProtocolObject<dyn MTLDevice>>,
    command_queue: Retained<ProtocolObject<dyn MTLCommandQueue>>,
}

impl MetalDevice {
    pub fn new() -> anyhow::Result<Self> {
        info!("Creating Metal device");

        let device = MTLCreateSystemDefaultDevice()
            .ok_or_else(|| anyhow::anyhow!("No Metal device available"))?;
        debug!("Metal device: {}", device.name());

        let command_queue = device
            .newCommandQueue()
            .ok_or_else(|| anyhow::anyhow!("Failed to create command queue"))?;

        Ok(Self {
            device,
            command_queue,
        })
    }

    pub fn raw(&self) -> &ProtocolObject<dyn MTLDevice> {
        &self.device
    }

    pub fn retained(&self) -> Retained<ProtocolObject<dyn MTLDevice>> {
        self.device.clone()
    }

    /// `None` once the device has been lost
    pub fn new_command_buffer(&self) -> Option<Retained<ProtocolObject<dyn MTLCommandBuffer>>> {
        self.command_queue.commandBuffer()
    }

    pub fn name(&self) -> String {
        self.device.name().to_string()
    }
}
