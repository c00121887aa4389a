// Synchronization primitives
//
// One fence for CPU-GPU sync, two semaphores for GPU-GPU ordering. A single
// set: this renderer keeps exactly one frame in flight.

use ash::vk;
use std::sync::Arc;

use super::RenderDevice;
use crate::error::RenderError;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    device: Arc<RenderDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<RenderDevice>) -> Result<Self, RenderError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Created signaled so the first frame's wait returns immediately.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let sync = unsafe {
            Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight: device.device.create_fence(&fence_info, None)?,
                device: device.clone(),
            }
        };
        log::info!("Sync objects created");

        Ok(sync)
    }

    /// Block until the previous submission has fully retired, then re-arm
    /// the fence for the next one. No timeout: a hung driver hangs us.
    pub fn wait_and_reset(&self) -> Result<(), RenderError> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight], true, u64::MAX)?;
            self.device.device.reset_fences(&[self.in_flight])?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight, None);
        }
    }
}
