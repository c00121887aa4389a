// Command pool and recording
//
// One primary command buffer, reset and re-recorded every frame. The fence
// in FrameSync guarantees the GPU is done with it before the reset.

use ash::vk;
use std::sync::Arc;

use super::pipeline::{Pipeline, RenderPass};
use super::RenderDevice;
use crate::error::RenderError;

pub struct Commands {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    device: Arc<RenderDevice>,
}

impl Commands {
    pub fn new(device: Arc<RenderDevice>) -> Result<Self, RenderError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }?;
        log::info!("Command pool and buffer created");

        Ok(Self {
            pool,
            buffer: buffers[0],
            device,
        })
    }

    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Record the frame's command sequence against one framebuffer: clear,
    /// bind the pipeline, draw the three hard-coded vertices.
    pub fn record(
        &self,
        framebuffer: vk::Framebuffer,
        render_pass: &RenderPass,
        pipeline: &Pipeline,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Result<(), RenderError> {
        let device = &self.device.device;

        unsafe {
            device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::default();
            device
                .begin_command_buffer(self.buffer, &begin_info)
                .map_err(RenderError::RecordBegin)?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            }];

            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(self.buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            );

            // 3 vertices, 1 instance; nothing varies between frames.
            device.cmd_draw(self.buffer, 3, 1, 0, 0);

            device.cmd_end_render_pass(self.buffer);
            device
                .end_command_buffer(self.buffer)
                .map_err(RenderError::RecordEnd)?;
        }

        Ok(())
    }
}

impl Drop for Commands {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees the buffer with it.
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
