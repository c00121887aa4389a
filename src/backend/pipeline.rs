// Render pass, framebuffers and graphics pipeline
//
// The pipeline is the immutable bundle of shader stages and fixed-function
// state for the one draw this renderer issues. Everything is sized against
// the negotiated swapchain extent.

use ash::vk;
use std::sync::Arc;

use super::shader::ShaderModule;
use super::RenderDevice;
use crate::error::RenderError;

/// Describes how the single color attachment is used: cleared on load,
/// stored on end, transitioned from undefined to presentable.
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    device: Arc<RenderDevice>,
}

impl RenderPass {
    pub fn new(device: Arc<RenderDevice>, format: vk::Format) -> Result<Self, RenderError> {
        let color_attachment = vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_attachment_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)];

        // Color output must not start until the acquire semaphore has
        // signalled; gating on the color-attachment stage with no prior
        // access closes that race while leaving earlier stages free to run.
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let attachments = [color_attachment];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&create_info, None) }?;
        log::info!("Render pass created");

        Ok(Self {
            render_pass,
            device,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// One framebuffer per swapchain image, binding that image's view to the
/// render pass's color slot at the swapchain extent.
pub struct Framebuffers {
    framebuffers: Vec<vk::Framebuffer>,
    device: Arc<RenderDevice>,
}

impl Framebuffers {
    pub fn new(
        device: Arc<RenderDevice>,
        render_pass: &RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self, RenderError> {
        let framebuffers = image_views
            .iter()
            .map(|&view| {
                let attachments = [view];
                let create_info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass.render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                unsafe { device.device.create_framebuffer(&create_info, None) }
                    .map_err(RenderError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Framebuffers created");

        Ok(Self {
            framebuffers,
            device,
        })
    }

    pub fn get(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<RenderDevice>,
}

impl Pipeline {
    pub fn new(
        device: Arc<RenderDevice>,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        vert_code: &[u32],
        frag_code: &[u32],
    ) -> Result<Self, RenderError> {
        // Shader modules only live until the pipeline is linked.
        let vert_module = ShaderModule::new(device.clone(), vert_code)?;
        let frag_module = ShaderModule::new(device.clone(), frag_code)?;

        let entry_point = c"main";
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module.raw())
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module.raw())
                .name(entry_point),
        ];

        // No vertex buffers: the triangle's positions live in the vertex
        // shader itself.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Static viewport/scissor covering the full extent. Dynamic state
        // would let the pipeline survive a resize, but this renderer does
        // not handle resizing anyway.
        let viewports = [vk::Viewport::default()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)];

        let scissors = [vk::Rect2D::default()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent)];

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // No descriptor sets, no push constants.
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(RenderError::PipelineCreation)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.render_pass)
            .subpass(0);

        let pipeline = unsafe {
            device.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, e)| e);

        let pipeline = match pipeline {
            Ok(pipelines) => pipelines[0],
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(RenderError::PipelineCreation(e));
            }
        };
        log::info!("Graphics pipeline created");

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
