// Minimal Vulkan bootstrap: one window, one pipeline, one triangle.
//
// The interesting part is the per-frame protocol in `Renderer::render_frame`:
// wait for the previous submission, acquire a swapchain image, re-record the
// command buffer, submit gated on the acquire semaphore, present gated on the
// render-finished semaphore. A single fence keeps exactly one frame in
// flight.

mod backend;
mod config;
mod error;

use anyhow::{Context, Result};
use ash::vk;
use backend::{shader, Commands, Framebuffers, FrameSync, Pipeline, RenderDevice, RenderPass, Swapchain};
use config::Config;
use error::RenderError;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

fn main() {
    init_logging();

    // Errors surface here, get logged, and the process still exits 0.
    if let Err(e) = run() {
        log::error!("Fatal: {:#}", e);
    }
}

fn run() -> Result<()> {
    let config = Config::load();
    log::info!("Starting renderer");
    log::info!(
        "Window: {}x{}, preferred present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.failure.map_or(Ok(()), |e| Err(e.into()))
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

/// All GPU objects, declared so that field drop order is the reverse of
/// creation order: sync and commands go first, the device last.
struct Renderer {
    sync: FrameSync,
    commands: Commands,
    framebuffers: Framebuffers,
    pipeline: Pipeline,
    render_pass: RenderPass,
    swapchain: Swapchain,
    device: Arc<RenderDevice>,
    clear_color: [f32; 4],
}

impl Renderer {
    fn new(window: &Window, config: &Config) -> Result<Self, RenderError> {
        let device = RenderDevice::new(window, config)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            size.width,
            size.height,
            config.preferred_present_mode(),
        )?;

        let render_pass = RenderPass::new(device.clone(), swapchain.format)?;

        let vert_code = shader::load_spv(shader::VERTEX_SHADER_PATH)?;
        let frag_code = shader::load_spv(shader::FRAGMENT_SHADER_PATH)?;
        let pipeline = Pipeline::new(
            device.clone(),
            &render_pass,
            swapchain.extent,
            &vert_code,
            &frag_code,
        )?;

        let framebuffers = Framebuffers::new(
            device.clone(),
            &render_pass,
            &swapchain.image_views,
            swapchain.extent,
        )?;

        let commands = Commands::new(device.clone())?;
        let sync = FrameSync::new(device.clone())?;

        log::info!("Renderer initialized");

        Ok(Self {
            sync,
            commands,
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
            device,
            clear_color: config.graphics.clear_color,
        })
    }

    /// One full frame: wait, acquire, record, submit, present.
    fn render_frame(&mut self) -> Result<(), RenderError> {
        // Wait for the previous submission so the command buffer is free to
        // reuse; the fence starts signaled, so the first frame sails through.
        self.sync.wait_and_reset()?;

        let image_index = self.swapchain.acquire(self.sync.image_available)?;

        self.commands.record(
            self.framebuffers.get(image_index),
            &self.render_pass,
            &self.pipeline,
            self.swapchain.extent,
            self.clear_color,
        )?;

        // The wait is gated at color-attachment output, so earlier pipeline
        // stages may start before the image is actually available.
        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.commands.buffer()];
        let signal_semaphores = [self.sync.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info],
                    self.sync.in_flight,
                )
                .map_err(RenderError::Submission)?;
        }

        self.swapchain.present(
            self.device.present_queue,
            image_index,
            self.sync.render_finished,
        )
    }

    fn wait_idle(&self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device wait failed during shutdown: {}", e);
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // No in-flight work may reference the resources about to go away.
        self.wait_idle();
        log::info!("Renderer shut down");
    }
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    failure: Option<RenderError>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: RenderError) {
        if let Some(renderer) = &self.renderer {
            renderer.wait_idle();
        }
        self.failure = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        log::info!("Window created");

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down");
                if let Some(renderer) = &self.renderer {
                    renderer.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                // The close signal is only observed between frames; a frame
                // either completes or fails fatally.
                if event_loop.exiting() {
                    return;
                }
                let result = match self.renderer.as_mut() {
                    Some(renderer) => renderer.render_frame(),
                    None => return,
                };
                if let Err(e) = result {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        log::info!("ESC pressed, exiting");
                        if let Some(renderer) = &self.renderer {
                            renderer.wait_idle();
                        }
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
