// Error taxonomy for the renderer
//
// Every fallible Vulkan call is checked at the call site and mapped into
// one of these variants; errors propagate by early return up to main,
// where they are logged and the process exits cleanly.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("validation layer requested but not available")]
    ValidationUnavailable,

    #[error("no suitable GPU adapter found")]
    NoSuitableDevice,

    #[error("swapchain creation failed: {0}")]
    SwapchainCreation(#[source] vk::Result),

    #[error("graphics pipeline creation failed: {0}")]
    PipelineCreation(#[source] vk::Result),

    #[error("shader bytecode not found at {}", path.display())]
    ShaderNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader bytecode at {} is not valid SPIR-V", path.display())]
    ShaderInvalid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to begin command buffer recording: {0}")]
    RecordBegin(#[source] vk::Result),

    #[error("failed to end command buffer recording: {0}")]
    RecordEnd(#[source] vk::Result),

    #[error("swapchain is stale (out of date or suboptimal)")]
    SwapchainStale,

    #[error("queue submission failed: {0}")]
    Submission(#[source] vk::Result),

    #[error("presentation failed: {0}")]
    Presentation(#[source] vk::Result),

    // Ancillary Vulkan calls (sync objects, pools, instance/device setup)
    #[error("Vulkan call failed: {0}")]
    Vk(#[from] vk::Result),
}
