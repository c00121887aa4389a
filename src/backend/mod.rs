// Backend module - Vulkan abstraction layer
//
// Thin owning wrappers around ash handles; each one releases its handle
// exactly once when dropped, in reverse creation order.

pub mod commands;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use commands::Commands;
pub use device::RenderDevice;
pub use pipeline::{Framebuffers, Pipeline, RenderPass};
pub use swapchain::Swapchain;
pub use sync::FrameSync;
