// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers over ash. Every wrapper holds an Arc<VulkanDevice> so
// the device outlives whatever was created from it.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod loader;
pub mod memory;
pub mod pipeline;
pub mod program;
pub mod render_state;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
