// vkforge - a small Vulkan renderer
//
// backend: RAII wrappers over ash (device, swapchain, memory, descriptors, pipeline)
// render:  cameras, shaders, materials, meshes and the frame orchestrator
//
// Failures surface as anyhow errors rooted in `error::FatalError`.

pub mod backend;
pub mod config;
pub mod error;
pub mod render;

pub use config::Config;
pub use error::FatalError;
pub use render::Renderer;
