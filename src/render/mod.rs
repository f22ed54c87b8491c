// Engine-facing rendering layer
//
// Cameras, shaders, materials and meshes, plus the renderer that turns
// "draw this mesh with this material" into backend calls.

pub mod camera;
pub mod frame;
pub mod material;
pub mod mesh;
pub mod renderer;
pub mod shader;

pub use camera::Camera;
pub use frame::FramePhase;
pub use material::Material;
pub use mesh::Mesh;
pub use renderer::Renderer;
pub use shader::Shader;
