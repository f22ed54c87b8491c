// Cameras
//
// A camera renders into a color target (and optionally a depth target) with
// its own view and projection. The matrices live in a host-visible uniform
// buffer; render passes and the framebuffer follow whatever targets are set.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::rc::Rc;
use std::sync::Arc;

use crate::backend::buffer::GpuBuffer;
use crate::backend::framebuffer::{AttachmentLoad, Framebuffer, RenderPass};
use crate::backend::pipeline::full_viewport;
use crate::backend::texture::Texture;
use crate::backend::VulkanDevice;
use crate::error::FatalError;

/// std140 block the default vertex shader reads at set 0 binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

/// Right-handed perspective with 0..1 depth and Y pointing up on screen
pub fn vulkan_perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = Mat4::perspective_rh(fov_y, aspect, near, far);
    projection.y_axis.y *= -1.0;
    projection
}

pub fn vulkan_orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = Mat4::orthographic_rh(left, right, bottom, top, near, far);
    projection.y_axis.y *= -1.0;
    projection
}

/// Passes and framebuffer built for one particular pair of targets
pub struct CameraTargets {
    pub framebuffer: Framebuffer,
    pub load_pass: RenderPass,
    pub clear_pass: RenderPass,
    color: Rc<Texture>,
    depth: Option<Rc<Texture>>,
}

impl CameraTargets {
    fn new(device: &Arc<VulkanDevice>, color: Rc<Texture>, depth: Option<Rc<Texture>>) -> Result<Self> {
        let depth_format = depth.as_ref().map(|depth| depth.format());
        let load_pass = RenderPass::new(device, color.format(), depth_format, AttachmentLoad::Load)?;
        let clear_pass = RenderPass::new(device, color.format(), depth_format, AttachmentLoad::Clear)?;
        let framebuffer = Framebuffer::new(device, &load_pass, &color, depth.as_deref())?;
        Ok(Self {
            framebuffer,
            load_pass,
            clear_pass,
            color,
            depth,
        })
    }

    fn matches(&self, color: &Rc<Texture>, depth: Option<&Rc<Texture>>) -> bool {
        Rc::ptr_eq(&self.color, color)
            && match (&self.depth, depth) {
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

pub struct Camera {
    device: Arc<VulkanDevice>,
    color: Option<Rc<Texture>>,
    depth: Option<Rc<Texture>>,
    pub view: Mat4,
    pub projection: Mat4,
    viewport: Option<vk::Viewport>,
    uniforms: GpuBuffer,
    targets: Option<CameraTargets>,
}

impl Camera {
    pub fn new(device: &Arc<VulkanDevice>) -> Self {
        Self {
            device: device.clone(),
            color: None,
            depth: None,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            viewport: None,
            uniforms: GpuBuffer::uniform(device.clone()),
            targets: None,
        }
    }

    pub fn set_color_target(&mut self, color: Rc<Texture>) {
        self.color = Some(color);
    }

    pub fn set_depth_target(&mut self, depth: Option<Rc<Texture>>) {
        self.depth = depth;
    }

    pub fn color_target(&self) -> Option<&Rc<Texture>> {
        self.color.as_ref()
    }

    pub fn depth_target(&self) -> Option<&Rc<Texture>> {
        self.depth.as_ref()
    }

    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.view = Mat4::look_at_rh(eye, target, up);
    }

    pub fn set_perspective(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        self.projection = vulkan_perspective(fov_y, aspect, near, far);
    }

    pub fn set_orthographic(&mut self, left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) {
        self.projection = vulkan_orthographic(left, right, bottom, top, near, far);
    }

    /// Restrict drawing to part of the color target. `None` covers all of it.
    pub fn set_viewport(&mut self, viewport: Option<vk::Viewport>) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> vk::Viewport {
        match (self.viewport, &self.color) {
            (Some(viewport), _) => viewport,
            (None, Some(color)) => full_viewport(color.extent()),
            (None, None) => full_viewport(vk::Extent2D { width: 1, height: 1 }),
        }
    }

    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms {
            view: self.view.to_cols_array_2d(),
            projection: self.projection.to_cols_array_2d(),
        }
    }

    /// Mirror view and projection into the uniform buffer
    pub fn update_uniforms(&mut self) -> Result<()> {
        let uniforms = self.uniforms();
        self.uniforms.copy_to_gpu(bytemuck::bytes_of(&uniforms))
    }

    pub fn uniform_buffer(&self) -> &GpuBuffer {
        &self.uniforms
    }

    /// Passes and framebuffer for the current targets, rebuilt when either changed
    pub fn targets(&mut self) -> Result<&CameraTargets> {
        let color = self
            .color
            .clone()
            .ok_or(FatalError::MissingState("camera has no color target"))?;

        let stale = self
            .targets
            .as_ref()
            .map_or(true, |targets| !targets.matches(&color, self.depth.as_ref()));
        if stale {
            // Old framebuffer and passes go before new ones are made
            self.targets = None;
            log::debug!(
                "Rebuilding camera targets {}x{}",
                color.extent().width,
                color.extent().height
            );
            self.targets = Some(CameraTargets::new(&self.device, color, self.depth.clone())?);
        }

        self.targets
            .as_ref()
            .ok_or_else(|| FatalError::MissingState("camera targets were not built").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn uniform_block_is_two_matrices() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 128);
    }

    #[test]
    fn perspective_flips_y_and_maps_depth_to_unit_range() {
        let projection = vulkan_perspective(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);

        let above = projection * Vec4::new(0.0, 1.0, -1.0, 1.0);
        assert!(above.y / above.w < 0.0, "up must map to negative clip y");

        let near = projection * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = projection * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn orthographic_flips_y() {
        let projection = vulkan_orthographic(-1.0, 1.0, -1.0, 1.0, 0.0, 1.0);
        let top = projection * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!((top.y + 1.0).abs() < 1e-6);
    }
}
