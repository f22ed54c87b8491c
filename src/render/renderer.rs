// Frame orchestration
//
// FRAME FLOW:
// 1. begin_frame: wait for the ring slot's fence, acquire a swapchain image
// 2. draw_mesh / clear_screen: one synchronous submission each, rendering
//    into the active camera's targets
// 3. end_frame: copy the default color target into the swapchain image,
//    present, advance the ring
//
// Every submission blocks on queue idle. Ordering inside a frame comes from
// the semaphore chain:
//   image_available + render_finished -> copy -> color_target_available -> present

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use super::camera::Camera;
use super::frame::FramePhase;
use super::material::{Material, MaterialDescription};
use super::mesh::Mesh;
use super::shader::{load_program, Shader, ShaderDescription};
use crate::backend::buffer::GpuBuffer;
use crate::backend::commands::{submit_one_shot, SubmitSync};
use crate::backend::device::DeviceOptions;
use crate::backend::pipeline::{Pipeline, Topology};
use crate::backend::program::{program_key, ShaderProgram};
use crate::backend::swapchain::AcquireOutcome;
use crate::backend::sync::{FrameRing, FrameSync};
use crate::backend::texture::{copy_image, CopyEndpoint, LayoutTransition, Sampler, Texture};
use crate::backend::vertex::VertexLayout;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::FatalError;

const DEFAULT_VERTEX_SHADER: &str = include_str!("../../shaders/default.vert");
const DEFAULT_FRAGMENT_SHADER: &str = include_str!("../../shaders/default.frag");

/// Descriptor slots the renderer fills on every draw
pub const CAMERA_SET: u32 = 0;
pub const CAMERA_BINDING: u32 = 0;
pub const MODEL_BINDING: u32 = 1;
/// Material texture slot N is bound at (MATERIAL_SET, N)
pub const MATERIAL_SET: u32 = 1;

#[cfg(feature = "glsl")]
fn default_program(device: &Arc<VulkanDevice>) -> Result<ShaderProgram> {
    ShaderProgram::from_glsl(device, "default", DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER)
}

#[cfg(not(feature = "glsl"))]
fn default_program(device: &Arc<VulkanDevice>) -> Result<ShaderProgram> {
    let _ = (DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER);
    ShaderProgram::load(
        device,
        Path::new("shaders/default.vert.spv"),
        Path::new("shaders/default.frag.spv"),
        "",
        None,
    )
}

fn create_default_targets(
    device: &Arc<VulkanDevice>,
    extent: vk::Extent2D,
    format: vk::Format,
) -> Result<(Rc<Texture>, Rc<Texture>)> {
    let color = Texture::create_color_target(device, extent, format)
        .context("Failed to create default color target")?;
    let depth = Texture::create_depth_target(device, extent)
        .context("Failed to create default depth target")?;
    Ok((Rc::new(color), Rc::new(depth)))
}

fn raw_handles<W>(window: &W) -> Result<(RawDisplayHandle, RawWindowHandle), FatalError>
where
    W: HasDisplayHandle + HasWindowHandle,
{
    let unavailable = |what: &str, e: raw_window_handle::HandleError| {
        FatalError::Platform(format!("{} handle unavailable: {}", what, e))
    };
    let display = window
        .display_handle()
        .map_err(|e| unavailable("display", e))?
        .as_raw();
    let window = window
        .window_handle()
        .map_err(|e| unavailable("window", e))?
        .as_raw();
    Ok((display, window))
}

fn same_texture(a: Option<&Rc<Texture>>, b: &Rc<Texture>) -> bool {
    a.is_some_and(|a| Rc::ptr_eq(a, b))
}

pub struct Renderer {
    frames: FrameRing<FrameSync>,
    phase: FramePhase,
    image_index: u32,
    /// The current slot's render_finished semaphore has a pending signal
    render_finished_pending: bool,
    swapchain_dirty: bool,
    window_extent: vk::Extent2D,
    present_mode: Option<vk::PresentModeKHR>,

    pipeline: Pipeline,
    model_uniforms: GpuBuffer,

    camera: Rc<RefCell<Camera>>,
    default_camera: Rc<RefCell<Camera>>,
    material: Rc<Material>,
    default_material: Rc<Material>,
    white_texture: Rc<Texture>,
    sampler: Rc<Sampler>,
    default_color: Rc<Texture>,
    default_depth: Rc<Texture>,

    textures: HashMap<PathBuf, Rc<Texture>>,
    programs: HashMap<String, Rc<ShaderProgram>>,
    shaders: HashMap<PathBuf, Rc<Shader>>,
    materials: HashMap<PathBuf, Rc<Material>>,

    swapchain: Option<Swapchain>,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new<W>(window: &W, width: u32, height: u32, config: &Config) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let (display, window_handle) = raw_handles(window)?;

        let device = VulkanDevice::new(
            &config.window.title,
            display,
            window_handle,
            DeviceOptions {
                validation: config.validation_enabled(),
                allow_integrated_gpu: config.graphics.allow_integrated_gpu,
            },
        )?;

        let present_mode = config.present_mode_override();
        let swapchain = Swapchain::new(device.clone(), width, height, present_mode)?;
        let (default_color, default_depth) =
            create_default_targets(&device, swapchain.extent, swapchain.format)?;

        let frames = FrameRing::try_new(config.graphics.max_frames_in_flight, |_| {
            FrameSync::new(&device)
        })?;

        let sampler = Sampler::linear_repeat(&device)?;
        let white_texture = Rc::new(
            Texture::from_rgba8(&device, 1, 1, &[255, 255, 255, 255], sampler.clone())
                .context("Failed to create fallback texture")?,
        );

        let program = Rc::new(default_program(&device).context("Failed to build default shader")?);
        let mut programs = HashMap::new();
        programs.insert(program.key.clone(), program.clone());
        let default_shader = Rc::new(Shader::new("default", program));
        let default_material = Rc::new(Material::new("default", default_shader));

        let default_camera = Rc::new(RefCell::new(Camera::new(&device)));
        {
            let mut camera = default_camera.borrow_mut();
            camera.set_color_target(default_color.clone());
            camera.set_depth_target(Some(default_depth.clone()));
            camera.look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
            camera.set_perspective(
                60f32.to_radians(),
                aspect_ratio(swapchain.extent),
                0.1,
                100.0,
            );
        }

        log::info!(
            "Renderer ready: {} frames in flight, swapchain {}x{}",
            frames.len(),
            swapchain.extent.width,
            swapchain.extent.height
        );

        Ok(Self {
            frames,
            phase: FramePhase::Idle,
            image_index: 0,
            render_finished_pending: false,
            swapchain_dirty: false,
            window_extent: vk::Extent2D { width, height },
            present_mode,
            pipeline: Pipeline::new(device.clone()),
            model_uniforms: GpuBuffer::uniform(device.clone()),
            camera: default_camera.clone(),
            default_camera,
            material: default_material.clone(),
            default_material,
            white_texture,
            sampler,
            default_color,
            default_depth,
            textures: HashMap::new(),
            programs,
            shaders: HashMap::new(),
            materials: HashMap::new(),
            swapchain: Some(swapchain),
            device,
        })
    }

    // -------------------------------------------------------------------------
    // Frame
    // -------------------------------------------------------------------------

    /// Start a frame. Returns false when no image could be acquired (minimized
    /// window, swapchain out of date); skip drawing until the next call.
    pub fn begin_frame(&mut self) -> Result<bool> {
        let acquired = self.phase.acquire()?;

        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(false);
        }
        if self.swapchain_dirty {
            self.recreate_swapchain()?;
        }

        let slot = self.frames.current();
        slot.wait()?;

        let outcome = self
            .swapchain()?
            .acquire_next_image(u64::MAX, slot.image_available)?;
        let (index, suboptimal) = match outcome {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.swapchain_dirty = true;
                return Ok(false);
            }
        };
        if suboptimal {
            self.swapchain_dirty = true;
        }

        // Only now is the slot's fence going to be signaled again by end_frame
        slot.reset()?;

        self.image_index = index;
        self.render_finished_pending = false;
        self.phase = acquired;
        log::trace!(
            "Frame slot {} acquired image {}",
            self.frames.current_index(),
            index
        );
        Ok(true)
    }

    /// Draw `mesh` with the active material into the active camera's targets
    pub fn draw_mesh(&mut self, mesh: &Mesh, model: Mat4) -> Result<()> {
        let recording = self.phase.record()?;
        if mesh.vertex_count() == 0 {
            self.phase = recording;
            return Ok(());
        }

        self.model_uniforms
            .copy_to_gpu(bytemuck::bytes_of(&model.to_cols_array_2d()))?;

        let material = self.material.clone();
        let shader = material.shader();
        self.pipeline.set_topology(mesh.topology());
        self.pipeline.set_shader_stages(shader.program());
        self.pipeline.set_render_state(&shader.state);
        self.pipeline.set_vertex_layout(mesh.layout());

        let camera_cell = self.camera.clone();
        let mut camera = camera_cell.borrow_mut();
        camera.update_uniforms()?;

        let raw = self.device.raw();
        shader.bind_uniform_buffer(raw, CAMERA_SET, CAMERA_BINDING, camera.uniform_buffer())?;
        shader.bind_uniform_buffer(raw, CAMERA_SET, MODEL_BINDING, &self.model_uniforms)?;
        self.bind_material_textures(&material)?;

        check_attachment_layouts(&camera)?;
        let viewport = camera.viewport();
        let targets = camera.targets()?;
        self.pipeline.set_render_pass(targets.load_pass.render_pass);
        self.pipeline.set_viewport(viewport);
        self.pipeline.update()?;

        let pipeline = self.pipeline.handle();
        let layout = self.pipeline.layout();
        let descriptor_sets = shader.descriptor_sets()?;
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(targets.load_pass.render_pass)
            .framebuffer(targets.framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: targets.framebuffer.extent,
            });

        submit_one_shot(&self.device, &self.draw_sync(), |raw, cmd| {
            unsafe {
                raw.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
                raw.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer()], &[0]);
                if let Some(index_buffer) = mesh.index_buffer() {
                    raw.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                }
                // Sets without bindings have no handle and are left unbound
                for (index, &set) in descriptor_sets.iter().enumerate() {
                    if set != vk::DescriptorSet::null() {
                        raw.cmd_bind_descriptor_sets(
                            cmd,
                            vk::PipelineBindPoint::GRAPHICS,
                            layout,
                            index as u32,
                            &[set],
                            &[],
                        );
                    }
                }
                if mesh.is_indexed() {
                    raw.cmd_draw_indexed(cmd, mesh.index_count(), 1, 0, 0, 0);
                } else {
                    raw.cmd_draw(cmd, mesh.vertex_count(), 1, 0, 0);
                }
                raw.cmd_end_render_pass(cmd);
            }
            Ok(())
        })
        .context("Failed to submit draw")?;

        self.render_finished_pending = true;
        self.phase = recording;
        Ok(())
    }

    /// Clear the active camera's color target (and depth to 1.0)
    pub fn clear_screen(&mut self, color: [f32; 4]) -> Result<()> {
        let recording = self.phase.record()?;

        let camera_cell = self.camera.clone();
        let mut camera = camera_cell.borrow_mut();
        check_attachment_layouts(&camera)?;
        let targets = camera.targets()?;

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }];
        if targets.clear_pass.has_depth {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(targets.clear_pass.render_pass)
            .framebuffer(targets.framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: targets.framebuffer.extent,
            })
            .clear_values(&clear_values);

        submit_one_shot(&self.device, &self.draw_sync(), |raw, cmd| {
            unsafe {
                raw.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                raw.cmd_end_render_pass(cmd);
            }
            Ok(())
        })
        .context("Failed to submit clear")?;

        self.render_finished_pending = true;
        self.phase = recording;
        Ok(())
    }

    /// Copy the default color target to the acquired image, present, advance the ring
    pub fn end_frame(&mut self) -> Result<()> {
        let submitted = self.phase.submit()?;

        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(FatalError::MissingState("swapchain is not available"))?;
        let image = swapchain
            .images
            .get(self.image_index as usize)
            .copied()
            .ok_or(FatalError::MissingState("acquired image index out of range"))?;
        let destination = CopyEndpoint {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            extent: swapchain.extent,
            before: LayoutTransition::UNDEFINED_TO_TRANSFER_DST,
            after: LayoutTransition::TRANSFER_DST_TO_PRESENT,
        };
        let source = self.default_color.copy_endpoint(
            LayoutTransition::COLOR_ATTACHMENT_TO_TRANSFER_SRC,
            LayoutTransition::TRANSFER_SRC_TO_COLOR_ATTACHMENT,
        )?;

        let slot = self.frames.current();
        let mut sync = SubmitSync::none().wait(slot.image_available, vk::PipelineStageFlags::TRANSFER);
        if self.render_finished_pending {
            sync = sync.wait(slot.render_finished, vk::PipelineStageFlags::TRANSFER);
        }
        let sync = sync
            .signal(slot.color_target_available)
            .fence(slot.in_flight_fence);

        copy_image(&self.device, &source, &destination, &sync)
            .context("Failed to copy color target to swapchain")?;
        self.default_color.copy_finished(&source);
        self.render_finished_pending = false;
        self.phase = submitted;

        let rebuild = swapchain.present(
            self.device.present_queue,
            self.image_index,
            &[slot.color_target_available],
        )?;
        self.phase = self.phase.present()?;
        if rebuild {
            log::debug!("Swapchain suboptimal or out of date on present");
            self.swapchain_dirty = true;
        }

        self.phase = self.phase.finish()?;
        self.frames.advance();
        Ok(())
    }

    fn draw_sync(&self) -> SubmitSync {
        if self.render_finished_pending {
            SubmitSync::none()
        } else {
            SubmitSync::none().signal(self.frames.current().render_finished)
        }
    }

    fn bind_material_textures(&self, material: &Material) -> Result<()> {
        let shader = material.shader();
        let raw = self.device.raw();
        for slot in shader.program().bindings().set(MATERIAL_SET as usize).iter().flatten() {
            let texture = material
                .texture(slot.binding as usize)
                .unwrap_or(&self.white_texture);
            shader.bind_texture(raw, MATERIAL_SET, slot.binding, texture)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Swapchain
    // -------------------------------------------------------------------------

    /// Flag the swapchain for recreation at the next begin_frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.swapchain_dirty = true;
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| FatalError::MissingState("swapchain is not available").into())
    }

    /// Stop-the-world rebuild of the swapchain and the default targets
    fn recreate_swapchain(&mut self) -> Result<()> {
        log::info!(
            "Recreating swapchain for {}x{}",
            self.window_extent.width,
            self.window_extent.height
        );
        self.device.wait_idle()?;

        self.swapchain = None;
        let swapchain = Swapchain::new(
            self.device.clone(),
            self.window_extent.width,
            self.window_extent.height,
            self.present_mode,
        )?;

        if swapchain.extent != self.default_color.extent()
            || swapchain.format != self.default_color.format()
        {
            let (color, depth) = create_default_targets(&self.device, swapchain.extent, swapchain.format)?;
            self.retarget_cameras(&color, &depth);
            self.default_color = color;
            self.default_depth = depth;
            self.default_camera.borrow_mut().set_perspective(
                60f32.to_radians(),
                aspect_ratio(swapchain.extent),
                0.1,
                100.0,
            );
        }

        self.swapchain = Some(swapchain);
        self.swapchain_dirty = false;
        Ok(())
    }

    /// Point cameras still rendering into the old default targets at the new ones
    fn retarget_cameras(&self, color: &Rc<Texture>, depth: &Rc<Texture>) {
        for camera in [&self.default_camera, &self.camera] {
            let mut camera = camera.borrow_mut();
            if same_texture(camera.color_target(), &self.default_color) {
                camera.set_color_target(color.clone());
            }
            if same_texture(camera.depth_target(), &self.default_depth) {
                camera.set_depth_target(Some(depth.clone()));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Game-facing state
    // -------------------------------------------------------------------------

    pub fn set_camera(&mut self, camera: Rc<RefCell<Camera>>) {
        self.camera = camera;
    }

    pub fn reset_camera(&mut self) {
        self.camera = self.default_camera.clone();
    }

    pub fn camera(&self) -> &Rc<RefCell<Camera>> {
        &self.camera
    }

    pub fn default_camera(&self) -> &Rc<RefCell<Camera>> {
        &self.default_camera
    }

    pub fn set_material(&mut self, material: Rc<Material>) {
        self.material = material;
    }

    pub fn reset_material(&mut self) {
        self.material = self.default_material.clone();
    }

    pub fn default_material(&self) -> &Rc<Material> {
        &self.default_material
    }

    pub fn default_color_target(&self) -> &Rc<Texture> {
        &self.default_color
    }

    pub fn default_depth_target(&self) -> &Rc<Texture> {
        &self.default_depth
    }

    pub fn current_frame_index(&self) -> usize {
        self.frames.current_index()
    }

    pub fn frame_phase(&self) -> FramePhase {
        self.phase
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or(self.window_extent, |swapchain| swapchain.extent)
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    // -------------------------------------------------------------------------
    // Factories
    // -------------------------------------------------------------------------

    /// Sampled texture from an image file, cached by path
    pub fn create_or_get_texture(&mut self, path: impl AsRef<Path>) -> Result<Rc<Texture>> {
        let path = path.as_ref();
        if let Some(texture) = self.textures.get(path) {
            return Ok(texture.clone());
        }
        let texture = Rc::new(Texture::from_file(&self.device, path, self.sampler.clone())?);
        self.textures.insert(path.to_path_buf(), texture.clone());
        Ok(texture)
    }

    /// Sampled texture from decoded pixels (not cached)
    pub fn create_texture_from_image(&self, image: &image::RgbaImage) -> Result<Rc<Texture>> {
        let (width, height) = image.dimensions();
        Ok(Rc::new(Texture::from_rgba8(
            &self.device,
            width,
            height,
            image.as_raw(),
            self.sampler.clone(),
        )?))
    }

    /// Color render target in the swapchain's format so it can be presented
    pub fn create_color_target(&self, width: u32, height: u32) -> Result<Rc<Texture>> {
        let format = self.default_color.format();
        Ok(Rc::new(Texture::create_color_target(
            &self.device,
            vk::Extent2D { width, height },
            format,
        )?))
    }

    pub fn create_depth_target(&self, width: u32, height: u32) -> Result<Rc<Texture>> {
        Ok(Rc::new(Texture::create_depth_target(
            &self.device,
            vk::Extent2D { width, height },
        )?))
    }

    /// Program for a vertex/fragment pair, cached by source key
    pub fn create_or_get_program(
        &mut self,
        vertex: &Path,
        fragment: &Path,
        defines: &str,
    ) -> Result<Rc<ShaderProgram>> {
        let key = program_key(vertex, fragment, defines);
        if let Some(program) = self.programs.get(&key) {
            return Ok(program.clone());
        }
        let program = Rc::new(ShaderProgram::load(&self.device, vertex, fragment, defines, None)?);
        self.programs.insert(key, program.clone());
        Ok(program)
    }

    fn program_for(&mut self, description: &ShaderDescription) -> Result<Rc<ShaderProgram>> {
        let mut key = program_key(&description.vertex, &description.fragment, &description.defines);
        if let Some(bindings) = &description.bindings {
            key.push_str(&format!("|{:?}", bindings));
        }
        if let Some(program) = self.programs.get(&key) {
            return Ok(program.clone());
        }
        let program = Rc::new(load_program(&self.device, description)?);
        self.programs.insert(key, program.clone());
        Ok(program)
    }

    /// Shader from an XML file, cached by path
    pub fn create_or_get_shader(&mut self, path: impl AsRef<Path>) -> Result<Rc<Shader>> {
        let path = path.as_ref();
        if let Some(shader) = self.shaders.get(path) {
            return Ok(shader.clone());
        }
        let description = ShaderDescription::load(path)?;
        let program = self.program_for(&description)?;
        let shader = Rc::new(Shader::from_description(&description, program));
        log::info!("Loaded shader {} from {:?}", shader.name, path);
        self.shaders.insert(path.to_path_buf(), shader.clone());
        Ok(shader)
    }

    /// Material from an XML file, cached by path
    pub fn create_or_get_material(&mut self, path: impl AsRef<Path>) -> Result<Rc<Material>> {
        let path = path.as_ref();
        if let Some(material) = self.materials.get(path) {
            return Ok(material.clone());
        }
        let description = MaterialDescription::load(path)?;
        let shader = self
            .create_or_get_shader(&description.shader)
            .with_context(|| format!("Material {:?} needs shader {:?}", path, description.shader))?;

        let mut material = Material::new(description.name, shader);
        for (slot, texture_path) in &description.textures {
            let texture = self.create_or_get_texture(texture_path)?;
            material.set_texture(*slot as usize, texture);
        }

        let material = Rc::new(material);
        self.materials.insert(path.to_path_buf(), material.clone());
        Ok(material)
    }

    pub fn create_mesh(
        &self,
        layout: VertexLayout,
        topology: Topology,
        vertex_bytes: &[u8],
        indices: Option<&[u32]>,
    ) -> Result<Mesh> {
        let mut mesh = Mesh::new(&self.device, layout, topology);
        mesh.upload(vertex_bytes, indices)?;
        Ok(mesh)
    }

    pub fn create_camera(&self) -> Rc<RefCell<Camera>> {
        Rc::new(RefCell::new(Camera::new(&self.device)))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {:?}", e);
        }
    }
}

fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    extent.width as f32 / extent.height.max(1) as f32
}

/// Draws assume both attachments are still in their attachment layouts
fn check_attachment_layouts(camera: &Camera) -> Result<(), FatalError> {
    let expect = |texture: Option<&Rc<Texture>>, layout: vk::ImageLayout| match texture {
        Some(texture) if texture.layout() != layout => Err(FatalError::LayoutMismatch {
            expected: layout,
            actual: texture.layout(),
        }),
        _ => Ok(()),
    };
    expect(camera.color_target(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;
    expect(camera.depth_target(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_survives_zero_height() {
        let ratio = aspect_ratio(vk::Extent2D { width: 800, height: 0 });
        assert!(ratio.is_finite());
        assert_eq!(aspect_ratio(vk::Extent2D { width: 1280, height: 720 }), 1280.0 / 720.0);
    }

    struct HandlelessWindow;

    impl HasDisplayHandle for HandlelessWindow {
        fn display_handle(
            &self,
        ) -> Result<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError> {
            Err(raw_window_handle::HandleError::Unavailable)
        }
    }

    impl HasWindowHandle for HandlelessWindow {
        fn window_handle(
            &self,
        ) -> Result<raw_window_handle::WindowHandle<'_>, raw_window_handle::HandleError> {
            Err(raw_window_handle::HandleError::Unavailable)
        }
    }

    #[test]
    fn missing_window_handles_are_fatal() {
        let err = raw_handles(&HandlelessWindow).unwrap_err();
        assert!(matches!(&err, FatalError::Platform(message) if message.starts_with("display")));
        assert!(crate::error::is_fatal(&err.into()));
    }

    #[test]
    fn default_shader_declares_renderer_slots() {
        assert!(DEFAULT_VERTEX_SHADER.contains("set = 0, binding = 0"));
        assert!(DEFAULT_VERTEX_SHADER.contains("set = 0, binding = 1"));
        assert!(DEFAULT_FRAGMENT_SHADER.contains("set = 1, binding = 0"));
    }
}
