// Images, views, samplers and layout transitions
//
// A texture's layout is tracked explicitly. Every role change goes through a
// `LayoutTransition`; a transition whose source layout disagrees with the
// recorded one is rejected unless it starts from UNDEFINED.

use anyhow::{Context, Result};
use ash::vk;
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use super::buffer::create_and_get_buffer;
use super::commands::{submit_one_shot, SubmitSync};
use super::{memory, VulkanDevice};
use crate::error::{FatalError, VkCheck};

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const SAMPLED_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// One image memory barrier worth of state: layouts plus the stage/access
/// scopes on either side. Callers always spell these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl LayoutTransition {
    pub const UNDEFINED_TO_COLOR_ATTACHMENT: Self = Self {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::from_raw(
            vk::AccessFlags::COLOR_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
    };

    pub const UNDEFINED_TO_DEPTH_ATTACHMENT: Self = Self {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::from_raw(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
    };

    pub const UNDEFINED_TO_TRANSFER_DST: Self = Self {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        // Chains with a semaphore wait at TRANSFER when the image is a swapchain image
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
    };

    pub const TRANSFER_DST_TO_SHADER_READ: Self = Self {
        old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::SHADER_READ,
    };

    pub const COLOR_ATTACHMENT_TO_TRANSFER_SRC: Self = Self {
        old: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags::TRANSFER_READ,
    };

    pub const TRANSFER_SRC_TO_COLOR_ATTACHMENT: Self = Self {
        old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        new: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access: vk::AccessFlags::TRANSFER_READ,
        dst_access: vk::AccessFlags::from_raw(
            vk::AccessFlags::COLOR_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
    };

    pub const TRANSFER_DST_TO_PRESENT: Self = Self {
        old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new: vk::ImageLayout::PRESENT_SRC_KHR,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::empty(),
    };

    pub fn barrier(&self, image: vk::Image, aspect: vk::ImageAspectFlags) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(self.old)
            .new_layout(self.new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(single_subresource(aspect))
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
    }
}

/// Transitions a freshly created render target goes through
pub fn render_target_plan(kind: TextureKind) -> &'static [LayoutTransition] {
    match kind {
        TextureKind::ColorTarget => &[LayoutTransition::UNDEFINED_TO_COLOR_ATTACHMENT],
        TextureKind::DepthTarget => &[LayoutTransition::UNDEFINED_TO_DEPTH_ATTACHMENT],
        TextureKind::Sampled => &[],
    }
}

/// Transitions around the buffer-to-image copy of a sampled texture
pub fn sampled_upload_plan() -> &'static [LayoutTransition] {
    &[
        LayoutTransition::UNDEFINED_TO_TRANSFER_DST,
        LayoutTransition::TRANSFER_DST_TO_SHADER_READ,
    ]
}

/// Rejects a transition that starts from a layout the image is not in.
/// UNDEFINED is always accepted since it discards the contents.
pub fn check_transition(
    recorded: vk::ImageLayout,
    transition: &LayoutTransition,
) -> Result<(), FatalError> {
    if transition.old != vk::ImageLayout::UNDEFINED && transition.old != recorded {
        return Err(FatalError::LayoutMismatch {
            expected: transition.old,
            actual: recorded,
        });
    }
    Ok(())
}

/// Region both extents cover
pub fn overlap(a: vk::Extent2D, b: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: a.width.min(b.width),
        height: a.height.min(b.height),
    }
}

fn single_subresource(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Record a single barrier into an open command buffer
pub fn record_transition(
    raw: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    transition: &LayoutTransition,
) {
    let barrier = transition.barrier(image, aspect);
    unsafe {
        raw.cmd_pipeline_barrier(
            cmd,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// One-shot command buffer holding a single image barrier
pub fn transition_image_layout(
    device: &VulkanDevice,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    transition: &LayoutTransition,
) -> Result<()> {
    log::trace!("Transition {:?}: {:?} -> {:?}", image, transition.old, transition.new);
    submit_one_shot(device, &SubmitSync::none(), |raw, cmd| {
        record_transition(raw, cmd, image, aspect, transition);
        Ok(())
    })
}

/// Image plus its dedicated allocation. Destroyed image first, memory second.
pub struct ImageAllocation {
    device: Arc<VulkanDevice>,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
}

impl Drop for ImageAllocation {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_image(self.image, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

/// 2D, one mip, one layer, one sample
pub fn create_and_get_image(
    device: &Arc<VulkanDevice>,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    tiling: vk::ImageTiling,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<ImageAllocation> {
    let raw = device.raw();

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(tiling)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { raw.create_image(&image_info, None) }
        .check("vkCreateImage")
        .context("Failed to create image")?;

    let requirements = unsafe { raw.get_image_memory_requirements(image) };
    let memory = match memory::allocate(raw, &device.memory_properties, requirements, memory_properties) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { raw.destroy_image(image, None) };
            return Err(e.context("Failed to allocate image memory"));
        }
    };

    let allocation = ImageAllocation {
        device: device.clone(),
        image,
        memory,
    };

    unsafe { raw.bind_image_memory(allocation.image, allocation.memory, 0) }
        .check("vkBindImageMemory")?;

    Ok(allocation)
}

/// Flat view: base mip 0, base layer 0, one of each
pub fn create_and_get_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(single_subresource(aspect));

    unsafe { device.raw().create_image_view(&view_info, None) }
        .check("vkCreateImageView")
        .context("Failed to create image view")
}

/// Linear filtering, repeat addressing
pub struct Sampler {
    device: Arc<VulkanDevice>,
    pub sampler: vk::Sampler,
}

impl Sampler {
    pub fn linear_repeat(device: &Arc<VulkanDevice>) -> Result<Rc<Self>> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.raw().create_sampler(&sampler_info, None) }
            .check("vkCreateSampler")?;

        Ok(Rc::new(Self {
            device: device.clone(),
            sampler,
        }))
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_sampler(self.sampler, None) };
    }
}

/// What a texture is used for; decides usage flags, aspect and initial layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    ColorTarget,
    DepthTarget,
    Sampled,
}

impl TextureKind {
    pub fn aspect(self) -> vk::ImageAspectFlags {
        match self {
            TextureKind::DepthTarget => vk::ImageAspectFlags::DEPTH,
            TextureKind::ColorTarget | TextureKind::Sampled => vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            TextureKind::ColorTarget => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::SAMPLED
            }
            TextureKind::DepthTarget => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            TextureKind::Sampled => {
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
            }
        }
    }
}

/// Image + memory + view with explicit layout bookkeeping
pub struct Texture {
    device: Arc<VulkanDevice>,
    view: vk::ImageView,
    allocation: ImageAllocation,
    format: vk::Format,
    kind: TextureKind,
    extent: vk::Extent2D,
    layout: Cell<vk::ImageLayout>,
    sampler: Option<Rc<Sampler>>,
}

impl Texture {
    fn allocate(
        device: &Arc<VulkanDevice>,
        extent: vk::Extent2D,
        format: vk::Format,
        kind: TextureKind,
        sampler: Option<Rc<Sampler>>,
    ) -> Result<Self> {
        let allocation = create_and_get_image(
            device,
            extent,
            format,
            kind.usage(),
            vk::ImageTiling::OPTIMAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let view = create_and_get_image_view(device, allocation.image, format, kind.aspect())?;

        Ok(Self {
            device: device.clone(),
            view,
            allocation,
            format,
            kind,
            extent,
            layout: Cell::new(vk::ImageLayout::UNDEFINED),
            sampler,
        })
    }

    /// Offscreen color target, left in COLOR_ATTACHMENT_OPTIMAL
    pub fn create_color_target(
        device: &Arc<VulkanDevice>,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<Self> {
        Self::create_render_target(device, extent, format, TextureKind::ColorTarget)
    }

    /// D32 depth target, left in DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    pub fn create_depth_target(device: &Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<Self> {
        Self::create_render_target(device, extent, DEPTH_FORMAT, TextureKind::DepthTarget)
    }

    fn create_render_target(
        device: &Arc<VulkanDevice>,
        extent: vk::Extent2D,
        format: vk::Format,
        kind: TextureKind,
    ) -> Result<Self> {
        let texture = Self::allocate(device, extent, format, kind, None)?;
        for transition in render_target_plan(kind) {
            texture.transition(transition)?;
        }
        log::debug!(
            "Created {:?} {}x{} ({:?})",
            kind,
            extent.width,
            extent.height,
            format
        );
        Ok(texture)
    }

    /// Sampled texture from tightly packed RGBA8 pixels
    pub fn from_rgba8(
        device: &Arc<VulkanDevice>,
        width: u32,
        height: u32,
        pixels: &[u8],
        sampler: Rc<Sampler>,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected || expected == 0 {
            return Err(FatalError::Parse {
                what: "image data",
                path: "<memory>".into(),
                message: format!(
                    "{}x{} RGBA8 needs {} bytes, got {}",
                    width,
                    height,
                    expected,
                    pixels.len()
                ),
            }
            .into());
        }

        let extent = vk::Extent2D { width, height };
        let texture = Self::allocate(device, extent, SAMPLED_FORMAT, TextureKind::Sampled, Some(sampler))?;

        let staging = create_and_get_buffer(
            device,
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .context("Failed to create texture staging buffer")?;
        staging.write(pixels)?;

        let plan = sampled_upload_plan();
        texture.transition(&plan[0])?;

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        submit_one_shot(device, &SubmitSync::none(), |raw, cmd| {
            unsafe {
                raw.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    texture.image(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            Ok(())
        })?;

        texture.transition(&plan[1])?;
        drop(staging);

        log::debug!("Uploaded {}x{} texture", width, height);
        Ok(texture)
    }

    /// Decode an image file and upload it as a sampled texture
    pub fn from_file(device: &Arc<VulkanDevice>, path: &Path, sampler: Rc<Sampler>) -> Result<Self> {
        let decoded = image::open(path)
            .map_err(|source| FatalError::ImageDecode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Self::from_rgba8(device, width, height, decoded.as_raw(), sampler)
            .with_context(|| format!("Failed to load texture {:?}", path))
    }

    /// Validate against the recorded layout, submit the barrier, record the new layout
    pub fn transition(&self, transition: &LayoutTransition) -> Result<()> {
        check_transition(self.layout.get(), transition)?;
        transition_image_layout(&self.device, self.image(), self.kind.aspect(), transition)?;
        self.layout.set(transition.new);
        Ok(())
    }

    /// Same as `transition` but into an already open command buffer
    pub fn record_transition(
        &self,
        raw: &ash::Device,
        cmd: vk::CommandBuffer,
        transition: &LayoutTransition,
    ) -> Result<()> {
        check_transition(self.layout.get(), transition)?;
        record_transition(raw, cmd, self.image(), self.kind.aspect(), transition);
        self.layout.set(transition.new);
        Ok(())
    }

    /// Copy endpoint for this texture after checking `before` against the recorded layout
    pub fn copy_endpoint(&self, before: LayoutTransition, after: LayoutTransition) -> Result<CopyEndpoint> {
        check_transition(self.layout.get(), &before)?;
        Ok(CopyEndpoint {
            image: self.image(),
            aspect: self.kind.aspect(),
            extent: self.extent,
            before,
            after,
        })
    }

    /// Record the layout a finished copy left this texture in
    pub(crate) fn copy_finished(&self, endpoint: &CopyEndpoint) {
        self.layout.set(endpoint.after.new);
    }

    pub fn image(&self) -> vk::Image {
        self.allocation.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.get()
    }

    pub fn sampler(&self) -> Option<&Rc<Sampler>> {
        self.sampler.as_ref()
    }

    /// Descriptor info for a combined image sampler binding
    pub fn descriptor_info(&self) -> Option<vk::DescriptorImageInfo> {
        self.sampler.as_ref().map(|sampler| {
            vk::DescriptorImageInfo::default()
                .sampler(sampler.sampler)
                .image_view(self.view)
                .image_layout(self.layout.get())
        })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        // View first; the allocation field then releases image and memory
        unsafe { self.device.raw().destroy_image_view(self.view, None) };
    }
}

/// One side of an image-to-image copy
#[derive(Debug, Clone, Copy)]
pub struct CopyEndpoint {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub extent: vk::Extent2D,
    /// Into TRANSFER_SRC_OPTIMAL / TRANSFER_DST_OPTIMAL
    pub before: LayoutTransition,
    /// Out of the transfer layout once the copy is done
    pub after: LayoutTransition,
}

/// Transition both endpoints, copy the overlapping region, transition both
/// again. One submission with the caller's semaphores and fence.
pub fn copy_image(
    device: &VulkanDevice,
    src: &CopyEndpoint,
    dst: &CopyEndpoint,
    sync: &SubmitSync,
) -> Result<()> {
    let extent = overlap(src.extent, dst.extent);
    let subresource = |aspect| vk::ImageSubresourceLayers {
        aspect_mask: aspect,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let region = vk::ImageCopy::default()
        .src_subresource(subresource(src.aspect))
        .src_offset(vk::Offset3D::default())
        .dst_subresource(subresource(dst.aspect))
        .dst_offset(vk::Offset3D::default())
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });

    submit_one_shot(device, sync, |raw, cmd| {
        record_transition(raw, cmd, src.image, src.aspect, &src.before);
        record_transition(raw, cmd, dst.image, dst.aspect, &dst.before);
        unsafe {
            raw.cmd_copy_image(
                cmd,
                src.image,
                src.before.new,
                dst.image,
                dst.before.new,
                &[region],
            );
        }
        record_transition(raw, cmd, src.image, src.aspect, &src.after);
        record_transition(raw, cmd, dst.image, dst.aspect, &dst.after);
        Ok(())
    })
}
