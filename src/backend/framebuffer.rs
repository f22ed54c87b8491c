// Render passes and framebuffers
//
// Attachments stay in their attachment-optimal layouts across the pass, so a
// texture's recorded layout is still correct after drawing into it.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::texture::Texture;
use super::VulkanDevice;
use crate::error::{FatalError, VkCheck};

/// What happens to attachment contents when the pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentLoad {
    /// Keep what earlier draws rendered
    Load,
    /// Overwrite with the clear values passed at begin
    Clear,
}

impl AttachmentLoad {
    fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            AttachmentLoad::Load => vk::AttachmentLoadOp::LOAD,
            AttachmentLoad::Clear => vk::AttachmentLoadOp::CLEAR,
        }
    }
}

/// Color attachment 0, optional depth attachment 1
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    load: AttachmentLoad,
) -> Vec<vk::AttachmentDescription> {
    let mut attachments = vec![vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load.to_vk())
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    if let Some(depth_format) = depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load.to_vk())
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }
    attachments
}

pub struct RenderPass {
    device: Arc<VulkanDevice>,
    pub render_pass: vk::RenderPass,
    pub load: AttachmentLoad,
    pub has_depth: bool,
}

impl RenderPass {
    pub fn new(
        device: &Arc<VulkanDevice>,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
        load: AttachmentLoad,
    ) -> Result<Self> {
        let attachments = attachment_descriptions(color_format, depth_format, load);

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.raw().create_render_pass(&render_pass_info, None) }
            .check("vkCreateRenderPass")
            .context("Failed to create render pass")?;

        Ok(Self {
            device: device.clone(),
            render_pass,
            load,
            has_depth: depth_format.is_some(),
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_render_pass(self.render_pass, None) };
    }
}

pub struct Framebuffer {
    device: Arc<VulkanDevice>,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

impl Framebuffer {
    /// Framebuffer over `color` (and `depth`), compatible with any pass built
    /// from the same formats
    pub fn new(
        device: &Arc<VulkanDevice>,
        render_pass: &RenderPass,
        color: &Texture,
        depth: Option<&Texture>,
    ) -> Result<Self> {
        if render_pass.has_depth != depth.is_some() {
            return Err(FatalError::MissingState(
                "framebuffer attachments do not match the render pass",
            )
            .into());
        }

        let extent = match depth {
            Some(depth) => super::texture::overlap(color.extent(), depth.extent()),
            None => color.extent(),
        };

        let mut attachments = vec![color.view()];
        attachments.extend(depth.map(Texture::view));

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.raw().create_framebuffer(&framebuffer_info, None) }
            .check("vkCreateFramebuffer")
            .context("Failed to create framebuffer")?;

        Ok(Self {
            device: device.clone(),
            framebuffer,
            extent,
        })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_framebuffer(self.framebuffer, None) };
    }
}
