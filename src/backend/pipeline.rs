// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
//
// One long-lived `Pipeline` holds the full state. Setters mutate it and
// `update()` throws the native pipeline away and builds a new one; the
// renderer calls it before every draw.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::program::ShaderProgram;
use super::render_state::RenderState;
use super::shader::ShaderStageKind;
use super::vertex::VertexLayout;
use super::VulkanDevice;
use crate::error::{FatalError, VkCheck};

/// Primitive assembly mode a mesh is drawn with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

impl Topology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

/// Viewport covering `extent`, depth range 0..1
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor matching a viewport, clamped to non-negative integers
pub fn scissor_for(viewport: &vk::Viewport) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: viewport.x.max(0.0) as i32,
            y: viewport.y.max(0.0) as i32,
        },
        extent: vk::Extent2D {
            width: viewport.width.max(0.0) as u32,
            height: viewport.height.max(0.0) as u32,
        },
    }
}

pub struct Pipeline {
    device: Arc<VulkanDevice>,
    vertex_layout: Option<VertexLayout>,
    stages: Vec<(ShaderStageKind, vk::ShaderModule)>,
    topology: Topology,
    viewport: vk::Viewport,
    state: RenderState,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    render_pass: vk::RenderPass,

    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    warned_wireframe: bool,
}

impl Pipeline {
    pub fn new(device: Arc<VulkanDevice>) -> Self {
        Self {
            device,
            vertex_layout: None,
            stages: Vec::new(),
            topology: Topology::default(),
            viewport: full_viewport(vk::Extent2D { width: 1, height: 1 }),
            state: RenderState::default(),
            set_layouts: Vec::new(),
            render_pass: vk::RenderPass::null(),
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            warned_wireframe: false,
        }
    }

    pub fn set_vertex_layout(&mut self, layout: &VertexLayout) {
        if self.vertex_layout.as_ref() != Some(layout) {
            self.vertex_layout = Some(layout.clone());
        }
    }

    /// Stages and descriptor set layouts both come from the program
    pub fn set_shader_stages(&mut self, program: &ShaderProgram) {
        self.stages = program.stages().to_vec();
        self.set_descriptor_set_layouts(program.set_layouts());
    }

    pub fn set_topology(&mut self, topology: Topology) {
        self.topology = topology;
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.viewport = viewport;
    }

    pub fn set_render_state(&mut self, state: &RenderState) {
        self.state = *state;
    }

    pub fn set_descriptor_set_layouts(&mut self, layouts: &[vk::DescriptorSetLayout]) {
        self.set_layouts = layouts.to_vec();
    }

    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.render_pass = render_pass;
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn viewport(&self) -> vk::Viewport {
        self.viewport
    }

    /// Destroy whatever was built before and create layout + pipeline from the current state
    pub fn update(&mut self) -> Result<()> {
        self.destroy();

        let vertex_layout = self
            .vertex_layout
            .as_ref()
            .ok_or(FatalError::MissingState("pipeline has no vertex layout"))?;
        if self.stages.is_empty() {
            return Err(FatalError::MissingState("pipeline has no shader stages").into());
        }
        if self.render_pass == vk::RenderPass::null() {
            return Err(FatalError::MissingState("pipeline has no render pass").into());
        }

        let raw = self.device.raw();

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&self.set_layouts);
        self.layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }
            .check("vkCreatePipelineLayout")
            .context("Failed to create pipeline layout")?;

        let stage_infos: Vec<_> = self
            .stages
            .iter()
            .map(|&(kind, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(kind.flags())
                    .module(module)
                    .name(c"main")
            })
            .collect();

        let bindings = [vertex_layout.binding_description()];
        let attributes = vertex_layout.attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology.to_vk())
            .primitive_restart_enable(false);

        let viewports = [self.viewport];
        let scissors = [scissor_for(&self.viewport)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let mut state = self.state;
        if state.fill != super::render_state::FillMode::Solid && !self.device.wireframe_supported {
            if !self.warned_wireframe {
                log::warn!("fillModeNonSolid unsupported, drawing wireframe shaders solid");
                self.warned_wireframe = true;
            }
            state.fill = super::render_state::FillMode::Solid;
        }
        let rasterizer = state.rasterization();
        let depth_stencil = state.depth_stencil();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments = [state.color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            raw.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, result)| FatalError::Vulkan {
            call: "vkCreateGraphicsPipelines",
            result,
        })
        .context("Failed to create graphics pipeline")?;

        self.pipeline = pipelines[0];
        log::trace!("Pipeline rebuilt ({:?}, {:?})", self.topology, state.cull);
        Ok(())
    }

    fn destroy(&mut self) {
        unsafe {
            let raw = self.device.raw();
            if self.pipeline != vk::Pipeline::null() {
                raw.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                raw.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_and_scissor_cover_extent() {
        let viewport = full_viewport(vk::Extent2D {
            width: 512,
            height: 256,
        });
        assert_eq!(viewport.max_depth, 1.0);

        let scissor = scissor_for(&viewport);
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, vk::Extent2D { width: 512, height: 256 });
    }

    #[test]
    fn topology_translation() {
        assert_eq!(Topology::default().to_vk(), vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(Topology::LineStrip.to_vk(), vk::PrimitiveTopology::LINE_STRIP);
    }
}
