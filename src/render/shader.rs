// Shaders as the engine sees them
//
// A `Shader` is a shared program plus the render state it draws with. Shaders
// are described in XML:
//
//   <shader name="unlit" queue="opaque" order="0">
//     <program vertex="shaders/default.vert" fragment="shaders/default.frag" defines="A;B=2">
//       <binding set="0" slot="0" type="uniform" stages="vertex"/>
//     </program>
//     <cull>back</cull> <fill>solid</fill> <wind>ccw</wind>
//     <depth test="less" write="true"/>
//     <blend>
//       <color op="add" src="src_alpha" dest="one_minus_src_alpha"/>
//       <alpha op="add" src="one" dest="zero"/>
//     </blend>
//   </shader>

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use crate::backend::buffer::GpuBuffer;
use crate::backend::descriptor::{
    write_combined_image_sampler, write_uniform_buffer, DescriptorBinding, DescriptorKind,
};
use crate::backend::program::ShaderProgram;
use crate::backend::render_state::{BlendEquation, RenderQueue, RenderState};
use crate::backend::texture::Texture;
use crate::backend::VulkanDevice;
use crate::error::{self, FatalError};

#[derive(Debug, Deserialize)]
struct XmlShader {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@queue", default)]
    queue: Option<String>,
    #[serde(rename = "@order", default)]
    order: Option<i32>,
    program: XmlProgram,
    #[serde(default)]
    cull: Option<String>,
    #[serde(default)]
    fill: Option<String>,
    #[serde(default)]
    wind: Option<String>,
    #[serde(default)]
    depth: Option<XmlDepth>,
    #[serde(default)]
    blend: Option<XmlBlend>,
}

#[derive(Debug, Deserialize)]
struct XmlProgram {
    #[serde(rename = "@vertex")]
    vertex: String,
    #[serde(rename = "@fragment")]
    fragment: String,
    #[serde(rename = "@defines", default)]
    defines: Option<String>,
    #[serde(rename = "binding", default)]
    bindings: Vec<XmlBinding>,
}

#[derive(Debug, Deserialize)]
struct XmlBinding {
    #[serde(rename = "@set")]
    set: u32,
    #[serde(rename = "@slot")]
    slot: u32,
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "@stages", default)]
    stages: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlDepth {
    #[serde(rename = "@test", default)]
    test: Option<String>,
    #[serde(rename = "@write", default)]
    write: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct XmlBlend {
    #[serde(default)]
    color: Option<XmlBlendEquation>,
    #[serde(default)]
    alpha: Option<XmlBlendEquation>,
}

#[derive(Debug, Deserialize)]
struct XmlBlendEquation {
    #[serde(rename = "@op", default)]
    op: Option<String>,
    #[serde(rename = "@src", default)]
    src: Option<String>,
    #[serde(rename = "@dest", default)]
    dest: Option<String>,
}

impl XmlBlendEquation {
    fn apply(&self, mut equation: BlendEquation) -> Result<BlendEquation, FatalError> {
        if let Some(op) = &self.op {
            equation.op = op.parse()?;
        }
        if let Some(src) = &self.src {
            equation.src = src.parse()?;
        }
        if let Some(dest) = &self.dest {
            equation.dst = dest.parse()?;
        }
        Ok(equation)
    }
}

/// "vertex|fragment", "vertex,fragment" or "all"
pub fn parse_stage_mask(stages: &str) -> Result<vk::ShaderStageFlags, FatalError> {
    let mut mask = vk::ShaderStageFlags::empty();
    for stage in stages
        .split(|c: char| c == '|' || c == ',' || c.is_whitespace())
        .filter(|stage| !stage.is_empty())
    {
        mask |= match stage.to_ascii_lowercase().as_str() {
            "vertex" | "vert" | "vs" => vk::ShaderStageFlags::VERTEX,
            "fragment" | "frag" | "fs" | "pixel" => vk::ShaderStageFlags::FRAGMENT,
            "all" => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            _ => {
                return Err(FatalError::UnmappedEnum {
                    what: "shader stage",
                    value: stage.to_string(),
                })
            }
        };
    }
    if mask.is_empty() {
        return Err(FatalError::UnmappedEnum {
            what: "shader stage",
            value: stages.to_string(),
        });
    }
    Ok(mask)
}

/// Everything a shader file says, before any GPU object exists
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderDescription {
    pub name: String,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    pub defines: String,
    /// Replaces reflection when present
    pub bindings: Option<Vec<(u32, DescriptorBinding)>>,
    pub state: RenderState,
    pub queue: RenderQueue,
    pub order: i32,
}

impl ShaderDescription {
    pub fn load(path: &Path) -> Result<Self> {
        let xml = error::read_to_string(path)?;
        let fallback_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::parse(&xml, &path.display().to_string(), &fallback_name)?)
    }

    /// `origin` only labels errors; `fallback_name` is used when the root has no name
    pub fn parse(xml: &str, origin: &str, fallback_name: &str) -> Result<Self, FatalError> {
        let parsed: XmlShader = quick_xml::de::from_str(xml).map_err(|e| FatalError::Parse {
            what: "shader",
            path: origin.to_string(),
            message: e.to_string(),
        })?;

        let mut state = RenderState::default();
        if let Some(cull) = &parsed.cull {
            state.cull = cull.parse()?;
        }
        if let Some(fill) = &parsed.fill {
            state.fill = fill.parse()?;
        }
        if let Some(wind) = &parsed.wind {
            state.winding = wind.parse()?;
        }
        if let Some(depth) = &parsed.depth {
            if let Some(test) = &depth.test {
                state.depth_compare = test.parse()?;
            }
            if let Some(write) = depth.write {
                state.depth_write = write;
            }
        }
        if let Some(blend) = &parsed.blend {
            if let Some(color) = &blend.color {
                state.color_blend = color.apply(state.color_blend)?;
            }
            if let Some(alpha) = &blend.alpha {
                state.alpha_blend = alpha.apply(state.alpha_blend)?;
            }
        }

        let bindings = if parsed.program.bindings.is_empty() {
            None
        } else {
            let declared = parsed
                .program
                .bindings
                .iter()
                .map(|binding| {
                    let stages = match &binding.stages {
                        Some(stages) => parse_stage_mask(stages)?,
                        None => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    };
                    Ok((
                        binding.set,
                        DescriptorBinding {
                            binding: binding.slot,
                            kind: binding.kind.parse()?,
                            stages,
                        },
                    ))
                })
                .collect::<Result<Vec<_>, FatalError>>()?;
            Some(declared)
        };

        let queue = match &parsed.queue {
            Some(queue) => queue.parse()?,
            None => RenderQueue::default(),
        };

        Ok(Self {
            name: parsed.name.unwrap_or_else(|| fallback_name.to_string()),
            vertex: PathBuf::from(parsed.program.vertex),
            fragment: PathBuf::from(parsed.program.fragment),
            defines: parsed.program.defines.unwrap_or_default(),
            bindings,
            state,
            queue,
            order: parsed.order.unwrap_or(0),
        })
    }
}

/// Bindable shader instance. Cloning shares the program and copies the state.
#[derive(Clone)]
pub struct Shader {
    pub name: String,
    program: Rc<ShaderProgram>,
    pub state: RenderState,
    pub queue: RenderQueue,
    pub order: i32,
}

impl Shader {
    pub fn new(name: impl Into<String>, program: Rc<ShaderProgram>) -> Self {
        Self {
            name: name.into(),
            program,
            state: RenderState::default(),
            queue: RenderQueue::default(),
            order: 0,
        }
    }

    pub fn from_description(description: &ShaderDescription, program: Rc<ShaderProgram>) -> Self {
        Self {
            name: description.name.clone(),
            program,
            state: description.state,
            queue: description.queue,
            order: description.order,
        }
    }

    pub fn program(&self) -> &Rc<ShaderProgram> {
        &self.program
    }

    pub fn descriptor_sets(&self) -> Result<&[vk::DescriptorSet]> {
        self.program.descriptor_sets()
    }

    /// Point (set, binding) at `buffer`. Returns false when the program does
    /// not declare a uniform buffer there.
    pub fn bind_uniform_buffer(
        &self,
        raw: &ash::Device,
        set: u32,
        binding: u32,
        buffer: &GpuBuffer,
    ) -> Result<bool> {
        if !self.program.declares(set, binding, DescriptorKind::UniformBuffer) {
            return Ok(false);
        }
        let info = buffer
            .descriptor_info()
            .ok_or(FatalError::MissingState("uniform buffer was never uploaded"))?;
        let target = self.descriptor_set(set)?;
        write_uniform_buffer(raw, target, binding, info);
        Ok(true)
    }

    /// Point (set, binding) at `texture` and its sampler. Returns false when
    /// the program does not declare a sampler there.
    pub fn bind_texture(
        &self,
        raw: &ash::Device,
        set: u32,
        binding: u32,
        texture: &Texture,
    ) -> Result<bool> {
        if !self
            .program
            .declares(set, binding, DescriptorKind::CombinedImageSampler)
        {
            return Ok(false);
        }
        let info = texture
            .descriptor_info()
            .ok_or(FatalError::MissingState("texture has no sampler"))?;
        let target = self.descriptor_set(set)?;
        write_combined_image_sampler(raw, target, binding, info);
        Ok(true)
    }

    fn descriptor_set(&self, set: u32) -> Result<vk::DescriptorSet> {
        self.descriptor_sets()?
            .get(set as usize)
            .copied()
            .filter(|handle| *handle != vk::DescriptorSet::null())
            .ok_or_else(|| FatalError::MissingState("descriptor set was not allocated").into())
    }
}

/// Load a program for `description`, used by the renderer's shader factory
pub fn load_program(
    device: &Arc<VulkanDevice>,
    description: &ShaderDescription,
) -> Result<ShaderProgram> {
    ShaderProgram::load(
        device,
        &description.vertex,
        &description.fragment,
        &description.defines,
        description.bindings.as_deref(),
    )
    .with_context(|| format!("Failed to build program for shader {}", description.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::render_state::{BlendFactor, CompareOp, CullMode, FillMode};

    const UNLIT: &str = r#"
        <shader name="unlit" queue="opaque" order="3">
          <program vertex="shaders/default.vert" fragment="shaders/default.frag" defines="A;B=2"/>
          <cull>none</cull>
          <fill>wireframe</fill>
          <wind>ccw</wind>
          <depth test="lequal" write="false"/>
          <blend>
            <color op="add" src="one" dest="zero"/>
          </blend>
        </shader>
    "#;

    #[test]
    fn parses_full_description() {
        let description = ShaderDescription::parse(UNLIT, "unlit.shader", "x").unwrap();
        assert_eq!(description.name, "unlit");
        assert_eq!(description.vertex, PathBuf::from("shaders/default.vert"));
        assert_eq!(description.defines, "A;B=2");
        assert_eq!(description.order, 3);
        assert_eq!(description.queue, RenderQueue::Opaque);
        assert!(description.bindings.is_none());

        let state = description.state;
        assert_eq!(state.cull, CullMode::None);
        assert_eq!(state.fill, FillMode::Wireframe);
        assert_eq!(state.depth_compare, CompareOp::LessEqual);
        assert!(!state.depth_write);
        assert_eq!(state.color_blend.src, BlendFactor::One);
        assert_eq!(state.color_blend.dst, BlendFactor::Zero);
        // untouched equation keeps its default
        assert_eq!(state.alpha_blend, RenderState::default().alpha_blend);
    }

    #[test]
    fn missing_elements_fall_back_to_defaults() {
        let xml = r#"<shader><program vertex="a.vert.spv" fragment="a.frag.spv"/></shader>"#;
        let description = ShaderDescription::parse(xml, "a.shader", "a").unwrap();
        assert_eq!(description.name, "a");
        assert_eq!(description.state, RenderState::default());
        assert_eq!(description.queue, RenderQueue::Opaque);
        assert!(description.defines.is_empty());
    }

    #[test]
    fn explicit_bindings_are_collected() {
        let xml = r#"
            <shader name="lit">
              <program vertex="v.vert" fragment="f.frag">
                <binding set="0" slot="0" type="uniform" stages="vertex"/>
                <binding set="1" slot="2" type="sampler" stages="fragment"/>
                <binding set="0" slot="1" type="uniform"/>
              </program>
            </shader>
        "#;
        let description = ShaderDescription::parse(xml, "lit.shader", "lit").unwrap();
        let bindings = description.bindings.unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[1].0, 1);
        assert_eq!(bindings[1].1.binding, 2);
        assert_eq!(bindings[1].1.kind, DescriptorKind::CombinedImageSampler);
        assert_eq!(
            bindings[2].1.stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn missing_program_path_is_a_parse_error() {
        let xml = r#"<shader name="broken"><program vertex="only.vert"/></shader>"#;
        let err = ShaderDescription::parse(xml, "broken.shader", "broken").unwrap_err();
        assert!(matches!(err, FatalError::Parse { what: "shader", .. }));
    }

    #[test]
    fn unknown_state_name_is_unmapped() {
        let xml = r#"
            <shader>
              <program vertex="v.vert" fragment="f.frag"/>
              <cull>sideways</cull>
            </shader>
        "#;
        let err = ShaderDescription::parse(xml, "s.shader", "s").unwrap_err();
        assert!(matches!(err, FatalError::UnmappedEnum { what: "cull mode", .. }));
    }

    #[test]
    fn stage_masks() {
        assert_eq!(
            parse_stage_mask("vertex|fragment").unwrap(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(parse_stage_mask("frag").unwrap(), vk::ShaderStageFlags::FRAGMENT);
        assert!(parse_stage_mask("geometry").is_err());
        assert!(parse_stage_mask("").is_err());
    }
}
