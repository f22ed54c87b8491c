// Shader module loading and reflection
//
// Stages come either as GLSL source (compiled at runtime with shaderc) or as
// precompiled SPIR-V. Descriptor bindings are reflected from the SPIR-V with
// spirq unless the caller supplies them explicitly.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::descriptor::{DescriptorBinding, DescriptorKind, StageBindings};
use super::VulkanDevice;
use crate::error::{self, FatalError, VkCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
}

impl ShaderStageKind {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStageKind::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStageKind::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    #[cfg(feature = "glsl")]
    fn shaderc_kind(self) -> shaderc::ShaderKind {
        match self {
            ShaderStageKind::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStageKind::Fragment => shaderc::ShaderKind::Fragment,
        }
    }
}

/// "A;B=2;C" -> [("A", None), ("B", Some("2")), ("C", None)]
pub fn parse_defines(defines: &str) -> Vec<(String, Option<String>)> {
    defines
        .split(';')
        .map(str::trim)
        .filter(|define| !define.is_empty())
        .map(|define| match define.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
            None => (define.to_string(), None),
        })
        .collect()
}

/// Put one `#define` line per entry right after the `#version` line
/// (or at the very top when there is none).
pub fn insert_defines(source: &str, defines: &[(String, Option<String>)]) -> String {
    if defines.is_empty() {
        return source.to_string();
    }

    let block: String = defines
        .iter()
        .map(|(name, value)| match value {
            Some(value) => format!("#define {} {}\n", name, value),
            None => format!("#define {}\n", name),
        })
        .collect();

    let mut out = String::with_capacity(source.len() + block.len());
    let mut inserted = false;
    for line in source.split_inclusive('\n') {
        out.push_str(line);
        if !inserted && line.trim_start().starts_with("#version") {
            if !line.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&block);
            inserted = true;
        }
    }

    if inserted {
        out
    } else {
        block + source
    }
}

/// GLSL -> SPIR-V targeting Vulkan 1.2
#[cfg(feature = "glsl")]
pub fn compile_glsl(source: &str, kind: ShaderStageKind, name: &str) -> Result<Vec<u32>> {
    let compile_error = |message: String| FatalError::ShaderCompilation {
        name: name.to_string(),
        message,
    };

    let compiler = shaderc::Compiler::new()
        .ok_or_else(|| compile_error("shaderc compiler unavailable".into()))?;
    let mut options = shaderc::CompileOptions::new()
        .ok_or_else(|| compile_error("shaderc options unavailable".into()))?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );

    let artifact = compiler
        .compile_into_spirv(source, kind.shaderc_kind(), name, "main", Some(&options))
        .map_err(|e| compile_error(e.to_string()))?;

    if artifact.get_num_warnings() > 0 {
        log::warn!("{}: {}", name, artifact.get_warning_messages());
    }

    Ok(artifact.as_binary().to_vec())
}

#[cfg(not(feature = "glsl"))]
pub fn compile_glsl(_source: &str, _kind: ShaderStageKind, name: &str) -> Result<Vec<u32>> {
    Err(FatalError::ShaderCompilation {
        name: name.to_string(),
        message: "built without the `glsl` feature; use a precompiled .spv".to_string(),
    }
    .into())
}

/// Aligned SPIR-V words from raw file bytes
pub fn load_spirv(bytes: &[u8], name: &str) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
        FatalError::ShaderCompilation {
            name: name.to_string(),
            message: format!("invalid SPIR-V: {}", e),
        }
        .into()
    })
}

/// Uniform buffers and combined image samplers by set and binding
pub fn reflect(code: &[u32], kind: ShaderStageKind, name: &str) -> Result<StageBindings> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| FatalError::ShaderReflection {
            name: name.to_string(),
            message: format!("{:?}", e),
        })?;

    let mut bindings = StageBindings::new();
    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            let spirq::var::Variable::Descriptor {
                name: var_name,
                desc_bind,
                desc_ty,
                ..
            } = var
            else {
                continue;
            };

            let kind_of = match desc_ty {
                spirq::ty::DescriptorType::UniformBuffer() => DescriptorKind::UniformBuffer,
                spirq::ty::DescriptorType::CombinedImageSampler() => {
                    DescriptorKind::CombinedImageSampler
                }
                other => {
                    log::warn!(
                        "{}: ignoring {:?} '{}' at set {} binding {}",
                        name,
                        other,
                        var_name.as_deref().unwrap_or("?"),
                        desc_bind.set(),
                        desc_bind.bind()
                    );
                    continue;
                }
            };

            bindings.insert(
                desc_bind.set(),
                DescriptorBinding {
                    binding: desc_bind.bind(),
                    kind: kind_of,
                    stages: kind.flags(),
                },
            )?;
        }
    }

    Ok(bindings)
}

/// A compiled stage and the bindings it declares
pub struct ShaderStage {
    device: Arc<VulkanDevice>,
    pub kind: ShaderStageKind,
    pub module: vk::ShaderModule,
    pub bindings: StageBindings,
    pub name: String,
}

impl ShaderStage {
    /// Create the module; reflect unless `explicit` bindings are given
    pub fn from_spirv(
        device: &Arc<VulkanDevice>,
        kind: ShaderStageKind,
        name: &str,
        code: &[u32],
        explicit: Option<StageBindings>,
    ) -> Result<Self> {
        let bindings = match explicit {
            Some(bindings) => bindings,
            None => reflect(code, kind, name)?,
        };

        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { device.raw().create_shader_module(&create_info, None) }
            .check("vkCreateShaderModule")
            .with_context(|| format!("Failed to create shader module {}", name))?;

        log::debug!("Loaded {:?} stage {}", kind, name);
        Ok(Self {
            device: device.clone(),
            kind,
            module,
            bindings,
            name: name.to_string(),
        })
    }

    /// Compile GLSL after inserting `defines`
    pub fn from_glsl(
        device: &Arc<VulkanDevice>,
        kind: ShaderStageKind,
        name: &str,
        source: &str,
        defines: &str,
        explicit: Option<StageBindings>,
    ) -> Result<Self> {
        let source = insert_defines(source, &parse_defines(defines));
        let code = compile_glsl(&source, kind, name)?;
        Self::from_spirv(device, kind, name, &code, explicit)
    }

    /// `.spv` files load as-is; anything else is treated as GLSL
    pub fn load(
        device: &Arc<VulkanDevice>,
        kind: ShaderStageKind,
        path: &Path,
        defines: &str,
        explicit: Option<StageBindings>,
    ) -> Result<Self> {
        let name = path.display().to_string();

        if is_spirv_path(path) {
            if !defines.trim().is_empty() {
                log::warn!("{}: defines are ignored for precompiled SPIR-V", name);
            }
            let code = load_spirv(&error::read_file(path)?, &name)?;
            Self::from_spirv(device, kind, &name, &code, explicit)
        } else {
            let source = error::read_to_string(path)?;
            Self::from_glsl(device, kind, &name, &source, defines, explicit)
        }
    }
}

impl Drop for ShaderStage {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_shader_module(self.module, None) };
    }
}

pub fn is_spirv_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("spv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_define_list() {
        assert_eq!(
            parse_defines("A; B=2 ;;C"),
            vec![
                ("A".to_string(), None),
                ("B".to_string(), Some("2".to_string())),
                ("C".to_string(), None),
            ]
        );
        assert!(parse_defines("").is_empty());
    }

    #[test]
    fn defines_go_right_after_version() {
        let source = "// header\n#version 450\nvoid main() {}\n";
        let out = insert_defines(source, &parse_defines("USE_FOG;STEPS=4"));
        assert_eq!(
            out,
            "// header\n#version 450\n#define USE_FOG\n#define STEPS 4\nvoid main() {}\n"
        );
    }

    #[test]
    fn defines_without_version_are_prepended() {
        let out = insert_defines("void main() {}", &parse_defines("X"));
        assert_eq!(out, "#define X\nvoid main() {}");
    }

    #[test]
    fn version_on_last_line_without_newline() {
        let out = insert_defines("#version 450", &parse_defines("X"));
        assert_eq!(out, "#version 450\n#define X\n");
    }

    #[test]
    fn no_defines_leaves_source_alone() {
        let source = "#version 450\nvoid main() {}\n";
        assert_eq!(insert_defines(source, &[]), source);
    }

    #[test]
    fn spv_extension_detection() {
        assert!(is_spirv_path(Path::new("shaders/a.vert.spv")));
        assert!(is_spirv_path(Path::new("B.SPV")));
        assert!(!is_spirv_path(Path::new("shaders/a.vert")));
    }

    #[test]
    fn garbage_spirv_is_rejected() {
        assert!(load_spirv(&[1, 2, 3], "bad.spv").is_err());
    }

    #[cfg(feature = "glsl")]
    #[test]
    fn reflects_uniforms_and_samplers_from_glsl() {
        let vertex = r#"
            #version 450
            layout(set = 0, binding = 0) uniform Camera { mat4 view; mat4 proj; } camera;
            layout(set = 0, binding = 1) uniform Model { mat4 model; } model;
            layout(location = 0) in vec3 pos;
            void main() { gl_Position = camera.proj * camera.view * model.model * vec4(pos, 1.0); }
        "#;
        let fragment = r#"
            #version 450
            layout(set = 1, binding = 2) uniform sampler2D tex;
            layout(location = 0) out vec4 color;
            void main() { color = texture(tex, vec2(0.5)); }
        "#;

        let vs = compile_glsl(vertex, ShaderStageKind::Vertex, "test.vert").unwrap();
        let fs = compile_glsl(fragment, ShaderStageKind::Fragment, "test.frag").unwrap();

        let vb = reflect(&vs, ShaderStageKind::Vertex, "test.vert").unwrap();
        assert_eq!(vb.set_count(), 1);
        assert_eq!(vb.get(0, 0).unwrap().kind, DescriptorKind::UniformBuffer);
        assert_eq!(vb.get(0, 1).unwrap().stages, vk::ShaderStageFlags::VERTEX);

        let fb = reflect(&fs, ShaderStageKind::Fragment, "test.frag").unwrap();
        assert!(fb.set(0).is_empty());
        assert_eq!(fb.set(1).len(), 3);
        assert!(fb.set(1)[..2].iter().all(Option::is_none));
        assert_eq!(fb.get(1, 2).unwrap().kind, DescriptorKind::CombinedImageSampler);
    }

    #[cfg(feature = "glsl")]
    #[test]
    fn defines_reach_the_compiler() {
        let source = "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(VALUE); }\n";
        assert!(compile_glsl(source, ShaderStageKind::Fragment, "nodef.frag").is_err());

        let with = insert_defines(source, &parse_defines("VALUE=1.0"));
        assert!(compile_glsl(&with, ShaderStageKind::Fragment, "def.frag").is_ok());
    }
}
