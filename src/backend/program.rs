// Shader programs
//
// A vertex + fragment stage pair with the merged descriptor layout. The
// renderer caches programs by key so each source combination compiles once.

use anyhow::{Context, Result};
use ash::vk;
use std::cell::OnceCell;
use std::path::Path;
use std::sync::Arc;

use super::descriptor::{
    merge_stage_bindings, DescriptorBinding, DescriptorKind, DescriptorSetLayouts, StageBindings,
};
use super::shader::{ShaderStage, ShaderStageKind};
use super::VulkanDevice;

/// Cache key for a program built from files
pub fn program_key(vertex: &Path, fragment: &Path, defines: &str) -> String {
    format!("{}|{}|{}", vertex.display(), fragment.display(), defines.trim())
}

/// Route explicitly declared bindings to the stages named in their masks
pub fn split_explicit(
    declared: &[(u32, DescriptorBinding)],
) -> Result<(StageBindings, StageBindings)> {
    let mut vertex = StageBindings::new();
    let mut fragment = StageBindings::new();
    for &(set, binding) in declared {
        if binding.stages.contains(vk::ShaderStageFlags::VERTEX) {
            vertex.insert(
                set,
                DescriptorBinding {
                    stages: vk::ShaderStageFlags::VERTEX,
                    ..binding
                },
            )?;
        }
        if binding.stages.contains(vk::ShaderStageFlags::FRAGMENT) {
            fragment.insert(
                set,
                DescriptorBinding {
                    stages: vk::ShaderStageFlags::FRAGMENT,
                    ..binding
                },
            )?;
        }
    }
    Ok((vertex, fragment))
}

pub struct ShaderProgram {
    pub key: String,
    vertex: ShaderStage,
    fragment: ShaderStage,
    bindings: StageBindings,
    // Sets are dropped with their pools inside `layouts`
    sets: OnceCell<Vec<vk::DescriptorSet>>,
    layouts: DescriptorSetLayouts,
}

impl ShaderProgram {
    pub fn new(
        device: &Arc<VulkanDevice>,
        key: impl Into<String>,
        vertex: ShaderStage,
        fragment: ShaderStage,
    ) -> Result<Self> {
        let key = key.into();
        let bindings = merge_stage_bindings(&vertex.bindings, &fragment.bindings)?;
        let layouts = DescriptorSetLayouts::new(device, &bindings)
            .with_context(|| format!("Failed to build descriptor layouts for {}", key))?;

        log::debug!(
            "Program {}: {} descriptor sets, {} bindings",
            key,
            bindings.set_count(),
            bindings.iter().count()
        );

        Ok(Self {
            key,
            vertex,
            fragment,
            bindings,
            sets: OnceCell::new(),
            layouts,
        })
    }

    /// Load both stages from disk. `explicit` replaces reflection when given.
    pub fn load(
        device: &Arc<VulkanDevice>,
        vertex_path: &Path,
        fragment_path: &Path,
        defines: &str,
        explicit: Option<&[(u32, DescriptorBinding)]>,
    ) -> Result<Self> {
        let (vertex_bindings, fragment_bindings) = match explicit {
            Some(declared) => {
                let (v, f) = split_explicit(declared)?;
                (Some(v), Some(f))
            }
            None => (None, None),
        };

        let vertex = ShaderStage::load(
            device,
            ShaderStageKind::Vertex,
            vertex_path,
            defines,
            vertex_bindings,
        )?;
        let fragment = ShaderStage::load(
            device,
            ShaderStageKind::Fragment,
            fragment_path,
            defines,
            fragment_bindings,
        )?;

        Self::new(
            device,
            program_key(vertex_path, fragment_path, defines),
            vertex,
            fragment,
        )
    }

    /// Build from in-memory GLSL (the built-in default program)
    pub fn from_glsl(
        device: &Arc<VulkanDevice>,
        key: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self> {
        let vertex = ShaderStage::from_glsl(
            device,
            ShaderStageKind::Vertex,
            &format!("{}.vert", key),
            vertex_source,
            "",
            None,
        )?;
        let fragment = ShaderStage::from_glsl(
            device,
            ShaderStageKind::Fragment,
            &format!("{}.frag", key),
            fragment_source,
            "",
            None,
        )?;
        Self::new(device, key, vertex, fragment)
    }

    /// Stage modules in pipeline order
    pub fn stages(&self) -> [(ShaderStageKind, vk::ShaderModule); 2] {
        [
            (self.vertex.kind, self.vertex.module),
            (self.fragment.kind, self.fragment.module),
        ]
    }

    pub fn bindings(&self) -> &StageBindings {
        &self.bindings
    }

    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        self.layouts.layouts()
    }

    /// True when the program has a `kind` binding at (set, binding)
    pub fn declares(&self, set: u32, binding: u32, kind: DescriptorKind) -> bool {
        self.bindings
            .get(set, binding)
            .is_some_and(|declared| declared.kind == kind)
    }

    /// The program's descriptor sets, allocated from its pools on first use.
    /// Sets without bindings are null.
    pub fn descriptor_sets(&self) -> Result<&[vk::DescriptorSet]> {
        if let Some(sets) = self.sets.get() {
            return Ok(sets);
        }
        let sets = self.layouts.allocate_sets()?;
        Ok(self.sets.get_or_init(|| sets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_bindings_split_by_stage_mask() {
        let declared = [
            (
                0,
                DescriptorBinding {
                    binding: 0,
                    kind: DescriptorKind::UniformBuffer,
                    stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                },
            ),
            (
                1,
                DescriptorBinding {
                    binding: 0,
                    kind: DescriptorKind::CombinedImageSampler,
                    stages: vk::ShaderStageFlags::FRAGMENT,
                },
            ),
        ];

        let (vertex, fragment) = split_explicit(&declared).unwrap();
        assert_eq!(vertex.set_count(), 1);
        assert_eq!(fragment.set_count(), 2);
        assert_eq!(
            fragment.get(1, 0).unwrap().kind,
            DescriptorKind::CombinedImageSampler
        );

        let merged = merge_stage_bindings(&vertex, &fragment).unwrap();
        assert_eq!(
            merged.get(0, 0).unwrap().stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn key_includes_defines() {
        let a = program_key(Path::new("a.vert"), Path::new("a.frag"), "");
        let b = program_key(Path::new("a.vert"), Path::new("a.frag"), "FOG");
        assert_ne!(a, b);
        assert_eq!(a, program_key(Path::new("a.vert"), Path::new("a.frag"), " "));
    }
}
