// Descriptor set layouts from shader bindings
//
// Each stage contributes a per-set list of binding slots. The program merges
// both stages' lists and builds one layout and one exactly-sized pool per set.

use anyhow::Result;
use ash::vk;
use std::str::FromStr;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{FatalError, VkCheck};

/// The two resource kinds the renderer binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DescriptorKind::UniformBuffer => "uniform",
            DescriptorKind::CombinedImageSampler => "sampler",
        }
    }
}

impl FromStr for DescriptorKind {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" | "uniform_buffer" | "ubo" => Ok(DescriptorKind::UniformBuffer),
            "sampler" | "texture" | "combined_image_sampler" => {
                Ok(DescriptorKind::CombinedImageSampler)
            }
            _ => Err(FatalError::UnmappedEnum {
                what: "descriptor type",
                value: s.to_string(),
            }),
        }
    }
}

/// One used binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

/// Highest set count a program may declare
pub const MAX_DESCRIPTOR_SETS: u32 = 8;
/// Binding numbers must stay below this; slots are stored densely
pub const MAX_BINDINGS_PER_SET: u32 = 64;

/// Per-set binding slots: outer index is the set, inner the binding number.
/// `None` marks a slot nobody declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageBindings {
    sets: Vec<Vec<Option<DescriptorBinding>>>,
}

impl StageBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a binding, growing both dimensions with empty slots as needed.
    /// Declaring the same slot twice unions the stages; a different kind is fatal.
    pub fn insert(&mut self, set: u32, binding: DescriptorBinding) -> Result<(), FatalError> {
        if set >= MAX_DESCRIPTOR_SETS || binding.binding >= MAX_BINDINGS_PER_SET {
            return Err(FatalError::BindingOutOfRange {
                set,
                binding: binding.binding,
                max_sets: MAX_DESCRIPTOR_SETS,
                max_bindings: MAX_BINDINGS_PER_SET,
            });
        }

        let set_index = set as usize;
        let slot_index = binding.binding as usize;

        if self.sets.len() <= set_index {
            self.sets.resize_with(set_index + 1, Vec::new);
        }
        let slots = &mut self.sets[set_index];
        if slots.len() <= slot_index {
            slots.resize(slot_index + 1, None);
        }

        let slot = &mut slots[slot_index];
        *slot = Some(match *slot {
            None => binding,
            Some(existing) => combine(set, existing, binding)?,
        });
        Ok(())
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Slots of one set; empty for a set index past the end
    pub fn set(&self, set: usize) -> &[Option<DescriptorBinding>] {
        self.sets.get(set).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, set: u32, binding: u32) -> Option<&DescriptorBinding> {
        self.sets
            .get(set as usize)?
            .get(binding as usize)?
            .as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(|slots| slots.iter().all(Option::is_none))
    }

    /// Every used slot as (set, binding)
    pub fn iter(&self) -> impl Iterator<Item = (u32, &DescriptorBinding)> {
        self.sets.iter().enumerate().flat_map(|(set, slots)| {
            slots
                .iter()
                .flatten()
                .map(move |binding| (set as u32, binding))
        })
    }
}

fn combine(
    set: u32,
    first: DescriptorBinding,
    second: DescriptorBinding,
) -> Result<DescriptorBinding, FatalError> {
    if first.kind != second.kind {
        return Err(FatalError::DescriptorConflict {
            set,
            binding: first.binding,
            first: first.kind.name(),
            second: second.kind.name(),
        });
    }
    Ok(DescriptorBinding {
        stages: first.stages | second.stages,
        ..first
    })
}

/// Union of both stages: per set up to the larger set count, per binding up
/// to the longer list. The vertex entry wins when present, else the fragment
/// entry; a slot both stages use gets both stage bits.
///
/// Both stages declaring one slot with different kinds is rejected with
/// `DescriptorConflict` rather than letting the vertex entry win (DESIGN.md,
/// open question decision 6).
pub fn merge_stage_bindings(
    vertex: &StageBindings,
    fragment: &StageBindings,
) -> Result<StageBindings, FatalError> {
    let set_count = vertex.set_count().max(fragment.set_count());
    let mut sets = Vec::with_capacity(set_count);

    for set in 0..set_count {
        let (v, f) = (vertex.set(set), fragment.set(set));
        let slot_count = v.len().max(f.len());
        let mut merged = Vec::with_capacity(slot_count);

        for slot in 0..slot_count {
            let from_vertex = v.get(slot).copied().flatten();
            let from_fragment = f.get(slot).copied().flatten();
            merged.push(match (from_vertex, from_fragment) {
                (Some(a), Some(b)) => Some(combine(set as u32, a, b)?),
                (Some(a), None) => Some(a),
                (None, b) => b,
            });
        }
        sets.push(merged);
    }

    Ok(StageBindings { sets })
}

/// Layout bindings for the used slots of one set
pub fn layout_bindings(slots: &[Option<DescriptorBinding>]) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    slots
        .iter()
        .flatten()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding.binding)
                .descriptor_type(binding.kind.to_vk())
                .descriptor_count(1)
                .stage_flags(binding.stages)
        })
        .collect()
}

/// Exactly one descriptor per used slot, grouped by type
pub fn pool_sizes(slots: &[Option<DescriptorBinding>]) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in slots.iter().flatten() {
        let ty = binding.kind.to_vk();
        match sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += 1,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: 1,
            }),
        }
    }
    sizes
}

/// One layout per merged set, plus a single-set pool for every non-empty one
pub struct DescriptorSetLayouts {
    device: Arc<VulkanDevice>,
    layouts: Vec<vk::DescriptorSetLayout>,
    pools: Vec<Option<vk::DescriptorPool>>,
}

impl DescriptorSetLayouts {
    pub fn new(device: &Arc<VulkanDevice>, bindings: &StageBindings) -> Result<Self> {
        let raw = device.raw();
        let mut built = Self {
            device: device.clone(),
            layouts: Vec::with_capacity(bindings.set_count()),
            pools: Vec::with_capacity(bindings.set_count()),
        };

        for set in 0..bindings.set_count() {
            let slots = bindings.set(set);

            let layout_bindings = layout_bindings(slots);
            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
            let layout = unsafe { raw.create_descriptor_set_layout(&layout_info, None) }
                .check("vkCreateDescriptorSetLayout")?;
            built.layouts.push(layout);

            let sizes = pool_sizes(slots);
            if sizes.is_empty() {
                built.pools.push(None);
                continue;
            }
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .max_sets(1)
                .pool_sizes(&sizes);
            let pool = unsafe { raw.create_descriptor_pool(&pool_info, None) }
                .check("vkCreateDescriptorPool")?;
            built.pools.push(Some(pool));
        }

        log::debug!(
            "Built {} descriptor set layouts ({} pools)",
            built.layouts.len(),
            built.pools.iter().flatten().count()
        );
        Ok(built)
    }

    pub fn layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.layouts
    }

    /// One set per pool. Sets without bindings come back as null handles.
    pub fn allocate_sets(&self) -> Result<Vec<vk::DescriptorSet>> {
        self.layouts
            .iter()
            .zip(&self.pools)
            .map(|(&layout, pool)| match pool {
                None => Ok(vk::DescriptorSet::null()),
                Some(pool) => {
                    let layouts = [layout];
                    let alloc_info = vk::DescriptorSetAllocateInfo::default()
                        .descriptor_pool(*pool)
                        .set_layouts(&layouts);
                    let sets = unsafe { self.device.raw().allocate_descriptor_sets(&alloc_info) }
                        .check("vkAllocateDescriptorSets")?;
                    Ok(sets[0])
                }
            })
            .collect()
    }
}

impl Drop for DescriptorSetLayouts {
    fn drop(&mut self) {
        unsafe {
            let raw = self.device.raw();
            // Destroying a pool frees the sets allocated from it
            for pool in self.pools.iter().flatten() {
                raw.destroy_descriptor_pool(*pool, None);
            }
            for &layout in &self.layouts {
                raw.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

/// Point a uniform buffer binding at `info`
pub fn write_uniform_buffer(
    raw: &ash::Device,
    set: vk::DescriptorSet,
    binding: u32,
    info: vk::DescriptorBufferInfo,
) {
    let infos = [info];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&infos);
    unsafe { raw.update_descriptor_sets(&[write], &[]) };
}

/// Point a combined image sampler binding at `info`
pub fn write_combined_image_sampler(
    raw: &ash::Device,
    set: vk::DescriptorSet,
    binding: u32,
    info: vk::DescriptorImageInfo,
) {
    let infos = [info];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&infos);
    unsafe { raw.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;
    const FRAGMENT: vk::ShaderStageFlags = vk::ShaderStageFlags::FRAGMENT;

    fn ubo(binding: u32, stages: vk::ShaderStageFlags) -> DescriptorBinding {
        DescriptorBinding {
            binding,
            kind: DescriptorKind::UniformBuffer,
            stages,
        }
    }

    fn sampler(binding: u32, stages: vk::ShaderStageFlags) -> DescriptorBinding {
        DescriptorBinding {
            binding,
            kind: DescriptorKind::CombinedImageSampler,
            stages,
        }
    }

    #[test]
    fn sparse_insert_back_fills_with_none() {
        let mut stage = StageBindings::new();
        stage.insert(1, ubo(2, VERTEX)).unwrap();

        assert_eq!(stage.set_count(), 2);
        assert!(stage.set(0).is_empty());
        assert_eq!(stage.set(1), &[None, None, Some(ubo(2, VERTEX))]);
    }

    #[test]
    fn huge_binding_numbers_are_rejected_without_allocating() {
        let mut stage = StageBindings::new();

        let err = stage.insert(0, ubo(1 << 28, VERTEX)).unwrap_err();
        assert!(matches!(
            err,
            FatalError::BindingOutOfRange { set: 0, binding, .. } if binding == 1 << 28
        ));
        assert!(stage.insert(0, ubo(u32::MAX, VERTEX)).is_err());
        assert!(stage.insert(u32::MAX, ubo(0, VERTEX)).is_err());
        assert!(stage.insert(MAX_DESCRIPTOR_SETS, ubo(0, VERTEX)).is_err());
        assert_eq!(stage.set_count(), 0);

        stage
            .insert(MAX_DESCRIPTOR_SETS - 1, ubo(MAX_BINDINGS_PER_SET - 1, VERTEX))
            .unwrap();
        assert_eq!(stage.set_count(), MAX_DESCRIPTOR_SETS as usize);
    }

    #[test]
    fn merge_keeps_vertex_set0_and_fragment_set1() {
        let mut vertex = StageBindings::new();
        vertex.insert(0, ubo(0, VERTEX)).unwrap();
        let mut fragment = StageBindings::new();
        fragment.insert(1, sampler(0, FRAGMENT)).unwrap();

        let merged = merge_stage_bindings(&vertex, &fragment).unwrap();

        assert_eq!(merged.set_count(), 2);
        assert_eq!(merged.set(0), &[Some(ubo(0, VERTEX))]);
        assert_eq!(merged.set(1), &[Some(sampler(0, FRAGMENT))]);
        for set in 0..merged.set_count() {
            assert!(merged.set(set).iter().all(Option::is_some));
        }
    }

    #[test]
    fn merge_fills_gaps_from_either_stage() {
        let mut vertex = StageBindings::new();
        vertex.insert(0, ubo(0, VERTEX)).unwrap();
        vertex.insert(0, ubo(1, VERTEX)).unwrap();
        let mut fragment = StageBindings::new();
        fragment.insert(0, sampler(3, FRAGMENT)).unwrap();

        let merged = merge_stage_bindings(&vertex, &fragment).unwrap();
        assert_eq!(
            merged.set(0),
            &[
                Some(ubo(0, VERTEX)),
                Some(ubo(1, VERTEX)),
                None,
                Some(sampler(3, FRAGMENT)),
            ]
        );
    }

    #[test]
    fn shared_slot_unions_stage_masks() {
        let mut vertex = StageBindings::new();
        vertex.insert(0, ubo(0, VERTEX)).unwrap();
        let mut fragment = StageBindings::new();
        fragment.insert(0, ubo(0, FRAGMENT)).unwrap();

        let merged = merge_stage_bindings(&vertex, &fragment).unwrap();
        assert_eq!(merged.get(0, 0).unwrap().stages, VERTEX | FRAGMENT);
    }

    #[test]
    fn conflicting_kinds_are_fatal() {
        let mut vertex = StageBindings::new();
        vertex.insert(0, ubo(1, VERTEX)).unwrap();
        let mut fragment = StageBindings::new();
        fragment.insert(0, sampler(1, FRAGMENT)).unwrap();

        let err = merge_stage_bindings(&vertex, &fragment).unwrap_err();
        assert!(matches!(
            err,
            FatalError::DescriptorConflict { set: 0, binding: 1, .. }
        ));
    }

    #[test]
    fn pool_is_sized_to_used_slots() {
        let slots = [
            Some(ubo(0, VERTEX)),
            Some(ubo(1, VERTEX)),
            None,
            Some(sampler(3, FRAGMENT)),
        ];
        let sizes = pool_sizes(&slots);
        assert_eq!(sizes.len(), 2);
        let count = |ty: vk::DescriptorType| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map_or(0, |s| s.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), 2);
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 1);

        let bindings = layout_bindings(&slots);
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[2].binding, 3);
    }

    #[test]
    fn empty_set_needs_no_pool() {
        assert!(pool_sizes(&[None, None]).is_empty());
        assert!(layout_bindings(&[]).is_empty());
    }

    #[test]
    fn descriptor_kind_names() {
        assert_eq!("uniform".parse::<DescriptorKind>().unwrap(), DescriptorKind::UniformBuffer);
        assert_eq!(
            "Sampler".parse::<DescriptorKind>().unwrap(),
            DescriptorKind::CombinedImageSampler
        );
        assert!("storage".parse::<DescriptorKind>().is_err());
    }
}
