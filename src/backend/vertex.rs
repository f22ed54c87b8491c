// Vertex layouts
//
// A layout is a stride plus a list of named elements. Attribute locations are
// the element indices, so shaders declare inputs in layout order.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    /// Four normalized bytes, typically a vertex color
    Rgba8,
}

impl ElementType {
    pub fn format(self) -> vk::Format {
        match self {
            ElementType::Float => vk::Format::R32_SFLOAT,
            ElementType::Vec2 => vk::Format::R32G32_SFLOAT,
            ElementType::Vec3 => vk::Format::R32G32B32_SFLOAT,
            ElementType::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
            ElementType::Int => vk::Format::R32_SINT,
            ElementType::IVec2 => vk::Format::R32G32_SINT,
            ElementType::IVec3 => vk::Format::R32G32B32_SINT,
            ElementType::IVec4 => vk::Format::R32G32B32A32_SINT,
            ElementType::UInt => vk::Format::R32_UINT,
            ElementType::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            ElementType::Float | ElementType::Int | ElementType::UInt | ElementType::Rgba8 => 4,
            ElementType::Vec2 | ElementType::IVec2 => 8,
            ElementType::Vec3 | ElementType::IVec3 => 12,
            ElementType::Vec4 | ElementType::IVec4 => 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexElement {
    pub semantic: String,
    pub ty: ElementType,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub elements: Vec<VertexElement>,
}

impl VertexLayout {
    /// Tightly packed layout in the given order
    pub fn packed(elements: &[(&str, ElementType)]) -> Self {
        let mut offset = 0;
        let elements = elements
            .iter()
            .map(|&(semantic, ty)| {
                let element = VertexElement {
                    semantic: semantic.to_string(),
                    ty,
                    offset,
                };
                offset += ty.size();
                element
            })
            .collect();
        Self {
            stride: offset,
            elements,
        }
    }

    /// Single per-vertex binding at slot 0
    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.elements
            .iter()
            .enumerate()
            .map(|(location, element)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format: element.ty.format(),
                offset: element.offset,
            })
            .collect()
    }
}

/// Position, color, uv. The layout the default shader expects.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexPcu {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub uv: [f32; 2],
}

impl VertexPcu {
    pub fn new(position: Vec3, color: [u8; 4], uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            color,
            uv: uv.to_array(),
        }
    }

    pub fn layout() -> VertexLayout {
        VertexLayout::packed(&[
            ("POSITION", ElementType::Vec3),
            ("COLOR", ElementType::Rgba8),
            ("UV", ElementType::Vec2),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcu_layout_matches_struct() {
        let layout = VertexPcu::layout();
        assert_eq!(layout.stride as usize, std::mem::size_of::<VertexPcu>());
        assert_eq!(layout.elements[1].offset as usize, std::mem::offset_of!(VertexPcu, color));
        assert_eq!(layout.elements[2].offset as usize, std::mem::offset_of!(VertexPcu, uv));
    }

    #[test]
    fn attributes_use_element_index_as_location() {
        let attributes = VertexPcu::layout().attribute_descriptions();
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
        assert_eq!(attributes[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attributes[1].format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn formats_cover_integer_types() {
        assert_eq!(ElementType::IVec3.format(), vk::Format::R32G32B32_SINT);
        assert_eq!(ElementType::UInt.format(), vk::Format::R32_UINT);
        assert_eq!(ElementType::IVec4.size(), 16);
    }

    #[test]
    fn binding_is_per_vertex() {
        let binding = VertexPcu::layout().binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 24);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }
}
