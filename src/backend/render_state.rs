// Raster, depth and blend state
//
// Engine-side enums with exhaustive translations to Vulkan. Names parsed from
// shader XML that don't map to a variant are rejected.

use ash::vk;
use std::str::FromStr;

use crate::error::FatalError;

fn unmapped(what: &'static str, value: &str) -> FatalError {
    FatalError::UnmappedEnum {
        what,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

impl FromStr for CullMode {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(CullMode::None),
            "front" => Ok(CullMode::Front),
            "back" => Ok(CullMode::Back),
            _ => Err(unmapped("cull mode", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

impl FillMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            FillMode::Solid => vk::PolygonMode::FILL,
            FillMode::Wireframe => vk::PolygonMode::LINE,
        }
    }
}

impl FromStr for FillMode {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solid" | "fill" => Ok(FillMode::Solid),
            "wire" | "wireframe" | "line" => Ok(FillMode::Wireframe),
            _ => Err(unmapped("fill mode", s)),
        }
    }
}

/// Front-face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Winding {
    Clockwise,
    #[default]
    CounterClockwise,
}

impl Winding {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            Winding::Clockwise => vk::FrontFace::CLOCKWISE,
            Winding::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

impl FromStr for Winding {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cw" | "clockwise" => Ok(Winding::Clockwise),
            "ccw" | "counterclockwise" | "counter_clockwise" => Ok(Winding::CounterClockwise),
            _ => Err(unmapped("winding", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl FromStr for CompareOp {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(CompareOp::Never),
            "less" => Ok(CompareOp::Less),
            "equal" => Ok(CompareOp::Equal),
            "lequal" | "less_equal" => Ok(CompareOp::LessEqual),
            "greater" => Ok(CompareOp::Greater),
            "not" | "not_equal" => Ok(CompareOp::NotEqual),
            "gequal" | "greater_equal" => Ok(CompareOp::GreaterEqual),
            "always" => Ok(CompareOp::Always),
            _ => Err(unmapped("depth compare op", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOp {
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

impl FromStr for BlendOp {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(BlendOp::Add),
            "sub" | "subtract" => Ok(BlendOp::Subtract),
            "rev_sub" | "reverse_subtract" => Ok(BlendOp::ReverseSubtract),
            "min" => Ok(BlendOp::Min),
            "max" => Ok(BlendOp::Max),
            _ => Err(unmapped("blend op", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
            BlendFactor::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
            BlendFactor::ConstantAlpha => vk::BlendFactor::CONSTANT_ALPHA,
            BlendFactor::OneMinusConstantAlpha => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
            BlendFactor::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
        }
    }
}

impl FromStr for BlendFactor {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(BlendFactor::Zero),
            "one" => Ok(BlendFactor::One),
            "src_color" => Ok(BlendFactor::SrcColor),
            "inv_src_color" | "one_minus_src_color" => Ok(BlendFactor::OneMinusSrcColor),
            "dest_color" | "dst_color" => Ok(BlendFactor::DstColor),
            "inv_dest_color" | "one_minus_dst_color" | "one_minus_dest_color" => {
                Ok(BlendFactor::OneMinusDstColor)
            }
            "src_alpha" => Ok(BlendFactor::SrcAlpha),
            "inv_src_alpha" | "one_minus_src_alpha" => Ok(BlendFactor::OneMinusSrcAlpha),
            "dest_alpha" | "dst_alpha" => Ok(BlendFactor::DstAlpha),
            "inv_dest_alpha" | "one_minus_dst_alpha" | "one_minus_dest_alpha" => {
                Ok(BlendFactor::OneMinusDstAlpha)
            }
            "constant" | "constant_color" => Ok(BlendFactor::ConstantColor),
            "inv_constant" | "one_minus_constant_color" => Ok(BlendFactor::OneMinusConstantColor),
            "constant_alpha" => Ok(BlendFactor::ConstantAlpha),
            "one_minus_constant_alpha" => Ok(BlendFactor::OneMinusConstantAlpha),
            "src_alpha_saturate" => Ok(BlendFactor::SrcAlphaSaturate),
            _ => Err(unmapped("blend factor", s)),
        }
    }
}

/// `result = src * src_factor (op) dst * dst_factor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEquation {
    pub op: BlendOp,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

/// Ordering bucket a shader draws in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RenderQueue {
    Background,
    #[default]
    Opaque,
    Transparent,
    Overlay,
}

impl FromStr for RenderQueue {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(RenderQueue::Background),
            "opaque" => Ok(RenderQueue::Opaque),
            "alpha" | "transparent" => Ok(RenderQueue::Transparent),
            "overlay" => Ok(RenderQueue::Overlay),
            _ => Err(unmapped("render queue", s)),
        }
    }
}

/// Everything about raster, depth and blend a shader can change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderState {
    pub cull: CullMode,
    pub fill: FillMode,
    pub winding: Winding,
    pub depth_compare: CompareOp,
    pub depth_write: bool,
    pub color_blend: BlendEquation,
    pub alpha_blend: BlendEquation,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            cull: CullMode::Back,
            fill: FillMode::Solid,
            winding: Winding::CounterClockwise,
            depth_compare: CompareOp::Less,
            depth_write: true,
            color_blend: BlendEquation {
                op: BlendOp::Add,
                src: BlendFactor::SrcAlpha,
                dst: BlendFactor::OneMinusSrcAlpha,
            },
            alpha_blend: BlendEquation {
                op: BlendOp::Add,
                src: BlendFactor::One,
                dst: BlendFactor::Zero,
            },
        }
    }
}

impl RenderState {
    pub fn rasterization(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.fill.to_vk())
            .line_width(1.0)
            .cull_mode(self.cull.to_vk())
            .front_face(self.winding.to_vk())
            .depth_bias_enable(false)
    }

    pub fn depth_stencil(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare.to_vk())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
    }

    /// Blending is always on; opaque shaders use ONE/ZERO factors
    pub fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .color_blend_op(self.color_blend.op.to_vk())
            .src_color_blend_factor(self.color_blend.src.to_vk())
            .dst_color_blend_factor(self.color_blend.dst.to_vk())
            .alpha_blend_op(self.alpha_blend.op.to_vk())
            .src_alpha_blend_factor(self.alpha_blend.src.to_vk())
            .dst_alpha_blend_factor(self.alpha_blend.dst.to_vk())
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("BACK".parse::<CullMode>().unwrap(), CullMode::Back);
        assert_eq!("Wireframe".parse::<FillMode>().unwrap(), FillMode::Wireframe);
        assert_eq!("cw".parse::<Winding>().unwrap(), Winding::Clockwise);
        assert_eq!("lequal".parse::<CompareOp>().unwrap(), CompareOp::LessEqual);
        assert_eq!("rev_sub".parse::<BlendOp>().unwrap(), BlendOp::ReverseSubtract);
        assert_eq!(
            "inv_src_alpha".parse::<BlendFactor>().unwrap(),
            BlendFactor::OneMinusSrcAlpha
        );
        assert_eq!("alpha".parse::<RenderQueue>().unwrap(), RenderQueue::Transparent);
    }

    #[test]
    fn unknown_names_are_unmapped() {
        let err = "sideways".parse::<CullMode>().unwrap_err();
        assert!(matches!(
            err,
            FatalError::UnmappedEnum { what: "cull mode", ref value } if value == "sideways"
        ));
        assert!("dots".parse::<FillMode>().is_err());
        assert!("sometimes".parse::<CompareOp>().is_err());
        assert!("multiply".parse::<BlendOp>().is_err());
        assert!("two".parse::<BlendFactor>().is_err());
    }

    #[test]
    fn translations_match_vulkan() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(FillMode::Wireframe.to_vk(), vk::PolygonMode::LINE);
        assert_eq!(Winding::CounterClockwise.to_vk(), vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(CompareOp::GreaterEqual.to_vk(), vk::CompareOp::GREATER_OR_EQUAL);
        assert_eq!(BlendFactor::SrcAlphaSaturate.to_vk(), vk::BlendFactor::SRC_ALPHA_SATURATE);
    }

    #[test]
    fn default_state_is_alpha_blended_back_culled() {
        let state = RenderState::default();
        let blend = state.color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);

        let raster = state.rasterization();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.depth_stencil().depth_write_enable, vk::TRUE);
    }
}
