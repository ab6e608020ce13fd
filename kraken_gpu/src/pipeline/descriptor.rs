//! Pipeline state descriptor
//!
//! `PipelineStateDescriptor` is the structural-equality key for the PSO
//! cache: it captures every parameter that contributes to a unique compiled
//! pipeline (attachment formats, blend configuration, write mask, point
//! size, vertex layout and topology class). Two byte-equal descriptors must
//! produce behaviorally identical pipelines -- violating this corrupts
//! rendering silently, so the descriptor owns no interior mutability and is
//! only built fresh per draw.

use std::hash::{Hash, Hasher};

use bitflags::bitflags;

use crate::device::MAX_COLOR_ATTACHMENTS;
use crate::texture::PixelFormat;

// ===== PRIMITIVES =====

/// Primitive type of a draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

impl Primitive {
    /// Topology class used for PSO specialization
    pub fn topology_class(&self) -> PrimitiveTopologyClass {
        match self {
            Primitive::Points => PrimitiveTopologyClass::Point,
            Primitive::Lines | Primitive::LineStrip => PrimitiveTopologyClass::Line,
            Primitive::Triangles | Primitive::TriangleStrip => PrimitiveTopologyClass::Triangle,
        }
    }
}

/// Primitive topology class baked into a PSO.
///
/// Left `Unspecified` unless the shader renders to array targets or the
/// draw uses point primitives; those combinations fail pipeline creation
/// when the class is not pinned, so the resolution happens before
/// compilation rather than at draw time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopologyClass {
    #[default]
    Unspecified,
    Point,
    Line,
    Triangle,
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

/// Front face winding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    /// Clockwise vertices define front face (Metal default)
    Clockwise,
    /// Counter-clockwise vertices define front face
    CounterClockwise,
}

// ===== VERTEX INPUT =====

/// Vertex attribute data format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Int,
    Int2,
    Int3,
    Int4,
    UInt,
    UInt2,
    UInt3,
    UInt4,
    Char4,
    UChar4,
    Char4Normalized,
    UChar4Normalized,
    Short2,
    Short2Normalized,
    UShort2,
    UShort2Normalized,
    Half2,
    Half4,
    Int1010102Normalized,
}

impl VertexFormat {
    /// Size in bytes of one attribute element
    pub fn size_bytes(&self) -> u32 {
        match self {
            VertexFormat::Float | VertexFormat::Int | VertexFormat::UInt => 4,
            VertexFormat::Float2 | VertexFormat::Int2 | VertexFormat::UInt2 => 8,
            VertexFormat::Float3 | VertexFormat::Int3 | VertexFormat::UInt3 => 12,
            VertexFormat::Float4 | VertexFormat::Int4 | VertexFormat::UInt4 => 16,
            VertexFormat::Char4
            | VertexFormat::UChar4
            | VertexFormat::Char4Normalized
            | VertexFormat::UChar4Normalized => 4,
            VertexFormat::Short2
            | VertexFormat::Short2Normalized
            | VertexFormat::UShort2
            | VertexFormat::UShort2Normalized => 4,
            VertexFormat::Half2 => 4,
            VertexFormat::Half4 => 8,
            VertexFormat::Int1010102Normalized => 4,
        }
    }

    /// Number of components per element
    pub fn component_count(&self) -> u32 {
        match self {
            VertexFormat::Float | VertexFormat::Int | VertexFormat::UInt => 1,
            VertexFormat::Float2
            | VertexFormat::Int2
            | VertexFormat::UInt2
            | VertexFormat::Short2
            | VertexFormat::Short2Normalized
            | VertexFormat::UShort2
            | VertexFormat::UShort2Normalized
            | VertexFormat::Half2 => 2,
            VertexFormat::Float3 | VertexFormat::Int3 | VertexFormat::UInt3 => 3,
            VertexFormat::Float4
            | VertexFormat::Int4
            | VertexFormat::UInt4
            | VertexFormat::Char4
            | VertexFormat::UChar4
            | VertexFormat::Char4Normalized
            | VertexFormat::UChar4Normalized
            | VertexFormat::Half4
            | VertexFormat::Int1010102Normalized => 4,
        }
    }
}

/// Vertex buffer step function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepFunction {
    /// Advance per vertex
    PerVertex,
    /// Advance per instance
    PerInstance,
    /// Never advance; the null attribute buffer uses this so a single
    /// dummy element can back any number of vertices
    Constant,
}

/// One vertex attribute slot of the pipeline vertex descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeDescriptor {
    /// Data format of the attribute
    pub format: VertexFormat,
    /// Byte offset within the vertex
    pub offset: u32,
    /// Vertex buffer bind slot feeding this attribute
    pub buffer_index: u32,
}

/// One vertex buffer layout of the pipeline vertex descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferLayoutDescriptor {
    pub step_function: StepFunction,
    pub step_rate: u32,
    pub stride: u32,
}

/// Vertex input state contributing to a unique PSO
///
/// `attributes` is indexed by shader attribute location; a `None` slot means
/// no vertex data is bound there and the bake step substitutes the null
/// attribute buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexDescriptor {
    pub attributes: Vec<Option<VertexAttributeDescriptor>>,
    pub buffer_layouts: Vec<VertexBufferLayoutDescriptor>,
    pub topology_class: PrimitiveTopologyClass,
}

// ===== BLEND STATE =====

bitflags! {
    /// Per-channel color write mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u8 {
        const RED   = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE  = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

impl ColorWriteMask {
    /// All channels enabled
    pub const ALL: Self = Self::all();
    /// No channels enabled
    pub const NONE: Self = Self::empty();
}

impl Default for ColorWriteMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Blend factor for color blending equations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationColor,
    OneMinusDestinationColor,
    DestinationAlpha,
    OneMinusDestinationAlpha,
    Source1Color,
    Source1Alpha,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    /// result = src * srcFactor + dst * dstFactor
    Add,
    /// result = src * srcFactor - dst * dstFactor
    Subtract,
    /// result = dst * dstFactor - src * srcFactor
    ReverseSubtract,
    /// result = min(src, dst)
    Min,
    /// result = max(src, dst)
    Max,
}

// ===== PIPELINE STATE DESCRIPTOR =====

/// Structural-equality key for the PSO cache
///
/// Constructed fresh each draw from the state manager, the active
/// framebuffer's attachment formats and the shader's vertex state. Never
/// mutated after construction for a given lookup.
#[derive(Debug, Clone)]
pub struct PipelineStateDescriptor {
    /// Pixel format per color attachment slot (`None` = slot unused)
    pub color_attachment_formats: [Option<PixelFormat>; MAX_COLOR_ATTACHMENTS],
    /// Depth attachment format, if any
    pub depth_attachment_format: Option<PixelFormat>,
    /// Stencil attachment format, if any
    pub stencil_attachment_format: Option<PixelFormat>,
    /// Color write mask applied to all color attachments
    pub color_write_mask: ColorWriteMask,
    /// Whether blending is enabled
    pub blending_enabled: bool,
    pub src_rgb_blend_factor: BlendFactor,
    pub dst_rgb_blend_factor: BlendFactor,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub rgb_blend_op: BlendOp,
    pub alpha_blend_op: BlendOp,
    /// Global point size. Sign-encoded: negative magnitude means the vertex
    /// stage overrides size per vertex with `|point_size|` as fallback.
    pub point_size: f32,
    /// Vertex input state
    pub vertex_descriptor: VertexDescriptor,
}

impl Default for PipelineStateDescriptor {
    fn default() -> Self {
        Self {
            color_attachment_formats: [None; MAX_COLOR_ATTACHMENTS],
            depth_attachment_format: None,
            stencil_attachment_format: None,
            color_write_mask: ColorWriteMask::ALL,
            blending_enabled: false,
            src_rgb_blend_factor: BlendFactor::One,
            dst_rgb_blend_factor: BlendFactor::Zero,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            rgb_blend_op: BlendOp::Add,
            alpha_blend_op: BlendOp::Add,
            point_size: 1.0,
            vertex_descriptor: VertexDescriptor::default(),
        }
    }
}

// Equality and hashing compare `point_size` bitwise so the descriptor can
// serve as an Eq + Hash map key while keeping the float field.
impl PartialEq for PipelineStateDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.color_attachment_formats == other.color_attachment_formats
            && self.depth_attachment_format == other.depth_attachment_format
            && self.stencil_attachment_format == other.stencil_attachment_format
            && self.color_write_mask == other.color_write_mask
            && self.blending_enabled == other.blending_enabled
            && self.src_rgb_blend_factor == other.src_rgb_blend_factor
            && self.dst_rgb_blend_factor == other.dst_rgb_blend_factor
            && self.src_alpha_blend_factor == other.src_alpha_blend_factor
            && self.dst_alpha_blend_factor == other.dst_alpha_blend_factor
            && self.rgb_blend_op == other.rgb_blend_op
            && self.alpha_blend_op == other.alpha_blend_op
            && self.point_size.to_bits() == other.point_size.to_bits()
            && self.vertex_descriptor == other.vertex_descriptor
    }
}

impl Eq for PipelineStateDescriptor {}

impl Hash for PipelineStateDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.color_attachment_formats.hash(state);
        self.depth_attachment_format.hash(state);
        self.stencil_attachment_format.hash(state);
        self.color_write_mask.hash(state);
        self.blending_enabled.hash(state);
        self.src_rgb_blend_factor.hash(state);
        self.dst_rgb_blend_factor.hash(state);
        self.src_alpha_blend_factor.hash(state);
        self.dst_alpha_blend_factor.hash(state);
        self.rgb_blend_op.hash(state);
        self.alpha_blend_op.hash(state);
        self.point_size.to_bits().hash(state);
        self.vertex_descriptor.hash(state);
    }
}

impl PipelineStateDescriptor {
    /// Number of used color attachment slots
    pub fn color_attachment_count(&self) -> usize {
        self.color_attachment_formats.iter().filter(|f| f.is_some()).count()
    }
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
