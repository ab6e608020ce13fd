//! Global pipeline state manager
//!
//! Holds the mutable rendering state consumed by the immediate-style state
//! setters (blend mode, write masks, depth/stencil tests, culling, facing,
//! point size). Each setter flags only the dirty bit(s) it affects: PSO-keyed
//! state, depth-stencil state and each piece of dynamic encoder state are
//! invalidated independently so a blend change never forces depth-stencil
//! rebinding and a scissor change never touches the PSO.

use bitflags::bitflags;

use crate::pipeline::{
    BlendFactor, BlendOp, ColorWriteMask, CompareFunction, CullMode, DepthStencilDescriptor,
    FrontFace, Primitive, PrimitiveTopologyClass, StencilFaceOps, StencilOperation,
};

bitflags! {
    /// Per-concern dirty bits
    ///
    /// A fresh encoder inherits nothing, so opening one sets every bit; the
    /// setters below set only the bits their state feeds into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateDirtyFlags: u32 {
        /// PSO-keyed state changed (blend, write mask, point size)
        const PSO           = 1 << 0;
        /// Depth-stencil-object state changed
        const DEPTH_STENCIL = 1 << 1;
        /// Viewport must be re-issued on the encoder
        const VIEWPORT      = 1 << 2;
        /// Scissor must be re-issued on the encoder
        const SCISSOR       = 1 << 3;
        /// Cull mode must be re-issued on the encoder
        const CULL_MODE     = 1 << 4;
        /// Front-facing winding must be re-issued on the encoder
        const FRONT_FACING  = 1 << 5;
        /// Stencil reference must be re-issued on the encoder
        const STENCIL_REF   = 1 << 6;
    }
}

bitflags! {
    /// Channels enabled for writing, consumed by `set_write_mask`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteMask: u8 {
        const RED     = 1 << 0;
        const GREEN   = 1 << 1;
        const BLUE    = 1 << 2;
        const ALPHA   = 1 << 3;
        const DEPTH   = 1 << 4;
        const STENCIL = 1 << 5;
        const COLOR   = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

/// High-level blend mode, expanded into factors/ops by `set_blend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    None,
    Alpha,
    AlphaPremult,
    Additive,
    AdditivePremult,
    Multiply,
    Subtract,
    Invert,
    /// Order-independent-transparency accumulation
    Oit,
    Background,
    AlphaUnderPremult,
    /// Dual-source blending (source-1 factors)
    Custom,
}

/// Depth test function selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthTest {
    None,
    Always,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
}

/// Stencil test function selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilTest {
    None,
    Always,
    Equal,
    NotEqual,
}

/// Stencil operation selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilOpMode {
    None,
    Replace,
    CountDepthPass,
    CountDepthFail,
}

/// Face culling selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullTest {
    None,
    Front,
    Back,
}

/// Global mutable pipeline state with per-concern dirty tracking
pub struct StateManager {
    // Blend state (PSO-keyed)
    blending_enabled: bool,
    src_rgb_blend_factor: BlendFactor,
    dst_rgb_blend_factor: BlendFactor,
    src_alpha_blend_factor: BlendFactor,
    dst_alpha_blend_factor: BlendFactor,
    rgb_blend_op: BlendOp,
    alpha_blend_op: BlendOp,
    color_write_mask: ColorWriteMask,
    /// Sign-encoded: negative magnitude enables per-vertex size override
    point_size: f32,
    line_width: f32,

    // Depth-stencil state (separate compiled object)
    depth_test_enabled: bool,
    depth_function: CompareFunction,
    depth_write_enabled: bool,
    stencil_test_enabled: bool,
    stencil_function: CompareFunction,
    stencil_reference: u32,
    stencil_read_mask: u32,
    stencil_write_mask: u32,
    stencil_front: StencilFaceOps,
    stencil_back: StencilFaceOps,

    // Depth bias, applied at draw time per primitive class
    depth_bias_enabled_for_tris: bool,
    depth_bias_enabled_for_lines: bool,
    depth_bias_enabled_for_points: bool,
    depth_bias: f32,
    depth_slope_scale: f32,

    // Dynamic encoder state
    culling_enabled: bool,
    cull_mode: CullTest,
    front_face: FrontFace,

    dirty: StateDirtyFlags,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            blending_enabled: false,
            src_rgb_blend_factor: BlendFactor::One,
            dst_rgb_blend_factor: BlendFactor::Zero,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            rgb_blend_op: BlendOp::Add,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: ColorWriteMask::ALL,
            point_size: 1.0,
            line_width: 1.0,
            depth_test_enabled: false,
            depth_function: CompareFunction::Always,
            depth_write_enabled: false,
            stencil_test_enabled: false,
            stencil_function: CompareFunction::Always,
            stencil_reference: 0,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            stencil_front: StencilFaceOps::default(),
            stencil_back: StencilFaceOps::default(),
            depth_bias_enabled_for_tris: false,
            depth_bias_enabled_for_lines: false,
            depth_bias_enabled_for_points: false,
            depth_bias: 0.0,
            depth_slope_scale: 0.0,
            culling_enabled: false,
            cull_mode: CullTest::None,
            // Metal's default winding; set_facing(true) inverts it
            front_face: FrontFace::Clockwise,
            dirty: StateDirtyFlags::all(),
        }
    }

    // ===== DIRTY TRACKING =====

    pub fn dirty(&self) -> StateDirtyFlags {
        self.dirty
    }

    pub fn is_dirty(&self, flags: StateDirtyFlags) -> bool {
        self.dirty.intersects(flags)
    }

    /// A fresh encoder inherits no dynamic state; flag everything
    pub fn mark_all_dirty(&mut self) {
        self.dirty = StateDirtyFlags::all();
    }

    /// Clear the given dirty bits once the state has been applied
    pub fn clear_dirty(&mut self, flags: StateDirtyFlags) {
        self.dirty.remove(flags);
    }

    pub fn mark_dirty(&mut self, flags: StateDirtyFlags) {
        self.dirty.insert(flags);
    }

    // ===== STATE SETTERS =====

    /// Expand a blend mode into the factor/op configuration.
    ///
    /// final.rgb = src.rgb * src_rgb + dst.rgb * dst_rgb
    /// final.a   = src.a * src_alpha + dst.a * dst_alpha
    pub fn set_blend(&mut self, mode: BlendMode) {
        let (src_rgb, dst_rgb, src_alpha, dst_alpha) = match mode {
            BlendMode::None | BlendMode::Alpha => (
                BlendFactor::SourceAlpha,
                BlendFactor::OneMinusSourceAlpha,
                BlendFactor::One,
                BlendFactor::OneMinusSourceAlpha,
            ),
            BlendMode::AlphaPremult => (
                BlendFactor::One,
                BlendFactor::OneMinusSourceAlpha,
                BlendFactor::One,
                BlendFactor::OneMinusSourceAlpha,
            ),
            // Do not let alpha accumulate but pre-multiply the source RGB by it
            BlendMode::Additive => (
                BlendFactor::SourceAlpha,
                BlendFactor::One,
                BlendFactor::Zero,
                BlendFactor::One,
            ),
            // Let alpha accumulate
            BlendMode::Subtract | BlendMode::AdditivePremult => (
                BlendFactor::One,
                BlendFactor::One,
                BlendFactor::One,
                BlendFactor::One,
            ),
            BlendMode::Multiply => (
                BlendFactor::DestinationColor,
                BlendFactor::Zero,
                BlendFactor::DestinationAlpha,
                BlendFactor::Zero,
            ),
            BlendMode::Invert => (
                BlendFactor::OneMinusDestinationColor,
                BlendFactor::Zero,
                BlendFactor::Zero,
                BlendFactor::One,
            ),
            BlendMode::Oit => (
                BlendFactor::One,
                BlendFactor::One,
                BlendFactor::Zero,
                BlendFactor::OneMinusSourceAlpha,
            ),
            BlendMode::Background => (
                BlendFactor::OneMinusDestinationAlpha,
                BlendFactor::SourceAlpha,
                BlendFactor::Zero,
                BlendFactor::SourceAlpha,
            ),
            BlendMode::AlphaUnderPremult => (
                BlendFactor::OneMinusDestinationAlpha,
                BlendFactor::One,
                BlendFactor::OneMinusDestinationAlpha,
                BlendFactor::One,
            ),
            BlendMode::Custom => (
                BlendFactor::One,
                BlendFactor::Source1Color,
                BlendFactor::One,
                BlendFactor::Source1Alpha,
            ),
        };

        let op = if mode == BlendMode::Subtract {
            BlendOp::ReverseSubtract
        } else {
            BlendOp::Add
        };

        self.blending_enabled = mode != BlendMode::None;
        self.src_rgb_blend_factor = src_rgb;
        self.dst_rgb_blend_factor = dst_rgb;
        self.src_alpha_blend_factor = src_alpha;
        self.dst_alpha_blend_factor = dst_alpha;
        self.rgb_blend_op = op;
        self.alpha_blend_op = op;
        self.dirty.insert(StateDirtyFlags::PSO);
    }

    /// Color channels feed the PSO write mask; the depth bit feeds the
    /// depth-stencil object
    pub fn set_write_mask(&mut self, mask: WriteMask) {
        let mut color = ColorWriteMask::NONE;
        color.set(ColorWriteMask::RED, mask.contains(WriteMask::RED));
        color.set(ColorWriteMask::GREEN, mask.contains(WriteMask::GREEN));
        color.set(ColorWriteMask::BLUE, mask.contains(WriteMask::BLUE));
        color.set(ColorWriteMask::ALPHA, mask.contains(WriteMask::ALPHA));
        self.color_write_mask = color;
        self.depth_write_enabled = mask.contains(WriteMask::DEPTH);
        self.dirty.insert(StateDirtyFlags::PSO | StateDirtyFlags::DEPTH_STENCIL);
    }

    pub fn set_depth_test(&mut self, test: DepthTest) {
        self.depth_test_enabled = test != DepthTest::None;
        self.depth_function = match test {
            DepthTest::None => CompareFunction::Never,
            DepthTest::Always => CompareFunction::Always,
            DepthTest::Less => CompareFunction::Less,
            DepthTest::LessEqual => CompareFunction::LessEqual,
            DepthTest::Equal => CompareFunction::Equal,
            DepthTest::Greater => CompareFunction::Greater,
            DepthTest::GreaterEqual => CompareFunction::GreaterEqual,
        };
        self.dirty.insert(StateDirtyFlags::DEPTH_STENCIL);
    }

    pub fn set_stencil_test(&mut self, test: StencilTest, operation: StencilOpMode) {
        let keep = StencilFaceOps::default();
        let (front, back) = match operation {
            StencilOpMode::None => (keep, keep),
            StencilOpMode::Replace => {
                let replace = StencilFaceOps {
                    stencil_fail: StencilOperation::Keep,
                    depth_fail: StencilOperation::Keep,
                    depth_stencil_pass: StencilOperation::Replace,
                };
                (replace, replace)
            }
            // Winding inverted relative to GL due to the flipped Y
            // coordinate system
            StencilOpMode::CountDepthPass => (
                StencilFaceOps {
                    stencil_fail: StencilOperation::Keep,
                    depth_fail: StencilOperation::Keep,
                    depth_stencil_pass: StencilOperation::IncrementWrap,
                },
                StencilFaceOps {
                    stencil_fail: StencilOperation::Keep,
                    depth_fail: StencilOperation::Keep,
                    depth_stencil_pass: StencilOperation::DecrementWrap,
                },
            ),
            StencilOpMode::CountDepthFail => (
                StencilFaceOps {
                    stencil_fail: StencilOperation::Keep,
                    depth_fail: StencilOperation::DecrementWrap,
                    depth_stencil_pass: StencilOperation::Keep,
                },
                StencilFaceOps {
                    stencil_fail: StencilOperation::Keep,
                    depth_fail: StencilOperation::IncrementWrap,
                    depth_stencil_pass: StencilOperation::Keep,
                },
            ),
        };
        self.stencil_front = front;
        self.stencil_back = back;
        self.stencil_test_enabled = test != StencilTest::None;
        self.stencil_function = match test {
            StencilTest::None | StencilTest::Always => CompareFunction::Always,
            StencilTest::Equal => CompareFunction::Equal,
            StencilTest::NotEqual => CompareFunction::NotEqual,
        };
        self.dirty.insert(StateDirtyFlags::DEPTH_STENCIL);
    }

    /// Stencil reference/masks. The reference is dynamic encoder state; the
    /// masks are part of the compiled depth-stencil object.
    pub fn set_stencil_mask(&mut self, test: StencilTest, reference: u32, compare_mask: u32, write_mask: u32) {
        if test == StencilTest::None {
            self.stencil_write_mask = 0x00;
            self.stencil_read_mask = 0x00;
            self.stencil_reference = 0;
            self.stencil_function = CompareFunction::Always;
        } else {
            self.stencil_write_mask = write_mask;
            self.stencil_read_mask = compare_mask;
            self.stencil_reference = reference;
        }
        self.dirty.insert(StateDirtyFlags::DEPTH_STENCIL | StateDirtyFlags::STENCIL_REF);
    }

    pub fn set_cull(&mut self, test: CullTest) {
        self.culling_enabled = test != CullTest::None;
        self.cull_mode = test;
        self.dirty.insert(StateDirtyFlags::CULL_MODE);
    }

    /// Invert the front-face winding. Metal's default is clockwise, the
    /// inverse of GL, so `invert == true` selects counter-clockwise.
    pub fn set_facing(&mut self, invert: bool) {
        self.front_face = if invert {
            FrontFace::CounterClockwise
        } else {
            FrontFace::Clockwise
        };
        self.dirty.insert(StateDirtyFlags::FRONT_FACING);
    }

    /// Fixed shadow-map bias constants for triangles and lines
    pub fn set_shadow_bias(&mut self, enable: bool) {
        if enable {
            self.depth_bias_enabled_for_lines = true;
            self.depth_bias_enabled_for_tris = true;
            self.depth_bias = 2.0;
            self.depth_slope_scale = 1.0;
        } else {
            self.depth_bias_enabled_for_lines = false;
            self.depth_bias_enabled_for_tris = false;
            self.depth_bias = 0.0;
            self.depth_slope_scale = 0.0;
        }
        self.dirty.insert(StateDirtyFlags::DEPTH_STENCIL);
    }

    /// Sign-encoded point size: negative magnitude enables the per-vertex
    /// size override with `|size|` as fallback
    pub fn set_point_size(&mut self, size: f32) {
        if self.point_size.to_bits() != size.to_bits() {
            self.point_size = size;
            self.dirty.insert(StateDirtyFlags::PSO);
        }
    }

    pub fn set_line_width(&mut self, width: f32) {
        if self.line_width.to_bits() != width.to_bits() {
            self.line_width = width;
            self.dirty.insert(StateDirtyFlags::PSO);
        }
    }

    // ===== STATE QUERIES =====

    pub fn blending_enabled(&self) -> bool {
        self.blending_enabled
    }

    pub fn blend_factors(&self) -> (BlendFactor, BlendFactor, BlendFactor, BlendFactor) {
        (
            self.src_rgb_blend_factor,
            self.dst_rgb_blend_factor,
            self.src_alpha_blend_factor,
            self.dst_alpha_blend_factor,
        )
    }

    pub fn blend_ops(&self) -> (BlendOp, BlendOp) {
        (self.rgb_blend_op, self.alpha_blend_op)
    }

    pub fn color_write_mask(&self) -> ColorWriteMask {
        self.color_write_mask
    }

    pub fn point_size(&self) -> f32 {
        self.point_size
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    pub fn stencil_reference(&self) -> u32 {
        self.stencil_reference
    }

    pub fn cull_mode(&self) -> CullMode {
        if !self.culling_enabled {
            return CullMode::None;
        }
        match self.cull_mode {
            CullTest::None => CullMode::None,
            CullTest::Front => CullMode::Front,
            CullTest::Back => CullMode::Back,
        }
    }

    pub fn front_face(&self) -> FrontFace {
        self.front_face
    }

    /// Assemble the depth-stencil cache key from the current state.
    ///
    /// `has_depth` / `has_stencil` reflect the active framebuffer: without
    /// the attachment the corresponding test is forced off, since a
    /// depth-stencil object referencing an absent plane fails validation.
    pub fn depth_stencil_descriptor(&self, has_depth: bool, has_stencil: bool) -> DepthStencilDescriptor {
        DepthStencilDescriptor {
            depth_test_enabled: self.depth_test_enabled && has_depth,
            depth_function: if has_depth { self.depth_function } else { CompareFunction::Always },
            depth_write_enabled: self.depth_write_enabled && has_depth,
            stencil_test_enabled: self.stencil_test_enabled && has_stencil,
            stencil_function: if has_stencil { self.stencil_function } else { CompareFunction::Always },
            stencil_read_mask: self.stencil_read_mask,
            stencil_write_mask: self.stencil_write_mask,
            front: self.stencil_front,
            back: self.stencil_back,
        }
    }

    /// Depth bias to apply for a draw of the given primitive, or `None` when
    /// bias is disabled for that primitive class. Resolved at draw time
    /// because one cached depth-stencil object serves all primitive types.
    pub fn depth_bias_for(&self, primitive: Primitive) -> Option<(f32, f32)> {
        let enabled = match primitive.topology_class() {
            PrimitiveTopologyClass::Triangle => self.depth_bias_enabled_for_tris,
            PrimitiveTopologyClass::Line => self.depth_bias_enabled_for_lines,
            PrimitiveTopologyClass::Point => self.depth_bias_enabled_for_points,
            PrimitiveTopologyClass::Unspecified => false,
        };
        enabled.then_some((self.depth_bias, self.depth_slope_scale))
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
