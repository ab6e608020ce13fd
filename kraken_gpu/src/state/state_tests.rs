//! Unit tests for the state manager's dirty tracking and state mapping

use crate::pipeline::{
    BlendFactor, BlendOp, ColorWriteMask, CompareFunction, CullMode, FrontFace, Primitive,
    StencilOperation,
};
use crate::state::{
    BlendMode, CullTest, DepthTest, StateDirtyFlags, StateManager, StencilOpMode, StencilTest,
    WriteMask,
};

// ============================================================================
// DIRTY-BIT GRANULARITY TESTS
// ============================================================================

#[test]
fn test_setters_flag_only_their_dirty_bits() {
    let mut state = StateManager::new();
    state.clear_dirty(StateDirtyFlags::all());

    state.set_blend(BlendMode::Alpha);
    assert_eq!(state.dirty(), StateDirtyFlags::PSO);
    state.clear_dirty(StateDirtyFlags::all());

    state.set_depth_test(DepthTest::Less);
    assert_eq!(state.dirty(), StateDirtyFlags::DEPTH_STENCIL);
    state.clear_dirty(StateDirtyFlags::all());

    state.set_cull(CullTest::Back);
    assert_eq!(state.dirty(), StateDirtyFlags::CULL_MODE);
    state.clear_dirty(StateDirtyFlags::all());

    state.set_facing(true);
    assert_eq!(state.dirty(), StateDirtyFlags::FRONT_FACING);
}

#[test]
fn test_write_mask_touches_pso_and_depth_stencil() {
    // The color channels live in the PSO, the depth bit in the compiled
    // depth-stencil object.
    let mut state = StateManager::new();
    state.clear_dirty(StateDirtyFlags::all());

    state.set_write_mask(WriteMask::COLOR | WriteMask::DEPTH);
    assert_eq!(state.dirty(), StateDirtyFlags::PSO | StateDirtyFlags::DEPTH_STENCIL);
}

#[test]
fn test_unchanged_point_size_stays_clean() {
    let mut state = StateManager::new();
    state.set_point_size(5.0);
    state.clear_dirty(StateDirtyFlags::all());

    state.set_point_size(5.0);
    assert!(state.dirty().is_empty());

    state.set_point_size(-5.0);
    assert_eq!(state.dirty(), StateDirtyFlags::PSO);
}

#[test]
fn test_mark_all_dirty_covers_every_concern() {
    let mut state = StateManager::new();
    state.clear_dirty(StateDirtyFlags::all());
    state.mark_all_dirty();
    assert_eq!(state.dirty(), StateDirtyFlags::all());
}

// ============================================================================
// BLEND MODE MAPPING TESTS
// ============================================================================

#[test]
fn test_blend_none_disables_blending() {
    let mut state = StateManager::new();
    state.set_blend(BlendMode::Alpha);
    assert!(state.blending_enabled());
    state.set_blend(BlendMode::None);
    assert!(!state.blending_enabled());
}

#[test]
fn test_alpha_blend_factors() {
    let mut state = StateManager::new();
    state.set_blend(BlendMode::Alpha);
    assert_eq!(
        state.blend_factors(),
        (
            BlendFactor::SourceAlpha,
            BlendFactor::OneMinusSourceAlpha,
            BlendFactor::One,
            BlendFactor::OneMinusSourceAlpha,
        )
    );
    assert_eq!(state.blend_ops(), (BlendOp::Add, BlendOp::Add));
}

#[test]
fn test_subtract_uses_reverse_subtract_op() {
    let mut state = StateManager::new();
    state.set_blend(BlendMode::Subtract);
    assert_eq!(
        state.blend_factors(),
        (BlendFactor::One, BlendFactor::One, BlendFactor::One, BlendFactor::One)
    );
    assert_eq!(state.blend_ops(), (BlendOp::ReverseSubtract, BlendOp::ReverseSubtract));
}

#[test]
fn test_custom_blend_uses_dual_source_factors() {
    let mut state = StateManager::new();
    state.set_blend(BlendMode::Custom);
    let (_, dst_rgb, _, dst_alpha) = state.blend_factors();
    assert_eq!(dst_rgb, BlendFactor::Source1Color);
    assert_eq!(dst_alpha, BlendFactor::Source1Alpha);
}

// ============================================================================
// DEPTH / STENCIL / FACING TESTS
// ============================================================================

#[test]
fn test_depth_stencil_descriptor_respects_attachments() {
    let mut state = StateManager::new();
    state.set_depth_test(DepthTest::LessEqual);
    state.set_write_mask(WriteMask::COLOR | WriteMask::DEPTH);

    let with_depth = state.depth_stencil_descriptor(true, false);
    assert!(with_depth.depth_test_enabled);
    assert!(with_depth.depth_write_enabled);
    assert_eq!(with_depth.depth_function, CompareFunction::LessEqual);

    // No depth attachment forces the test off
    let without_depth = state.depth_stencil_descriptor(false, false);
    assert!(!without_depth.depth_test_enabled);
    assert!(!without_depth.depth_write_enabled);
    assert_eq!(without_depth.depth_function, CompareFunction::Always);
}

#[test]
fn test_stencil_count_ops_invert_winding() {
    // The Y flip swaps increment/decrement between faces.
    let mut state = StateManager::new();
    state.set_stencil_test(StencilTest::Always, StencilOpMode::CountDepthPass);

    let descriptor = state.depth_stencil_descriptor(true, true);
    assert_eq!(descriptor.front.depth_stencil_pass, StencilOperation::IncrementWrap);
    assert_eq!(descriptor.back.depth_stencil_pass, StencilOperation::DecrementWrap);
}

#[test]
fn test_stencil_mask_none_clears_masks() {
    let mut state = StateManager::new();
    state.set_stencil_mask(StencilTest::Equal, 0x42, 0x0F, 0xF0);
    assert_eq!(state.stencil_reference(), 0x42);

    state.set_stencil_mask(StencilTest::None, 0x42, 0x0F, 0xF0);
    assert_eq!(state.stencil_reference(), 0);
    let descriptor = state.depth_stencil_descriptor(true, true);
    assert_eq!(descriptor.stencil_read_mask, 0x00);
    assert_eq!(descriptor.stencil_write_mask, 0x00);
}

#[test]
fn test_facing_inversion() {
    // Metal default is clockwise; inverting selects counter-clockwise.
    let mut state = StateManager::new();
    assert_eq!(state.front_face(), FrontFace::Clockwise);
    state.set_facing(true);
    assert_eq!(state.front_face(), FrontFace::CounterClockwise);
    state.set_facing(false);
    assert_eq!(state.front_face(), FrontFace::Clockwise);
}

#[test]
fn test_cull_mode_mapping() {
    let mut state = StateManager::new();
    assert_eq!(state.cull_mode(), CullMode::None);
    state.set_cull(CullTest::Back);
    assert_eq!(state.cull_mode(), CullMode::Back);
    state.set_cull(CullTest::None);
    assert_eq!(state.cull_mode(), CullMode::None);
}

// ============================================================================
// DEPTH BIAS TESTS
// ============================================================================

#[test]
fn test_shadow_bias_applies_to_tris_and_lines_only() {
    let mut state = StateManager::new();
    state.set_shadow_bias(true);

    assert_eq!(state.depth_bias_for(Primitive::Triangles), Some((2.0, 1.0)));
    assert_eq!(state.depth_bias_for(Primitive::Lines), Some((2.0, 1.0)));
    assert_eq!(state.depth_bias_for(Primitive::Points), None);

    state.set_shadow_bias(false);
    assert_eq!(state.depth_bias_for(Primitive::Triangles), None);
}
