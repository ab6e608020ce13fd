//! Unit tests for FrameBuffer attachment management and descriptor caching

use glam::Vec4;

use crate::device::{HeadlessDevice, TextureDesc, MAX_MIP_COUNT};
use crate::framebuffer::{
    FrameBuffer, FrameBufferPlanes, LoadAction, RenderPassConfig, StoreAction,
};
use crate::texture::{PixelFormat, TextureHandle, TextureKind, TexturePool};

fn pool_with_texture(width: u32, height: u32) -> (TexturePool, TextureHandle) {
    let device = HeadlessDevice::new();
    let mut pool = TexturePool::new();
    let handle = pool
        .create(device.as_ref(), &TextureDesc::d2("rt", PixelFormat::RGBA8_UNORM, width, height))
        .unwrap();
    (pool, handle)
}

// ============================================================================
// ATTACHMENT MANAGEMENT TESTS
// ============================================================================

#[test]
fn test_validate_render_pass_requires_attachment() {
    // Attach -> valid, remove -> invalid.
    let (pool, texture) = pool_with_texture(256, 256);
    let mut fb = FrameBuffer::new("scenario_a");

    assert!(!fb.validate_render_pass());
    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();
    assert!(fb.validate_render_pass());

    fb.remove_color_attachment(0);
    assert!(!fb.validate_render_pass());
}

#[test]
fn test_first_attachment_establishes_size() {
    let (pool, texture) = pool_with_texture(128, 64);
    let mut fb = FrameBuffer::new("size");

    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();
    assert_eq!(fb.width(), 128);
    assert_eq!(fb.height(), 64);
    assert_eq!(fb.viewport().width, 128);
    assert_eq!(fb.viewport().height, 64);
    assert!(!fb.scissor_enabled());
}

#[test]
fn test_mismatched_attachment_rejected() {
    // Differing sizes are a recoverable validation error.
    let device = HeadlessDevice::new();
    let mut pool = TexturePool::new();
    let big = pool
        .create(device.as_ref(), &TextureDesc::d2("big", PixelFormat::RGBA8_UNORM, 128, 128))
        .unwrap();
    let small = pool
        .create(device.as_ref(), &TextureDesc::d2("small", PixelFormat::RGBA8_UNORM, 64, 64))
        .unwrap();

    let mut fb = FrameBuffer::new("mismatch");
    fb.add_color_attachment(&pool, big, 0, 0, 0).unwrap();
    assert!(fb.add_color_attachment(&pool, small, 1, 0, 0).is_err());
    // Framebuffer keeps its established size
    assert_eq!(fb.width(), 128);
}

#[test]
fn test_mip_scaled_attachment_matches() {
    // After mip-scaling: a 128x128 texture at mip 1 matches a 64x64 one.
    let device = HeadlessDevice::new();
    let mut pool = TexturePool::new();
    let big = pool
        .create(
            device.as_ref(),
            &TextureDesc {
                label: "big".to_string(),
                kind: TextureKind::D2,
                format: PixelFormat::RGBA8_UNORM,
                width: 128,
                height: 128,
                depth_or_layers: 1,
                mip_count: 4,
            },
        )
        .unwrap();
    let small = pool
        .create(device.as_ref(), &TextureDesc::d2("small", PixelFormat::RGBA8_UNORM, 64, 64))
        .unwrap();

    let mut fb = FrameBuffer::new("mip_match");
    fb.add_color_attachment(&pool, small, 0, 0, 0).unwrap();
    fb.add_color_attachment(&pool, big, 1, 1, 0).unwrap();
    assert_eq!(fb.width(), 64);
}

#[test]
fn test_invalid_mip_clamped_with_warning() {
    let (pool, texture) = pool_with_texture(32, 32);
    let mut fb = FrameBuffer::new("mip_clamp");

    // Invalid mips clamp to zero instead of failing
    fb.add_color_attachment(&pool, texture, 0, MAX_MIP_COUNT as i32 + 3, 0).unwrap();
    assert_eq!(fb.color_attachment(0).mip, 0);
    fb.remove_color_attachment(0);
    fb.add_color_attachment(&pool, texture, 0, -2, 0).unwrap();
    assert_eq!(fb.color_attachment(0).mip, 0);
}

#[test]
fn test_stale_texture_attachment_rejected() {
    let device = HeadlessDevice::new();
    let mut pool = TexturePool::new();
    let handle = pool
        .create(device.as_ref(), &TextureDesc::d2("gone", PixelFormat::RGBA8_UNORM, 8, 8))
        .unwrap();
    pool.destroy(handle);

    let mut fb = FrameBuffer::new("stale");
    assert!(fb.add_color_attachment(&pool, handle, 0, 0, 0).is_err());
    assert!(!fb.validate_render_pass());
}

#[test]
fn test_remove_all_attachments_resets_size() {
    let (pool, texture) = pool_with_texture(64, 64);
    let mut fb = FrameBuffer::new("reset");

    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();
    fb.add_color_attachment(&pool, texture, 3, 0, 0).unwrap();
    assert_eq!(fb.attachment_count(), 2);

    fb.remove_all_attachments();
    assert_eq!(fb.attachment_count(), 0);
    assert_eq!(fb.width(), 0);
    assert_eq!(fb.height(), 0);
}

#[test]
fn test_layered_attachment_all_layers() {
    let device = HeadlessDevice::new();
    let mut pool = TexturePool::new();
    let array = pool
        .create(
            device.as_ref(),
            &TextureDesc {
                label: "layers".to_string(),
                kind: TextureKind::D2Array,
                format: PixelFormat::RGBA8_UNORM,
                width: 32,
                height: 32,
                depth_or_layers: 4,
                mip_count: 1,
            },
        )
        .unwrap();

    let mut fb = FrameBuffer::new("layered");
    // layer -1 binds all layers for multilayered rendering
    fb.add_color_attachment(&pool, array, 0, 0, -1).unwrap();
    let attachment = fb.color_attachment(0);
    assert_eq!(attachment.slice, 0);
    assert_eq!(attachment.render_target_array_length, 4);
    assert!(fb.uses_multilayered_rendering());
}

#[test]
fn test_layer_out_of_range_rejected() {
    let device = HeadlessDevice::new();
    let mut pool = TexturePool::new();
    let array = pool
        .create(
            device.as_ref(),
            &TextureDesc {
                label: "layers".to_string(),
                kind: TextureKind::D2Array,
                format: PixelFormat::RGBA8_UNORM,
                width: 32,
                height: 32,
                depth_or_layers: 2,
                mip_count: 1,
            },
        )
        .unwrap();

    let mut fb = FrameBuffer::new("oob");
    assert!(fb.add_color_attachment(&pool, array, 0, 0, 5).is_err());
}

// ============================================================================
// DESCRIPTOR CACHE TESTS
// ============================================================================

#[test]
fn test_loadstore_change_preserves_load_descriptor() {
    let (pool, texture) = pool_with_texture(16, 16);
    let mut fb = FrameBuffer::new("p3");
    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();

    // Bake all three variants clean: LOAD, then CLEAR (pending clear set),
    // then CUSTOM (pending consumed without touching loadstore metadata)
    fb.bake_render_pass_descriptor(&pool, true).unwrap();
    fb.set_color_attachment_clear_color(0, Vec4::ONE);
    fb.bake_render_pass_descriptor(&pool, false).unwrap();
    fb.mark_cleared();
    fb.bake_render_pass_descriptor(&pool, false).unwrap();
    assert!(!fb.descriptor_is_dirty(RenderPassConfig::Load));
    assert!(!fb.descriptor_is_dirty(RenderPassConfig::Clear));
    assert!(!fb.descriptor_is_dirty(RenderPassConfig::Custom));

    // Mutating only clear metadata leaves LOAD valid but dirties the rest
    fb.set_color_attachment_clear_color(0, Vec4::new(1.0, 0.0, 0.0, 1.0));
    assert!(!fb.descriptor_is_dirty(RenderPassConfig::Load));
    assert!(fb.descriptor_is_dirty(RenderPassConfig::Clear));
    assert!(fb.descriptor_is_dirty(RenderPassConfig::Custom));
}

#[test]
fn test_attachment_change_invalidates_all_descriptors() {
    let (pool, texture) = pool_with_texture(16, 16);
    let mut fb = FrameBuffer::new("p3_all");
    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();
    fb.bake_render_pass_descriptor(&pool, true).unwrap();

    fb.add_color_attachment(&pool, texture, 1, 0, 0).unwrap();
    assert!(fb.descriptor_is_dirty(RenderPassConfig::Load));
    assert!(fb.descriptor_is_dirty(RenderPassConfig::Clear));
    assert!(fb.descriptor_is_dirty(RenderPassConfig::Custom));
}

#[test]
fn test_config_selection() {
    let (pool, texture) = pool_with_texture(16, 16);
    let mut fb = FrameBuffer::new("config");
    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();

    assert_eq!(fb.active_config(true), RenderPassConfig::Load);
    assert_eq!(fb.active_config(false), RenderPassConfig::Custom);

    fb.set_color_attachment_clear_color(0, Vec4::ONE);
    assert_eq!(fb.active_config(false), RenderPassConfig::Clear);

    fb.mark_cleared();
    assert_eq!(fb.active_config(false), RenderPassConfig::Custom);
}

#[test]
fn test_load_config_forces_load_actions() {
    let (pool, texture) = pool_with_texture(16, 16);
    let mut fb = FrameBuffer::new("force_load");
    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();
    fb.set_color_loadstore_op(0, LoadAction::DontCare, StoreAction::Store);

    let descriptor = fb.bake_render_pass_descriptor(&pool, true).unwrap();
    let attachment = descriptor.color[0].as_ref().unwrap();
    assert_eq!(attachment.load_action, LoadAction::Load);
}

#[test]
fn test_custom_config_demotes_clear_to_load() {
    let (pool, texture) = pool_with_texture(16, 16);
    let mut fb = FrameBuffer::new("demote");
    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();

    // Request a clear, then consume the pending flag without a pass; the
    // CUSTOM config must not re-apply the stale clear action.
    fb.set_color_attachment_clear_color(0, Vec4::ONE);
    fb.mark_cleared();

    let descriptor = fb.bake_render_pass_descriptor(&pool, false).unwrap();
    let attachment = descriptor.color[0].as_ref().unwrap();
    assert_eq!(attachment.load_action, LoadAction::Load);
}

#[test]
fn test_clear_config_carries_clear_value() {
    let (pool, texture) = pool_with_texture(16, 16);
    let mut fb = FrameBuffer::new("clear_value");
    fb.add_color_attachment(&pool, texture, 0, 0, 0).unwrap();
    fb.clear(FrameBufferPlanes::COLOR, Vec4::new(0.25, 0.5, 0.75, 1.0), 1.0, 0);

    let descriptor = fb.bake_render_pass_descriptor(&pool, false).unwrap();
    let attachment = descriptor.color[0].as_ref().unwrap();
    assert_eq!(attachment.load_action, LoadAction::Clear);
    assert_eq!(
        attachment.clear_value.as_color(),
        Some(Vec4::new(0.25, 0.5, 0.75, 1.0))
    );
}

// ============================================================================
// SRGB TESTS
// ============================================================================

#[test]
fn test_srgb_flag_follows_primary_attachment() {
    let device = HeadlessDevice::new();
    let mut pool = TexturePool::new();
    let srgb = pool
        .create(device.as_ref(), &TextureDesc::d2("srgb", PixelFormat::RGBA8_SRGB, 8, 8))
        .unwrap();

    let mut fb = FrameBuffer::new("srgb");
    fb.add_color_attachment(&pool, srgb, 0, 0, 0).unwrap();
    assert!(fb.is_srgb());

    // Rendering with sRGB disabled reinterprets through a UNORM view
    fb.set_srgb_enabled(false);
    let descriptor = fb.bake_render_pass_descriptor(&pool, false).unwrap();
    assert_eq!(
        descriptor.color[0].as_ref().unwrap().view_format,
        Some(PixelFormat::RGBA8_UNORM)
    );

    fb.set_srgb_enabled(true);
    let descriptor = fb.bake_render_pass_descriptor(&pool, false).unwrap();
    assert_eq!(descriptor.color[0].as_ref().unwrap().view_format, None);
}
