//! Unit tests for the render context state machine and binding resolution

use std::sync::Arc;

use serial_test::serial;

use crate::device::{HeadlessDevice, ShaderSource, TextureDesc};
use crate::log::{reset_logger, set_logger, CaptureLogger, LogSeverity};
use crate::pipeline::Primitive;
use crate::shader::{ShaderInterface, StageMask, TextureBinding, UniformBlockBinding};
use crate::state::{BlendMode, DepthTest};
use crate::texture::{PixelFormat, TextureKind};

use super::{ContextConfig, FrameBufferHandle, RenderContext};

fn simple_source(name: &str) -> ShaderSource {
    ShaderSource {
        name: name.to_string(),
        msl_vertex: "vertex void vs() {}".to_string(),
        msl_fragment: "fragment void fs() {}".to_string(),
        vertex_entry: "vs".to_string(),
        fragment_entry: "fs".to_string(),
    }
}

fn context_with_target(device: &Arc<HeadlessDevice>) -> (RenderContext, FrameBufferHandle) {
    let mut context = RenderContext::new(Arc::clone(device) as Arc<_>).unwrap();
    let texture = context
        .create_texture(&TextureDesc::d2("rt", PixelFormat::RGBA8_UNORM, 64, 64))
        .unwrap();
    let fb = context.create_framebuffer("target");
    context.framebuffer_attach_color(fb, texture, 0, 0, 0).unwrap();
    (context, fb)
}

// ============================================================================
// FRAME / ENCODER STATE MACHINE TESTS
// ============================================================================

#[test]
fn test_draw_outside_frame_is_error() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    context.bind_framebuffer(fb, false).unwrap();
    assert!(context.draw(Primitive::Triangles, 0, 3).is_err());
}

#[test]
fn test_encoder_reused_for_same_framebuffer() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.draw(Primitive::Triangles, 3, 3).unwrap();
    context.end_frame().unwrap();

    // One pass, two draws
    assert_eq!(device.command_count("begin_render_pass"), 1);
    assert_eq!(device.command_count("draw_primitives"), 2);
}

#[test]
fn test_framebuffer_switch_breaks_encoder() {
    let device = HeadlessDevice::new();
    let (mut context, fb_a) = context_with_target(&device);
    let texture = context
        .create_texture(&TextureDesc::d2("rt_b", PixelFormat::RGBA8_UNORM, 64, 64))
        .unwrap();
    let fb_b = context.create_framebuffer("target_b");
    context.framebuffer_attach_color(fb_b, texture, 0, 0, 0).unwrap();

    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();

    context.begin_frame().unwrap();
    context.bind_framebuffer(fb_a, false).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.bind_framebuffer(fb_b, false).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.command_count("begin_render_pass"), 2);
    assert_eq!(device.command_count("end_encoding"), 2);
}

#[test]
fn test_dirty_framebuffer_forces_new_pass() {
    // Mutating the attachment set beneath the encoder forces a pass break
    // even for the "same" framebuffer object.
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let extra = context
        .create_texture(&TextureDesc::d2("extra", PixelFormat::RGBA8_UNORM, 64, 64))
        .unwrap();
    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();

    context.framebuffer_attach_color(fb, extra, 1, 0, 0).unwrap();

    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.command_count("begin_render_pass"), 2);
}

#[test]
#[serial]
fn test_invalid_framebuffer_falls_back_to_default() {
    let logger = CaptureLogger::new();
    set_logger(logger.clone());

    let device = HeadlessDevice::new();
    let mut context = RenderContext::new(Arc::clone(&device) as Arc<_>).unwrap();
    let empty_fb = context.create_framebuffer("empty");
    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(empty_fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    // Drawing proceeded against the default framebuffer with a warning
    assert_eq!(context.active_framebuffer_handle(), context.default_framebuffer_handle());
    assert_eq!(device.command_count("draw_primitives"), 1);
    assert!(logger.count_matching(LogSeverity::Warn, "falling back to default") >= 1);

    reset_logger();
}

#[test]
fn test_destroying_bound_framebuffer_restores_default() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    context.bind_framebuffer(fb, false).unwrap();

    context.destroy_framebuffer(fb).unwrap();
    assert_eq!(context.active_framebuffer_handle(), context.default_framebuffer_handle());

    // The default framebuffer itself is not destroyable
    let default = context.default_framebuffer_handle();
    assert!(context.destroy_framebuffer(default).is_err());
}

// ============================================================================
// PIPELINE RESOLUTION TESTS
// ============================================================================

#[test]
fn test_draw_without_shader_is_skipped() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.command_count("draw_primitives"), 0);
}

#[test]
fn test_invalid_shader_skips_draw_context_stays_usable() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let broken = context.create_shader(
        &ShaderSource {
            msl_vertex: "#error nope".to_string(),
            ..simple_source("broken")
        },
        ShaderInterface::empty(),
    );
    let good = context.create_shader(&simple_source("good"), ShaderInterface::empty());
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.bind_shader(broken).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    assert_eq!(device.command_count("draw_primitives"), 0);

    // Other shaders keep working
    context.bind_shader(good).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();
    assert_eq!(device.command_count("draw_primitives"), 1);
}

#[test]
fn test_pso_reused_across_draws() {
    // Unchanged state compiles exactly one PSO and
    // binds it once per encoder.
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    for i in 0..4 {
        context.draw(Primitive::Triangles, i * 3, 3).unwrap();
    }
    context.end_frame().unwrap();

    assert_eq!(device.pipeline_compile_count(), 1);
    assert_eq!(device.command_count("set_render_pipeline"), 1);
}

#[test]
fn test_blend_change_compiles_second_pso() {
    // A blend toggle keys a second, distinct pipeline entry.
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.state_mut().set_blend(BlendMode::Alpha);
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.pipeline_compile_count(), 2);
    assert_eq!(context.shader(shader).unwrap().pso_cache().len(), 2);
}

#[test]
fn test_pipeline_compile_failure_skips_draw_only() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    device.set_fail_pipeline_compiles(true);
    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    assert_eq!(device.command_count("draw_primitives"), 0);

    device.set_fail_pipeline_compiles(false);
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();
    assert_eq!(device.command_count("draw_primitives"), 1);
}

#[test]
fn test_depth_stencil_cached_across_draws() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let depth = context
        .create_texture(&TextureDesc::d2("depth", PixelFormat::DEPTH32_FLOAT, 64, 64))
        .unwrap();
    context.framebuffer_attach_depth(fb, depth, 0, 0).unwrap();

    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();
    context.state_mut().set_depth_test(DepthTest::Less);

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    // Toggling the depth test produces a second cached object
    context.state_mut().set_depth_test(DepthTest::None);
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.depth_stencil_compile_count(), 2);
    assert_eq!(context.depth_stencil_cache().len(), 2);
    // Only one pipeline: the depth toggle does not touch the PSO key
    assert_eq!(device.pipeline_compile_count(), 1);
}

#[test]
fn test_dynamic_state_issued_once_per_encoder() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("s"), ShaderInterface::empty());
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    // Viewport/scissor/cull/facing re-issued only on the fresh encoder
    assert_eq!(device.command_count("set_viewport"), 1);
    assert_eq!(device.command_count("set_scissor"), 1);
    assert_eq!(device.command_count("set_cull_mode"), 1);
    assert_eq!(device.command_count("set_front_facing"), 1);
}

// ============================================================================
// BINDING RESOLUTION TESTS
// ============================================================================

fn ubo_interface(slot: u32, expected_size: u32) -> ShaderInterface {
    ShaderInterface {
        uniform_blocks: vec![UniformBlockBinding {
            name: "globals".to_string(),
            slot,
            expected_size,
            stages: StageMask::VERTEX | StageMask::FRAGMENT,
        }],
        ..ShaderInterface::empty()
    }
}

fn texture_interface(slot: u32, kind: TextureKind) -> ShaderInterface {
    ShaderInterface {
        textures: vec![TextureBinding {
            name: "tex".to_string(),
            slot,
            kind,
            stages: StageMask::FRAGMENT,
        }],
        ..ShaderInterface::empty()
    }
}

#[test]
#[serial]
fn test_undersized_uniform_buffer_substituted() {
    // A 32-byte buffer bound where 64 bytes are read.
    let logger = CaptureLogger::new();
    set_logger(logger.clone());

    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("ubo_shader"), ubo_interface(0, 64));
    let small = context.create_buffer("small_ubo", 32).unwrap();
    context.bind_uniform_buffer(0, small).unwrap();
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    // The draw proceeded and exactly one warning was logged
    assert_eq!(device.command_count("draw_primitives"), 1);
    assert_eq!(
        logger.count_matching(LogSeverity::Warn, "shader 'ubo_shader' reads 64"),
        1
    );

    reset_logger();
}

#[test]
#[serial]
fn test_missing_texture_substituted_with_one_warning() {
    // Texture slot declared used, nothing bound.
    let logger = CaptureLogger::new();
    set_logger(logger.clone());

    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("tex_shader"), texture_interface(3, TextureKind::D2));
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    // Draws proceeded with the dummy; one warning for the whole bind event
    let needle = "No texture bound at slot 3 for shader 'tex_shader'";
    assert_eq!(device.command_count("draw_primitives"), 2);
    assert_eq!(device.command_count("set_fragment_texture(slot=3)"), 2);
    assert_eq!(logger.count_matching(LogSeverity::Warn, needle), 1);

    // Re-binding the shader is a new bind event: one more warning
    context.bind_shader(shader).unwrap();
    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();
    assert_eq!(logger.count_matching(LogSeverity::Warn, needle), 2);

    reset_logger();
}

#[test]
#[serial]
fn test_wrong_texture_kind_substituted_with_error() {
    let logger = CaptureLogger::new();
    set_logger(logger.clone());

    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    // Shader expects a 3D texture; a 2D texture is bound
    let shader = context.create_shader(&simple_source("kind_shader"), texture_interface(0, TextureKind::D3));
    let wrong = context
        .create_texture(&TextureDesc::d2("wrong", PixelFormat::RGBA8_UNORM, 4, 4))
        .unwrap();
    context.bind_texture(0, wrong).unwrap();
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.command_count("draw_primitives"), 1);
    assert_eq!(
        logger.count_matching(LogSeverity::Error, "shader 'kind_shader' expects D3"),
        1
    );

    reset_logger();
}

#[test]
fn test_matching_texture_bound_directly() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);
    let shader = context.create_shader(&simple_source("s"), texture_interface(0, TextureKind::D2));
    let texture = context
        .create_texture(&TextureDesc::d2("albedo", PixelFormat::RGBA8_UNORM, 4, 4))
        .unwrap();
    context.bind_texture(0, texture).unwrap();
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.command_count("set_fragment_texture(slot=0)"), 1);
    assert_eq!(device.command_count("set_fragment_sampler"), 1);
}

#[test]
fn test_sampler_argument_buffer_above_inline_limit() {
    let device = HeadlessDevice::new();
    let (mut context, fb) = context_with_target(&device);

    // 17 fragment textures exceeds the inline sampler limit of 16
    let bindings: Vec<TextureBinding> = (0..17)
        .map(|slot| TextureBinding {
            name: format!("tex{}", slot),
            slot,
            kind: TextureKind::D2,
            stages: StageMask::FRAGMENT,
        })
        .collect();
    let interface = ShaderInterface {
        textures: bindings,
        ..ShaderInterface::empty()
    };
    let shader = context.create_shader(&simple_source("many_samplers"), interface);
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    // The sampler set was encoded once and reused on the second draw
    assert_eq!(device.sampler_encode_count(), 1);
    assert_eq!(device.command_count("set_fragment_sampler_arguments"), 2);
    assert_eq!(device.command_count("set_fragment_sampler("), 0);
    assert_eq!(context.sampler_argument_cache().len(), 1);
}

// ============================================================================
// CONFIG TESTS
// ============================================================================

#[test]
fn test_config_capacities_apply() {
    let device = HeadlessDevice::new();
    let config = ContextConfig {
        pso_cache_capacity: 4,
        depth_stencil_cache_capacity: 2,
        sampler_args_cache_capacity: 2,
        ..ContextConfig::default()
    };
    let context = RenderContext::with_config(Arc::clone(&device) as Arc<_>, config).unwrap();
    assert_eq!(context.config().pso_cache_capacity, 4);
}
