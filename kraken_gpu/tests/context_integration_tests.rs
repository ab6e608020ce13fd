//! Integration tests for the full frame flow through RenderContext
//!
//! These drive begin_frame -> state changes -> draws -> end_frame against
//! the headless device and assert on the encoded command stream and the
//! compile counters, covering the caching and state-machine contracts
//! end to end.


use kraken_gpu::kraken::gpu::{
    Primitive, ShaderInterface, StageMask, StepFunction, TextureDesc, UniformBlockBinding,
    VertexAttributeDescriptor, VertexBufferLayoutDescriptor, VertexDescriptor, VertexFormat,
};
use kraken_gpu::kraken::gpu::{BlendMode, CullTest, DepthTest, PixelFormat, WriteMask};

use gpu_test_utils::{create_color_target, create_test_context, create_test_shader, create_test_shader_source};

// ============================================================================
// FRAME FLOW TESTS
// ============================================================================

#[test]
fn test_integration_full_frame_single_pass() {
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::RGBA8_UNORM, 128, 128);
    let shader = create_test_shader(&mut context, "flat");

    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 6).unwrap();
    context.draw(Primitive::Triangles, 6, 6).unwrap();
    context.end_frame().unwrap();

    let commands = device.commands();
    // One pass, both draws inside it, encoder closed, buffer committed with
    // the frame's sync-event signal
    assert_eq!(device.command_count("begin_render_pass"), 1);
    assert_eq!(device.command_count("draw_primitives"), 2);
    assert_eq!(device.command_count("end_encoding"), 1);
    assert_eq!(device.command_count("encode_signal_event(1)"), 1);
    assert!(commands.iter().position(|c| c.contains("end_encoding")).unwrap()
        < commands.iter().position(|c| c.contains("commit")).unwrap());
}

#[test]
fn test_integration_multi_target_frame() {
    // Render into an offscreen target, then composite into the main target;
    // re-binding the first target inside the frame resumes it with LOAD.
    let (device, mut context) = create_test_context();
    let (offscreen, _) = create_color_target(&mut context, "offscreen", PixelFormat::RGBA16_FLOAT, 64, 64);
    let (main, _) = create_color_target(&mut context, "main", PixelFormat::BGRA8_UNORM, 128, 128);
    let shader = create_test_shader(&mut context, "composite");
    context.bind_shader(shader).unwrap();

    context.begin_frame().unwrap();
    context.bind_framebuffer(offscreen, false).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.bind_framebuffer(main, false).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.bind_framebuffer(offscreen, false).unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.command_count("begin_render_pass"), 3);
    // The resumed offscreen pass loads earlier results
    let commands = device.commands();
    let resumed = commands
        .iter()
        .filter(|c| c.starts_with("begin_render_pass"))
        .nth(2)
        .unwrap();
    assert!(resumed.contains("color0=Load"), "resumed pass was {:?}", resumed);
}

#[test]
fn test_integration_frame_lifecycle_errors() {
    let (_, mut context) = create_test_context();
    assert!(context.end_frame().is_err());
    context.begin_frame().unwrap();
    assert!(context.begin_frame().is_err());
    context.end_frame().unwrap();
}

// ============================================================================
// STATE / CACHE INTERPLAY TESTS
// ============================================================================

#[test]
fn test_integration_state_changes_reuse_pipelines_across_frames() {
    // Two frames cycling the same blend states: every permutation compiles
    // exactly once for the shader's lifetime.
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::RGBA8_UNORM, 32, 32);
    let shader = create_test_shader(&mut context, "cycled");
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    for _ in 0..2 {
        context.begin_frame().unwrap();
        context.state_mut().set_blend(BlendMode::None);
        context.draw(Primitive::Triangles, 0, 3).unwrap();
        context.state_mut().set_blend(BlendMode::Alpha);
        context.draw(Primitive::Triangles, 0, 3).unwrap();
        context.state_mut().set_blend(BlendMode::Additive);
        context.draw(Primitive::Triangles, 0, 3).unwrap();
        context.end_frame().unwrap();
    }

    assert_eq!(device.pipeline_compile_count(), 3);
    assert_eq!(context.shader(shader).unwrap().pso_cache().len(), 3);
}

#[test]
fn test_integration_write_mask_and_cull_paths() {
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::RGBA8_UNORM, 32, 32);
    let shader = create_test_shader(&mut context, "masked");
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();

    // Write mask feeds the PSO key; cull mode is dynamic state only
    context.state_mut().set_write_mask(WriteMask::RED | WriteMask::GREEN);
    context.state_mut().set_cull(CullTest::Back);
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    assert_eq!(device.pipeline_compile_count(), 2);
    assert_eq!(device.command_count("set_cull_mode(Back)"), 1);
}

#[test]
fn test_integration_depth_bias_selected_by_primitive() {
    // One cached depth-stencil object serves triangles and points; the bias
    // is re-issued per primitive class.
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::RGBA8_UNORM, 32, 32);
    let depth = context
        .create_texture(&TextureDesc::d2("depth", PixelFormat::DEPTH32_FLOAT, 32, 32))
        .unwrap();
    context.framebuffer_attach_depth(fb, depth, 0, 0).unwrap();

    let shader = create_test_shader(&mut context, "biased");
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();
    context.state_mut().set_depth_test(DepthTest::Less);
    context.state_mut().set_shadow_bias(true);

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.draw(Primitive::Points, 0, 3).unwrap();
    context.end_frame().unwrap();

    // Triangles get the bias, points do not
    assert_eq!(device.command_count("set_depth_bias(2,1,0)"), 1);
    assert_eq!(device.command_count("set_depth_bias(0,0,0)"), 1);
}

#[test]
fn test_integration_point_topology_compiles_distinct_pso() {
    // Point draws pin the topology class, so they key a separate pipeline
    // from triangle draws with otherwise identical state.
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::RGBA8_UNORM, 32, 32);
    let shader = create_test_shader(&mut context, "points");
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.draw(Primitive::Points, 0, 8).unwrap();
    context.draw(Primitive::Lines, 0, 2).unwrap();
    context.end_frame().unwrap();

    // Triangles and lines share the Unspecified class; points do not
    assert_eq!(device.pipeline_compile_count(), 2);
}

// ============================================================================
// VERTEX / UNIFORM BINDING TESTS
// ============================================================================

#[test]
fn test_integration_vertex_and_uniform_buffers_bound() {
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::RGBA8_UNORM, 32, 32);

    let interface = ShaderInterface {
        uniform_blocks: vec![UniformBlockBinding {
            name: "globals".to_string(),
            slot: 0,
            expected_size: 64,
            stages: StageMask::VERTEX,
        }],
        attributes: vec![kraken_gpu::kraken::gpu::AttributeBinding {
            name: "position".to_string(),
            location: 0,
            format: VertexFormat::Float3,
        }],
        ..ShaderInterface::empty()
    };
    let shader = context.create_shader(&create_test_shader_source("mesh"), interface);

    let vbo = context.create_buffer("vbo", 36 * 12).unwrap();
    let ubo = context.create_buffer("globals", 64).unwrap();
    context.bind_vertex_buffer(0, vbo);
    context.bind_uniform_buffer(0, ubo).unwrap();
    context.set_vertex_descriptor(VertexDescriptor {
        attributes: vec![Some(VertexAttributeDescriptor {
            format: VertexFormat::Float3,
            offset: 0,
            buffer_index: 0,
        })],
        buffer_layouts: vec![VertexBufferLayoutDescriptor {
            step_function: StepFunction::PerVertex,
            step_rate: 1,
            stride: 12,
        }],
        topology_class: Default::default(),
    });

    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();
    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 36).unwrap();
    context.end_frame().unwrap();

    // VBO at slot 0, UBO past the vertex buffer bind range (16)
    assert_eq!(device.command_count("set_vertex_buffer(offset=0,index=0)"), 1);
    assert_eq!(device.command_count("set_vertex_buffer(offset=0,index=16)"), 1);
    assert_eq!(device.command_count("draw_primitives(Triangles,0,36)"), 1);
}

#[test]
fn test_integration_push_constants_bound_inline() {
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::RGBA8_UNORM, 32, 32);

    let interface = ShaderInterface {
        push_constant_size: 32,
        push_constant_fields: vec![kraken_gpu::kraken::gpu::PushConstantField {
            name: "tint".to_string(),
            offset: 0,
            size: 16,
        }],
        ..ShaderInterface::empty()
    };
    let shader = context.create_shader(&create_test_shader_source("tinted"), interface);
    context
        .shader_mut(shader)
        .unwrap()
        .set_push_constant("tint", &[0u8; 16])
        .unwrap();

    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();
    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();

    // 32 bytes of push constants as inline payload on both stages
    assert_eq!(device.command_count("set_vertex_bytes(len=32"), 1);
    assert_eq!(device.command_count("set_fragment_bytes(len=32"), 1);
    assert!(!context.shader(shader).unwrap().push_constants_dirty());
}

// ============================================================================
// PRESENT TESTS
// ============================================================================

#[test]
fn test_integration_present_after_frame() {
    let (device, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::BGRA8_UNORM, 32, 32);
    let shader = create_test_shader(&mut context, "swap");
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    context.begin_frame().unwrap();
    context.draw(Primitive::Triangles, 0, 3).unwrap();
    context.end_frame().unwrap();
    context.present().unwrap();

    // Presentation waits on the frame's sync event before presenting
    assert_eq!(device.command_count("encode_wait_for_event(1)"), 1);
    assert_eq!(device.command_count("present_drawable"), 1);
    // The headless device completes inline, so the slot is already released
    assert_eq!(context.pacer().in_flight(), 0);

    // Present inside an active frame is a caller error
    context.begin_frame().unwrap();
    assert!(context.present().is_err());
    context.end_frame().unwrap();
}

#[test]
fn test_integration_repeated_frames_pace_without_blocking() {
    // Headless completion is synchronous, so in-flight never saturates and
    // present never blocks regardless of frame count.
    let (_, mut context) = create_test_context();
    let (fb, _) = create_color_target(&mut context, "scene", PixelFormat::BGRA8_UNORM, 16, 16);
    let shader = create_test_shader(&mut context, "loop");
    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();

    for _ in 0..10 {
        context.begin_frame().unwrap();
        context.draw(Primitive::Triangles, 0, 3).unwrap();
        context.end_frame().unwrap();
        context.present().unwrap();
    }
    assert_eq!(context.pacer().in_flight(), 0);
    assert!(context.pacer().average_latency_us() < 85_000);
}
