//! Tests for the MetalDevice backend
//!
//! These tests verify that MetalDevice correctly implements the RawDevice
//! trait family against a real GPU. All tests require a Metal device and
//! are marked with #[ignore].
//!
//! Run with: cargo test --test metal_renderer_tests -- --ignored
#![cfg(target_os = "macos")]

use std::sync::Arc;

use kraken_gpu::device::{RawDevice, ShaderSource, TextureDesc};
use kraken_gpu::kraken::RenderContext;
use kraken_gpu::pipeline::{CompareFunction, DepthStencilDescriptor};
use kraken_gpu::texture::{PixelFormat, SamplerState};
use kraken_gpu_renderer_metal::MetalDevice;

// Every translated shader declares the backend's function constants; the
// pipeline bake provides their values.
const TEST_VERTEX: &str = r#"
#include <metal_stdlib>
using namespace metal;
constant int uniform_buffer_base_index [[function_constant(0)]];
constant float pipeline_point_size [[function_constant(1)]];
constant bool per_vertex_point_size [[function_constant(2)]];
vertex float4 test_vs(uint vid [[vertex_id]]) {
    float2 positions[3] = { float2(-1.0, -1.0), float2(3.0, -1.0), float2(-1.0, 3.0) };
    return float4(positions[vid], 0.0, 1.0);
}
"#;

const TEST_FRAGMENT: &str = r#"
#include <metal_stdlib>
using namespace metal;
constant int uniform_buffer_base_index [[function_constant(0)]];
constant float pipeline_point_size [[function_constant(1)]];
constant bool per_vertex_point_size [[function_constant(2)]];
fragment half4 test_fs() {
    return half4(1.0, 0.0, 0.0, 1.0);
}
"#;

fn test_source() -> ShaderSource {
    ShaderSource {
        name: "metal_test".to_string(),
        msl_vertex: TEST_VERTEX.to_string(),
        msl_fragment: TEST_FRAGMENT.to_string(),
        vertex_entry: "test_vs".to_string(),
        fragment_entry: "test_fs".to_string(),
    }
}

// ============================================================================
// RESOURCE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_metal_create_texture_and_readback() {
    let device = MetalDevice::new().unwrap();
    let texture = device
        .create_texture(&TextureDesc::d2("test", PixelFormat::RGBA8_UNORM, 16, 16))
        .unwrap();

    let area = kraken_gpu::device::Rect::new(0, 0, 2, 2);
    let data = vec![0x7Fu8; 16];
    texture.write_region(0, 0, area, &data).unwrap();
    assert_eq!(texture.read_region(0, 0, area).unwrap(), data);
}

#[test]
#[ignore] // Requires GPU
fn test_metal_buffer_roundtrip() {
    let device = MetalDevice::new().unwrap();
    let buffer = device.create_buffer("test", 64).unwrap();
    buffer.write(8, &[1, 2, 3, 4]).unwrap();
    assert_eq!(buffer.read(8, 4).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
#[ignore] // Requires GPU
fn test_metal_shader_and_depth_stencil_compile() {
    let device = MetalDevice::new().unwrap();
    assert!(device.compile_shader_functions(&test_source()).is_ok());

    let descriptor = DepthStencilDescriptor {
        depth_test_enabled: true,
        depth_function: CompareFunction::LessEqual,
        depth_write_enabled: true,
        ..DepthStencilDescriptor::default()
    };
    assert!(device.compile_depth_stencil(&descriptor).is_ok());
}

#[test]
#[ignore] // Requires GPU
fn test_metal_sampler_argument_encoding() {
    let device = MetalDevice::new().unwrap();
    let samplers = vec![SamplerState::DEFAULT; 20];
    assert!(device.encode_sampler_arguments(&samplers).is_ok());
}

// ============================================================================
// CONTEXT SMOKE TEST
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_metal_context_offscreen_frame() {
    // The portable context drives the real device end to end: pass setup,
    // PSO bake, draw, submit.
    let device = MetalDevice::new().unwrap();
    let mut context = RenderContext::new(device as Arc<dyn RawDevice>).unwrap();

    let target = context
        .create_texture(&TextureDesc::d2("offscreen", PixelFormat::RGBA8_UNORM, 64, 64))
        .unwrap();
    let fb = context.create_framebuffer("offscreen");
    context.framebuffer_attach_color(fb, target, 0, 0, 0).unwrap();

    let shader = context.create_shader(&test_source(), Default::default());
    assert!(context.shader(shader).unwrap().is_valid());

    context.bind_shader(shader).unwrap();
    context.bind_framebuffer(fb, false).unwrap();
    context.begin_frame().unwrap();
    context
        .draw(kraken_gpu::pipeline::Primitive::Triangles, 0, 3)
        .unwrap();
    context.end_frame().unwrap();
}
