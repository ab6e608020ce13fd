//! Unit tests for the pipeline state descriptor
//!
//! The descriptor is the PSO cache key, so these tests pin down its
//! structural equality and hashing behavior.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::pipeline::{
    BlendFactor, ColorWriteMask, PipelineStateDescriptor, Primitive, PrimitiveTopologyClass,
    StepFunction, VertexAttributeDescriptor, VertexBufferLayoutDescriptor, VertexDescriptor,
    VertexFormat,
};
use crate::texture::PixelFormat;

fn hash_of(desc: &PipelineStateDescriptor) -> u64 {
    let mut hasher = DefaultHasher::new();
    desc.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// EQUALITY / HASH TESTS
// ============================================================================

#[test]
fn test_default_descriptors_are_equal() {
    let a = PipelineStateDescriptor::default();
    let b = PipelineStateDescriptor::default();
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));
}

#[test]
fn test_attachment_format_changes_equality() {
    let a = PipelineStateDescriptor::default();
    let mut b = PipelineStateDescriptor::default();
    b.color_attachment_formats[0] = Some(PixelFormat::RGBA8_UNORM);
    assert_ne!(a, b);
}

#[test]
fn test_blend_factor_changes_equality() {
    let mut a = PipelineStateDescriptor::default();
    let mut b = PipelineStateDescriptor::default();
    a.blending_enabled = true;
    b.blending_enabled = true;
    b.src_rgb_blend_factor = BlendFactor::SourceAlpha;
    assert_ne!(a, b);
}

#[test]
fn test_point_size_compared_bitwise() {
    let mut a = PipelineStateDescriptor::default();
    let mut b = PipelineStateDescriptor::default();
    a.point_size = 2.0;
    b.point_size = 2.0;
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));

    // Sign participates in equality: the sign encodes per-vertex override
    b.point_size = -2.0;
    assert_ne!(a, b);
}

#[test]
fn test_vertex_descriptor_changes_equality() {
    let layout = VertexBufferLayoutDescriptor {
        step_function: StepFunction::PerVertex,
        step_rate: 1,
        stride: 16,
    };
    let attr = VertexAttributeDescriptor {
        format: VertexFormat::Float4,
        offset: 0,
        buffer_index: 0,
    };

    let mut a = PipelineStateDescriptor::default();
    a.vertex_descriptor = VertexDescriptor {
        attributes: vec![Some(attr)],
        buffer_layouts: vec![layout],
        topology_class: PrimitiveTopologyClass::Unspecified,
    };

    let mut b = a.clone();
    assert_eq!(a, b);

    b.vertex_descriptor.buffer_layouts[0].stride = 32;
    assert_ne!(a, b);
}

#[test]
fn test_color_write_mask_changes_equality() {
    let a = PipelineStateDescriptor::default();
    let mut b = PipelineStateDescriptor::default();
    b.color_write_mask = ColorWriteMask::RED | ColorWriteMask::GREEN;
    assert_ne!(a, b);
}

// ============================================================================
// TOPOLOGY CLASS TESTS
// ============================================================================

#[test]
fn test_primitive_topology_class_mapping() {
    assert_eq!(Primitive::Points.topology_class(), PrimitiveTopologyClass::Point);
    assert_eq!(Primitive::Lines.topology_class(), PrimitiveTopologyClass::Line);
    assert_eq!(Primitive::LineStrip.topology_class(), PrimitiveTopologyClass::Line);
    assert_eq!(Primitive::Triangles.topology_class(), PrimitiveTopologyClass::Triangle);
    assert_eq!(Primitive::TriangleStrip.topology_class(), PrimitiveTopologyClass::Triangle);
}

// ============================================================================
// VERTEX FORMAT TESTS
// ============================================================================

#[test]
fn test_vertex_format_sizes() {
    assert_eq!(VertexFormat::Float.size_bytes(), 4);
    assert_eq!(VertexFormat::Float3.size_bytes(), 12);
    assert_eq!(VertexFormat::Float4.size_bytes(), 16);
    assert_eq!(VertexFormat::UChar4Normalized.size_bytes(), 4);
    assert_eq!(VertexFormat::Half4.size_bytes(), 8);
    assert_eq!(VertexFormat::Int1010102Normalized.size_bytes(), 4);
}

#[test]
fn test_vertex_format_component_counts() {
    assert_eq!(VertexFormat::Float.component_count(), 1);
    assert_eq!(VertexFormat::Short2.component_count(), 2);
    assert_eq!(VertexFormat::Float3.component_count(), 3);
    assert_eq!(VertexFormat::UChar4.component_count(), 4);
}

#[test]
fn test_color_attachment_count() {
    let mut desc = PipelineStateDescriptor::default();
    assert_eq!(desc.color_attachment_count(), 0);
    desc.color_attachment_formats[0] = Some(PixelFormat::RGBA8_UNORM);
    desc.color_attachment_formats[3] = Some(PixelFormat::RGBA16_FLOAT);
    assert_eq!(desc.color_attachment_count(), 2);
}
