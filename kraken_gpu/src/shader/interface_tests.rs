//! Unit tests for the shader reflection interface

use crate::pipeline::VertexFormat;
use crate::shader::{
    AttributeBinding, PushConstantField, ShaderInterface, StageMask, TextureBinding,
    UniformBlockBinding,
};
use crate::texture::TextureKind;

fn sample_interface() -> ShaderInterface {
    ShaderInterface {
        push_constant_size: 80,
        push_constant_fields: vec![
            PushConstantField { name: "model_matrix".to_string(), offset: 0, size: 64 },
            PushConstantField { name: "tint".to_string(), offset: 64, size: 16 },
        ],
        uniform_blocks: vec![UniformBlockBinding {
            name: "globals".to_string(),
            slot: 0,
            expected_size: 64,
            stages: StageMask::VERTEX | StageMask::FRAGMENT,
        }],
        textures: vec![TextureBinding {
            name: "diffuse".to_string(),
            slot: 2,
            kind: TextureKind::D2,
            stages: StageMask::FRAGMENT,
        }],
        attributes: vec![
            AttributeBinding { name: "pos".to_string(), location: 0, format: VertexFormat::Float3 },
            AttributeBinding { name: "uv".to_string(), location: 2, format: VertexFormat::Float2 },
        ],
    }
}

#[test]
fn test_empty_interface() {
    let interface = ShaderInterface::empty();
    assert_eq!(interface.attribute_slot_count(), 0);
    assert!(interface.uniform_block_at(0).is_none());
    assert!(interface.texture_at(0).is_none());
}

#[test]
fn test_attribute_slot_count_spans_gaps() {
    // Highest location is 2, so three slots are spanned
    assert_eq!(sample_interface().attribute_slot_count(), 3);
}

#[test]
fn test_lookup_by_slot() {
    let interface = sample_interface();
    assert_eq!(interface.uniform_block_at(0).unwrap().expected_size, 64);
    assert!(interface.uniform_block_at(1).is_none());
    assert_eq!(interface.texture_at(2).unwrap().kind, TextureKind::D2);
    assert!(interface.texture_at(0).is_none());
}

#[test]
fn test_push_constant_field_lookup() {
    let interface = sample_interface();
    let tint = interface.push_constant_field("tint").unwrap();
    assert_eq!(tint.offset, 64);
    assert_eq!(tint.size, 16);
    assert!(interface.push_constant_field("missing").is_none());
}

#[test]
fn test_stage_masks() {
    let interface = sample_interface();
    let globals = interface.uniform_block_at(0).unwrap();
    assert!(globals.stages.contains(StageMask::VERTEX));
    assert!(globals.stages.contains(StageMask::FRAGMENT));
    let diffuse = interface.texture_at(2).unwrap();
    assert!(!diffuse.stages.contains(StageMask::VERTEX));
}
