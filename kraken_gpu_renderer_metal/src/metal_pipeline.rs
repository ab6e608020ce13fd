//! Render pipeline state compilation
//!
//! Translates a portable `PipelineStateDescriptor` plus its bake-time
//! specialization into an `MTLRenderPipelineState`. The bind-index and
//! point-size values arrive as function constants so one MSL library
//! serves every vertex-layout permutation.

use std::any::Any;
use std::sync::Arc;

use metal::{
    FunctionConstantValues, MTLDataType, MTLPrimitiveTopologyClass, RenderPipelineDescriptor,
};

use kraken_gpu::device::{PipelineSpecialization, RawRenderPipeline};
use kraken_gpu::error::{Error, Result};
use kraken_gpu::pipeline::{
    BlendFactor, BlendOp, ColorWriteMask, PipelineStateDescriptor, PrimitiveTopologyClass,
    StepFunction, VertexFormat,
};

use crate::metal_device::pixel_format_to_metal;
use crate::metal_shader::MetalShaderFunctions;

/// Compiled Metal pipeline state object
pub struct MetalRenderPipeline {
    pub(crate) pipeline: metal::RenderPipelineState,
}

unsafe impl Send for MetalRenderPipeline {}
unsafe impl Sync for MetalRenderPipeline {}

impl RawRenderPipeline for MetalRenderPipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn compile_render_pipeline_state(
    device: &metal::Device,
    functions: &MetalShaderFunctions,
    desc: &PipelineStateDescriptor,
    specialization: &PipelineSpecialization,
) -> Result<Arc<dyn RawRenderPipeline>> {
    // Function constants specialize the library for this pipeline's bind
    // layout and point-size convention.
    let constants = FunctionConstantValues::new();
    let base_index = specialization.base_uniform_buffer_index as i32;
    constants.set_constant_value_with_name(
        &base_index as *const i32 as *const std::ffi::c_void,
        MTLDataType::Int,
        "uniform_buffer_base_index",
    );
    let point_size = specialization.point_size;
    constants.set_constant_value_with_name(
        &point_size as *const f32 as *const std::ffi::c_void,
        MTLDataType::Float,
        "pipeline_point_size",
    );
    let per_vertex = specialization.per_vertex_point_size;
    constants.set_constant_value_with_name(
        &per_vertex as *const bool as *const std::ffi::c_void,
        MTLDataType::Bool,
        "per_vertex_point_size",
    );

    let vertex_function = functions
        .vertex_library
        .get_function(&functions.vertex_entry, Some(constants.clone()))
        .map_err(|err| {
            Error::CompilationFailed(format!(
                "vertex function '{}' of '{}': {}",
                functions.vertex_entry, functions.name, err
            ))
        })?;
    let fragment_function = functions
        .fragment_library
        .get_function(&functions.fragment_entry, Some(constants))
        .map_err(|err| {
            Error::CompilationFailed(format!(
                "fragment function '{}' of '{}': {}",
                functions.fragment_entry, functions.name, err
            ))
        })?;

    let descriptor = RenderPipelineDescriptor::new();
    descriptor.set_label(&functions.name);
    descriptor.set_vertex_function(Some(&vertex_function));
    descriptor.set_fragment_function(Some(&fragment_function));

    // Color attachments: format, write mask, blending. Blending silently
    // drops on formats that cannot blend (integer attachments).
    for (slot, format) in desc.color_attachment_formats.iter().enumerate() {
        let Some(format) = format else { continue };
        let attachment = descriptor
            .color_attachments()
            .object_at(slot as u64)
            .ok_or_else(|| Error::BackendError("color attachment slot out of range".to_string()))?;
        attachment.set_pixel_format(pixel_format_to_metal(*format));
        attachment.set_write_mask(color_write_mask_to_metal(desc.color_write_mask));
        if desc.blending_enabled && format.supports_blending() {
            attachment.set_blending_enabled(true);
            attachment.set_source_rgb_blend_factor(blend_factor_to_metal(desc.src_rgb_blend_factor));
            attachment
                .set_destination_rgb_blend_factor(blend_factor_to_metal(desc.dst_rgb_blend_factor));
            attachment
                .set_source_alpha_blend_factor(blend_factor_to_metal(desc.src_alpha_blend_factor));
            attachment.set_destination_alpha_blend_factor(blend_factor_to_metal(
                desc.dst_alpha_blend_factor,
            ));
            attachment.set_rgb_blend_operation(blend_op_to_metal(desc.rgb_blend_op));
            attachment.set_alpha_blend_operation(blend_op_to_metal(desc.alpha_blend_op));
        } else {
            attachment.set_blending_enabled(false);
        }
    }
    if let Some(depth) = desc.depth_attachment_format {
        descriptor.set_depth_attachment_pixel_format(pixel_format_to_metal(depth));
    }
    if let Some(stencil) = desc.stencil_attachment_format {
        descriptor.set_stencil_attachment_pixel_format(pixel_format_to_metal(stencil));
    }

    // Vertex descriptor, including the constant-step null attribute layout
    // when present.
    let vertex = &desc.vertex_descriptor;
    if !vertex.attributes.is_empty() {
        let vertex_descriptor = metal::VertexDescriptor::new();
        for (location, attribute) in vertex.attributes.iter().enumerate() {
            let Some(attribute) = attribute else { continue };
            let slot = vertex_descriptor
                .attributes()
                .object_at(location as u64)
                .ok_or_else(|| Error::BackendError("vertex attribute slot out of range".to_string()))?;
            slot.set_format(vertex_format_to_metal(attribute.format));
            slot.set_offset(attribute.offset as u64);
            slot.set_buffer_index(attribute.buffer_index as u64);
        }
        for (index, layout) in vertex.buffer_layouts.iter().enumerate() {
            let slot = vertex_descriptor
                .layouts()
                .object_at(index as u64)
                .ok_or_else(|| Error::BackendError("vertex layout slot out of range".to_string()))?;
            slot.set_stride(layout.stride.max(1) as u64);
            slot.set_step_function(step_function_to_metal(layout.step_function));
            slot.set_step_rate(match layout.step_function {
                // Constant step requires rate 0
                StepFunction::Constant => 0,
                _ => layout.step_rate.max(1) as u64,
            });
        }
        descriptor.set_vertex_descriptor(Some(vertex_descriptor));
    }

    // Topology class is pinned only when the core resolved one (layered
    // rendering or point primitives); pipeline creation fails otherwise.
    if vertex.topology_class != PrimitiveTopologyClass::Unspecified {
        descriptor.set_input_primitive_topology(topology_class_to_metal(vertex.topology_class));
    }

    let pipeline = device
        .new_render_pipeline_state(&descriptor)
        .map_err(|err| {
            Error::CompilationFailed(format!("pipeline for '{}': {}", functions.name, err))
        })?;
    Ok(Arc::new(MetalRenderPipeline { pipeline }))
}

// ===== STATE CONVERSIONS =====

fn color_write_mask_to_metal(mask: ColorWriteMask) -> metal::MTLColorWriteMask {
    use metal::MTLColorWriteMask;
    let mut out = MTLColorWriteMask::empty();
    if mask.contains(ColorWriteMask::RED) {
        out |= MTLColorWriteMask::Red;
    }
    if mask.contains(ColorWriteMask::GREEN) {
        out |= MTLColorWriteMask::Green;
    }
    if mask.contains(ColorWriteMask::BLUE) {
        out |= MTLColorWriteMask::Blue;
    }
    if mask.contains(ColorWriteMask::ALPHA) {
        out |= MTLColorWriteMask::Alpha;
    }
    out
}

fn blend_factor_to_metal(factor: BlendFactor) -> metal::MTLBlendFactor {
    use metal::MTLBlendFactor;
    match factor {
        BlendFactor::Zero => MTLBlendFactor::Zero,
        BlendFactor::One => MTLBlendFactor::One,
        BlendFactor::SourceColor => MTLBlendFactor::SourceColor,
        BlendFactor::OneMinusSourceColor => MTLBlendFactor::OneMinusSourceColor,
        BlendFactor::SourceAlpha => MTLBlendFactor::SourceAlpha,
        BlendFactor::OneMinusSourceAlpha => MTLBlendFactor::OneMinusSourceAlpha,
        BlendFactor::DestinationColor => MTLBlendFactor::DestinationColor,
        BlendFactor::OneMinusDestinationColor => MTLBlendFactor::OneMinusDestinationColor,
        BlendFactor::DestinationAlpha => MTLBlendFactor::DestinationAlpha,
        BlendFactor::OneMinusDestinationAlpha => MTLBlendFactor::OneMinusDestinationAlpha,
        BlendFactor::Source1Color => MTLBlendFactor::Source1Color,
        BlendFactor::Source1Alpha => MTLBlendFactor::Source1Alpha,
    }
}

fn blend_op_to_metal(op: BlendOp) -> metal::MTLBlendOperation {
    use metal::MTLBlendOperation;
    match op {
        BlendOp::Add => MTLBlendOperation::Add,
        BlendOp::Subtract => MTLBlendOperation::Subtract,
        BlendOp::ReverseSubtract => MTLBlendOperation::ReverseSubtract,
        BlendOp::Min => MTLBlendOperation::Min,
        BlendOp::Max => MTLBlendOperation::Max,
    }
}

fn topology_class_to_metal(class: PrimitiveTopologyClass) -> MTLPrimitiveTopologyClass {
    match class {
        PrimitiveTopologyClass::Unspecified => MTLPrimitiveTopologyClass::Unspecified,
        PrimitiveTopologyClass::Point => MTLPrimitiveTopologyClass::Point,
        PrimitiveTopologyClass::Line => MTLPrimitiveTopologyClass::Line,
        PrimitiveTopologyClass::Triangle => MTLPrimitiveTopologyClass::Triangle,
    }
}

fn vertex_format_to_metal(format: VertexFormat) -> metal::MTLVertexFormat {
    use metal::MTLVertexFormat;
    match format {
        VertexFormat::Float => MTLVertexFormat::Float,
        VertexFormat::Float2 => MTLVertexFormat::Float2,
        VertexFormat::Float3 => MTLVertexFormat::Float3,
        VertexFormat::Float4 => MTLVertexFormat::Float4,
        VertexFormat::Int => MTLVertexFormat::Int,
        VertexFormat::Int2 => MTLVertexFormat::Int2,
        VertexFormat::Int3 => MTLVertexFormat::Int3,
        VertexFormat::Int4 => MTLVertexFormat::Int4,
        VertexFormat::UInt => MTLVertexFormat::UInt,
        VertexFormat::UInt2 => MTLVertexFormat::UInt2,
        VertexFormat::UInt3 => MTLVertexFormat::UInt3,
        VertexFormat::UInt4 => MTLVertexFormat::UInt4,
        VertexFormat::Char4 => MTLVertexFormat::Char4,
        VertexFormat::UChar4 => MTLVertexFormat::UChar4,
        VertexFormat::Char4Normalized => MTLVertexFormat::Char4Normalized,
        VertexFormat::UChar4Normalized => MTLVertexFormat::UChar4Normalized,
        VertexFormat::Short2 => MTLVertexFormat::Short2,
        VertexFormat::Short2Normalized => MTLVertexFormat::Short2Normalized,
        VertexFormat::UShort2 => MTLVertexFormat::UShort2,
        VertexFormat::UShort2Normalized => MTLVertexFormat::UShort2Normalized,
        VertexFormat::Half2 => MTLVertexFormat::Half2,
        VertexFormat::Half4 => MTLVertexFormat::Half4,
        VertexFormat::Int1010102Normalized => MTLVertexFormat::Int1010102Normalized,
    }
}

fn step_function_to_metal(step: StepFunction) -> metal::MTLVertexStepFunction {
    use metal::MTLVertexStepFunction;
    match step {
        StepFunction::PerVertex => MTLVertexStepFunction::PerVertex,
        StepFunction::PerInstance => MTLVertexStepFunction::PerInstance,
        StepFunction::Constant => MTLVertexStepFunction::Constant,
    }
}
