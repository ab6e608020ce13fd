//! Depth-stencil state compilation

use std::any::Any;
use std::sync::Arc;

use metal::StencilDescriptor;

use kraken_gpu::device::RawDepthStencilState;
use kraken_gpu::error::Result;
use kraken_gpu::pipeline::{
    CompareFunction, DepthStencilDescriptor, StencilFaceOps, StencilOperation,
};

/// Compiled Metal depth-stencil state object
pub struct MetalDepthStencilState {
    pub(crate) state: metal::DepthStencilState,
}

unsafe impl Send for MetalDepthStencilState {}
unsafe impl Sync for MetalDepthStencilState {}

impl RawDepthStencilState for MetalDepthStencilState {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn compile_depth_stencil_state(
    device: &metal::Device,
    desc: &DepthStencilDescriptor,
) -> Result<Arc<dyn RawDepthStencilState>> {
    let descriptor = metal::DepthStencilDescriptor::new();
    descriptor.set_depth_compare_function(if desc.depth_test_enabled {
        compare_function_to_metal(desc.depth_function)
    } else {
        metal::MTLCompareFunction::Always
    });
    descriptor.set_depth_write_enabled(desc.depth_write_enabled);

    if desc.stencil_test_enabled {
        descriptor.set_front_face_stencil(Some(&stencil_face_to_metal(desc, &desc.front)));
        descriptor.set_back_face_stencil(Some(&stencil_face_to_metal(desc, &desc.back)));
    }

    let state = device.new_depth_stencil_state(&descriptor);
    Ok(Arc::new(MetalDepthStencilState { state }))
}

fn stencil_face_to_metal(desc: &DepthStencilDescriptor, face: &StencilFaceOps) -> StencilDescriptor {
    let stencil = StencilDescriptor::new();
    stencil.set_stencil_compare_function(compare_function_to_metal(desc.stencil_function));
    stencil.set_stencil_failure_operation(stencil_op_to_metal(face.stencil_fail));
    stencil.set_depth_failure_operation(stencil_op_to_metal(face.depth_fail));
    stencil.set_depth_stencil_pass_operation(stencil_op_to_metal(face.depth_stencil_pass));
    stencil.set_read_mask(desc.stencil_read_mask);
    stencil.set_write_mask(desc.stencil_write_mask);
    stencil
}

// ===== STATE CONVERSIONS =====

fn compare_function_to_metal(function: CompareFunction) -> metal::MTLCompareFunction {
    use metal::MTLCompareFunction;
    match function {
        CompareFunction::Never => MTLCompareFunction::Never,
        CompareFunction::Less => MTLCompareFunction::Less,
        CompareFunction::Equal => MTLCompareFunction::Equal,
        CompareFunction::LessEqual => MTLCompareFunction::LessEqual,
        CompareFunction::Greater => MTLCompareFunction::Greater,
        CompareFunction::GreaterEqual => MTLCompareFunction::GreaterEqual,
        CompareFunction::NotEqual => MTLCompareFunction::NotEqual,
        CompareFunction::Always => MTLCompareFunction::Always,
    }
}

fn stencil_op_to_metal(op: StencilOperation) -> metal::MTLStencilOperation {
    use metal::MTLStencilOperation;
    match op {
        StencilOperation::Keep => MTLStencilOperation::Keep,
        StencilOperation::Zero => MTLStencilOperation::Zero,
        StencilOperation::Replace => MTLStencilOperation::Replace,
        StencilOperation::IncrementClamp => MTLStencilOperation::IncrementClamp,
        StencilOperation::DecrementClamp => MTLStencilOperation::DecrementClamp,
        StencilOperation::Invert => MTLStencilOperation::Invert,
        StencilOperation::IncrementWrap => MTLStencilOperation::IncrementWrap,
        StencilOperation::DecrementWrap => MTLStencilOperation::DecrementWrap,
    }
}
