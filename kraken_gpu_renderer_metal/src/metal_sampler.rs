//! Sampler objects and sampler argument buffer encoding

use std::any::Any;
use std::sync::Arc;

use metal::{
    ArgumentDescriptor, MTLDataType, MTLResourceOptions, MTLSamplerAddressMode,
    MTLSamplerMinMagFilter, MTLSamplerMipFilter, SamplerDescriptor,
};

use kraken_gpu::device::RawSamplerArguments;
use kraken_gpu::error::{Error, Result};
use kraken_gpu::texture::SamplerState;

use crate::metal_device::MetalDevice;

/// Encoded sampler argument buffer; the buffer stays alive as long as any
/// in-flight command buffer holds the Arc
pub struct MetalSamplerArguments {
    pub(crate) buffer: metal::Buffer,
}

unsafe impl Send for MetalSamplerArguments {}
unsafe impl Sync for MetalSamplerArguments {}

impl RawSamplerArguments for MetalSamplerArguments {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Build the Metal sampler object for a sampler configuration
pub(crate) fn sampler_state_to_metal(device: &metal::Device, state: SamplerState) -> metal::SamplerState {
    let descriptor = SamplerDescriptor::new();

    let filter = if state.contains(SamplerState::FILTER_LINEAR) {
        MTLSamplerMinMagFilter::Linear
    } else {
        MTLSamplerMinMagFilter::Nearest
    };
    descriptor.set_min_filter(filter);
    descriptor.set_mag_filter(filter);
    descriptor.set_mip_filter(if state.contains(SamplerState::MIPMAP) {
        MTLSamplerMipFilter::Linear
    } else {
        MTLSamplerMipFilter::NotMipmapped
    });

    let address_mode = |repeat: bool| {
        if repeat {
            MTLSamplerAddressMode::Repeat
        } else if state.contains(SamplerState::CLAMP_BORDER) {
            MTLSamplerAddressMode::ClampToBorderColor
        } else {
            MTLSamplerAddressMode::ClampToEdge
        }
    };
    descriptor.set_address_mode_s(address_mode(state.contains(SamplerState::REPEAT_S)));
    descriptor.set_address_mode_t(address_mode(state.contains(SamplerState::REPEAT_T)));
    descriptor.set_address_mode_r(address_mode(state.contains(SamplerState::REPEAT_R)));

    if state.contains(SamplerState::COMPARE) {
        descriptor.set_compare_function(metal::MTLCompareFunction::LessEqual);
    }
    if state.contains(SamplerState::ANISOTROPIC) && state.contains(SamplerState::MIPMAP) {
        descriptor.set_max_anisotropy(16);
    }
    // Required for samplers referenced from argument buffers
    descriptor.set_support_argument_buffers(true);

    device.new_sampler(&descriptor)
}

/// Encode an argument buffer holding the ordered sampler table
pub(crate) fn encode_sampler_argument_buffer(
    device: &MetalDevice,
    samplers: &[SamplerState],
) -> Result<Arc<dyn RawSamplerArguments>> {
    if samplers.is_empty() {
        return Err(Error::InvalidResource(
            "empty sampler set for argument buffer".to_string(),
        ));
    }

    let argument = ArgumentDescriptor::new();
    argument.set_data_type(MTLDataType::Sampler);
    argument.set_index(0);
    argument.set_array_length(samplers.len() as u64);

    let encoder = device
        .device
        .new_argument_encoder(metal::Array::from_slice(&[&*argument]));
    let buffer = device.device.new_buffer(
        encoder.encoded_length().max(1),
        MTLResourceOptions::StorageModeShared,
    );
    encoder.set_argument_buffer(&buffer, 0);

    for (index, state) in samplers.iter().enumerate() {
        let sampler = device.sampler_for(*state);
        encoder.set_sampler_state(index as u64, &sampler);
    }
    Ok(Arc::new(MetalSamplerArguments { buffer }))
}
