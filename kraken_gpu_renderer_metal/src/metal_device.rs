//! MetalDevice - Metal implementation of the RawDevice factory trait

use std::sync::{Arc, Mutex};

use metal::{CompileOptions, MTLResourceOptions};
use rustc_hash::FxHashMap;

use kraken_gpu::device::{
    PipelineSpecialization, RawBuffer, RawCommandBuffer, RawDepthStencilState, RawDevice,
    RawRenderPipeline, RawSamplerArguments, RawShaderFunctions, RawTexture, ShaderSource,
    TextureDesc,
};
use kraken_gpu::error::{Error, Result};
use kraken_gpu::pipeline::{DepthStencilDescriptor, PipelineStateDescriptor};
use kraken_gpu::texture::{PixelFormat, SamplerState, TextureKind};

use crate::metal_buffer::MetalBuffer;
use crate::metal_command_buffer::MetalCommandBuffer;
use crate::metal_depth_stencil::compile_depth_stencil_state;
use crate::metal_layer::MetalSurface;
use crate::metal_pipeline::compile_render_pipeline_state;
use crate::metal_sampler::{encode_sampler_argument_buffer, sampler_state_to_metal};
use crate::metal_shader::MetalShaderFunctions;
use crate::metal_texture::MetalTexture;

/// Metal device: command queue, sync event and the sampler-object cache
///
/// Sampler objects are tiny immutable GPU objects fully determined by their
/// `SamplerState` flags, so they are deduplicated here once per device
/// rather than per context.
pub struct MetalDevice {
    pub(crate) device: metal::Device,
    pub(crate) queue: metal::CommandQueue,
    /// Serializes presentation command buffers behind rendering ones
    pub(crate) sync_event: metal::SharedEvent,
    /// Presentation surface, when one was attached
    pub(crate) surface: Arc<Mutex<Option<MetalSurface>>>,
    /// Shared with encoders so inline sampler binds reuse one object per
    /// configuration
    pub(crate) samplers: Arc<Mutex<FxHashMap<SamplerState, metal::SamplerState>>>,
    name: String,
}

// Metal devices, queues and compiled objects are documented thread-safe;
// only encoders are confined to one thread, and those never leave the
// recording call stack.
unsafe impl Send for MetalDevice {}
unsafe impl Sync for MetalDevice {}

impl MetalDevice {
    /// Create the device from the system default Metal device.
    ///
    /// This is the one fatal error path of the backend: without a device
    /// there is nothing to render with.
    pub fn new() -> Result<Arc<Self>> {
        let device = metal::Device::system_default().ok_or_else(|| {
            Error::InitializationFailed("no Metal device available".to_string())
        })?;
        let queue = device.new_command_queue();
        let sync_event = device.new_shared_event();
        let name = device.name().to_string();
        Ok(Arc::new(Self {
            device,
            queue,
            sync_event,
            surface: Arc::new(Mutex::new(None)),
            samplers: Arc::new(Mutex::new(FxHashMap::default())),
            name,
        }))
    }

    /// Attach a presentation surface (CAMetalLayer wrapper)
    pub fn set_surface(&self, surface: MetalSurface) {
        *self.surface.lock().unwrap() = Some(surface);
    }

    /// Look up or create the Metal sampler object for a sampler config
    pub(crate) fn sampler_for(&self, state: SamplerState) -> metal::SamplerState {
        let mut samplers = self.samplers.lock().unwrap();
        samplers
            .entry(state)
            .or_insert_with(|| sampler_state_to_metal(&self.device, state))
            .clone()
    }
}

impl RawDevice for MetalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_unified_memory(&self) -> bool {
        // Apple Silicon and Apple GPUs share one memory pool; the core
        // skips barrier insertion when this holds.
        self.device.has_unified_memory()
    }

    fn create_buffer(&self, _label: &str, size: u64) -> Result<Arc<dyn RawBuffer>> {
        let buffer = self
            .device
            .new_buffer(size.max(1), MTLResourceOptions::StorageModeShared);
        Ok(Arc::new(MetalBuffer::new(buffer)))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn RawTexture>> {
        MetalTexture::create(&self.device, desc).map(|t| Arc::new(t) as Arc<dyn RawTexture>)
    }

    fn compile_shader_functions(&self, source: &ShaderSource) -> Result<Arc<dyn RawShaderFunctions>> {
        let options = CompileOptions::new();
        let vertex_library = self
            .device
            .new_library_with_source(&source.msl_vertex, &options)
            .map_err(|err| {
                Error::CompilationFailed(format!("vertex stage of '{}': {}", source.name, err))
            })?;
        let fragment_library = self
            .device
            .new_library_with_source(&source.msl_fragment, &options)
            .map_err(|err| {
                Error::CompilationFailed(format!("fragment stage of '{}': {}", source.name, err))
            })?;
        Ok(Arc::new(MetalShaderFunctions {
            name: source.name.clone(),
            vertex_library,
            fragment_library,
            vertex_entry: source.vertex_entry.clone(),
            fragment_entry: source.fragment_entry.clone(),
        }))
    }

    fn compile_render_pipeline(
        &self,
        functions: &Arc<dyn RawShaderFunctions>,
        desc: &PipelineStateDescriptor,
        specialization: &PipelineSpecialization,
    ) -> Result<Arc<dyn RawRenderPipeline>> {
        let functions = functions
            .as_any()
            .downcast_ref::<MetalShaderFunctions>()
            .ok_or_else(|| Error::BackendError("foreign shader functions".to_string()))?;
        compile_render_pipeline_state(&self.device, functions, desc, specialization)
    }

    fn compile_depth_stencil(
        &self,
        desc: &DepthStencilDescriptor,
    ) -> Result<Arc<dyn RawDepthStencilState>> {
        compile_depth_stencil_state(&self.device, desc)
    }

    fn encode_sampler_arguments(&self, samplers: &[SamplerState]) -> Result<Arc<dyn RawSamplerArguments>> {
        encode_sampler_argument_buffer(self, samplers)
    }

    fn new_command_buffer(&self, label: &str) -> Result<Box<dyn RawCommandBuffer>> {
        Ok(Box::new(MetalCommandBuffer::new(self, label)))
    }
}

// ===== FORMAT CONVERSIONS =====

pub(crate) fn pixel_format_to_metal(format: PixelFormat) -> metal::MTLPixelFormat {
    use metal::MTLPixelFormat;
    match format {
        PixelFormat::R8_UNORM => MTLPixelFormat::R8Unorm,
        PixelFormat::RG8_UNORM => MTLPixelFormat::RG8Unorm,
        PixelFormat::RGBA8_UNORM => MTLPixelFormat::RGBA8Unorm,
        PixelFormat::RGBA8_SRGB => MTLPixelFormat::RGBA8Unorm_sRGB,
        PixelFormat::BGRA8_UNORM => MTLPixelFormat::BGRA8Unorm,
        PixelFormat::BGRA8_SRGB => MTLPixelFormat::BGRA8Unorm_sRGB,
        PixelFormat::R16_FLOAT => MTLPixelFormat::R16Float,
        PixelFormat::RG16_FLOAT => MTLPixelFormat::RG16Float,
        PixelFormat::RGBA16_FLOAT => MTLPixelFormat::RGBA16Float,
        PixelFormat::R32_FLOAT => MTLPixelFormat::R32Float,
        PixelFormat::RG32_FLOAT => MTLPixelFormat::RG32Float,
        PixelFormat::RGBA32_FLOAT => MTLPixelFormat::RGBA32Float,
        PixelFormat::R32_UINT => MTLPixelFormat::R32Uint,
        PixelFormat::RGBA32_UINT => MTLPixelFormat::RGBA32Uint,
        PixelFormat::DEPTH16_UNORM => MTLPixelFormat::Depth16Unorm,
        PixelFormat::DEPTH32_FLOAT => MTLPixelFormat::Depth32Float,
        PixelFormat::DEPTH24_UNORM_STENCIL8 => MTLPixelFormat::Depth24Unorm_Stencil8,
        PixelFormat::DEPTH32_FLOAT_STENCIL8 => MTLPixelFormat::Depth32Float_Stencil8,
    }
}

pub(crate) fn texture_kind_to_metal(kind: TextureKind) -> metal::MTLTextureType {
    use metal::MTLTextureType;
    match kind {
        TextureKind::D1 => MTLTextureType::D1,
        TextureKind::D1Array => MTLTextureType::D1Array,
        TextureKind::D2 => MTLTextureType::D2,
        TextureKind::D2Array => MTLTextureType::D2Array,
        TextureKind::D3 => MTLTextureType::D3,
        TextureKind::Cube => MTLTextureType::Cube,
        TextureKind::CubeArray => MTLTextureType::CubeArray,
        TextureKind::Buffer => MTLTextureType::D2,
    }
}
