//! Raw device trait family
//!
//! Every expensive GPU object (buffer, texture, compiled pipeline state,
//! depth-stencil state, encoded sampler argument buffer, command buffer,
//! render encoder) is created through these traits. The portable core keeps
//! the caching, dirty tracking and binding resolution; backend crates keep
//! only the API translation and plug in behind this seam.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use crate::framebuffer::RenderPassDescriptor;
use crate::pipeline::{
    CullMode, DepthStencilDescriptor, FrontFace, PipelineStateDescriptor, Primitive,
};
use crate::texture::{PixelFormat, SamplerState, TextureKind};

// ===== CAPABILITY CONSTANTS =====

/// Maximum number of color attachments on a framebuffer
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Maximum number of vertex buffer bind slots; uniform buffers bind after
/// these so UBO bind points align across draws with differing VBO counts
pub const MAX_VERTEX_BUFFER_BINDINGS: usize = 16;

/// Maximum number of vertex attributes in a vertex descriptor
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;

/// Maximum number of texture bind slots per draw
pub const MAX_TEXTURE_SLOTS: usize = 128;

/// Maximum number of logical uniform-buffer bind slots
pub const MAX_UNIFORM_BUFFER_SLOTS: usize = 16;

/// Number of samplers bindable inline; beyond this the encoded
/// sampler-argument-buffer path is used
pub const INLINE_SAMPLER_LIMIT: usize = 16;

/// Maximum mip level accepted on an attachment before clamping
pub const MAX_MIP_COUNT: u32 = 12;

// ===== COMMON GEOMETRY =====

/// Integer rectangle used for viewports, scissors and texture regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Zero-sized rectangle at the origin
    pub fn zero() -> Self {
        Self::default()
    }
}

// ===== RESOURCE DESCRIPTORS =====

/// Descriptor for creating a texture
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// Debug label
    pub label: String,
    /// Dimensionality
    pub kind: TextureKind,
    /// Pixel format
    pub format: PixelFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Depth for 3D textures, array layer count for array kinds, 1 otherwise
    pub depth_or_layers: u32,
    /// Number of mip levels (1 = no mip chain)
    pub mip_count: u32,
}

impl TextureDesc {
    /// Convenience constructor for a plain 2D texture without mips
    pub fn d2(label: &str, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            label: label.to_string(),
            kind: TextureKind::D2,
            format,
            width,
            height,
            depth_or_layers: 1,
            mip_count: 1,
        }
    }
}

/// Translated shader source handed over by the shader-translation
/// collaborator. The core never inspects the MSL text; it is an opaque
/// payload for `RawDevice::compile_shader_functions`.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    /// Shader name (used for labels and diagnostics)
    pub name: String,
    /// MSL vertex stage source
    pub msl_vertex: String,
    /// MSL fragment stage source
    pub msl_fragment: String,
    /// Vertex entry point name
    pub vertex_entry: String,
    /// Fragment entry point name
    pub fragment_entry: String,
}

/// Per-PSO function-specialization values resolved at bake time.
///
/// These become function constants on Metal; the headless device only
/// records them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSpecialization {
    /// First bind index usable for uniform buffers (past all VBO slots and
    /// the null-attribute buffer, when one is present)
    pub base_uniform_buffer_index: u32,
    /// Bind slot of the null attribute buffer, if any shader attribute had
    /// no bound vertex data
    pub null_attribute_buffer_index: Option<u32>,
    /// Fixed point size constant
    pub point_size: f32,
    /// Whether the vertex stage overrides point size per vertex
    pub per_vertex_point_size: bool,
}

// ===== RAW RESOURCE TRAITS =====

/// GPU buffer resource
pub trait RawBuffer: Send + Sync {
    /// Size in bytes
    fn len(&self) -> u64;

    /// True when the buffer holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a byte range
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Read a byte range back
    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Backend downcast hook
    fn as_any(&self) -> &dyn Any;
}

/// GPU texture resource
pub trait RawTexture: Send + Sync {
    fn kind(&self) -> TextureKind;
    fn format(&self) -> PixelFormat;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn depth_or_layers(&self) -> u32;
    fn mip_count(&self) -> u32;

    /// Read raw texel bytes from a region of one mip/slice
    fn read_region(&self, mip: u32, slice: u32, area: Rect) -> Result<Vec<u8>>;

    /// Write raw texel bytes to a region of one mip/slice
    fn write_region(&self, mip: u32, slice: u32, area: Rect, data: &[u8]) -> Result<()>;

    /// Backend downcast hook
    fn as_any(&self) -> &dyn Any;
}

/// Compiled shader function pair (vertex + fragment library)
pub trait RawShaderFunctions: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Compiled render pipeline state object. Expensive to create, cheap to
/// bind; memoized by `PsoCache`.
pub trait RawRenderPipeline: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Compiled depth-stencil state object
pub trait RawDepthStencilState: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Encoded sampler argument buffer
pub trait RawSamplerArguments: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

// ===== COMMAND RECORDING TRAITS =====

/// Recording surface for one render pass
pub trait RawRenderEncoder {
    fn set_render_pipeline(&mut self, pipeline: &Arc<dyn RawRenderPipeline>);
    fn set_depth_stencil_state(&mut self, state: &Arc<dyn RawDepthStencilState>);
    fn set_stencil_reference(&mut self, value: u32);
    fn set_viewport(&mut self, rect: Rect, depth_range: (f32, f32));
    fn set_scissor(&mut self, rect: Rect);
    fn set_cull_mode(&mut self, mode: CullMode);
    fn set_front_facing(&mut self, winding: FrontFace);
    fn set_depth_bias(&mut self, bias: f32, slope_scale: f32, clamp: f32);
    fn set_vertex_buffer(&mut self, buffer: &Arc<dyn RawBuffer>, offset: u64, index: u32);
    fn set_fragment_buffer(&mut self, buffer: &Arc<dyn RawBuffer>, offset: u64, index: u32);
    /// Small inline payload (push constants)
    fn set_vertex_bytes(&mut self, data: &[u8], index: u32);
    fn set_fragment_bytes(&mut self, data: &[u8], index: u32);
    fn set_vertex_texture(&mut self, texture: &Arc<dyn RawTexture>, slot: u32);
    fn set_fragment_texture(&mut self, texture: &Arc<dyn RawTexture>, slot: u32);
    fn set_vertex_sampler(&mut self, sampler: SamplerState, slot: u32);
    fn set_fragment_sampler(&mut self, sampler: SamplerState, slot: u32);
    fn set_fragment_sampler_arguments(&mut self, args: &Arc<dyn RawSamplerArguments>, index: u32);
    fn draw_primitives(&mut self, primitive: Primitive, vertex_first: u32, vertex_count: u32);
    /// Close the pass. Further calls after `end` are a programming error.
    fn end(&mut self);
}

/// One command buffer on the device queue
pub trait RawCommandBuffer {
    /// Open a render pass against the given baked descriptor
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> Result<Box<dyn RawRenderEncoder>>;

    /// Direct texture-region copy. Both regions must share a pixel format;
    /// format conversion requires `blit_texture_via_render`.
    #[allow(clippy::too_many_arguments)]
    fn copy_texture_region(
        &mut self,
        src: &Arc<dyn RawTexture>,
        src_mip: u32,
        src_slice: u32,
        src_origin: (i32, i32),
        dst: &Arc<dyn RawTexture>,
        dst_mip: u32,
        dst_slice: u32,
        dst_origin: (i32, i32),
        size: (i32, i32),
    ) -> Result<()>;

    /// Graphics-pipeline fallback blit used when the color formats of the
    /// two regions differ and a raw byte copy cannot reinterpret them.
    #[allow(clippy::too_many_arguments)]
    fn blit_texture_via_render(
        &mut self,
        src: &Arc<dyn RawTexture>,
        src_mip: u32,
        src_origin: (i32, i32),
        dst: &Arc<dyn RawTexture>,
        dst_mip: u32,
        dst_slice: u32,
        dst_origin: (i32, i32),
        size: (i32, i32),
    ) -> Result<()>;

    /// Make writes of previously encoded work visible to subsequent
    /// readers. Only needed on discrete-memory devices; unified-memory
    /// devices rely on the driver's automatic dependency tracking and skip
    /// this (`RawDevice::has_unified_memory`).
    fn texture_barrier(&mut self) {}

    /// Wait on the device sync event reaching `value` before executing.
    /// Serializes presentation command buffers behind rendering ones.
    fn encode_wait_for_event(&mut self, value: u64);

    /// Signal the device sync event with `value` once execution finishes
    fn encode_signal_event(&mut self, value: u64);

    /// Schedule presentation of the backend's current drawable
    fn present_drawable(&mut self) -> Result<()>;

    /// Submit. `completion` runs on a driver-owned thread once the GPU has
    /// finished executing this buffer, so it must only touch
    /// atomics/channels (see `PresentationPacer::complete`).
    fn commit(self: Box<Self>, completion: Option<Box<dyn FnOnce() + Send>>) -> Result<()>;
}

// ===== DEVICE TRAIT =====

/// Factory and compiler for all raw GPU objects
pub trait RawDevice: Send + Sync {
    /// Device name for diagnostics
    fn name(&self) -> &str;

    /// Whether the device shares one memory pool between CPU and GPU.
    ///
    /// On unified-memory devices cross-pass hazards are resolved by the
    /// driver's automatic dependency tracking and barrier insertion is
    /// skipped. Backends targeting discrete-memory hardware must not rely
    /// on this short-circuit.
    fn has_unified_memory(&self) -> bool;

    /// Number of samplers bindable without an argument buffer
    fn inline_sampler_limit(&self) -> usize {
        INLINE_SAMPLER_LIMIT
    }

    fn create_buffer(&self, label: &str, size: u64) -> Result<Arc<dyn RawBuffer>>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn RawTexture>>;

    /// Compile the translated MSL source into a function pair
    fn compile_shader_functions(&self, source: &ShaderSource) -> Result<Arc<dyn RawShaderFunctions>>;

    /// Compile a render pipeline state object. Pure with respect to its
    /// arguments: byte-equal descriptors must produce behaviorally
    /// identical pipelines (the memoization contract of `PsoCache`).
    fn compile_render_pipeline(
        &self,
        functions: &Arc<dyn RawShaderFunctions>,
        desc: &PipelineStateDescriptor,
        specialization: &PipelineSpecialization,
    ) -> Result<Arc<dyn RawRenderPipeline>>;

    /// Compile a depth-stencil state object
    fn compile_depth_stencil(
        &self,
        desc: &DepthStencilDescriptor,
    ) -> Result<Arc<dyn RawDepthStencilState>>;

    /// Encode an argument buffer referencing the given sampler states, in
    /// order. Only used when the active sampler count exceeds
    /// `inline_sampler_limit`.
    fn encode_sampler_arguments(&self, samplers: &[SamplerState]) -> Result<Arc<dyn RawSamplerArguments>>;

    /// Start a fresh command buffer
    fn new_command_buffer(&self, label: &str) -> Result<Box<dyn RawCommandBuffer>>;
}
