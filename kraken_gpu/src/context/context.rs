//! Render context
//!
//! The per-window (or offscreen) orchestrator owning the resource pools,
//! the global state manager, the compiled-object caches and the frame /
//! encoder state machine. A context is an explicit object: several can
//! coexist (multi-window, test isolation) and nothing here touches ambient
//! globals.
//!
//! The draw path is a chain of `ensure_*` steps, each idempotent and each
//! dirty-tracked so redundant encoder calls are skipped:
//!
//! 1. `ensure_begin_render_pass` - reuses the open encoder while the bound
//!    framebuffer is unchanged and clean, otherwise ends it and opens a new
//!    pass against the framebuffer's baked descriptor.
//! 2. `ensure_render_pipeline_state` - builds the pipeline key from state
//!    manager + framebuffer formats + vertex layout, resolves it through the
//!    shader's PSO cache and binds it only when it actually changed.
//! 3. depth-stencil / dynamic state - separately cached and re-issued only
//!    when their dirty bits say so.
//! 4. `ensure_resource_bindings` - uniform buffers, push constants, textures
//!    and samplers, with dummy substitution for anything missing or
//!    mismatched. Binding problems never fail a draw.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;

use crate::device::{
    RawBuffer, RawCommandBuffer, RawDevice, RawRenderEncoder, RawTexture, Rect, ShaderSource,
    TextureDesc, MAX_TEXTURE_SLOTS, MAX_UNIFORM_BUFFER_SLOTS,
};
use crate::error::{Error, Result};
use crate::framebuffer::{FrameBuffer, FrameBufferPlanes, RenderPassConfig};
use crate::pipeline::{
    DepthStencilCache, DepthStencilDescriptor, PipelineStateDescriptor, Primitive,
    PrimitiveTopologyClass, PsoCacheEntry, SamplerArgumentCache, VertexDescriptor,
    DEPTH_STENCIL_CACHE_CAPACITY, PSO_CACHE_CAPACITY, SAMPLER_ARGS_CACHE_CAPACITY,
};
use crate::present::{PresentationPacer, MAX_DRAWABLES_IN_FLIGHT};
use crate::shader::{Shader, ShaderHandle, ShaderInterface, StageMask};
use crate::state::{
    resolve_texture_binding, resolve_uniform_binding, StateDirtyFlags, StateManager,
    TextureResolution, UniformResolution,
};
use crate::texture::{PixelFormat, SamplerState, TextureHandle, TextureKind, TexturePool};
use crate::{gpu_debug, gpu_err, gpu_error, gpu_trace, gpu_warn};

const SRC: &str = "kraken::gpu::RenderContext";

/// Size of the default offscreen render target backing a context with no
/// application framebuffer bound
const DEFAULT_FB_SIZE: u32 = 16;

/// Minimum size of the zero-filled dummy uniform buffer
const DUMMY_UNIFORM_BUFFER_SIZE: u64 = 256;

/// Size of the constant-stride null attribute buffer
const NULL_ATTRIBUTE_BUFFER_SIZE: u64 = 64;

slotmap::new_key_type! {
    /// Handle to a framebuffer owned by a [`RenderContext`]
    pub struct FrameBufferHandle;
}

/// Tunables for a render context
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Debug label used on command buffers
    pub label: String,
    /// Per-shader PSO cache capacity
    pub pso_cache_capacity: usize,
    /// Depth-stencil cache capacity
    pub depth_stencil_cache_capacity: usize,
    /// Sampler-argument cache capacity
    pub sampler_args_cache_capacity: usize,
    /// Upper bound on presentable frames in flight
    pub max_drawables_in_flight: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            label: "KrakenContext".to_string(),
            pso_cache_capacity: PSO_CACHE_CAPACITY,
            depth_stencil_cache_capacity: DEPTH_STENCIL_CACHE_CAPACITY,
            sampler_args_cache_capacity: SAMPLER_ARGS_CACHE_CAPACITY,
            max_drawables_in_flight: MAX_DRAWABLES_IN_FLIGHT,
        }
    }
}

/// Top-level GPU context: pools, caches, state and the encoder lifecycle
pub struct RenderContext {
    device: Arc<dyn RawDevice>,
    config: ContextConfig,

    textures: TexturePool,
    framebuffers: SlotMap<FrameBufferHandle, FrameBuffer>,
    shaders: SlotMap<ShaderHandle, Shader>,

    state: StateManager,
    depth_stencil_cache: DepthStencilCache,
    sampler_args: SamplerArgumentCache,
    pacer: Arc<PresentationPacer>,

    default_framebuffer: FrameBufferHandle,
    active_framebuffer: FrameBufferHandle,
    active_shader: Option<ShaderHandle>,

    // Application-side bindings
    bound_uniform_buffers: Vec<Option<Arc<dyn RawBuffer>>>,
    bound_textures: Vec<Option<TextureHandle>>,
    bound_vertex_buffers: Vec<Option<Arc<dyn RawBuffer>>>,
    vertex_descriptor: VertexDescriptor,

    // Dummy resources substituted for missing/mismatched bindings
    dummy_textures: FxHashMap<TextureKind, Arc<dyn RawTexture>>,
    dummy_uniform_buffer: Option<Arc<dyn RawBuffer>>,
    null_attribute_buffer: Option<Arc<dyn RawBuffer>>,

    // Frame / encoder state machine
    frame_active: bool,
    command_buffer: Option<Box<dyn RawCommandBuffer>>,
    encoder: Option<Box<dyn RawRenderEncoder>>,
    encoder_framebuffer: Option<FrameBufferHandle>,
    /// Framebuffers already drawn into this frame; re-opening one forces
    /// the LOAD descriptor so earlier results survive the encoder break
    touched_framebuffers: FxHashSet<FrameBufferHandle>,

    // Redundant-bind suppression
    bound_pso_index: Option<u64>,
    bound_depth_stencil: Option<DepthStencilDescriptor>,
    last_depth_bias: Option<(f32, f32)>,

    // One warning per (shader, slot) per bind event
    warned_uniform_slots: FxHashSet<(ShaderHandle, u32)>,
    warned_texture_slots: FxHashSet<(ShaderHandle, u32)>,

    /// Value of the device sync event; presentation waits on the last
    /// signalled render submission
    sync_event_value: u64,
}

impl RenderContext {
    pub fn new(device: Arc<dyn RawDevice>) -> Result<Self> {
        Self::with_config(device, ContextConfig::default())
    }

    pub fn with_config(device: Arc<dyn RawDevice>, config: ContextConfig) -> Result<Self> {
        let mut textures = TexturePool::new();
        let mut framebuffers: SlotMap<FrameBufferHandle, FrameBuffer> = SlotMap::with_key();

        // Offscreen backing target used when no valid framebuffer is bound.
        let default_texture = textures.create(
            device.as_ref(),
            &TextureDesc::d2(
                "default_framebuffer_color",
                PixelFormat::RGBA16_FLOAT,
                DEFAULT_FB_SIZE,
                DEFAULT_FB_SIZE,
            ),
        )?;
        let mut default_fb = FrameBuffer::new("default_framebuffer");
        default_fb.add_color_attachment(&textures, default_texture, 0, 0, 0)?;
        let default_framebuffer = framebuffers.insert(default_fb);

        let pacer = Arc::new(PresentationPacer::new(config.max_drawables_in_flight));
        gpu_debug!(SRC, "Created context '{}' on device '{}'", config.label, device.name());

        Ok(Self {
            depth_stencil_cache: DepthStencilCache::with_capacity(config.depth_stencil_cache_capacity),
            sampler_args: SamplerArgumentCache::with_capacity(config.sampler_args_cache_capacity),
            device,
            config,
            textures,
            framebuffers,
            shaders: SlotMap::with_key(),
            state: StateManager::new(),
            pacer,
            default_framebuffer,
            active_framebuffer: default_framebuffer,
            active_shader: None,
            bound_uniform_buffers: vec![None; MAX_UNIFORM_BUFFER_SLOTS],
            bound_textures: vec![None; MAX_TEXTURE_SLOTS],
            bound_vertex_buffers: Vec::new(),
            vertex_descriptor: VertexDescriptor::default(),
            dummy_textures: FxHashMap::default(),
            dummy_uniform_buffer: None,
            null_attribute_buffer: None,
            frame_active: false,
            command_buffer: None,
            encoder: None,
            encoder_framebuffer: None,
            touched_framebuffers: FxHashSet::default(),
            bound_pso_index: None,
            bound_depth_stencil: None,
            last_depth_bias: None,
            warned_uniform_slots: FxHashSet::default(),
            warned_texture_slots: FxHashSet::default(),
            sync_event_value: 0,
        })
    }

    pub fn device(&self) -> &Arc<dyn RawDevice> {
        &self.device
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn pacer(&self) -> &Arc<PresentationPacer> {
        &self.pacer
    }

    /// The immediate-style state setters
    pub fn state_mut(&mut self) -> &mut StateManager {
        &mut self.state
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    // ===== TEXTURES =====

    pub fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        self.textures.create(self.device.as_ref(), desc)
    }

    pub fn texture_pool(&self) -> &TexturePool {
        &self.textures
    }

    pub fn texture_pool_mut(&mut self) -> &mut TexturePool {
        &mut self.textures
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) -> bool {
        self.textures.destroy(handle)
    }

    // ===== SHADERS =====

    /// Compile and register a shader. A failed compile still registers the
    /// shader (invalid); draws using it are skipped.
    pub fn create_shader(&mut self, source: &ShaderSource, interface: ShaderInterface) -> ShaderHandle {
        let shader = Shader::new(self.device.as_ref(), source, interface, self.config.pso_cache_capacity);
        self.shaders.insert(shader)
    }

    pub fn shader(&self, handle: ShaderHandle) -> Option<&Shader> {
        self.shaders.get(handle)
    }

    pub fn shader_mut(&mut self, handle: ShaderHandle) -> Option<&mut Shader> {
        self.shaders.get_mut(handle)
    }

    /// Destroy a shader and its PSO cache
    pub fn destroy_shader(&mut self, handle: ShaderHandle) -> bool {
        if self.active_shader == Some(handle) {
            self.active_shader = None;
        }
        self.warned_uniform_slots.retain(|(h, _)| *h != handle);
        self.warned_texture_slots.retain(|(h, _)| *h != handle);
        self.shaders.remove(handle).is_some()
    }

    /// Make `handle` the active shader for subsequent draws.
    ///
    /// Binding is a new bind event: missing-binding warnings for this shader
    /// will be reported once more.
    pub fn bind_shader(&mut self, handle: ShaderHandle) -> Result<()> {
        if !self.shaders.contains_key(handle) {
            gpu_error!(SRC, "Attempted to bind a stale shader handle");
            return Err(Error::InvalidResource("stale shader handle".to_string()));
        }
        self.warned_uniform_slots.retain(|(h, _)| *h != handle);
        self.warned_texture_slots.retain(|(h, _)| *h != handle);
        self.active_shader = Some(handle);
        Ok(())
    }

    pub fn active_shader(&self) -> Option<ShaderHandle> {
        self.active_shader
    }

    // ===== FRAMEBUFFERS =====

    pub fn create_framebuffer(&mut self, name: &str) -> FrameBufferHandle {
        self.framebuffers.insert(FrameBuffer::new(name))
    }

    pub fn framebuffer(&self, handle: FrameBufferHandle) -> Option<&FrameBuffer> {
        self.framebuffers.get(handle)
    }

    pub fn framebuffer_mut(&mut self, handle: FrameBufferHandle) -> Option<&mut FrameBuffer> {
        self.framebuffers.get_mut(handle)
    }

    pub fn default_framebuffer_handle(&self) -> FrameBufferHandle {
        self.default_framebuffer
    }

    pub fn active_framebuffer_handle(&self) -> FrameBufferHandle {
        self.active_framebuffer
    }

    /// Destroy a framebuffer. The default framebuffer of the context cannot
    /// be destroyed; destroying the active one restores the default first so
    /// the context never points at a freed target.
    pub fn destroy_framebuffer(&mut self, handle: FrameBufferHandle) -> Result<()> {
        if handle == self.default_framebuffer {
            return Err(Error::InvalidResource(
                "the context default framebuffer cannot be destroyed".to_string(),
            ));
        }
        if self.encoder_framebuffer == Some(handle) {
            self.end_active_encoder();
        }
        if self.active_framebuffer == handle {
            gpu_debug!(SRC, "Destroying the bound framebuffer, restoring default");
            self.active_framebuffer = self.default_framebuffer;
        }
        self.touched_framebuffers.remove(&handle);
        if self.framebuffers.remove(handle).is_none() {
            return Err(Error::InvalidResource("stale framebuffer handle".to_string()));
        }
        Ok(())
    }

    /// Attach a pooled color texture to a framebuffer slot.
    ///
    /// `layer == -1` binds all layers for multilayered rendering.
    pub fn framebuffer_attach_color(
        &mut self,
        handle: FrameBufferHandle,
        texture: TextureHandle,
        slot: u32,
        mip: i32,
        layer: i32,
    ) -> Result<()> {
        let fb = self
            .framebuffers
            .get_mut(handle)
            .ok_or_else(|| Error::InvalidResource("stale framebuffer handle".to_string()))?;
        fb.add_color_attachment(&self.textures, texture, slot, mip, layer)
    }

    /// Attach a pooled depth texture to a framebuffer
    pub fn framebuffer_attach_depth(
        &mut self,
        handle: FrameBufferHandle,
        texture: TextureHandle,
        mip: i32,
        layer: i32,
    ) -> Result<()> {
        let fb = self
            .framebuffers
            .get_mut(handle)
            .ok_or_else(|| Error::InvalidResource("stale framebuffer handle".to_string()))?;
        fb.add_depth_attachment(&self.textures, texture, mip, layer)
    }

    /// Attach a pooled stencil texture to a framebuffer
    pub fn framebuffer_attach_stencil(
        &mut self,
        handle: FrameBufferHandle,
        texture: TextureHandle,
        mip: i32,
        layer: i32,
    ) -> Result<()> {
        let fb = self
            .framebuffers
            .get_mut(handle)
            .ok_or_else(|| Error::InvalidResource("stale framebuffer handle".to_string()))?;
        fb.add_stencil_attachment(&self.textures, texture, mip, layer)
    }

    /// Bind a framebuffer as the render target for subsequent draws.
    ///
    /// The encoder break (if the target actually changed or is dirty)
    /// happens lazily on the next `ensure_begin_render_pass`.
    pub fn bind_framebuffer(&mut self, handle: FrameBufferHandle, srgb: bool) -> Result<()> {
        let fb = self
            .framebuffers
            .get_mut(handle)
            .ok_or_else(|| Error::InvalidResource("stale framebuffer handle".to_string()))?;
        fb.set_srgb_enabled(srgb && fb.is_srgb());
        self.active_framebuffer = handle;
        self.state.mark_dirty(StateDirtyFlags::VIEWPORT | StateDirtyFlags::SCISSOR);
        Ok(())
    }

    // ===== APPLICATION BINDINGS =====

    /// Bind a buffer to a logical uniform slot
    pub fn bind_uniform_buffer(&mut self, slot: u32, buffer: Arc<dyn RawBuffer>) -> Result<()> {
        if slot as usize >= MAX_UNIFORM_BUFFER_SLOTS {
            return Err(gpu_err!(SRC, "Uniform slot {} exceeds limit {}", slot, MAX_UNIFORM_BUFFER_SLOTS));
        }
        self.bound_uniform_buffers[slot as usize] = Some(buffer);
        // New binding, new bind event for this slot.
        self.warned_uniform_slots.retain(|(_, s)| *s != slot);
        Ok(())
    }

    pub fn unbind_uniform_buffer(&mut self, slot: u32) {
        if (slot as usize) < MAX_UNIFORM_BUFFER_SLOTS {
            self.bound_uniform_buffers[slot as usize] = None;
            self.warned_uniform_slots.retain(|(_, s)| *s != slot);
        }
    }

    /// Bind a pooled texture to a texture slot
    pub fn bind_texture(&mut self, slot: u32, texture: TextureHandle) -> Result<()> {
        if slot as usize >= MAX_TEXTURE_SLOTS {
            return Err(gpu_err!(SRC, "Texture slot {} exceeds limit {}", slot, MAX_TEXTURE_SLOTS));
        }
        self.bound_textures[slot as usize] = Some(texture);
        self.warned_texture_slots.retain(|(_, s)| *s != slot);
        Ok(())
    }

    pub fn unbind_texture(&mut self, slot: u32) {
        if (slot as usize) < MAX_TEXTURE_SLOTS {
            self.bound_textures[slot as usize] = None;
            self.warned_texture_slots.retain(|(_, s)| *s != slot);
        }
    }

    /// Set the vertex layout used to key the next pipeline lookup
    pub fn set_vertex_descriptor(&mut self, descriptor: VertexDescriptor) {
        self.vertex_descriptor = descriptor;
    }

    /// Bind a vertex buffer at a vertex-buffer bind slot
    pub fn bind_vertex_buffer(&mut self, index: u32, buffer: Arc<dyn RawBuffer>) {
        let index = index as usize;
        if self.bound_vertex_buffers.len() <= index {
            self.bound_vertex_buffers.resize(index + 1, None);
        }
        self.bound_vertex_buffers[index] = Some(buffer);
    }

    /// Create a device buffer (uniform or vertex data)
    pub fn create_buffer(&self, label: &str, size: u64) -> Result<Arc<dyn RawBuffer>> {
        self.device.create_buffer(label, size)
    }

    // ===== FRAME LIFECYCLE =====

    pub fn is_frame_active(&self) -> bool {
        self.frame_active
    }

    pub fn begin_frame(&mut self) -> Result<()> {
        if self.frame_active {
            return Err(Error::Validation("begin_frame while a frame is active".to_string()));
        }
        self.frame_active = true;
        self.touched_framebuffers.clear();
        gpu_trace!(SRC, "Frame begin");
        Ok(())
    }

    /// End the frame: close the encoder, signal the sync event so a later
    /// present is ordered behind this work, and submit.
    pub fn end_frame(&mut self) -> Result<()> {
        if !self.frame_active {
            return Err(Error::Validation("end_frame without begin_frame".to_string()));
        }
        self.end_active_encoder();
        if let Some(mut command_buffer) = self.command_buffer.take() {
            self.sync_event_value += 1;
            command_buffer.encode_signal_event(self.sync_event_value);
            command_buffer.commit(None)?;
        }
        self.frame_active = false;
        gpu_trace!(SRC, "Frame end");
        Ok(())
    }

    /// Submit a presentation command buffer, ordered behind the last ended
    /// frame and paced by the in-flight limiter. Blocks while the pacer is
    /// at its current cap.
    pub fn present(&mut self) -> Result<()> {
        if self.frame_active {
            return Err(Error::Validation("present called inside an active frame".to_string()));
        }

        self.pacer.acquire();

        let mut command_buffer = self.device.new_command_buffer("present")?;
        command_buffer.encode_wait_for_event(self.sync_event_value);
        command_buffer.present_drawable()?;

        let pacer = Arc::clone(&self.pacer);
        let submitted = Instant::now();
        command_buffer.commit(Some(Box::new(move || {
            // Runs on a driver thread; only the pacer's atomics are touched.
            pacer.complete(submitted.elapsed());
        })))
    }

    // ===== ENCODER STATE MACHINE =====

    fn ensure_command_buffer(&mut self) -> Result<()> {
        if self.command_buffer.is_none() {
            self.command_buffer = Some(self.device.new_command_buffer(&self.config.label)?);
        }
        Ok(())
    }

    /// End the open render pass, if any
    pub fn end_active_encoder(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.end();
        }
        self.encoder_framebuffer = None;
    }

    /// Open or continue a render pass against the active framebuffer.
    ///
    /// Idempotent: while the bound framebuffer is unchanged and clean the
    /// open encoder is reused. An invalid framebuffer (zero attachments)
    /// falls back to the context default with a warning; drawing into a
    /// freed or invalid target is never allowed to proceed silently.
    pub fn ensure_begin_render_pass(&mut self) -> Result<()> {
        if !self.frame_active {
            return Err(Error::Validation("render pass outside begin/end frame".to_string()));
        }

        // Resolve the target, falling back when invalid.
        let valid = self
            .framebuffers
            .get(self.active_framebuffer)
            .map(|fb| fb.validate_render_pass())
            .unwrap_or(false);
        if !valid {
            gpu_warn!(
                SRC,
                "Active framebuffer failed render-pass validation, falling back to default"
            );
            self.active_framebuffer = self.default_framebuffer;
        }
        let target = self.active_framebuffer;

        let fb_clean = self
            .framebuffers
            .get(target)
            .map(|fb| !fb.is_dirty())
            .unwrap_or(false);
        if self.encoder.is_some() && self.encoder_framebuffer == Some(target) && fb_clean {
            return Ok(());
        }

        self.end_active_encoder();
        self.ensure_command_buffer()?;

        let fb = self
            .framebuffers
            .get_mut(target)
            .ok_or_else(|| Error::InvalidResource("stale framebuffer handle".to_string()))?;

        // Resuming a framebuffer already drawn into this frame must load its
        // earlier results rather than re-clearing or discarding them.
        let load_contents = self.touched_framebuffers.contains(&target) && !fb.has_pending_clear();
        let consumed_clear = fb.active_config(load_contents) == RenderPassConfig::Clear;
        let descriptor = fb.bake_render_pass_descriptor(&self.textures, load_contents)?;
        if consumed_clear {
            fb.mark_cleared();
        }

        let command_buffer = self.command_buffer.as_mut().expect("command buffer ensured above");
        self.encoder = Some(command_buffer.begin_render_pass(&descriptor)?);
        self.encoder_framebuffer = Some(target);
        self.touched_framebuffers.insert(target);

        // A fresh encoder inherits nothing.
        self.state.mark_all_dirty();
        self.bound_pso_index = None;
        self.bound_depth_stencil = None;
        self.last_depth_bias = None;
        Ok(())
    }

    // ===== PIPELINE RESOLUTION =====

    /// Build the pipeline key from the current global state, the active
    /// framebuffer's attachment formats and the bound vertex layout
    fn build_pipeline_descriptor(&self, shader: &Shader, primitive: Primitive) -> PipelineStateDescriptor {
        let fb = &self.framebuffers[self.active_framebuffer];
        let mut descriptor = PipelineStateDescriptor::default();

        for slot in 0..descriptor.color_attachment_formats.len() {
            if fb.has_attachment_at_slot(slot as u32) {
                let attachment = fb.color_attachment(slot as u32);
                if let Some(texture) = self.textures.get(attachment.texture) {
                    let mut format = texture.format();
                    if format.is_srgb() && !fb.srgb_enabled() {
                        format = format.unorm_variant();
                    }
                    descriptor.color_attachment_formats[slot] = Some(format);
                }
            }
        }
        if fb.has_depth_attachment() {
            descriptor.depth_attachment_format = self
                .textures
                .get(fb.depth_attachment().texture)
                .map(|t| t.format());
        }
        if fb.has_stencil_attachment() {
            descriptor.stencil_attachment_format = self
                .textures
                .get(fb.stencil_attachment().texture)
                .map(|t| t.format());
        }

        descriptor.color_write_mask = self.state.color_write_mask();
        descriptor.blending_enabled = self.state.blending_enabled();
        let (src_rgb, dst_rgb, src_alpha, dst_alpha) = self.state.blend_factors();
        descriptor.src_rgb_blend_factor = src_rgb;
        descriptor.dst_rgb_blend_factor = dst_rgb;
        descriptor.src_alpha_blend_factor = src_alpha;
        descriptor.dst_alpha_blend_factor = dst_alpha;
        let (rgb_op, alpha_op) = self.state.blend_ops();
        descriptor.rgb_blend_op = rgb_op;
        descriptor.alpha_blend_op = alpha_op;
        descriptor.point_size = self.state.point_size();

        descriptor.vertex_descriptor = self.vertex_descriptor.clone();
        // Metal fails pipeline creation for layered rendering or point
        // primitives with an unspecified topology class, so those cases pin
        // the class before compilation.
        let class = primitive.topology_class();
        descriptor.vertex_descriptor.topology_class = if shader.uses_array_render_target()
            || fb.uses_multilayered_rendering()
            || class == PrimitiveTopologyClass::Point
        {
            class
        } else {
            PrimitiveTopologyClass::Unspecified
        };

        descriptor
    }

    /// Resolve and bind everything a draw needs. Returns `Ok(false)` when
    /// the draw must be skipped (no shader, invalid shader, PSO bake
    /// failure); binding problems are patched with dummies and never skip.
    pub fn ensure_render_pipeline_state(&mut self, primitive: Primitive) -> Result<bool> {
        self.ensure_begin_render_pass()?;

        let shader_handle = match self.active_shader {
            Some(handle) => handle,
            None => {
                gpu_trace!(SRC, "Draw skipped: no shader bound");
                return Ok(false);
            }
        };
        let Some(shader) = self.shaders.get(shader_handle) else {
            gpu_warn!(SRC, "Draw skipped: stale shader handle");
            return Ok(false);
        };
        if !shader.is_valid() {
            gpu_trace!(SRC, "Draw skipped: shader '{}' is invalid", shader.name());
            return Ok(false);
        }

        let descriptor = self.build_pipeline_descriptor(shader, primitive);

        let device = Arc::clone(&self.device);
        let shader = self.shaders.get_mut(shader_handle).expect("checked above");
        let entry = match shader.bake_pipeline(device.as_ref(), &descriptor) {
            Ok(entry) => entry,
            Err(err) => {
                gpu_error!(
                    SRC,
                    "Pipeline state creation failed for shader '{}': {}; draw skipped",
                    shader.name(),
                    err
                );
                return Ok(false);
            }
        };

        // Bind the PSO only when it differs from the one on this encoder.
        let encoder = self.encoder.as_mut().expect("encoder open");
        if self.bound_pso_index != Some(entry.pso_index) {
            encoder.set_render_pipeline(&entry.pipeline);
            self.bound_pso_index = Some(entry.pso_index);
        }

        self.ensure_depth_stencil_state(primitive)?;
        self.apply_dynamic_state();
        self.ensure_resource_bindings(shader_handle, &entry)?;
        Ok(true)
    }

    /// Resolve the depth-stencil object and draw-time depth bias
    fn ensure_depth_stencil_state(&mut self, primitive: Primitive) -> Result<()> {
        let fb = &self.framebuffers[self.active_framebuffer];
        let descriptor = self
            .state
            .depth_stencil_descriptor(fb.has_depth_attachment(), fb.has_stencil_attachment());

        if self.state.is_dirty(StateDirtyFlags::DEPTH_STENCIL)
            || self.bound_depth_stencil != Some(descriptor)
        {
            let state = self.depth_stencil_cache.bake_or_get(self.device.as_ref(), &descriptor)?;
            let encoder = self.encoder.as_mut().expect("encoder open");
            encoder.set_depth_stencil_state(&state);
            self.bound_depth_stencil = Some(descriptor);
            self.state.clear_dirty(StateDirtyFlags::DEPTH_STENCIL);
        }

        if self.state.is_dirty(StateDirtyFlags::STENCIL_REF) {
            let reference = self.state.stencil_reference();
            let encoder = self.encoder.as_mut().expect("encoder open");
            encoder.set_stencil_reference(reference);
            self.state.clear_dirty(StateDirtyFlags::STENCIL_REF);
        }

        // Bias depends on the primitive class of this draw, not on the
        // cached object.
        let bias = self.state.depth_bias_for(primitive).unwrap_or((0.0, 0.0));
        if self.last_depth_bias != Some(bias) {
            let encoder = self.encoder.as_mut().expect("encoder open");
            encoder.set_depth_bias(bias.0, bias.1, 0.0);
            self.last_depth_bias = Some(bias);
        }
        Ok(())
    }

    /// Re-issue only the dynamic encoder state whose dirty bit is set
    fn apply_dynamic_state(&mut self) {
        let fb = &self.framebuffers[self.active_framebuffer];
        let viewport = fb.viewport();
        let scissor = if fb.scissor_enabled() {
            fb.scissor()
        } else {
            Rect::new(0, 0, fb.width() as i32, fb.height() as i32)
        };
        let cull = self.state.cull_mode();
        let facing = self.state.front_face();
        let encoder = self.encoder.as_mut().expect("encoder open");

        if self.state.is_dirty(StateDirtyFlags::VIEWPORT) {
            encoder.set_viewport(viewport, (0.0, 1.0));
            self.state.clear_dirty(StateDirtyFlags::VIEWPORT);
        }
        if self.state.is_dirty(StateDirtyFlags::SCISSOR) {
            encoder.set_scissor(scissor);
            self.state.clear_dirty(StateDirtyFlags::SCISSOR);
        }
        if self.state.is_dirty(StateDirtyFlags::CULL_MODE) {
            encoder.set_cull_mode(cull);
            self.state.clear_dirty(StateDirtyFlags::CULL_MODE);
        }
        if self.state.is_dirty(StateDirtyFlags::FRONT_FACING) {
            encoder.set_front_facing(facing);
            self.state.clear_dirty(StateDirtyFlags::FRONT_FACING);
        }
    }

    // ===== RESOURCE BINDING =====

    fn dummy_texture(&mut self, kind: TextureKind) -> Result<Arc<dyn RawTexture>> {
        if let Some(texture) = self.dummy_textures.get(&kind) {
            return Ok(Arc::clone(texture));
        }
        let depth_or_layers = match kind {
            TextureKind::Cube | TextureKind::CubeArray => 6,
            _ => 1,
        };
        let texture = self.device.create_texture(&TextureDesc {
            label: format!("dummy_{:?}", kind),
            kind,
            format: PixelFormat::RGBA8_UNORM,
            width: 1,
            height: 1,
            depth_or_layers,
            mip_count: 1,
        })?;
        self.dummy_textures.insert(kind, Arc::clone(&texture));
        Ok(texture)
    }

    /// Zero-filled stand-in for missing or undersized uniform buffers,
    /// grown whenever a shader expects more bytes than it currently holds
    fn dummy_uniform_buffer(&mut self, min_size: u64) -> Result<Arc<dyn RawBuffer>> {
        let needs_grow = self
            .dummy_uniform_buffer
            .as_ref()
            .map(|b| b.len() < min_size)
            .unwrap_or(true);
        if needs_grow {
            let size = min_size.max(DUMMY_UNIFORM_BUFFER_SIZE);
            self.dummy_uniform_buffer = Some(self.device.create_buffer("dummy_uniform_buffer", size)?);
        }
        Ok(Arc::clone(self.dummy_uniform_buffer.as_ref().expect("created above")))
    }

    fn null_attribute_buffer(&mut self) -> Result<Arc<dyn RawBuffer>> {
        if self.null_attribute_buffer.is_none() {
            self.null_attribute_buffer =
                Some(self.device.create_buffer("null_attribute_buffer", NULL_ATTRIBUTE_BUFFER_SIZE)?);
        }
        Ok(Arc::clone(self.null_attribute_buffer.as_ref().expect("created above")))
    }

    /// Bind uniform buffers, push constants, vertex buffers, textures and
    /// samplers for the active shader. Missing or mismatched resources are
    /// substituted with dummies and logged; the draw always proceeds.
    fn ensure_resource_bindings(&mut self, shader_handle: ShaderHandle, entry: &PsoCacheEntry) -> Result<()> {
        let (interface, shader_name) = {
            let shader = self.shaders.get(shader_handle).expect("validated by caller");
            (shader.interface().clone(), shader.name().to_string())
        };

        // Vertex buffers at their application-bound slots, plus the null
        // attribute buffer when the PSO references one.
        for index in 0..self.bound_vertex_buffers.len() {
            if let Some(buffer) = self.bound_vertex_buffers[index].clone() {
                let encoder = self.encoder.as_mut().expect("encoder open");
                encoder.set_vertex_buffer(&buffer, 0, index as u32);
            }
        }
        if let Some(null_index) = entry.null_attribute_buffer_index {
            let buffer = self.null_attribute_buffer()?;
            let encoder = self.encoder.as_mut().expect("encoder open");
            encoder.set_vertex_buffer(&buffer, 0, null_index);
        }

        // Uniform buffers.
        for block in &interface.uniform_blocks {
            let slot = block.slot;
            let bound_size = self
                .bound_uniform_buffers
                .get(slot as usize)
                .and_then(|b| b.as_ref())
                .map(|b| b.len());

            let buffer = match resolve_uniform_binding(block.expected_size, bound_size) {
                UniformResolution::Bound => self.bound_uniform_buffers[slot as usize]
                    .clone()
                    .expect("resolution checked"),
                UniformResolution::DummyMissing => {
                    if self.warned_uniform_slots.insert((shader_handle, slot)) {
                        gpu_warn!(
                            SRC,
                            "Missing uniform buffer at slot {} for shader '{}', binding dummy",
                            slot,
                            shader_name
                        );
                    }
                    self.dummy_uniform_buffer(block.expected_size as u64)?
                }
                UniformResolution::DummyTooSmall { bound_size } => {
                    if self.warned_uniform_slots.insert((shader_handle, slot)) {
                        gpu_warn!(
                            SRC,
                            "Uniform buffer at slot {} is {} bytes, shader '{}' reads {}; binding dummy",
                            slot,
                            bound_size,
                            shader_name,
                            block.expected_size
                        );
                    }
                    self.dummy_uniform_buffer(block.expected_size as u64)?
                }
            };

            let index = entry.base_uniform_buffer_index + slot;
            let encoder = self.encoder.as_mut().expect("encoder open");
            if block.stages.contains(StageMask::VERTEX) {
                encoder.set_vertex_buffer(&buffer, 0, index);
            }
            if block.stages.contains(StageMask::FRAGMENT) {
                encoder.set_fragment_buffer(&buffer, 0, index);
            }
        }

        // Push constants as inline bytes past the uniform slots.
        if interface.push_constant_size > 0 {
            let bytes = {
                let shader = self.shaders.get(shader_handle).expect("validated by caller");
                shader.push_constant_bytes().to_vec()
            };
            let index = entry.base_uniform_buffer_index + MAX_UNIFORM_BUFFER_SLOTS as u32;
            let encoder = self.encoder.as_mut().expect("encoder open");
            encoder.set_vertex_bytes(&bytes, index);
            encoder.set_fragment_bytes(&bytes, index);
            if let Some(shader) = self.shaders.get_mut(shader_handle) {
                shader.mark_push_constants_bound();
            }
        }

        // Textures and samplers. Fragment samplers may exceed the inline
        // limit, in which case the whole ordered set goes through the
        // argument-buffer cache instead.
        let mut fragment_samplers: Vec<(u32, SamplerState)> = Vec::new();
        for binding in &interface.textures {
            let slot = binding.slot;
            let bound_handle = self.bound_textures.get(slot as usize).copied().flatten();
            let bound_kind = bound_handle
                .and_then(|handle| self.textures.get(handle))
                .map(|t| t.kind());

            let (raw, sampler) = match resolve_texture_binding(binding.kind, bound_kind) {
                TextureResolution::Bound => {
                    let texture = self
                        .textures
                        .get(bound_handle.expect("resolution checked"))
                        .expect("resolution checked");
                    (Arc::clone(texture.raw()), texture.sampler())
                }
                TextureResolution::DummyWrongKind { bound_kind } => {
                    if self.warned_texture_slots.insert((shader_handle, slot)) {
                        gpu_error!(
                            SRC,
                            "Texture at slot {} is {:?} but shader '{}' expects {:?}; binding dummy",
                            slot,
                            bound_kind,
                            shader_name,
                            binding.kind
                        );
                    }
                    (self.dummy_texture(binding.kind)?, SamplerState::DEFAULT)
                }
                TextureResolution::DummyMissing => {
                    if self.warned_texture_slots.insert((shader_handle, slot)) {
                        gpu_warn!(
                            SRC,
                            "No texture bound at slot {} for shader '{}', binding dummy",
                            slot,
                            shader_name
                        );
                    }
                    (self.dummy_texture(binding.kind)?, SamplerState::DEFAULT)
                }
            };

            let encoder = self.encoder.as_mut().expect("encoder open");
            if binding.stages.contains(StageMask::VERTEX) {
                encoder.set_vertex_texture(&raw, slot);
                encoder.set_vertex_sampler(sampler, slot);
            }
            if binding.stages.contains(StageMask::FRAGMENT) {
                encoder.set_fragment_texture(&raw, slot);
                fragment_samplers.push((slot, sampler));
            }
        }

        if fragment_samplers.len() > self.device.inline_sampler_limit() {
            // Above the inline limit: encode (or reuse) the ordered sampler
            // table as an argument buffer.
            let ordered: Vec<SamplerState> = fragment_samplers.iter().map(|(_, s)| *s).collect();
            let args = self.sampler_args.bake_or_get(self.device.as_ref(), &ordered)?;
            let index = entry.base_uniform_buffer_index + MAX_UNIFORM_BUFFER_SLOTS as u32 + 1;
            let encoder = self.encoder.as_mut().expect("encoder open");
            encoder.set_fragment_sampler_arguments(&args, index);
        } else {
            let encoder = self.encoder.as_mut().expect("encoder open");
            for (slot, sampler) in fragment_samplers {
                encoder.set_fragment_sampler(sampler, slot);
            }
        }

        Ok(())
    }

    // ===== DRAWING =====

    /// Issue a draw call. Skipped (not failed) when no valid pipeline can
    /// be resolved.
    pub fn draw(&mut self, primitive: Primitive, vertex_first: u32, vertex_count: u32) -> Result<()> {
        if !self.frame_active {
            return Err(Error::Validation("draw outside begin/end frame".to_string()));
        }
        if !self.ensure_render_pipeline_state(primitive)? {
            return Ok(());
        }
        let encoder = self.encoder.as_mut().expect("encoder open");
        encoder.draw_primitives(primitive, vertex_first, vertex_count);
        Ok(())
    }

    // ===== BLIT / READ =====

    /// Copy attachment planes between two framebuffers.
    ///
    /// Matching color formats use the direct region copy; mismatched color
    /// formats fall back to the graphics blit, which can reinterpret.
    /// Depth and stencil planes require matching formats.
    #[allow(clippy::too_many_arguments)]
    pub fn framebuffer_blit(
        &mut self,
        src: FrameBufferHandle,
        src_slot: u32,
        dst: FrameBufferHandle,
        dst_slot: u32,
        src_offset: (i32, i32),
        dst_offset: (i32, i32),
        size: (i32, i32),
        planes: FrameBufferPlanes,
    ) -> Result<()> {
        // Blitting encodes outside any render pass.
        self.end_active_encoder();
        let standalone = self.command_buffer.is_none();
        self.ensure_command_buffer()?;

        let result = self.blit_planes(src, src_slot, dst, dst_slot, src_offset, dst_offset, size, planes);

        // Unified-memory devices resolve the copy-then-sample hazard via
        // automatic dependency tracking; anything else needs the barrier.
        if result.is_ok() && !self.device.has_unified_memory() {
            if let Some(command_buffer) = self.command_buffer.as_mut() {
                command_buffer.texture_barrier();
            }
        }

        if standalone {
            if let Some(command_buffer) = self.command_buffer.take() {
                command_buffer.commit(None)?;
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn blit_planes(
        &mut self,
        src: FrameBufferHandle,
        src_slot: u32,
        dst: FrameBufferHandle,
        dst_slot: u32,
        src_offset: (i32, i32),
        dst_offset: (i32, i32),
        size: (i32, i32),
        planes: FrameBufferPlanes,
    ) -> Result<()> {
        let resolve = |fbs: &SlotMap<FrameBufferHandle, FrameBuffer>,
                       handle: FrameBufferHandle|
         -> Result<()> {
            fbs.get(handle)
                .map(|_| ())
                .ok_or_else(|| Error::InvalidResource("stale framebuffer handle in blit".to_string()))
        };
        resolve(&self.framebuffers, src)?;
        resolve(&self.framebuffers, dst)?;

        if planes.contains(FrameBufferPlanes::COLOR) {
            let (src_att, dst_att) = {
                let src_fb = &self.framebuffers[src];
                let dst_fb = &self.framebuffers[dst];
                if !src_fb.has_attachment_at_slot(src_slot) || !dst_fb.has_attachment_at_slot(dst_slot) {
                    return Err(Error::InvalidResource(
                        "blit requires color attachments at both slots".to_string(),
                    ));
                }
                (src_fb.color_attachment(src_slot), dst_fb.color_attachment(dst_slot))
            };
            self.blit_attachment(&src_att, &dst_att, src_offset, dst_offset, size, true)?;
        }
        if planes.contains(FrameBufferPlanes::DEPTH) {
            let (src_att, dst_att) = {
                let src_fb = &self.framebuffers[src];
                let dst_fb = &self.framebuffers[dst];
                if !src_fb.has_depth_attachment() || !dst_fb.has_depth_attachment() {
                    return Err(Error::InvalidResource(
                        "blit requires depth attachments on both framebuffers".to_string(),
                    ));
                }
                (src_fb.depth_attachment(), dst_fb.depth_attachment())
            };
            self.blit_attachment(&src_att, &dst_att, src_offset, dst_offset, size, false)?;
        }
        if planes.contains(FrameBufferPlanes::STENCIL) {
            let (src_att, dst_att) = {
                let src_fb = &self.framebuffers[src];
                let dst_fb = &self.framebuffers[dst];
                if !src_fb.has_stencil_attachment() || !dst_fb.has_stencil_attachment() {
                    return Err(Error::InvalidResource(
                        "blit requires stencil attachments on both framebuffers".to_string(),
                    ));
                }
                (src_fb.stencil_attachment(), dst_fb.stencil_attachment())
            };
            self.blit_attachment(&src_att, &dst_att, src_offset, dst_offset, size, false)?;
        }
        Ok(())
    }

    fn blit_attachment(
        &mut self,
        src: &crate::framebuffer::Attachment,
        dst: &crate::framebuffer::Attachment,
        src_offset: (i32, i32),
        dst_offset: (i32, i32),
        size: (i32, i32),
        allow_convert: bool,
    ) -> Result<()> {
        let src_tex = self
            .textures
            .get(src.texture)
            .ok_or_else(|| Error::InvalidResource("stale blit source texture".to_string()))?;
        let dst_tex = self
            .textures
            .get(dst.texture)
            .ok_or_else(|| Error::InvalidResource("stale blit destination texture".to_string()))?;
        let src_raw = Arc::clone(src_tex.raw());
        let dst_raw = Arc::clone(dst_tex.raw());
        let formats_match = src_tex.format() == dst_tex.format();

        let command_buffer = self.command_buffer.as_mut().expect("command buffer ensured");
        if formats_match {
            command_buffer.copy_texture_region(
                &src_raw,
                src.mip,
                src.slice,
                src_offset,
                &dst_raw,
                dst.mip,
                dst.slice,
                dst_offset,
                size,
            )
        } else if allow_convert {
            // A raw byte copy cannot reinterpret formats; draw through the
            // graphics pipeline instead.
            gpu_debug!(SRC, "Blit formats differ, using graphics-pipeline fallback");
            command_buffer.blit_texture_via_render(
                &src_raw,
                src.mip,
                src_offset,
                &dst_raw,
                dst.mip,
                dst.slice,
                dst_offset,
                size,
            )
        } else {
            gpu_error!(SRC, "Depth/stencil blit requires matching formats");
            Err(Error::Validation(
                "depth/stencil blit requires matching formats".to_string(),
            ))
        }
    }

    /// Read back raw texel bytes of one framebuffer plane
    pub fn framebuffer_read(
        &self,
        handle: FrameBufferHandle,
        planes: FrameBufferPlanes,
        area: Rect,
        slot: u32,
    ) -> Result<Vec<u8>> {
        let fb = self
            .framebuffers
            .get(handle)
            .ok_or_else(|| Error::InvalidResource("stale framebuffer handle".to_string()))?;
        fb.read(&self.textures, planes, area, slot)
    }

    // ===== CACHE INTROSPECTION =====

    pub fn depth_stencil_cache(&self) -> &DepthStencilCache {
        &self.depth_stencil_cache
    }

    pub fn sampler_argument_cache(&self) -> &SamplerArgumentCache {
        &self.sampler_args
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.end_active_encoder();
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
