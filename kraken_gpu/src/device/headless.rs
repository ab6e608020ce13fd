//! Headless CPU device
//!
//! A software implementation of the raw-device trait family used by unit
//! and integration tests (no GPU required). Textures are backed by real
//! byte storage so clears, copies and readbacks behave observably, and the
//! device counts compile/encode calls so cache tests can assert that
//! memoization actually avoided recompilation. Encoded commands are
//! recorded as strings, mirroring the command-log style of the engine's
//! mock renderer.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::device::{
    PipelineSpecialization, RawBuffer, RawCommandBuffer, RawDepthStencilState, RawDevice,
    RawRenderEncoder, RawRenderPipeline, RawSamplerArguments, RawShaderFunctions, RawTexture,
    Rect, ShaderSource, TextureDesc,
};
use crate::error::{Error, Result};
use crate::framebuffer::{ClearValue, LoadAction, RenderPassDescriptor};
use crate::pipeline::{CullMode, DepthStencilDescriptor, FrontFace, PipelineStateDescriptor, Primitive};
use crate::texture::{PixelFormat, SamplerState, TextureKind};

// ===== TEXEL ENCODING HELPERS =====

fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        // Inf/NaN
        return sign | 0x7C00 | if mantissa != 0 { 0x200 } else { 0 };
    }
    let exponent = exponent - 127 + 15;
    if exponent >= 0x1F {
        return sign | 0x7C00; // overflow to inf
    }
    if exponent <= 0 {
        return sign; // flush denormals to zero
    }
    sign | ((exponent as u16) << 10) | ((mantissa >> 13) as u16)
}

fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = ((bits & 0x8000) as u32) << 16;
    let exponent = ((bits >> 10) & 0x1F) as u32;
    let mantissa = (bits & 0x3FF) as u32;
    if exponent == 0 {
        if mantissa == 0 {
            return f32::from_bits(sign);
        }
        // Denormal: value is mantissa * 2^-24
        let magnitude = mantissa as f32 / (1 << 24) as f32;
        return if sign != 0 { -magnitude } else { magnitude };
    }
    if exponent == 0x1F {
        return f32::from_bits(sign | 0x7F80_0000 | (mantissa << 13));
    }
    f32::from_bits(sign | ((exponent + 127 - 15) << 23) | (mantissa << 13))
}

/// Encode one texel of `format` from an RGBA f32 quadruple
fn encode_texel(format: PixelFormat, rgba: [f32; 4]) -> Option<Vec<u8>> {
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        PixelFormat::R8_UNORM => Some(vec![to_u8(rgba[0])]),
        PixelFormat::RG8_UNORM => Some(vec![to_u8(rgba[0]), to_u8(rgba[1])]),
        PixelFormat::RGBA8_UNORM | PixelFormat::RGBA8_SRGB => {
            Some(vec![to_u8(rgba[0]), to_u8(rgba[1]), to_u8(rgba[2]), to_u8(rgba[3])])
        }
        PixelFormat::BGRA8_UNORM | PixelFormat::BGRA8_SRGB => {
            Some(vec![to_u8(rgba[2]), to_u8(rgba[1]), to_u8(rgba[0]), to_u8(rgba[3])])
        }
        PixelFormat::R16_FLOAT => Some(f32_to_f16_bits(rgba[0]).to_le_bytes().to_vec()),
        PixelFormat::RG16_FLOAT => {
            let mut bytes = Vec::with_capacity(4);
            bytes.extend_from_slice(&f32_to_f16_bits(rgba[0]).to_le_bytes());
            bytes.extend_from_slice(&f32_to_f16_bits(rgba[1]).to_le_bytes());
            Some(bytes)
        }
        PixelFormat::RGBA16_FLOAT => {
            let mut bytes = Vec::with_capacity(8);
            for component in rgba {
                bytes.extend_from_slice(&f32_to_f16_bits(component).to_le_bytes());
            }
            Some(bytes)
        }
        PixelFormat::R32_FLOAT => Some(rgba[0].to_le_bytes().to_vec()),
        PixelFormat::RG32_FLOAT => {
            let mut bytes = Vec::with_capacity(8);
            bytes.extend_from_slice(&rgba[0].to_le_bytes());
            bytes.extend_from_slice(&rgba[1].to_le_bytes());
            Some(bytes)
        }
        PixelFormat::RGBA32_FLOAT => Some(bytemuck::cast_slice(&rgba).to_vec()),
        PixelFormat::R32_UINT => Some((rgba[0] as u32).to_le_bytes().to_vec()),
        PixelFormat::RGBA32_UINT => {
            let mut bytes = Vec::with_capacity(16);
            for component in rgba {
                bytes.extend_from_slice(&(component as u32).to_le_bytes());
            }
            Some(bytes)
        }
        PixelFormat::DEPTH16_UNORM => {
            Some(((rgba[0].clamp(0.0, 1.0) * 65535.0) as u16).to_le_bytes().to_vec())
        }
        PixelFormat::DEPTH32_FLOAT => Some(rgba[0].to_le_bytes().to_vec()),
        PixelFormat::DEPTH24_UNORM_STENCIL8 => {
            let depth = (rgba[0].clamp(0.0, 1.0) * ((1 << 24) - 1) as f32) as u32;
            Some(((depth << 8) | (rgba[1] as u32 & 0xFF)).to_le_bytes().to_vec())
        }
        PixelFormat::DEPTH32_FLOAT_STENCIL8 => {
            let mut bytes = Vec::with_capacity(8);
            bytes.extend_from_slice(&rgba[0].to_le_bytes());
            bytes.extend_from_slice(&(rgba[1] as u32).to_le_bytes());
            Some(bytes)
        }
    }
}

/// Decode one texel of `format` into an RGBA f32 quadruple
fn decode_texel(format: PixelFormat, bytes: &[u8]) -> Option<[f32; 4]> {
    let from_u8 = |b: u8| b as f32 / 255.0;
    match format {
        PixelFormat::R8_UNORM => Some([from_u8(bytes[0]), 0.0, 0.0, 1.0]),
        PixelFormat::RG8_UNORM => Some([from_u8(bytes[0]), from_u8(bytes[1]), 0.0, 1.0]),
        PixelFormat::RGBA8_UNORM | PixelFormat::RGBA8_SRGB => Some([
            from_u8(bytes[0]),
            from_u8(bytes[1]),
            from_u8(bytes[2]),
            from_u8(bytes[3]),
        ]),
        PixelFormat::BGRA8_UNORM | PixelFormat::BGRA8_SRGB => Some([
            from_u8(bytes[2]),
            from_u8(bytes[1]),
            from_u8(bytes[0]),
            from_u8(bytes[3]),
        ]),
        PixelFormat::R16_FLOAT => {
            Some([f16_bits_to_f32(u16::from_le_bytes([bytes[0], bytes[1]])), 0.0, 0.0, 1.0])
        }
        PixelFormat::RG16_FLOAT => Some([
            f16_bits_to_f32(u16::from_le_bytes([bytes[0], bytes[1]])),
            f16_bits_to_f32(u16::from_le_bytes([bytes[2], bytes[3]])),
            0.0,
            1.0,
        ]),
        PixelFormat::RGBA16_FLOAT => Some([
            f16_bits_to_f32(u16::from_le_bytes([bytes[0], bytes[1]])),
            f16_bits_to_f32(u16::from_le_bytes([bytes[2], bytes[3]])),
            f16_bits_to_f32(u16::from_le_bytes([bytes[4], bytes[5]])),
            f16_bits_to_f32(u16::from_le_bytes([bytes[6], bytes[7]])),
        ]),
        PixelFormat::R32_FLOAT => {
            Some([f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0.0, 0.0, 1.0])
        }
        PixelFormat::RG32_FLOAT => Some([
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            0.0,
            1.0,
        ]),
        PixelFormat::RGBA32_FLOAT => {
            let component = |i: usize| {
                f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
            };
            Some([component(0), component(1), component(2), component(3)])
        }
        // Integer and depth formats do not participate in the
        // format-converting blit path.
        _ => None,
    }
}

fn clear_value_to_rgba(value: ClearValue) -> [f32; 4] {
    match value {
        ClearValue::Color(c) => [c.x, c.y, c.z, c.w],
        ClearValue::Depth(d) => [d, 0.0, 0.0, 0.0],
        ClearValue::Stencil(s) => [s as f32, 0.0, 0.0, 0.0],
    }
}

// ===== HEADLESS RESOURCES =====

/// CPU-backed buffer
pub struct HeadlessBuffer {
    label: String,
    data: Mutex<Vec<u8>>,
}

impl RawBuffer for HeadlessBuffer {
    fn len(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut bytes = self.data.lock().unwrap();
        let end = offset as usize + data.len();
        if end > bytes.len() {
            return Err(Error::InvalidResource(format!(
                "write past end of buffer '{}' ({} > {})",
                self.label,
                end,
                bytes.len()
            )));
        }
        bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let bytes = self.data.lock().unwrap();
        let end = (offset + len) as usize;
        if end > bytes.len() {
            return Err(Error::InvalidResource(format!(
                "read past end of buffer '{}'",
                self.label
            )));
        }
        Ok(bytes[offset as usize..end].to_vec())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// CPU-backed texture with per-(mip, slice) byte storage
pub struct HeadlessTexture {
    desc: TextureDesc,
    levels: Mutex<FxHashMap<(u32, u32), Vec<u8>>>,
}

impl HeadlessTexture {
    fn mip_size(&self, mip: u32) -> (u32, u32) {
        ((self.desc.width >> mip).max(1), (self.desc.height >> mip).max(1))
    }

    fn with_level<R>(&self, mip: u32, slice: u32, f: impl FnOnce(&mut Vec<u8>, u32, u32) -> R) -> R {
        let (width, height) = self.mip_size(mip);
        let bpp = self.desc.format.bytes_per_pixel();
        let mut levels = self.levels.lock().unwrap();
        let level = levels
            .entry((mip, slice))
            .or_insert_with(|| vec![0u8; (width * height * bpp) as usize]);
        f(level, width, height)
    }

    fn check_area(&self, mip: u32, area: Rect) -> Result<()> {
        let (width, height) = self.mip_size(mip);
        if area.x < 0
            || area.y < 0
            || area.width < 0
            || area.height < 0
            || (area.x + area.width) as u32 > width
            || (area.y + area.height) as u32 > height
        {
            return Err(Error::InvalidResource(format!(
                "region {:?} outside {}x{} texture '{}'",
                area, width, height, self.desc.label
            )));
        }
        Ok(())
    }

    fn fill(&self, mip: u32, slice: u32, texel: &[u8]) {
        self.with_level(mip, slice, |level, width, height| {
            let bpp = texel.len();
            for i in 0..(width * height) as usize {
                level[i * bpp..(i + 1) * bpp].copy_from_slice(texel);
            }
        });
    }
}

impl RawTexture for HeadlessTexture {
    fn kind(&self) -> TextureKind {
        self.desc.kind
    }

    fn format(&self) -> PixelFormat {
        self.desc.format
    }

    fn width(&self) -> u32 {
        self.desc.width
    }

    fn height(&self) -> u32 {
        self.desc.height
    }

    fn depth_or_layers(&self) -> u32 {
        self.desc.depth_or_layers
    }

    fn mip_count(&self) -> u32 {
        self.desc.mip_count
    }

    fn read_region(&self, mip: u32, slice: u32, area: Rect) -> Result<Vec<u8>> {
        self.check_area(mip, area)?;
        let bpp = self.desc.format.bytes_per_pixel() as usize;
        Ok(self.with_level(mip, slice, |level, width, _| {
            let mut out = Vec::with_capacity((area.width * area.height) as usize * bpp);
            for row in 0..area.height {
                let y = (area.y + row) as usize;
                let start = (y * width as usize + area.x as usize) * bpp;
                out.extend_from_slice(&level[start..start + area.width as usize * bpp]);
            }
            out
        }))
    }

    fn write_region(&self, mip: u32, slice: u32, area: Rect, data: &[u8]) -> Result<()> {
        self.check_area(mip, area)?;
        let bpp = self.desc.format.bytes_per_pixel() as usize;
        let expected = (area.width * area.height) as usize * bpp;
        if data.len() != expected {
            return Err(Error::InvalidResource(format!(
                "write_region data length {} != expected {}",
                data.len(),
                expected
            )));
        }
        self.with_level(mip, slice, |level, width, _| {
            for row in 0..area.height {
                let y = (area.y + row) as usize;
                let dst_start = (y * width as usize + area.x as usize) * bpp;
                let src_start = row as usize * area.width as usize * bpp;
                level[dst_start..dst_start + area.width as usize * bpp]
                    .copy_from_slice(&data[src_start..src_start + area.width as usize * bpp]);
            }
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compiled function pair (headless: just the retained source)
pub struct HeadlessShaderFunctions {
    pub source: ShaderSource,
}

impl RawShaderFunctions for HeadlessShaderFunctions {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compiled pipeline (headless: retained specialization for assertions)
pub struct HeadlessRenderPipeline {
    pub label: String,
    pub specialization: PipelineSpecialization,
}

impl RawRenderPipeline for HeadlessRenderPipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compiled depth-stencil state (headless: retained descriptor)
pub struct HeadlessDepthStencilState {
    pub descriptor: DepthStencilDescriptor,
}

impl RawDepthStencilState for HeadlessDepthStencilState {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Encoded sampler argument buffer (headless: retained sampler list)
pub struct HeadlessSamplerArguments {
    pub samplers: Vec<SamplerState>,
}

impl RawSamplerArguments for HeadlessSamplerArguments {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== COMMAND RECORDING =====

type CommandLog = Arc<Mutex<Vec<String>>>;

/// Render encoder recording commands into the device log
pub struct HeadlessRenderEncoder {
    commands: CommandLog,
    ended: bool,
}

impl HeadlessRenderEncoder {
    fn record(&self, command: String) {
        debug_assert!(!self.ended, "encoder used after end");
        self.commands.lock().unwrap().push(command);
    }
}

impl RawRenderEncoder for HeadlessRenderEncoder {
    fn set_render_pipeline(&mut self, _pipeline: &Arc<dyn RawRenderPipeline>) {
        self.record("set_render_pipeline".to_string());
    }

    fn set_depth_stencil_state(&mut self, _state: &Arc<dyn RawDepthStencilState>) {
        self.record("set_depth_stencil_state".to_string());
    }

    fn set_stencil_reference(&mut self, value: u32) {
        self.record(format!("set_stencil_reference({})", value));
    }

    fn set_viewport(&mut self, rect: Rect, depth_range: (f32, f32)) {
        self.record(format!(
            "set_viewport({},{},{},{},{},{})",
            rect.x, rect.y, rect.width, rect.height, depth_range.0, depth_range.1
        ));
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.record(format!(
            "set_scissor({},{},{},{})",
            rect.x, rect.y, rect.width, rect.height
        ));
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.record(format!("set_cull_mode({:?})", mode));
    }

    fn set_front_facing(&mut self, winding: FrontFace) {
        self.record(format!("set_front_facing({:?})", winding));
    }

    fn set_depth_bias(&mut self, bias: f32, slope_scale: f32, clamp: f32) {
        self.record(format!("set_depth_bias({},{},{})", bias, slope_scale, clamp));
    }

    fn set_vertex_buffer(&mut self, _buffer: &Arc<dyn RawBuffer>, offset: u64, index: u32) {
        self.record(format!("set_vertex_buffer(offset={},index={})", offset, index));
    }

    fn set_fragment_buffer(&mut self, _buffer: &Arc<dyn RawBuffer>, offset: u64, index: u32) {
        self.record(format!("set_fragment_buffer(offset={},index={})", offset, index));
    }

    fn set_vertex_bytes(&mut self, data: &[u8], index: u32) {
        self.record(format!("set_vertex_bytes(len={},index={})", data.len(), index));
    }

    fn set_fragment_bytes(&mut self, data: &[u8], index: u32) {
        self.record(format!("set_fragment_bytes(len={},index={})", data.len(), index));
    }

    fn set_vertex_texture(&mut self, _texture: &Arc<dyn RawTexture>, slot: u32) {
        self.record(format!("set_vertex_texture(slot={})", slot));
    }

    fn set_fragment_texture(&mut self, _texture: &Arc<dyn RawTexture>, slot: u32) {
        self.record(format!("set_fragment_texture(slot={})", slot));
    }

    fn set_vertex_sampler(&mut self, sampler: SamplerState, slot: u32) {
        self.record(format!("set_vertex_sampler(bits={:#x},slot={})", sampler.bits(), slot));
    }

    fn set_fragment_sampler(&mut self, sampler: SamplerState, slot: u32) {
        self.record(format!("set_fragment_sampler(bits={:#x},slot={})", sampler.bits(), slot));
    }

    fn set_fragment_sampler_arguments(&mut self, _args: &Arc<dyn RawSamplerArguments>, index: u32) {
        self.record(format!("set_fragment_sampler_arguments(index={})", index));
    }

    fn draw_primitives(&mut self, primitive: Primitive, vertex_first: u32, vertex_count: u32) {
        self.record(format!(
            "draw_primitives({:?},{},{})",
            primitive, vertex_first, vertex_count
        ));
    }

    fn end(&mut self) {
        self.record("end_encoding".to_string());
        self.ended = true;
    }
}

/// Command buffer executing texture operations immediately on commit-less
/// CPU storage
pub struct HeadlessCommandBuffer {
    label: String,
    commands: CommandLog,
}

impl HeadlessCommandBuffer {
    fn apply_clear(attachment_desc: &crate::framebuffer::RenderPassAttachmentDesc) {
        if attachment_desc.load_action != LoadAction::Clear {
            return;
        }
        let texture = attachment_desc
            .texture
            .as_any()
            .downcast_ref::<HeadlessTexture>();
        if let Some(texture) = texture {
            let rgba = clear_value_to_rgba(attachment_desc.clear_value);
            if let Some(texel) = encode_texel(texture.format(), rgba) {
                texture.fill(attachment_desc.mip, attachment_desc.slice, &texel);
            }
        }
    }
}

impl RawCommandBuffer for HeadlessCommandBuffer {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> Result<Box<dyn RawRenderEncoder>> {
        let mut summary = Vec::new();
        for (slot, attachment) in desc.color.iter().enumerate() {
            if let Some(attachment) = attachment {
                summary.push(format!("color{}={:?}", slot, attachment.load_action));
                Self::apply_clear(attachment);
            }
        }
        if let Some(attachment) = &desc.depth {
            summary.push(format!("depth={:?}", attachment.load_action));
            Self::apply_clear(attachment);
        }
        if let Some(attachment) = &desc.stencil {
            summary.push(format!("stencil={:?}", attachment.load_action));
            Self::apply_clear(attachment);
        }
        self.commands
            .lock()
            .unwrap()
            .push(format!("begin_render_pass({})", summary.join(",")));
        Ok(Box::new(HeadlessRenderEncoder {
            commands: Arc::clone(&self.commands),
            ended: false,
        }))
    }

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
    ) -> Result<()> {
        if src.format() != dst.format() {
            return Err(Error::Validation(
                "copy_texture_region requires matching formats".to_string(),
            ));
        }
        let bytes = src.read_region(
            src_mip,
            src_slice,
            Rect::new(src_origin.0, src_origin.1, size.0, size.1),
        )?;
        dst.write_region(
            dst_mip,
            dst_slice,
            Rect::new(dst_origin.0, dst_origin.1, size.0, size.1),
            &bytes,
        )?;
        self.commands.lock().unwrap().push("copy_texture_region".to_string());
        Ok(())
    }

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
    ) -> Result<()> {
        let src_bytes = src.read_region(
            src_mip,
            0,
            Rect::new(src_origin.0, src_origin.1, size.0, size.1),
        )?;
        let src_bpp = src.format().bytes_per_pixel() as usize;
        let dst_bpp = dst.format().bytes_per_pixel() as usize;
        let mut dst_bytes = Vec::with_capacity((size.0 * size.1) as usize * dst_bpp);
        for texel in src_bytes.chunks(src_bpp) {
            let rgba = decode_texel(src.format(), texel).ok_or_else(|| {
                Error::BackendError(format!(
                    "format {:?} unsupported in converting blit",
                    src.format()
                ))
            })?;
            let encoded = encode_texel(dst.format(), rgba).ok_or_else(|| {
                Error::BackendError(format!(
                    "format {:?} unsupported in converting blit",
                    dst.format()
                ))
            })?;
            dst_bytes.extend_from_slice(&encoded);
        }
        dst.write_region(
            dst_mip,
            dst_slice,
            Rect::new(dst_origin.0, dst_origin.1, size.0, size.1),
            &dst_bytes,
        )?;
        self.commands.lock().unwrap().push("blit_texture_via_render".to_string());
        Ok(())
    }

    fn texture_barrier(&mut self) {
        self.commands.lock().unwrap().push("texture_barrier".to_string());
    }

    fn encode_wait_for_event(&mut self, value: u64) {
        self.commands
            .lock()
            .unwrap()
            .push(format!("encode_wait_for_event({})", value));
    }

    fn encode_signal_event(&mut self, value: u64) {
        self.commands
            .lock()
            .unwrap()
            .push(format!("encode_signal_event({})", value));
    }

    fn present_drawable(&mut self) -> Result<()> {
        self.commands.lock().unwrap().push("present_drawable".to_string());
        Ok(())
    }

    fn commit(self: Box<Self>, completion: Option<Box<dyn FnOnce() + Send>>) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("commit({})", self.label));
        // The CPU "GPU" finishes instantly; completion runs inline.
        if let Some(completion) = completion {
            completion();
        }
        Ok(())
    }
}

// ===== DEVICE =====

/// CPU device used by tests and offscreen validation
pub struct HeadlessDevice {
    name: String,
    commands: CommandLog,
    pipeline_compiles: AtomicU64,
    depth_stencil_compiles: AtomicU64,
    sampler_encodes: AtomicU64,
    fail_pipeline_compiles: AtomicBool,
}

impl HeadlessDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            name: "Kraken Headless Device".to_string(),
            commands: Arc::new(Mutex::new(Vec::new())),
            pipeline_compiles: AtomicU64::new(0),
            depth_stencil_compiles: AtomicU64::new(0),
            sampler_encodes: AtomicU64::new(0),
            fail_pipeline_compiles: AtomicBool::new(false),
        })
    }

    /// Number of render pipelines actually compiled (cache-miss count)
    pub fn pipeline_compile_count(&self) -> u64 {
        self.pipeline_compiles.load(Ordering::Relaxed)
    }

    /// Number of depth-stencil states actually compiled
    pub fn depth_stencil_compile_count(&self) -> u64 {
        self.depth_stencil_compiles.load(Ordering::Relaxed)
    }

    /// Number of sampler argument buffers actually encoded
    pub fn sampler_encode_count(&self) -> u64 {
        self.sampler_encodes.load(Ordering::Relaxed)
    }

    /// Force subsequent pipeline compiles to fail (compile-error tests)
    pub fn set_fail_pipeline_compiles(&self, fail: bool) {
        self.fail_pipeline_compiles.store(fail, Ordering::Relaxed);
    }

    /// Snapshot of all encoded commands
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Number of encoded commands matching `needle`
    pub fn command_count(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// Drop the recorded command log
    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }
}

impl RawDevice for HeadlessDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_unified_memory(&self) -> bool {
        true
    }

    fn create_buffer(&self, label: &str, size: u64) -> Result<Arc<dyn RawBuffer>> {
        Ok(Arc::new(HeadlessBuffer {
            label: label.to_string(),
            data: Mutex::new(vec![0u8; size as usize]),
        }))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn RawTexture>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!(
                "zero-sized texture '{}'",
                desc.label
            )));
        }
        Ok(Arc::new(HeadlessTexture {
            desc: desc.clone(),
            levels: Mutex::new(FxHashMap::default()),
        }))
    }

    fn compile_shader_functions(&self, source: &ShaderSource) -> Result<Arc<dyn RawShaderFunctions>> {
        // "#error" in either stage simulates a translation/compile failure.
        if source.msl_vertex.trim().is_empty() || source.msl_fragment.trim().is_empty() {
            return Err(Error::CompilationFailed(format!(
                "shader '{}' has an empty stage",
                source.name
            )));
        }
        if source.msl_vertex.contains("#error") || source.msl_fragment.contains("#error") {
            return Err(Error::CompilationFailed(format!(
                "shader '{}' failed to compile",
                source.name
            )));
        }
        Ok(Arc::new(HeadlessShaderFunctions { source: source.clone() }))
    }

    fn compile_render_pipeline(
        &self,
        functions: &Arc<dyn RawShaderFunctions>,
        _desc: &PipelineStateDescriptor,
        specialization: &PipelineSpecialization,
    ) -> Result<Arc<dyn RawRenderPipeline>> {
        self.pipeline_compiles.fetch_add(1, Ordering::Relaxed);
        if self.fail_pipeline_compiles.load(Ordering::Relaxed) {
            return Err(Error::CompilationFailed(
                "simulated pipeline compile failure".to_string(),
            ));
        }
        let label = functions
            .as_any()
            .downcast_ref::<HeadlessShaderFunctions>()
            .map(|f| f.source.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Arc::new(HeadlessRenderPipeline {
            label,
            specialization: *specialization,
        }))
    }

    fn compile_depth_stencil(
        &self,
        desc: &DepthStencilDescriptor,
    ) -> Result<Arc<dyn RawDepthStencilState>> {
        self.depth_stencil_compiles.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(HeadlessDepthStencilState { descriptor: desc.clone() }))
    }

    fn encode_sampler_arguments(&self, samplers: &[SamplerState]) -> Result<Arc<dyn RawSamplerArguments>> {
        self.sampler_encodes.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(HeadlessSamplerArguments {
            samplers: samplers.to_vec(),
        }))
    }

    fn new_command_buffer(&self, label: &str) -> Result<Box<dyn RawCommandBuffer>> {
        Ok(Box::new(HeadlessCommandBuffer {
            label: label.to_string(),
            commands: Arc::clone(&self.commands),
        }))
    }
}

#[cfg(test)]
#[path = "headless_tests.rs"]
mod tests;
