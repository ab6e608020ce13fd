//! Command buffer and render encoder recording
//!
//! One `MetalCommandBuffer` wraps one `MTLCommandBuffer`; render passes are
//! recorded through `MetalRenderEncoder`, blits through transient blit
//! encoders. Completion handlers are forwarded to the portable core's
//! callback, which runs them on the driver-owned completion thread.

use std::sync::Arc;
use std::sync::Mutex;

use block::ConcreteBlock;
use metal::{
    MTLClearColor, MTLLoadAction, MTLOrigin, MTLScissorRect, MTLSize, MTLStoreAction, MTLViewport,
};

use kraken_gpu::device::{
    RawBuffer, RawCommandBuffer, RawDepthStencilState, RawRenderEncoder, RawRenderPipeline,
    RawSamplerArguments, RawTexture, Rect,
};
use kraken_gpu::error::{Error, Result};
use kraken_gpu::framebuffer::{
    ClearValue, LoadAction, RenderPassAttachmentDesc, RenderPassDescriptor, StoreAction,
};
use kraken_gpu::pipeline::{CullMode, FrontFace, Primitive};
use kraken_gpu::texture::SamplerState;

use crate::metal_buffer::MetalBuffer;
use crate::metal_depth_stencil::MetalDepthStencilState;
use crate::metal_device::{pixel_format_to_metal, MetalDevice};
use crate::metal_pipeline::MetalRenderPipeline;
use crate::metal_sampler::MetalSamplerArguments;
use crate::metal_texture::MetalTexture;

type SharedSamplers = Arc<Mutex<rustc_hash::FxHashMap<SamplerState, metal::SamplerState>>>;

/// One command buffer on the device queue
pub struct MetalCommandBuffer {
    command_buffer: metal::CommandBuffer,
    device: metal::Device,
    sync_event: metal::SharedEvent,
    surface: Arc<Mutex<Option<crate::metal_layer::MetalSurface>>>,
    samplers: SharedSamplers,
}

impl MetalCommandBuffer {
    pub(crate) fn new(device: &MetalDevice, label: &str) -> Self {
        let command_buffer = device.queue.new_command_buffer().to_owned();
        command_buffer.set_label(label);
        Self {
            command_buffer,
            device: device.device.clone(),
            sync_event: device.sync_event.clone(),
            surface: Arc::clone(&device.surface),
            samplers: Arc::clone(&device.samplers),
        }
    }

    fn raw_texture<'a>(texture: &'a Arc<dyn RawTexture>) -> Result<&'a MetalTexture> {
        texture
            .as_any()
            .downcast_ref::<MetalTexture>()
            .ok_or_else(|| Error::BackendError("foreign texture in Metal backend".to_string()))
    }

    fn apply_attachment(
        attachment: &RenderPassAttachmentDesc,
        descriptor: &metal::RenderPassAttachmentDescriptorRef,
    ) -> Result<()> {
        let texture = Self::raw_texture(&attachment.texture)?;
        match attachment.view_format {
            // sRGB attachment rendered with conversion disabled: bind a
            // reinterpreted view
            Some(format) => {
                let view = texture.raw().new_texture_view(pixel_format_to_metal(format));
                descriptor.set_texture(Some(&view));
            }
            None => descriptor.set_texture(Some(texture.raw())),
        }
        descriptor.set_level(attachment.mip as u64);
        descriptor.set_slice(attachment.slice as u64);
        descriptor.set_depth_plane(attachment.depth_plane as u64);
        descriptor.set_load_action(match attachment.load_action {
            LoadAction::Load => MTLLoadAction::Load,
            LoadAction::Clear => MTLLoadAction::Clear,
            LoadAction::DontCare => MTLLoadAction::DontCare,
        });
        descriptor.set_store_action(match attachment.store_action {
            StoreAction::Store => MTLStoreAction::Store,
            StoreAction::DontCare => MTLStoreAction::DontCare,
        });
        Ok(())
    }
}

impl RawCommandBuffer for MetalCommandBuffer {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> Result<Box<dyn RawRenderEncoder>> {
        let descriptor = metal::RenderPassDescriptor::new();

        for (slot, attachment) in desc.color.iter().enumerate() {
            let Some(attachment) = attachment else { continue };
            let color = descriptor
                .color_attachments()
                .object_at(slot as u64)
                .ok_or_else(|| Error::BackendError("color attachment slot out of range".to_string()))?;
            Self::apply_attachment(attachment, color)?;
            if let ClearValue::Color(value) = attachment.clear_value {
                color.set_clear_color(MTLClearColor::new(
                    value.x as f64,
                    value.y as f64,
                    value.z as f64,
                    value.w as f64,
                ));
            }
        }
        if let Some(attachment) = &desc.depth {
            let depth = descriptor.depth_attachment().ok_or_else(|| {
                Error::BackendError("render pass has no depth attachment slot".to_string())
            })?;
            Self::apply_attachment(attachment, depth)?;
            if let ClearValue::Depth(value) = attachment.clear_value {
                depth.set_clear_depth(value as f64);
            }
        }
        if let Some(attachment) = &desc.stencil {
            let stencil = descriptor.stencil_attachment().ok_or_else(|| {
                Error::BackendError("render pass has no stencil attachment slot".to_string())
            })?;
            Self::apply_attachment(attachment, stencil)?;
            if let ClearValue::Stencil(value) = attachment.clear_value {
                stencil.set_clear_stencil(value);
            }
        }
        if desc.render_target_array_length > 0 {
            descriptor.set_render_target_array_length(desc.render_target_array_length as u64);
        }

        let encoder = self.command_buffer.new_render_command_encoder(descriptor).to_owned();
        Ok(Box::new(MetalRenderEncoder {
            encoder,
            device: self.device.clone(),
            samplers: Arc::clone(&self.samplers),
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
        let src = Self::raw_texture(src)?;
        let dst = Self::raw_texture(dst)?;

        let encoder = self.command_buffer.new_blit_command_encoder();
        encoder.copy_from_texture(
            src.raw(),
            src_slice as u64,
            src_mip as u64,
            MTLOrigin {
                x: src_origin.0 as u64,
                y: src_origin.1 as u64,
                z: 0,
            },
            MTLSize {
                width: size.0 as u64,
                height: size.1 as u64,
                depth: 1,
            },
            dst.raw(),
            dst_slice as u64,
            dst_mip as u64,
            MTLOrigin {
                x: dst_origin.0 as u64,
                y: dst_origin.1 as u64,
                z: 0,
            },
        );
        encoder.end_encoding();
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
        // Format conversion without a fullscreen-quad pipeline: round-trip
        // through CPU texel conversion. Acceptable because converting blits
        // are rare editor-side operations, not per-frame work.
        let src_area = Rect::new(src_origin.0, src_origin.1, size.0, size.1);
        let bytes = src.read_region(src_mip, 0, src_area)?;
        let src_bpp = src.format().bytes_per_pixel() as usize;
        let dst_format = dst.format();
        let mut converted = Vec::with_capacity((size.0 * size.1) as usize * dst_format.bytes_per_pixel() as usize);
        for texel in bytes.chunks(src_bpp) {
            let rgba = decode_unorm_texel(src.format(), texel).ok_or_else(|| {
                Error::BackendError(format!("format {:?} unsupported in converting blit", src.format()))
            })?;
            encode_unorm_texel(dst_format, rgba, &mut converted).ok_or_else(|| {
                Error::BackendError(format!("format {:?} unsupported in converting blit", dst_format))
            })?;
        }
        dst.write_region(
            dst_mip,
            dst_slice,
            Rect::new(dst_origin.0, dst_origin.1, size.0, size.1),
            &converted,
        )
    }

    fn encode_wait_for_event(&mut self, value: u64) {
        self.command_buffer.encode_wait_for_event(&self.sync_event, value);
    }

    fn encode_signal_event(&mut self, value: u64) {
        self.command_buffer.encode_signal_event(&self.sync_event, value);
    }

    fn present_drawable(&mut self) -> Result<()> {
        let surface = self.surface.lock().unwrap();
        let surface = surface
            .as_ref()
            .ok_or_else(|| Error::InvalidResource("no presentation surface attached".to_string()))?;
        let drawable = surface
            .next_drawable()
            .ok_or_else(|| Error::BackendError("swapchain returned no drawable".to_string()))?;
        self.command_buffer.present_drawable(&drawable);
        Ok(())
    }

    fn commit(self: Box<Self>, completion: Option<Box<dyn FnOnce() + Send>>) -> Result<()> {
        if let Some(completion) = completion {
            let completion = Mutex::new(Some(completion));
            let block = ConcreteBlock::new(move |_: &metal::CommandBufferRef| {
                if let Some(completion) = completion.lock().unwrap().take() {
                    completion();
                }
            })
            .copy();
            self.command_buffer.add_completed_handler(&block);
        }
        self.command_buffer.commit();
        Ok(())
    }
}

// ===== RENDER ENCODER =====

/// Render pass recording; confined to the thread that opened it
pub struct MetalRenderEncoder {
    encoder: metal::RenderCommandEncoder,
    device: metal::Device,
    samplers: SharedSamplers,
}

impl MetalRenderEncoder {
    fn buffer<'a>(buffer: &'a Arc<dyn RawBuffer>) -> Option<&'a MetalBuffer> {
        buffer.as_any().downcast_ref::<MetalBuffer>()
    }

    fn sampler_for(&self, state: SamplerState) -> metal::SamplerState {
        let mut samplers = self.samplers.lock().unwrap();
        samplers
            .entry(state)
            .or_insert_with(|| crate::metal_sampler::sampler_state_to_metal(&self.device, state))
            .clone()
    }
}

impl RawRenderEncoder for MetalRenderEncoder {
    fn set_render_pipeline(&mut self, pipeline: &Arc<dyn RawRenderPipeline>) {
        if let Some(pipeline) = pipeline.as_any().downcast_ref::<MetalRenderPipeline>() {
            self.encoder.set_render_pipeline_state(&pipeline.pipeline);
        }
    }

    fn set_depth_stencil_state(&mut self, state: &Arc<dyn RawDepthStencilState>) {
        if let Some(state) = state.as_any().downcast_ref::<MetalDepthStencilState>() {
            self.encoder.set_depth_stencil_state(&state.state);
        }
    }

    fn set_stencil_reference(&mut self, value: u32) {
        self.encoder.set_stencil_reference_value(value);
    }

    fn set_viewport(&mut self, rect: Rect, depth_range: (f32, f32)) {
        self.encoder.set_viewport(MTLViewport {
            originX: rect.x as f64,
            originY: rect.y as f64,
            width: rect.width as f64,
            height: rect.height as f64,
            znear: depth_range.0 as f64,
            zfar: depth_range.1 as f64,
        });
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.encoder.set_scissor_rect(MTLScissorRect {
            x: rect.x.max(0) as u64,
            y: rect.y.max(0) as u64,
            width: rect.width.max(0) as u64,
            height: rect.height.max(0) as u64,
        });
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.encoder.set_cull_mode(match mode {
            CullMode::None => metal::MTLCullMode::None,
            CullMode::Front => metal::MTLCullMode::Front,
            CullMode::Back => metal::MTLCullMode::Back,
        });
    }

    fn set_front_facing(&mut self, winding: FrontFace) {
        self.encoder.set_front_facing_winding(match winding {
            FrontFace::Clockwise => metal::MTLWinding::Clockwise,
            FrontFace::CounterClockwise => metal::MTLWinding::CounterClockwise,
        });
    }

    fn set_depth_bias(&mut self, bias: f32, slope_scale: f32, clamp: f32) {
        self.encoder.set_depth_bias(bias, slope_scale, clamp);
    }

    fn set_vertex_buffer(&mut self, buffer: &Arc<dyn RawBuffer>, offset: u64, index: u32) {
        if let Some(buffer) = Self::buffer(buffer) {
            self.encoder.set_vertex_buffer(index as u64, Some(buffer.raw()), offset);
        }
    }

    fn set_fragment_buffer(&mut self, buffer: &Arc<dyn RawBuffer>, offset: u64, index: u32) {
        if let Some(buffer) = Self::buffer(buffer) {
            self.encoder.set_fragment_buffer(index as u64, Some(buffer.raw()), offset);
        }
    }

    fn set_vertex_bytes(&mut self, data: &[u8], index: u32) {
        self.encoder.set_vertex_bytes(
            index as u64,
            data.len() as u64,
            data.as_ptr() as *const std::ffi::c_void,
        );
    }

    fn set_fragment_bytes(&mut self, data: &[u8], index: u32) {
        self.encoder.set_fragment_bytes(
            index as u64,
            data.len() as u64,
            data.as_ptr() as *const std::ffi::c_void,
        );
    }

    fn set_vertex_texture(&mut self, texture: &Arc<dyn RawTexture>, slot: u32) {
        if let Some(texture) = texture.as_any().downcast_ref::<MetalTexture>() {
            self.encoder.set_vertex_texture(slot as u64, Some(texture.raw()));
        }
    }

    fn set_fragment_texture(&mut self, texture: &Arc<dyn RawTexture>, slot: u32) {
        if let Some(texture) = texture.as_any().downcast_ref::<MetalTexture>() {
            self.encoder.set_fragment_texture(slot as u64, Some(texture.raw()));
        }
    }

    fn set_vertex_sampler(&mut self, sampler: SamplerState, slot: u32) {
        let sampler = self.sampler_for(sampler);
        self.encoder.set_vertex_sampler_state(slot as u64, Some(&sampler));
    }

    fn set_fragment_sampler(&mut self, sampler: SamplerState, slot: u32) {
        let sampler = self.sampler_for(sampler);
        self.encoder.set_fragment_sampler_state(slot as u64, Some(&sampler));
    }

    fn set_fragment_sampler_arguments(&mut self, args: &Arc<dyn RawSamplerArguments>, index: u32) {
        if let Some(args) = args.as_any().downcast_ref::<MetalSamplerArguments>() {
            self.encoder.set_fragment_buffer(index as u64, Some(&args.buffer), 0);
        }
    }

    fn draw_primitives(&mut self, primitive: Primitive, vertex_first: u32, vertex_count: u32) {
        self.encoder.draw_primitives(
            primitive_to_metal(primitive),
            vertex_first as u64,
            vertex_count as u64,
        );
    }

    fn end(&mut self) {
        self.encoder.end_encoding();
    }
}

// ===== CONVERSIONS =====

fn primitive_to_metal(primitive: Primitive) -> metal::MTLPrimitiveType {
    use metal::MTLPrimitiveType;
    match primitive {
        Primitive::Points => MTLPrimitiveType::Point,
        Primitive::Lines => MTLPrimitiveType::Line,
        Primitive::LineStrip => MTLPrimitiveType::LineStrip,
        Primitive::Triangles => MTLPrimitiveType::Triangle,
        Primitive::TriangleStrip => MTLPrimitiveType::TriangleStrip,
    }
}

/// Minimal CPU-side texel decode for the converting blit path
fn decode_unorm_texel(format: kraken_gpu::texture::PixelFormat, bytes: &[u8]) -> Option<[f32; 4]> {
    use kraken_gpu::texture::PixelFormat;
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
        PixelFormat::R32_FLOAT => {
            Some([f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0.0, 0.0, 1.0])
        }
        PixelFormat::RGBA32_FLOAT => {
            let component = |i: usize| {
                f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
            };
            Some([component(0), component(1), component(2), component(3)])
        }
        _ => None,
    }
}

fn encode_unorm_texel(
    format: kraken_gpu::texture::PixelFormat,
    rgba: [f32; 4],
    out: &mut Vec<u8>,
) -> Option<()> {
    use kraken_gpu::texture::PixelFormat;
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        PixelFormat::R8_UNORM => out.push(to_u8(rgba[0])),
        PixelFormat::RG8_UNORM => out.extend_from_slice(&[to_u8(rgba[0]), to_u8(rgba[1])]),
        PixelFormat::RGBA8_UNORM | PixelFormat::RGBA8_SRGB => {
            out.extend_from_slice(&[to_u8(rgba[0]), to_u8(rgba[1]), to_u8(rgba[2]), to_u8(rgba[3])])
        }
        PixelFormat::BGRA8_UNORM | PixelFormat::BGRA8_SRGB => {
            out.extend_from_slice(&[to_u8(rgba[2]), to_u8(rgba[1]), to_u8(rgba[0]), to_u8(rgba[3])])
        }
        PixelFormat::R32_FLOAT => out.extend_from_slice(&rgba[0].to_le_bytes()),
        PixelFormat::RGBA32_FLOAT => {
            for component in rgba {
                out.extend_from_slice(&component.to_le_bytes());
            }
        }
        _ => return None,
    }
    Some(())
}
