//! Framebuffer: render target set with cached render-pass descriptors
//!
//! A framebuffer owns its attachment table and bakes backend render-pass
//! descriptors in three cached configurations:
//!
//! - CLEAR  -- a clear is pending and the pass should perform it
//! - LOAD   -- force-load every attachment (re-binds and pass breaks)
//! - CUSTOM -- explicit per-attachment load/store for bandwidth control
//!
//! Regeneration is tracked per configuration: structural attachment changes
//! (`dirty`) invalidate all three, load/store/clear metadata changes
//! (`loadstore_dirty`) only invalidate CLEAR and CUSTOM, since the LOAD
//! configuration always loads and cannot observe that metadata.

use std::sync::Arc;

use bitflags::bitflags;
use glam::Vec4;

use crate::device::{RawTexture, Rect, MAX_COLOR_ATTACHMENTS, MAX_MIP_COUNT};
use crate::error::{Error, Result};
use crate::framebuffer::{Attachment, ClearValue, LoadAction, StoreAction};
use crate::texture::{PixelFormat, TextureHandle, TextureKind, TexturePool};
use crate::{gpu_error, gpu_warn};

const SRC: &str = "kraken::gpu::FrameBuffer";

bitflags! {
    /// Attachment planes addressed by clear/read/blit operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameBufferPlanes: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// The three cached render-pass descriptor configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPassConfig {
    Clear = 0,
    Load = 1,
    Custom = 2,
}

const CONFIG_COUNT: usize = 3;

/// One resolved attachment inside a baked render-pass descriptor
#[derive(Clone)]
pub struct RenderPassAttachmentDesc {
    /// Raw texture resolved from the pool at bake time
    pub texture: Arc<dyn RawTexture>,
    /// When set, the backend binds a reinterpreted texture view with this
    /// format (sRGB attachment rendered with sRGB disabled)
    pub view_format: Option<PixelFormat>,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_value: ClearValue,
    pub mip: u32,
    pub slice: u32,
    pub depth_plane: u32,
}

/// Baked, backend-consumable render pass description
#[derive(Clone, Default)]
pub struct RenderPassDescriptor {
    pub color: [Option<RenderPassAttachmentDesc>; MAX_COLOR_ATTACHMENTS],
    pub depth: Option<RenderPassAttachmentDesc>,
    pub stencil: Option<RenderPassAttachmentDesc>,
    /// Non-zero when rendering to all layers of array targets
    pub render_target_array_length: u32,
}

/// Render target set with dirty-tracked descriptor caching
pub struct FrameBuffer {
    name: String,

    color_attachments: [Attachment; MAX_COLOR_ATTACHMENTS],
    depth_attachment: Attachment,
    stencil_attachment: Attachment,
    color_attachment_count: u32,
    use_multilayered_rendering: bool,

    width: u32,
    height: u32,
    viewport: Rect,
    scissor: Rect,
    scissor_enabled: bool,

    /// Attachment structure changed; all descriptor variants stale
    dirty: bool,
    /// Only load/store/clear metadata changed; CLEAR/CUSTOM variants stale
    loadstore_dirty: bool,
    /// A clear was requested and has not been consumed by a pass yet
    has_pending_clear: bool,

    descriptors: [Option<RenderPassDescriptor>; CONFIG_COUNT],
    descriptor_dirty: [bool; CONFIG_COUNT],

    /// Whether the primary attachment format is sRGB
    srgb: bool,
    /// Whether sRGB conversion is enabled for the current bind
    srgb_enabled: bool,
}

impl FrameBuffer {
    /// Create an empty framebuffer
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            color_attachments: [Attachment::unused_color(); MAX_COLOR_ATTACHMENTS],
            depth_attachment: Attachment::unused_depth(),
            stencil_attachment: Attachment::unused_stencil(),
            color_attachment_count: 0,
            use_multilayered_rendering: false,
            width: 0,
            height: 0,
            viewport: Rect::zero(),
            scissor: Rect::zero(),
            scissor_enabled: false,
            dirty: true,
            loadstore_dirty: true,
            has_pending_clear: false,
            descriptors: [None, None, None],
            descriptor_dirty: [true; CONFIG_COUNT],
            srgb: false,
            srgb_enabled: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ===== STATE FLAGS =====

    /// Flag the attachment structure as changed
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.loadstore_dirty = true;
    }

    /// Flag only load/store/clear metadata as changed
    pub fn mark_loadstore_dirty(&mut self) {
        self.loadstore_dirty = true;
    }

    /// Mark that a pending clear exists
    pub fn mark_do_clear(&mut self) {
        self.has_pending_clear = true;
    }

    /// Mark that the pending clear has been consumed by a pass
    pub fn mark_cleared(&mut self) {
        self.has_pending_clear = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.loadstore_dirty
    }

    pub fn has_pending_clear(&self) -> bool {
        self.has_pending_clear
    }

    pub fn is_srgb(&self) -> bool {
        self.srgb
    }

    pub fn srgb_enabled(&self) -> bool {
        self.srgb_enabled
    }

    /// Set by the context when binding with/without sRGB conversion
    pub fn set_srgb_enabled(&mut self, enabled: bool) {
        if self.srgb_enabled != enabled {
            self.srgb_enabled = enabled;
            // The bound texture view changes, so every variant is stale.
            self.mark_dirty();
        }
    }

    // ===== SIZE / VIEWPORT =====

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn viewport_reset(&mut self) {
        self.viewport = Rect::new(0, 0, self.width as i32, self.height as i32);
    }

    pub fn scissor(&self) -> Rect {
        self.scissor
    }

    pub fn set_scissor(&mut self, scissor: Rect) {
        self.scissor = scissor;
        self.scissor_enabled = true;
    }

    pub fn scissor_enabled(&self) -> bool {
        self.scissor_enabled
    }

    pub fn scissor_reset(&mut self) {
        self.scissor = Rect::new(0, 0, self.width as i32, self.height as i32);
        self.scissor_enabled = false;
    }

    fn size_set(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// If no attachments remain, reset size, viewport and scissor
    fn ensure_render_target_size(&mut self) {
        if self.color_attachment_count == 0
            && !self.depth_attachment.used
            && !self.stencil_attachment.used
        {
            self.size_set(0, 0);
            self.viewport_reset();
            self.scissor_reset();
        }
    }

    // ===== ATTACHMENT MANAGEMENT =====

    /// Resolve slice/depth-plane/array-length from the texture kind and the
    /// requested layer. `layer == -1` binds all layers for multilayered
    /// rendering on kinds that support it.
    fn resolve_layer_binding(
        &mut self,
        attachment: &mut Attachment,
        kind: TextureKind,
        depth_or_layers: u32,
        layer: i32,
    ) -> Result<()> {
        attachment.slice = 0;
        attachment.depth_plane = 0;
        attachment.render_target_array_length = 0;

        match kind {
            TextureKind::D1 | TextureKind::D2 | TextureKind::Buffer => {
                if layer > 0 {
                    gpu_warn!(SRC, "Layer {} requested on non-layered texture, using 0", layer);
                }
            }
            TextureKind::D1Array | TextureKind::D2Array | TextureKind::CubeArray => {
                if layer == -1 {
                    attachment.render_target_array_length = depth_or_layers;
                    self.use_multilayered_rendering = true;
                } else if layer >= 0 && (layer as u32) < depth_or_layers {
                    attachment.slice = layer as u32;
                } else {
                    gpu_error!(SRC, "Layer {} out of range (layer count {})", layer, depth_or_layers);
                    return Err(Error::InvalidResource(format!(
                        "attachment layer {} out of range",
                        layer
                    )));
                }
            }
            TextureKind::Cube => {
                if layer == -1 {
                    attachment.render_target_array_length = 6;
                    self.use_multilayered_rendering = true;
                } else if (0..6).contains(&layer) {
                    attachment.slice = layer as u32;
                } else {
                    gpu_error!(SRC, "Cube face {} out of range", layer);
                    return Err(Error::InvalidResource(format!("cube face {} out of range", layer)));
                }
            }
            TextureKind::D3 => {
                if layer == -1 {
                    attachment.render_target_array_length = depth_or_layers;
                    self.use_multilayered_rendering = true;
                } else if layer >= 0 && (layer as u32) < depth_or_layers {
                    attachment.depth_plane = layer as u32;
                } else {
                    gpu_error!(SRC, "Depth plane {} out of range (depth {})", layer, depth_or_layers);
                    return Err(Error::InvalidResource(format!(
                        "depth plane {} out of range",
                        layer
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check the attachment against the established framebuffer size, or
    /// establish it from the first attachment.
    fn update_size_for_attachment(&mut self, mip_width: u32, mip_height: u32) -> Result<()> {
        if self.width == 0 && self.height == 0 {
            self.size_set(mip_width, mip_height);
            self.viewport_reset();
            self.scissor_reset();
            Ok(())
        } else if self.width == mip_width && self.height == mip_height {
            Ok(())
        } else {
            gpu_error!(
                SRC,
                "Attachment size {}x{} does not match framebuffer '{}' size {}x{}",
                mip_width,
                mip_height,
                self.name,
                self.width,
                self.height
            );
            Err(Error::Validation(format!(
                "attachment size {}x{} does not match framebuffer size {}x{}",
                mip_width, mip_height, self.width, self.height
            )))
        }
    }

    fn clamp_mip(mip: i32) -> u32 {
        if mip < 0 || mip >= MAX_MIP_COUNT as i32 {
            gpu_warn!(SRC, "Attachment specified with invalid mip level {}", mip);
            0
        } else {
            mip as u32
        }
    }

    /// Attach a color texture at `slot`
    ///
    /// `layer == -1` binds all layers/faces for multilayered rendering.
    /// On the first attachment, establishes framebuffer dimensions;
    /// subsequent attachments must match (after mip scaling).
    pub fn add_color_attachment(
        &mut self,
        pool: &TexturePool,
        texture: TextureHandle,
        slot: u32,
        mip: i32,
        layer: i32,
    ) -> Result<()> {
        if slot as usize >= MAX_COLOR_ATTACHMENTS {
            gpu_error!(SRC, "Color attachment slot {} exceeds limit {}", slot, MAX_COLOR_ATTACHMENTS);
            return Err(Error::InvalidResource(format!("color slot {} out of range", slot)));
        }
        let tex = match pool.get(texture) {
            Some(t) => t,
            None => {
                gpu_error!(SRC, "Null or stale texture passed to add_color_attachment");
                return Err(Error::InvalidResource("null texture attachment".to_string()));
            }
        };
        let mip = Self::clamp_mip(mip);
        let (kind, layers) = (tex.kind(), tex.depth_or_layers());
        let (mip_w, mip_h) = (tex.mip_width(mip), tex.mip_height(mip));
        let format = tex.format();

        let mut attachment = self.color_attachments[slot as usize];
        let was_used = attachment.used;
        attachment.used = true;
        attachment.texture = texture;
        attachment.mip = mip;
        attachment.load_action = LoadAction::Load;
        attachment.store_action = StoreAction::Store;
        attachment.clear_value = ClearValue::Color(Vec4::ZERO);
        self.resolve_layer_binding(&mut attachment, kind, layers, layer)?;
        self.update_size_for_attachment(mip_w, mip_h)?;

        self.color_attachments[slot as usize] = attachment;
        if !was_used {
            self.color_attachment_count += 1;
        }
        if slot == 0 {
            self.srgb = format.is_srgb();
        }
        self.mark_dirty();
        Ok(())
    }

    /// Attach a depth texture
    pub fn add_depth_attachment(
        &mut self,
        pool: &TexturePool,
        texture: TextureHandle,
        mip: i32,
        layer: i32,
    ) -> Result<()> {
        let tex = match pool.get(texture) {
            Some(t) => t,
            None => {
                gpu_error!(SRC, "Null or stale texture passed to add_depth_attachment");
                return Err(Error::InvalidResource("null texture attachment".to_string()));
            }
        };
        let mip = Self::clamp_mip(mip);
        let (kind, layers) = (tex.kind(), tex.depth_or_layers());
        let (mip_w, mip_h) = (tex.mip_width(mip), tex.mip_height(mip));

        let mut attachment = self.depth_attachment;
        attachment.used = true;
        attachment.texture = texture;
        attachment.mip = mip;
        attachment.load_action = LoadAction::Load;
        attachment.store_action = StoreAction::Store;
        attachment.clear_value = ClearValue::Depth(1.0);
        self.resolve_layer_binding(&mut attachment, kind, layers, layer)?;
        self.update_size_for_attachment(mip_w, mip_h)?;

        self.depth_attachment = attachment;
        self.mark_dirty();
        Ok(())
    }

    /// Attach a stencil texture (may be the same physical texture as the
    /// depth attachment for combined formats)
    pub fn add_stencil_attachment(
        &mut self,
        pool: &TexturePool,
        texture: TextureHandle,
        mip: i32,
        layer: i32,
    ) -> Result<()> {
        let tex = match pool.get(texture) {
            Some(t) => t,
            None => {
                gpu_error!(SRC, "Null or stale texture passed to add_stencil_attachment");
                return Err(Error::InvalidResource("null texture attachment".to_string()));
            }
        };
        let mip = Self::clamp_mip(mip);
        let (kind, layers) = (tex.kind(), tex.depth_or_layers());
        let (mip_w, mip_h) = (tex.mip_width(mip), tex.mip_height(mip));

        let mut attachment = self.stencil_attachment;
        attachment.used = true;
        attachment.texture = texture;
        attachment.mip = mip;
        attachment.load_action = LoadAction::Load;
        attachment.store_action = StoreAction::Store;
        attachment.clear_value = ClearValue::Stencil(0);
        self.resolve_layer_binding(&mut attachment, kind, layers, layer)?;
        self.update_size_for_attachment(mip_w, mip_h)?;

        self.stencil_attachment = attachment;
        self.mark_dirty();
        Ok(())
    }

    /// Remove the color attachment at `slot`. Returns whether a used
    /// attachment was removed.
    pub fn remove_color_attachment(&mut self, slot: u32) -> bool {
        if slot as usize >= MAX_COLOR_ATTACHMENTS {
            return false;
        }
        if self.color_attachments[slot as usize].used {
            self.color_attachments[slot as usize].used = false;
            self.color_attachment_count -= 1;
            if slot == 0 {
                self.srgb = false;
            }
            self.ensure_render_target_size();
            self.mark_dirty();
            true
        } else {
            false
        }
    }

    pub fn remove_depth_attachment(&mut self) -> bool {
        let was_used = self.depth_attachment.used;
        self.depth_attachment.used = false;
        self.ensure_render_target_size();
        self.mark_dirty();
        was_used
    }

    pub fn remove_stencil_attachment(&mut self) -> bool {
        let was_used = self.stencil_attachment.used;
        self.stencil_attachment.used = false;
        self.ensure_render_target_size();
        self.mark_dirty();
        was_used
    }

    pub fn remove_all_attachments(&mut self) {
        for slot in 0..MAX_COLOR_ATTACHMENTS as u32 {
            self.remove_color_attachment(slot);
        }
        self.remove_depth_attachment();
        self.remove_stencil_attachment();
        self.color_attachment_count = 0;
        self.use_multilayered_rendering = false;
        self.ensure_render_target_size();
        self.mark_dirty();
    }

    // ===== ATTACHMENT QUERIES =====

    pub fn has_attachment_at_slot(&self, slot: u32) -> bool {
        (slot as usize) < MAX_COLOR_ATTACHMENTS && self.color_attachments[slot as usize].used
    }

    pub fn has_depth_attachment(&self) -> bool {
        self.depth_attachment.used
    }

    pub fn has_stencil_attachment(&self) -> bool {
        self.stencil_attachment.used
    }

    pub fn color_attachment(&self, slot: u32) -> Attachment {
        self.color_attachments[slot as usize]
    }

    pub fn depth_attachment(&self) -> Attachment {
        self.depth_attachment
    }

    pub fn stencil_attachment(&self) -> Attachment {
        self.stencil_attachment
    }

    pub fn attachment_count(&self) -> u32 {
        self.color_attachment_count
            + u32::from(self.depth_attachment.used)
            + u32::from(self.stencil_attachment.used)
    }

    pub fn uses_multilayered_rendering(&self) -> bool {
        self.use_multilayered_rendering
    }

    // ===== CLEAR / LOAD-STORE METADATA =====

    /// Set the clear color for a color attachment; flags a pending clear
    pub fn set_color_attachment_clear_color(&mut self, slot: u32, color: Vec4) -> bool {
        if !self.has_attachment_at_slot(slot) {
            return false;
        }
        let attachment = &mut self.color_attachments[slot as usize];
        attachment.clear_value = ClearValue::Color(color);
        attachment.load_action = LoadAction::Clear;
        self.mark_loadstore_dirty();
        self.mark_do_clear();
        true
    }

    pub fn set_depth_attachment_clear_value(&mut self, depth: f32) -> bool {
        if !self.depth_attachment.used {
            return false;
        }
        self.depth_attachment.clear_value = ClearValue::Depth(depth);
        self.depth_attachment.load_action = LoadAction::Clear;
        self.mark_loadstore_dirty();
        self.mark_do_clear();
        true
    }

    pub fn set_stencil_attachment_clear_value(&mut self, stencil: u32) -> bool {
        if !self.stencil_attachment.used {
            return false;
        }
        self.stencil_attachment.clear_value = ClearValue::Stencil(stencil);
        self.stencil_attachment.load_action = LoadAction::Clear;
        self.mark_loadstore_dirty();
        self.mark_do_clear();
        true
    }

    pub fn set_color_loadstore_op(&mut self, slot: u32, load: LoadAction, store: StoreAction) -> bool {
        if !self.has_attachment_at_slot(slot) {
            return false;
        }
        let attachment = &mut self.color_attachments[slot as usize];
        attachment.load_action = load;
        attachment.store_action = store;
        self.mark_loadstore_dirty();
        true
    }

    pub fn set_depth_loadstore_op(&mut self, load: LoadAction, store: StoreAction) -> bool {
        if !self.depth_attachment.used {
            return false;
        }
        self.depth_attachment.load_action = load;
        self.depth_attachment.store_action = store;
        self.mark_loadstore_dirty();
        true
    }

    pub fn set_stencil_loadstore_op(&mut self, load: LoadAction, store: StoreAction) -> bool {
        if !self.stencil_attachment.used {
            return false;
        }
        self.stencil_attachment.load_action = load;
        self.stencil_attachment.store_action = store;
        self.mark_loadstore_dirty();
        true
    }

    /// Clear the requested planes with the given values on next pass begin
    pub fn clear(&mut self, planes: FrameBufferPlanes, color: Vec4, depth: f32, stencil: u32) {
        if planes.contains(FrameBufferPlanes::COLOR) {
            for slot in 0..MAX_COLOR_ATTACHMENTS as u32 {
                self.set_color_attachment_clear_color(slot, color);
            }
        }
        if planes.contains(FrameBufferPlanes::DEPTH) {
            self.set_depth_attachment_clear_value(depth);
        }
        if planes.contains(FrameBufferPlanes::STENCIL) {
            self.set_stencil_attachment_clear_value(stencil);
        }
    }

    /// Per-slot clear colors (multi-render-target clears)
    pub fn clear_multi(&mut self, colors: &[Vec4]) {
        for (slot, color) in colors.iter().enumerate() {
            self.set_color_attachment_clear_color(slot as u32, *color);
        }
    }

    /// Remove any pending clears, restoring load semantics
    pub fn reset_clear_state(&mut self) {
        for attachment in self.color_attachments.iter_mut() {
            if attachment.load_action == LoadAction::Clear {
                attachment.load_action = LoadAction::Load;
            }
        }
        if self.depth_attachment.load_action == LoadAction::Clear {
            self.depth_attachment.load_action = LoadAction::Load;
        }
        if self.stencil_attachment.load_action == LoadAction::Clear {
            self.stencil_attachment.load_action = LoadAction::Load;
        }
        self.has_pending_clear = false;
        self.mark_loadstore_dirty();
    }

    // ===== VALIDATION / BAKING =====

    /// A framebuffer with zero attachments is invalid and must not be bound
    /// for drawing
    pub fn validate_render_pass(&self) -> bool {
        self.attachment_count() > 0
    }

    /// Select the active configuration for the next pass
    pub fn active_config(&self, load_contents: bool) -> RenderPassConfig {
        if load_contents {
            RenderPassConfig::Load
        } else if self.has_pending_clear {
            RenderPassConfig::Clear
        } else {
            RenderPassConfig::Custom
        }
    }

    /// Resolve the effective load action for an attachment under a given
    /// configuration: LOAD always loads, CUSTOM demotes Clear to Load.
    fn resolve_load_action(config: RenderPassConfig, requested: LoadAction) -> LoadAction {
        match config {
            RenderPassConfig::Load => LoadAction::Load,
            RenderPassConfig::Custom if requested == LoadAction::Clear => LoadAction::Load,
            _ => requested,
        }
    }

    fn bake_attachment(
        &self,
        pool: &TexturePool,
        attachment: &Attachment,
        config: RenderPassConfig,
        zero_clear: ClearValue,
    ) -> Result<RenderPassAttachmentDesc> {
        let texture = pool.get(attachment.texture).ok_or_else(|| {
            gpu_error!(SRC, "Attempting to bake pass with stale texture attachment");
            Error::InvalidResource("stale texture attachment".to_string())
        })?;

        let load_action = Self::resolve_load_action(config, attachment.load_action);
        let clear_value = if load_action == LoadAction::Clear {
            attachment.clear_value
        } else {
            zero_clear
        };
        let view_format = if self.srgb && !self.srgb_enabled && texture.format().is_srgb() {
            Some(texture.format().unorm_variant())
        } else {
            None
        };

        Ok(RenderPassAttachmentDesc {
            texture: Arc::clone(texture.raw()),
            view_format,
            load_action,
            store_action: attachment.store_action,
            clear_value,
            mip: attachment.mip,
            slice: attachment.slice,
            depth_plane: attachment.depth_plane,
        })
    }

    /// Validate that all multilayered attachments agree on array length and
    /// return it (0 when not multilayered)
    fn resolve_render_target_array_length(&self) -> Result<u32> {
        if !self.use_multilayered_rendering {
            return Ok(0);
        }
        let mut len = 0u32;
        let mut check = |attachment: &Attachment| -> bool {
            if !attachment.used {
                return true;
            }
            if len == 0 {
                len = attachment.render_target_array_length;
                true
            } else {
                len == attachment.render_target_array_length
            }
        };
        let mut valid = true;
        for attachment in &self.color_attachments {
            valid &= check(attachment);
        }
        valid &= check(&self.depth_attachment);
        valid &= check(&self.stencil_attachment);
        if !valid || len == 0 {
            gpu_error!(SRC, "Multilayered attachments disagree on render target array length");
            return Err(Error::Validation(
                "mismatched render target array lengths".to_string(),
            ));
        }
        Ok(len)
    }

    /// Produce the render-pass descriptor for the next pass, regenerating
    /// only the selected cached configuration when stale
    pub fn bake_render_pass_descriptor(
        &mut self,
        pool: &TexturePool,
        load_contents: bool,
    ) -> Result<RenderPassDescriptor> {
        if load_contents && self.has_pending_clear {
            // Force-load only makes sense with no clear pending.
            gpu_warn!(SRC, "Force-load requested on '{}' with a clear pending", self.name);
        }

        if self.dirty {
            self.descriptor_dirty = [true; CONFIG_COUNT];
        } else if self.loadstore_dirty {
            // The LOAD configuration always loads; only CLEAR and CUSTOM
            // observe load/store metadata.
            self.descriptor_dirty[RenderPassConfig::Clear as usize] = true;
            self.descriptor_dirty[RenderPassConfig::Custom as usize] = true;
        }

        let config = self.active_config(load_contents);
        let index = config as usize;

        if self.descriptor_dirty[index] || self.descriptors[index].is_none() {
            let mut descriptor = RenderPassDescriptor {
                render_target_array_length: self.resolve_render_target_array_length()?,
                ..Default::default()
            };

            for (slot, attachment) in self.color_attachments.iter().enumerate() {
                if attachment.used {
                    descriptor.color[slot] = Some(self.bake_attachment(
                        pool,
                        attachment,
                        config,
                        ClearValue::Color(Vec4::ZERO),
                    )?);
                }
            }
            if self.depth_attachment.used {
                descriptor.depth = Some(self.bake_attachment(
                    pool,
                    &self.depth_attachment,
                    config,
                    ClearValue::Depth(0.0),
                )?);
            }
            if self.stencil_attachment.used {
                descriptor.stencil = Some(self.bake_attachment(
                    pool,
                    &self.stencil_attachment,
                    config,
                    ClearValue::Stencil(0),
                )?);
            }

            self.descriptors[index] = Some(descriptor);
            self.descriptor_dirty[index] = false;
        }

        self.dirty = false;
        self.loadstore_dirty = false;
        Ok(self.descriptors[index].clone().expect("descriptor baked above"))
    }

    /// Whether a cached descriptor configuration needs regeneration.
    /// Exposed for descriptor-regeneration-minimality tests.
    pub fn descriptor_is_dirty(&self, config: RenderPassConfig) -> bool {
        // Pending invalidation propagates lazily at bake time; mirror it.
        if self.dirty {
            return true;
        }
        if self.loadstore_dirty && config != RenderPassConfig::Load {
            return true;
        }
        self.descriptor_dirty[config as usize] || self.descriptors[config as usize].is_none()
    }

    // ===== READBACK =====

    /// Read raw texel bytes of one plane over `area`
    ///
    /// `slot` selects the color attachment when `planes == COLOR`. Exactly
    /// one plane must be requested per call.
    pub fn read(
        &self,
        pool: &TexturePool,
        planes: FrameBufferPlanes,
        area: Rect,
        slot: u32,
    ) -> Result<Vec<u8>> {
        if planes.bits().count_ones() != 1 {
            gpu_error!(SRC, "FrameBuffer::read expects exactly one plane");
            return Err(Error::Validation("read expects exactly one plane".to_string()));
        }
        let attachment = if planes.contains(FrameBufferPlanes::COLOR) {
            if !self.has_attachment_at_slot(slot) {
                return Err(Error::InvalidResource(format!("no color attachment at slot {}", slot)));
            }
            self.color_attachments[slot as usize]
        } else if planes.contains(FrameBufferPlanes::DEPTH) {
            if !self.depth_attachment.used {
                return Err(Error::InvalidResource("no depth attachment".to_string()));
            }
            self.depth_attachment
        } else {
            if !self.stencil_attachment.used {
                return Err(Error::InvalidResource("no stencil attachment".to_string()));
            }
            self.stencil_attachment
        };

        let texture = pool.get(attachment.texture).ok_or_else(|| {
            Error::InvalidResource("stale texture attachment in read".to_string())
        })?;
        texture.read_region(attachment.mip, attachment.slice, area)
    }
}

#[cfg(test)]
#[path = "framebuffer_tests.rs"]
mod tests;
