//! Texture wrapper and texture pool
//!
//! Framebuffer attachments do not own their textures; they borrow handles
//! from a `TexturePool` owned by the render context. The pool keeps the raw
//! device texture alive, and stale handles surface as recoverable
//! validation errors at bake time instead of dangling pointers.

use std::sync::Arc;

use bitflags::bitflags;
use slotmap::{new_key_type, SlotMap};

use crate::device::{RawDevice, RawTexture, Rect, TextureDesc};
use crate::error::Result;
use crate::texture::{PixelFormat, TextureKind};

new_key_type! {
    /// Handle to a texture owned by a [`TexturePool`]
    pub struct TextureHandle;
}

bitflags! {
    /// Sampler configuration flags
    ///
    /// The flag set fully determines a sampler object, so it doubles as the
    /// per-slot component of the sampler-argument-buffer cache key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SamplerState: u32 {
        /// Linear min/mag filtering (nearest otherwise)
        const FILTER_LINEAR = 1 << 0;
        /// Linear mip filtering (not mipmapped otherwise)
        const MIPMAP        = 1 << 1;
        /// Repeat addressing on S
        const REPEAT_S      = 1 << 2;
        /// Repeat addressing on T
        const REPEAT_T      = 1 << 3;
        /// Repeat addressing on R
        const REPEAT_R      = 1 << 4;
        /// Clamp to transparent border instead of edge
        const CLAMP_BORDER  = 1 << 5;
        /// Depth comparison sampler (less-equal)
        const COMPARE       = 1 << 6;
        /// Anisotropic filtering (only meaningful with MIPMAP)
        const ANISOTROPIC   = 1 << 7;
    }
}

impl SamplerState {
    /// Default sampler used for dummy textures and unbound slots
    pub const DEFAULT: Self = Self::FILTER_LINEAR
        .union(Self::REPEAT_S)
        .union(Self::REPEAT_T);
}

impl Default for SamplerState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A texture owned by the pool: the raw device resource plus the default
/// sampler configuration associated with it
pub struct Texture {
    name: String,
    raw: Arc<dyn RawTexture>,
    sampler: SamplerState,
}

impl Texture {
    /// Texture name (debug label)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying device texture
    pub fn raw(&self) -> &Arc<dyn RawTexture> {
        &self.raw
    }

    pub fn kind(&self) -> TextureKind {
        self.raw.kind()
    }

    pub fn format(&self) -> PixelFormat {
        self.raw.format()
    }

    pub fn width(&self) -> u32 {
        self.raw.width()
    }

    pub fn height(&self) -> u32 {
        self.raw.height()
    }

    /// Depth for 3D textures, array layer count for array kinds
    pub fn depth_or_layers(&self) -> u32 {
        self.raw.depth_or_layers()
    }

    pub fn mip_count(&self) -> u32 {
        self.raw.mip_count()
    }

    /// Width of the given mip level (minimum 1)
    pub fn mip_width(&self, mip: u32) -> u32 {
        (self.width() >> mip).max(1)
    }

    /// Height of the given mip level (minimum 1)
    pub fn mip_height(&self, mip: u32) -> u32 {
        (self.height() >> mip).max(1)
    }

    /// Default sampler configuration for this texture
    pub fn sampler(&self) -> SamplerState {
        self.sampler
    }

    /// Replace the default sampler configuration
    pub fn set_sampler(&mut self, sampler: SamplerState) {
        self.sampler = sampler;
    }

    /// Read raw texel bytes from a region of one mip/slice
    pub fn read_region(&self, mip: u32, slice: u32, area: Rect) -> Result<Vec<u8>> {
        self.raw.read_region(mip, slice, area)
    }

    /// Write raw texel bytes to a region of one mip/slice
    pub fn write_region(&self, mip: u32, slice: u32, area: Rect, data: &[u8]) -> Result<()> {
        self.raw.write_region(mip, slice, area, data)
    }
}

/// Pool of textures addressed by stable handles
#[derive(Default)]
pub struct TexturePool {
    textures: SlotMap<TextureHandle, Texture>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a texture on the device and register it in the pool
    pub fn create(&mut self, device: &dyn RawDevice, desc: &TextureDesc) -> Result<TextureHandle> {
        let raw = device.create_texture(desc)?;
        Ok(self.textures.insert(Texture {
            name: desc.label.clone(),
            raw,
            sampler: SamplerState::DEFAULT,
        }))
    }

    /// Register an externally created raw texture (e.g. a swapchain
    /// backbuffer handed over by the windowing layer)
    pub fn register(&mut self, name: &str, raw: Arc<dyn RawTexture>) -> TextureHandle {
        self.textures.insert(Texture {
            name: name.to_string(),
            raw,
            sampler: SamplerState::DEFAULT,
        })
    }

    /// Remove a texture. Framebuffers still holding the handle will fail
    /// render-pass validation at next bake.
    pub fn destroy(&mut self, handle: TextureHandle) -> bool {
        self.textures.remove(handle).is_some()
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    pub fn get_mut(&mut self, handle: TextureHandle) -> Option<&mut Texture> {
        self.textures.get_mut(handle)
    }

    pub fn contains(&self, handle: TextureHandle) -> bool {
        self.textures.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
#[path = "texture_tests.rs"]
mod tests;
