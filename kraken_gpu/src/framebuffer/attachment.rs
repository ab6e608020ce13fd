//! Framebuffer attachment table entries
//!
//! An `Attachment` is a value type describing one bound texture slice used
//! as a render target. It borrows its texture from the context's
//! `TexturePool` and is overwritten in place whenever the owning
//! framebuffer's attachment set changes.

use glam::Vec4;

use crate::texture::TextureHandle;

/// Load action applied to a render target at pass start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    /// Preserve prior contents
    Load,
    /// Clear to the attachment's clear value
    Clear,
    /// Prior contents undefined
    DontCare,
}

/// Store action applied to a render target at pass end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    /// Keep results
    Store,
    /// Discard results (transient targets)
    DontCare,
}

/// Clear value, tagged by attachment kind so reading the wrong variant is a
/// checked error rather than a reinterpreted union
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color(Vec4),
    Depth(f32),
    Stencil(u32),
}

impl ClearValue {
    /// Color component, if this is a color clear value
    pub fn as_color(&self) -> Option<Vec4> {
        match self {
            ClearValue::Color(c) => Some(*c),
            _ => None,
        }
    }

    /// Depth component, if this is a depth clear value
    pub fn as_depth(&self) -> Option<f32> {
        match self {
            ClearValue::Depth(d) => Some(*d),
            _ => None,
        }
    }

    /// Stencil component, if this is a stencil clear value
    pub fn as_stencil(&self) -> Option<u32> {
        match self {
            ClearValue::Stencil(s) => Some(*s),
            _ => None,
        }
    }
}

/// One bound texture slice used as a render target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attachment {
    /// Whether this slot is in use
    pub used: bool,
    /// Texture borrowed from the context's pool
    pub texture: TextureHandle,
    /// Mip level bound
    pub mip: u32,
    /// Array slice bound (array and cube kinds)
    pub slice: u32,
    /// Depth plane bound (3D textures)
    pub depth_plane: u32,
    /// When non-zero, all layers are bound for multilayered rendering and
    /// this is the render-target array length
    pub render_target_array_length: u32,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_value: ClearValue,
}

impl Attachment {
    /// Unused color slot
    pub fn unused_color() -> Self {
        Self {
            used: false,
            texture: TextureHandle::default(),
            mip: 0,
            slice: 0,
            depth_plane: 0,
            render_target_array_length: 0,
            load_action: LoadAction::Load,
            store_action: StoreAction::Store,
            clear_value: ClearValue::Color(Vec4::ZERO),
        }
    }

    /// Unused depth slot
    pub fn unused_depth() -> Self {
        Self {
            clear_value: ClearValue::Depth(1.0),
            ..Self::unused_color()
        }
    }

    /// Unused stencil slot
    pub fn unused_stencil() -> Self {
        Self {
            clear_value: ClearValue::Stencil(0),
            ..Self::unused_color()
        }
    }
}

#[cfg(test)]
#[path = "attachment_tests.rs"]
mod tests;
