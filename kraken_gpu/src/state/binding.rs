//! Binding resolution
//!
//! Pure decision functions for per-draw resource binding: given what the
//! shader expects and what the application bound, decide whether the real
//! resource is usable or a dummy must be substituted. Keeping the decision
//! separate from the encoder-binding code makes the fallback rules unit
//! testable without a device, and keeps the policy in one place: a draw is
//! never failed for a binding problem, it is patched and logged.

use crate::texture::TextureKind;

/// Outcome of resolving a uniform-buffer binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformResolution {
    /// The bound buffer is usable as-is
    Bound,
    /// Nothing bound at the expected slot; bind the dummy buffer
    DummyMissing,
    /// A buffer is bound but smaller than the shader will read; bind the
    /// dummy buffer to avoid out-of-bounds reads
    DummyTooSmall {
        bound_size: u64,
    },
}

impl UniformResolution {
    /// Whether the dummy buffer must be substituted
    pub fn needs_dummy(&self) -> bool {
        !matches!(self, UniformResolution::Bound)
    }
}

/// Decide how to satisfy a uniform-buffer slot the shader expects.
///
/// `expected_size` is the shader-reflected minimum byte size; `bound_size`
/// is the size of the application-bound buffer, if any.
pub fn resolve_uniform_binding(expected_size: u32, bound_size: Option<u64>) -> UniformResolution {
    match bound_size {
        None => UniformResolution::DummyMissing,
        Some(size) if size < expected_size as u64 => UniformResolution::DummyTooSmall { bound_size: size },
        Some(_) => UniformResolution::Bound,
    }
}

/// Outcome of resolving a texture binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureResolution {
    /// The bound texture matches the expected dimensionality
    Bound,
    /// Nothing bound at the expected slot; bind a dummy of the expected kind
    DummyMissing,
    /// A texture is bound but with the wrong dimensionality; bind a dummy of
    /// the expected kind instead of risking an invalid encoder binding
    DummyWrongKind {
        bound_kind: TextureKind,
    },
}

impl TextureResolution {
    /// Whether a dummy texture must be substituted
    pub fn needs_dummy(&self) -> bool {
        !matches!(self, TextureResolution::Bound)
    }
}

/// Decide how to satisfy a texture slot the shader expects.
pub fn resolve_texture_binding(expected: TextureKind, bound: Option<TextureKind>) -> TextureResolution {
    match bound {
        None => TextureResolution::DummyMissing,
        Some(kind) if kind != expected => TextureResolution::DummyWrongKind { bound_kind: kind },
        Some(_) => TextureResolution::Bound,
    }
}

#[cfg(test)]
#[path = "binding_tests.rs"]
mod tests;
