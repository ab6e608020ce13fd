//! Shader reflection interface
//!
//! Produced by the external shader-translation collaborator alongside the
//! MSL source. The render context consumes these tables when resolving
//! uniform-buffer and texture bindings, and the PSO bake step consumes the
//! attribute table when filling unbound attributes with the null buffer.

use bitflags::bitflags;

use crate::pipeline::VertexFormat;
use crate::texture::TextureKind;

bitflags! {
    /// Shader stages a binding is active in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageMask: u8 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

/// One field of the push-constant block, addressed by byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantField {
    pub name: String,
    /// Byte offset within the push-constant block
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

/// One uniform-buffer-object binding expected by the shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockBinding {
    pub name: String,
    /// Logical UBO slot the application binds against
    pub slot: u32,
    /// Minimum buffer size the shader will read; smaller bound buffers are
    /// replaced by the dummy buffer to avoid out-of-bounds reads
    pub expected_size: u32,
    pub stages: StageMask,
}

/// One texture binding expected by the shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub name: String,
    /// Texture slot the application binds against
    pub slot: u32,
    /// Expected dimensionality; mismatched bound textures are replaced by a
    /// dummy of this kind
    pub kind: TextureKind,
    pub stages: StageMask,
}

/// One vertex attribute declared by the shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeBinding {
    pub name: String,
    /// Attribute location in the vertex descriptor
    pub location: u32,
    /// Format the shader reads
    pub format: VertexFormat,
}

/// Full reflection data for one shader
#[derive(Debug, Clone, Default)]
pub struct ShaderInterface {
    /// Total push-constant block size in bytes (0 = no push constants)
    pub push_constant_size: u32,
    pub push_constant_fields: Vec<PushConstantField>,
    pub uniform_blocks: Vec<UniformBlockBinding>,
    pub textures: Vec<TextureBinding>,
    pub attributes: Vec<AttributeBinding>,
}

impl ShaderInterface {
    /// Interface with no bindings at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Highest attribute location declared plus one (0 when none)
    pub fn attribute_slot_count(&self) -> u32 {
        self.attributes
            .iter()
            .map(|a| a.location + 1)
            .max()
            .unwrap_or(0)
    }

    /// Look up a push-constant field by name
    pub fn push_constant_field(&self, name: &str) -> Option<&PushConstantField> {
        self.push_constant_fields.iter().find(|f| f.name == name)
    }

    /// Look up a uniform block by logical slot
    pub fn uniform_block_at(&self, slot: u32) -> Option<&UniformBlockBinding> {
        self.uniform_blocks.iter().find(|u| u.slot == slot)
    }

    /// Look up a texture binding by slot
    pub fn texture_at(&self, slot: u32) -> Option<&TextureBinding> {
        self.textures.iter().find(|t| t.slot == slot)
    }
}

#[cfg(test)]
#[path = "interface_tests.rs"]
mod tests;
