//! Shader object
//!
//! A shader owns its compiled function handles, the reflection interface
//! produced by the external translator, and its own PSO cache (pipelines are
//! keyed by pipeline state only because the shader identity is the cache
//! owner). Compilation failure does not tear anything down: the shader is
//! constructed invalid, the failure is logged once with the full diagnostic,
//! and draws using it are skipped while the context stays usable.

use std::sync::Arc;

use slotmap::new_key_type;

use crate::device::{RawDevice, RawShaderFunctions, ShaderSource};
use crate::error::{Error, Result};
use crate::{gpu_err, gpu_error};
use crate::pipeline::PsoCache;
use crate::shader::ShaderInterface;

const SRC: &str = "kraken::gpu::Shader";

new_key_type! {
    /// Handle to a shader owned by the render context
    pub struct ShaderHandle;
}

/// Compiled shader with reflection data and a per-shader pipeline cache
pub struct Shader {
    name: String,
    functions: Option<Arc<dyn RawShaderFunctions>>,
    interface: ShaderInterface,
    pso_cache: PsoCache,
    /// Whether the vertex stage writes a render-target array index
    /// (multilayered rendering); forces topology-class specialization
    uses_array_render_target: bool,
    /// CPU-side staging for the push-constant block, bound as inline bytes
    /// at draw time
    push_constants: Vec<u8>,
    push_constants_dirty: bool,
}

impl Shader {
    /// Compile `source` and build the shader.
    ///
    /// A failed compile returns a shader with `is_valid() == false` rather
    /// than an error: the caller keeps the handle, binds and draws are
    /// skipped, and the context carries on.
    pub fn new(
        device: &dyn RawDevice,
        source: &ShaderSource,
        interface: ShaderInterface,
        pso_cache_capacity: usize,
    ) -> Self {
        let functions = match device.compile_shader_functions(source) {
            Ok(functions) => Some(functions),
            Err(err) => {
                gpu_error!(SRC, "Shader '{}' failed to compile: {}", source.name, err);
                None
            }
        };
        let push_constant_size = interface.push_constant_size as usize;
        Self {
            name: source.name.clone(),
            functions,
            interface,
            pso_cache: PsoCache::with_capacity(pso_cache_capacity),
            uses_array_render_target: false,
            push_constants: vec![0u8; push_constant_size],
            push_constants_dirty: push_constant_size > 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False when function compilation failed; such shaders never draw
    pub fn is_valid(&self) -> bool {
        self.functions.is_some()
    }

    /// Compiled function handles. Errors on an invalid shader.
    pub fn functions(&self) -> Result<&Arc<dyn RawShaderFunctions>> {
        self.functions
            .as_ref()
            .ok_or_else(|| Error::CompilationFailed(format!("shader '{}' is invalid", self.name)))
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }

    /// The shader's pipeline cache (mutable access for the bake path)
    pub fn pso_cache_mut(&mut self) -> &mut PsoCache {
        &mut self.pso_cache
    }

    /// Resolve `descriptor` through this shader's PSO cache
    pub fn bake_pipeline(
        &mut self,
        device: &dyn RawDevice,
        descriptor: &crate::pipeline::PipelineStateDescriptor,
    ) -> Result<Arc<crate::pipeline::PsoCacheEntry>> {
        let functions = self
            .functions
            .as_ref()
            .ok_or_else(|| Error::CompilationFailed(format!("shader '{}' is invalid", self.name)))?;
        self.pso_cache.bake_or_get(device, functions, &self.interface, descriptor)
    }

    pub fn pso_cache(&self) -> &PsoCache {
        &self.pso_cache
    }

    pub fn uses_array_render_target(&self) -> bool {
        self.uses_array_render_target
    }

    /// Declare that the vertex stage writes a render-target array index.
    /// Set by the translator glue when the source shader uses layered
    /// rendering.
    pub fn set_uses_array_render_target(&mut self, uses: bool) {
        self.uses_array_render_target = uses;
    }

    // ===== PUSH CONSTANTS =====

    /// Raw push-constant block bytes
    pub fn push_constant_bytes(&self) -> &[u8] {
        &self.push_constants
    }

    /// Whether the staged block changed since the last draw consumed it
    pub fn push_constants_dirty(&self) -> bool {
        self.push_constants_dirty
    }

    /// Mark the staged block as consumed by the encoder
    pub fn mark_push_constants_bound(&mut self) {
        self.push_constants_dirty = false;
    }

    /// Write a push-constant field by name at its reflected byte offset.
    /// Size mismatches and unknown names are recoverable errors.
    pub fn set_push_constant(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let field = match self.interface.push_constant_field(name) {
            Some(field) => field.clone(),
            None => {
                return Err(gpu_err!(
                    SRC,
                    "Shader '{}' has no push constant named '{}'",
                    self.name,
                    name
                ));
            }
        };
        if data.len() != field.size as usize {
            return Err(gpu_err!(
                SRC,
                "Push constant '{}' expects {} bytes, got {}",
                name,
                field.size,
                data.len()
            ));
        }
        let start = field.offset as usize;
        let end = start + data.len();
        if end > self.push_constants.len() {
            return Err(Error::InvalidResource(format!(
                "push constant '{}' exceeds block size",
                name
            )));
        }
        self.push_constants[start..end].copy_from_slice(data);
        self.push_constants_dirty = true;
        Ok(())
    }
}

#[cfg(test)]
#[path = "shader_tests.rs"]
mod tests;
