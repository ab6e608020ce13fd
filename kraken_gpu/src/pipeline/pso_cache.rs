//! Render pipeline state cache
//!
//! `bake_or_get` is a pure function of the pipeline state descriptor with
//! memoization: field-equal descriptors return the identical cached entry and
//! the underlying compile runs at most once per equivalence class. Each
//! shader owns one cache, so the shader's compiled function handles never
//! appear in the key.
//!
//! Baking also resolves everything Metal needs fixed before compilation:
//! shader attributes with no bound vertex data are redirected to a null
//! attribute buffer (a constant-stride dummy binding past all real vertex
//! buffers), and the uniform-buffer base bind index is shifted past both the
//! real VBO slots and that null slot so bindings never collide.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::device::{
    PipelineSpecialization, RawDevice, RawRenderPipeline, RawShaderFunctions,
    MAX_UNIFORM_BUFFER_SLOTS, MAX_VERTEX_BUFFER_BINDINGS,
};
use crate::error::Result;
use crate::pipeline::{
    PipelineStateDescriptor, StepFunction, VertexAttributeDescriptor, VertexBufferLayoutDescriptor,
};
use crate::shader::ShaderInterface;
use crate::{gpu_debug, gpu_trace};

const SRC: &str = "kraken::gpu::PsoCache";

/// Default capacity of a per-shader PSO cache
pub const PSO_CACHE_CAPACITY: usize = 2048;

/// A compiled pipeline plus the bind-index metadata derived while baking it
pub struct PsoCacheEntry {
    /// The compiled pipeline object
    pub pipeline: Arc<dyn RawRenderPipeline>,
    /// Unique index identifying this entry, used by the context to skip
    /// redundant `set_render_pipeline` calls
    pub pso_index: u64,
    /// First bind index usable for uniform buffers
    pub base_uniform_buffer_index: u32,
    /// Bind slot of the null attribute buffer, when one was needed
    pub null_attribute_buffer_index: Option<u32>,
    /// Expected byte size per logical UBO slot, from shader reflection;
    /// consulted when validating bound buffer sizes before a draw
    pub buffer_size_reflection: Vec<Option<u32>>,
}

struct CacheSlot {
    entry: Arc<PsoCacheEntry>,
    last_used: u64,
}

/// Bounded memoizing cache of compiled render pipelines, owned per shader
pub struct PsoCache {
    entries: FxHashMap<PipelineStateDescriptor, CacheSlot>,
    capacity: usize,
    generation: u64,
    next_pso_index: u64,
}

impl PsoCache {
    pub fn new() -> Self {
        Self::with_capacity(PSO_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity: capacity.max(1),
            generation: 0,
            next_pso_index: 0,
        }
    }

    /// Number of cached compiled pipelines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the compiled pipeline entry for `descriptor`, compiling one on
    /// first use.
    ///
    /// Compilation failure is returned as an error for the caller to log and
    /// skip the draw; nothing is inserted into the cache in that case, so a
    /// later bake with a fixed descriptor is unaffected.
    pub fn bake_or_get(
        &mut self,
        device: &dyn RawDevice,
        functions: &Arc<dyn RawShaderFunctions>,
        interface: &ShaderInterface,
        descriptor: &PipelineStateDescriptor,
    ) -> Result<Arc<PsoCacheEntry>> {
        self.generation += 1;
        let generation = self.generation;

        if let Some(slot) = self.entries.get_mut(descriptor) {
            slot.last_used = generation;
            return Ok(Arc::clone(&slot.entry));
        }

        let entry = self.bake(device, functions, interface, descriptor)?;
        self.evict_if_full();
        self.entries.insert(
            descriptor.clone(),
            CacheSlot {
                entry: Arc::clone(&entry),
                last_used: generation,
            },
        );
        Ok(entry)
    }

    fn bake(
        &mut self,
        device: &dyn RawDevice,
        functions: &Arc<dyn RawShaderFunctions>,
        interface: &ShaderInterface,
        descriptor: &PipelineStateDescriptor,
    ) -> Result<Arc<PsoCacheEntry>> {
        // Fill unbound shader attributes from the null attribute buffer so
        // the vertex stage never reads garbage. The null buffer binds at the
        // slot just past the real vertex buffer layouts.
        let mut vertex_descriptor = descriptor.vertex_descriptor.clone();
        let null_buffer_index = vertex_descriptor.buffer_layouts.len() as u32;
        let mut using_null_buffer = false;
        let mut null_buffer_stride = 0u32;

        let slot_count = interface.attribute_slot_count() as usize;
        if vertex_descriptor.attributes.len() < slot_count {
            vertex_descriptor.attributes.resize(slot_count, None);
        }
        for attribute in &interface.attributes {
            let slot = attribute.location as usize;
            if vertex_descriptor.attributes[slot].is_none() {
                gpu_trace!(
                    SRC,
                    "Attribute '{}' has no bound vertex data, using null buffer at index {}",
                    attribute.name,
                    null_buffer_index
                );
                vertex_descriptor.attributes[slot] = Some(VertexAttributeDescriptor {
                    format: attribute.format,
                    offset: 0,
                    buffer_index: null_buffer_index,
                });
                null_buffer_stride = null_buffer_stride.max(attribute.format.size_bytes());
                using_null_buffer = true;
            }
        }
        if using_null_buffer {
            // Constant step function: one dummy element backs any number of
            // vertices.
            vertex_descriptor.buffer_layouts.push(VertexBufferLayoutDescriptor {
                step_function: StepFunction::Constant,
                step_rate: 0,
                stride: null_buffer_stride,
            });
        }

        // Uniform buffers bind past all VBO slots; shift further when the
        // null buffer landed at or beyond that base.
        let mut base_uniform_buffer_index = MAX_VERTEX_BUFFER_BINDINGS as u32;
        if using_null_buffer && null_buffer_index >= base_uniform_buffer_index {
            base_uniform_buffer_index = null_buffer_index + 1;
        }

        // Blending on formats that cannot blend (integer attachments) is
        // dropped by the backend; note it here so the silent demotion is
        // observable.
        if descriptor.blending_enabled {
            for format in descriptor.color_attachment_formats.iter().flatten() {
                if !format.supports_blending() {
                    gpu_debug!(SRC, "Blending requested on non-blendable format {:?}, dropped", format);
                }
            }
        }

        // Negative point size encodes "vertex stage overrides per vertex"
        // with the magnitude as fallback.
        let per_vertex_point_size = descriptor.point_size < 0.0;
        let specialization = PipelineSpecialization {
            base_uniform_buffer_index,
            null_attribute_buffer_index: using_null_buffer.then_some(null_buffer_index),
            point_size: descriptor.point_size.abs(),
            per_vertex_point_size,
        };

        let compile_descriptor = PipelineStateDescriptor {
            vertex_descriptor,
            ..descriptor.clone()
        };
        let pipeline = device.compile_render_pipeline(functions, &compile_descriptor, &specialization)?;

        let mut buffer_size_reflection = vec![None; MAX_UNIFORM_BUFFER_SLOTS];
        for block in &interface.uniform_blocks {
            if (block.slot as usize) < MAX_UNIFORM_BUFFER_SLOTS {
                buffer_size_reflection[block.slot as usize] = Some(block.expected_size);
            }
        }

        let pso_index = self.next_pso_index;
        self.next_pso_index += 1;
        gpu_debug!(SRC, "Compiled pipeline #{} (cache size {})", pso_index, self.entries.len() + 1);

        Ok(Arc::new(PsoCacheEntry {
            pipeline,
            pso_index,
            base_uniform_buffer_index,
            null_attribute_buffer_index: using_null_buffer.then_some(null_buffer_index),
            buffer_size_reflection,
        }))
    }

    /// Drop the least-recently-used entries not referenced by in-flight work
    /// until the cache fits its capacity again
    fn evict_if_full(&mut self) {
        while self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(_, slot)| Arc::strong_count(&slot.entry) == 1)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    gpu_debug!(SRC, "Evicting pipeline state (cache at capacity {})", self.capacity);
                    self.entries.remove(&key);
                }
                // Every entry is still in flight; allow temporary overshoot.
                None => break,
            }
        }
    }
}

impl Default for PsoCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "pso_cache_tests.rs"]
mod tests;
