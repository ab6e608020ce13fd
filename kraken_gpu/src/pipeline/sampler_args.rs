//! Sampler argument buffer cache
//!
//! Metal limits the number of samplers bindable inline per draw. When the
//! active sampler count exceeds that limit the samplers are encoded into an
//! argument buffer instead, and encoding is expensive enough to memoize: the
//! cache key is the exact ordered tuple of active sampler configurations, so
//! identical sampler sets across draws reuse one encoded buffer.
//!
//! Entries are `Arc`s; the submission path clones the handle into the command
//! buffer's lifetime, so an encoded buffer is never freed while an in-flight
//! command buffer might still read it. The atomic reference count replaces
//! the manual retain/release of a hand-rolled free list.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::device::{RawDevice, RawSamplerArguments};
use crate::error::Result;
use crate::gpu_debug;
use crate::texture::SamplerState;

const SRC: &str = "kraken::gpu::SamplerArgumentCache";

/// Default capacity of the sampler-argument cache
pub const SAMPLER_ARGS_CACHE_CAPACITY: usize = 64;

struct SamplerArgumentEntry {
    buffer: Arc<dyn RawSamplerArguments>,
    last_used: u64,
}

/// Bounded memoizing cache of encoded sampler argument buffers
///
/// Keyed by the ordered list of active sampler configurations; order is
/// significant because the encoded table is indexed positionally by the
/// shader.
pub struct SamplerArgumentCache {
    entries: FxHashMap<Vec<SamplerState>, SamplerArgumentEntry>,
    capacity: usize,
    generation: u64,
}

impl SamplerArgumentCache {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLER_ARGS_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity: capacity.max(1),
            generation: 0,
        }
    }

    /// Number of cached encoded buffers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the encoded argument buffer for this exact ordered sampler
    /// set, encoding one on first use
    pub fn bake_or_get(
        &mut self,
        device: &dyn RawDevice,
        samplers: &[SamplerState],
    ) -> Result<Arc<dyn RawSamplerArguments>> {
        self.generation += 1;
        let generation = self.generation;

        if let Some(entry) = self.entries.get_mut(samplers) {
            entry.last_used = generation;
            return Ok(Arc::clone(&entry.buffer));
        }

        let buffer = device.encode_sampler_arguments(samplers)?;
        self.evict_if_full();
        self.entries.insert(
            samplers.to_vec(),
            SamplerArgumentEntry {
                buffer: Arc::clone(&buffer),
                last_used: generation,
            },
        );
        Ok(buffer)
    }

    fn evict_if_full(&mut self) {
        while self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.buffer) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    gpu_debug!(SRC, "Evicting sampler argument buffer (cache at capacity {})", self.capacity);
                    self.entries.remove(&key);
                }
                // Every entry is still referenced by in-flight work.
                None => break,
            }
        }
    }
}

impl Default for SamplerArgumentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "sampler_args_tests.rs"]
mod tests;
