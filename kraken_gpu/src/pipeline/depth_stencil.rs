//! Depth/stencil state descriptor and cache
//!
//! Depth/stencil comparison state is a separate compiled object in Metal and
//! changes independently of the main PSO (toggling the depth test across
//! draws reuses the same render pipeline), so it gets its own cache with the
//! same memoization contract. Depth bias is NOT part of the cached object:
//! it is selected at draw time from per-primitive-class enables, since one
//! cached state may serve draws of different primitive types.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::device::{RawDepthStencilState, RawDevice};
use crate::error::Result;
use crate::gpu_debug;

const SRC: &str = "kraken::gpu::DepthStencilCache";

/// Default capacity of the depth-stencil cache
pub const DEPTH_STENCIL_CACHE_CAPACITY: usize = 256;

/// Comparison function for depth and stencil tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    GreaterEqual,
    NotEqual,
    #[default]
    Always,
}

/// Stencil operation applied on test outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOperation {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

/// Stencil operations for one face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilFaceOps {
    /// Applied when the stencil test fails
    pub stencil_fail: StencilOperation,
    /// Applied when the stencil test passes but the depth test fails
    pub depth_fail: StencilOperation,
    /// Applied when both tests pass
    pub depth_stencil_pass: StencilOperation,
}

/// Structural-equality key for the depth-stencil cache
///
/// The stencil reference value is deliberately absent: it is dynamic encoder
/// state (`set_stencil_reference`) and changing it must not force a new
/// compiled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDescriptor {
    pub depth_test_enabled: bool,
    pub depth_function: CompareFunction,
    pub depth_write_enabled: bool,

    pub stencil_test_enabled: bool,
    pub stencil_function: CompareFunction,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
    pub front: StencilFaceOps,
    pub back: StencilFaceOps,
}

impl Default for DepthStencilDescriptor {
    fn default() -> Self {
        Self {
            depth_test_enabled: false,
            depth_function: CompareFunction::Always,
            depth_write_enabled: false,
            stencil_test_enabled: false,
            stencil_function: CompareFunction::Always,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front: StencilFaceOps::default(),
            back: StencilFaceOps::default(),
        }
    }
}

struct DepthStencilEntry {
    state: Arc<dyn RawDepthStencilState>,
    last_used: u64,
}

/// Bounded memoizing cache of compiled depth-stencil states
///
/// Owned by the render context; entries live for the context lifetime unless
/// evicted. Eviction is LRU by generation counter and skips entries still
/// referenced by in-flight command buffers (entries are `Arc`s cloned into
/// the submission, so a strong count above one means the GPU may still read
/// the object).
pub struct DepthStencilCache {
    entries: FxHashMap<DepthStencilDescriptor, DepthStencilEntry>,
    capacity: usize,
    generation: u64,
}

impl DepthStencilCache {
    pub fn new() -> Self {
        Self::with_capacity(DEPTH_STENCIL_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity: capacity.max(1),
            generation: 0,
        }
    }

    /// Number of cached compiled states
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the compiled state for `descriptor`, compiling it on first use.
    /// Equal descriptors return the identical cached object.
    pub fn bake_or_get(
        &mut self,
        device: &dyn RawDevice,
        descriptor: &DepthStencilDescriptor,
    ) -> Result<Arc<dyn RawDepthStencilState>> {
        self.generation += 1;
        let generation = self.generation;

        if let Some(entry) = self.entries.get_mut(descriptor) {
            entry.last_used = generation;
            return Ok(Arc::clone(&entry.state));
        }

        let state = device.compile_depth_stencil(descriptor)?;
        self.evict_if_full();
        self.entries.insert(
            *descriptor,
            DepthStencilEntry {
                state: Arc::clone(&state),
                last_used: generation,
            },
        );
        Ok(state)
    }

    /// Drop the least-recently-used entries not referenced by in-flight work
    /// until the cache fits its capacity again
    fn evict_if_full(&mut self) {
        while self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.state) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k);
            match victim {
                Some(key) => {
                    gpu_debug!(SRC, "Evicting depth-stencil state (cache at capacity {})", self.capacity);
                    self.entries.remove(&key);
                }
                // Every entry is still in flight; allow temporary overshoot.
                None => break,
            }
        }
    }
}

impl Default for DepthStencilCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "depth_stencil_tests.rs"]
mod tests;
