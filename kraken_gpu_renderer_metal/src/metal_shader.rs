//! MetalShaderFunctions - compiled MSL libraries for one shader

use std::any::Any;

use kraken_gpu::device::RawShaderFunctions;

/// Compiled vertex and fragment libraries plus their entry point names.
/// The actual `MTLFunction` objects are materialized at PSO bake time so
/// function constants (bind indices, point size) can specialize them.
pub struct MetalShaderFunctions {
    pub(crate) name: String,
    pub(crate) vertex_library: metal::Library,
    pub(crate) fragment_library: metal::Library,
    pub(crate) vertex_entry: String,
    pub(crate) fragment_entry: String,
}

unsafe impl Send for MetalShaderFunctions {}
unsafe impl Sync for MetalShaderFunctions {}

impl RawShaderFunctions for MetalShaderFunctions {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
