/// Shader module - reflection interface and the shader object owning its
/// pipeline-state cache

pub mod interface;
pub mod shader;

pub use interface::*;
pub use shader::*;
