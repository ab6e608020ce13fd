/*!
# Kraken GPU - Metal Renderer Backend

Apple Metal realization of the `kraken_gpu` raw-device trait family.

This crate keeps only the API translation: resource creation, shader
library compilation, pipeline/depth-stencil state objects, sampler argument
encoding and command-buffer recording. All caching, dirty tracking and
binding resolution stay in the portable `kraken_gpu` core.

The crate only builds its contents on macOS; on other targets it compiles
to an empty library so workspace-wide builds and tests keep working.
*/

// Metal implementation modules
#[cfg(target_os = "macos")]
mod metal_device;
#[cfg(target_os = "macos")]
mod metal_buffer;
#[cfg(target_os = "macos")]
mod metal_texture;
#[cfg(target_os = "macos")]
mod metal_shader;
#[cfg(target_os = "macos")]
mod metal_pipeline;
#[cfg(target_os = "macos")]
mod metal_depth_stencil;
#[cfg(target_os = "macos")]
mod metal_sampler;
#[cfg(target_os = "macos")]
mod metal_command_buffer;
#[cfg(target_os = "macos")]
mod metal_layer;

#[cfg(target_os = "macos")]
pub use metal_device::MetalDevice;
#[cfg(target_os = "macos")]
pub use metal_layer::MetalSurface;
