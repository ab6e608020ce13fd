/*!
# Kraken GPU

Render-state and pipeline-caching core of the Kraken Metal GPU backend.

This crate is the portable half of the backend: it owns framebuffers with
dirty-tracked render-pass descriptor baking, the pipeline-state /
depth-stencil / sampler-argument caches, the global state manager, the
render-context orchestrator and the presentation pacer. Everything that
touches a real GPU API goes through the `RawDevice` trait family, so the
whole crate runs (and is tested) against the CPU-backed headless device;
the Metal realization lives in the `kraken_gpu_renderer_metal` crate.

## Architecture

- **RenderContext**: explicit per-window/offscreen orchestrator (no ambient
  global context)
- **FrameBuffer**: attachment table with three cached render-pass
  descriptor variants (CLEAR / LOAD / CUSTOM)
- **PsoCache / DepthStencilCache / SamplerArgumentCache**: bounded
  memoization of expensive compiled GPU objects
- **StateManager**: immediate-style state setters with per-concern dirty
  bits
- **PresentationPacer**: latency-adaptive drawables-in-flight limiter
*/

// Internal modules
pub mod error;
pub mod log;
pub mod device;
pub mod texture;
pub mod shader;
pub mod framebuffer;
pub mod pipeline;
pub mod state;
pub mod context;
pub mod present;

// Main kraken namespace module
pub mod kraken {
    // Error types
    pub use crate::error::{Error, Result};

    // The context orchestrator
    pub use crate::context::{ContextConfig, FrameBufferHandle, RenderContext};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{CaptureLogger, DefaultLogger, LogEntry, LogSeverity, Logger};
        // Note: gpu_* macros are NOT re-exported here - they are internal only
    }

    // GPU sub-module with the device seam and all rendering types
    pub mod gpu {
        pub use crate::device::*;
        pub use crate::framebuffer::*;
        pub use crate::pipeline::*;
        pub use crate::present::*;
        pub use crate::shader::*;
        pub use crate::state::*;
        pub use crate::texture::*;
    }
}

// Re-export math library at crate root
pub use glam;
