/// Context module - the render context orchestrating framebuffer binds,
/// encoder lifecycle, cache lookups and per-draw binding resolution

pub mod context;

pub use context::*;
