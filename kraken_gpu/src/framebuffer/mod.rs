/// Framebuffer module - attachment table and the framebuffer with its
/// cached render-pass descriptor variants

pub mod attachment;
pub mod framebuffer;

pub use attachment::*;
pub use framebuffer::*;
