/// Texture module - pixel formats, texture wrapper and the texture pool

pub mod format;
pub mod texture;

pub use format::*;
pub use texture::*;
