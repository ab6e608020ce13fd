//! Error types for the Kraken GPU backend
//!
//! This module defines the error types used throughout the GPU module,
//! covering device initialization, resource creation, pipeline compilation
//! and render-pass validation.

use std::fmt;

/// Result type for Kraken GPU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kraken GPU errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Metal, headless, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, buffer, shader, framebuffer attachment)
    InvalidResource(String),

    /// Initialization failed (device, queue, context)
    InitializationFailed(String),

    /// Shader library or pipeline state compilation failed
    CompilationFailed(String),

    /// Render-pass or attachment validation failed
    Validation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::CompilationFailed(msg) => write!(f, "Compilation failed: {}", msg),
            Error::Validation(msg) => write!(f, "Validation failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
