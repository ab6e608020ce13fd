/// State module - the global mutable pipeline state manager with
/// per-concern dirty tracking, and the pure binding-resolution functions
/// implementing dummy-resource substitution

pub mod state;
pub mod binding;

pub use state::*;
pub use binding::*;
