/// Device module - the raw-device trait family implemented by backends
/// (Metal, headless) plus the CPU-backed headless device used by tests.

pub mod device;
pub mod headless;

pub use device::*;
pub use headless::*;
