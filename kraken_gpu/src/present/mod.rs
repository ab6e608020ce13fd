/// Present module - the latency-adaptive drawables-in-flight limiter

pub mod pacer;

pub use pacer::*;
