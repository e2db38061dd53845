//! Adaptive sizing of the dedup cache and window.
//!
//! Two coupled ticker loops publish target sizes through atomics on the
//! shared `DedupCache`; downscaling never invalidates in-flight entries.

mod cache_sizer;
mod memory;
mod window_sizer;

pub use cache_sizer::CacheSizer;
pub use memory::{MemoryProbe, MemorySample};
pub use window_sizer::WindowSizer;
