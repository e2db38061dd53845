//! Strategy optimization engine.
//!
//! Leader-only: the engine loop is started when the replica becomes leader
//! and cancelled when it steps down. Followers keep filtering and serving
//! ingress but never write decisions or state.

mod engine;

pub use engine::OptimizationEngine;
