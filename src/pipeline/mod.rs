//! Event processing pipeline: normalize, filter, dedup, emit.
//!
//! The orchestrator owns the worker pool; the strategy decider and table
//! control the stage order per source. All shared state is either an atomic
//! snapshot (filter config), a concurrent table (dedup window, strategies),
//! or a bounded channel (ingress handoff).

pub mod dedup;
pub mod normalizer;
pub mod orchestrator;
pub mod performance;
pub mod strategy;

pub use dedup::DedupCache;
pub use orchestrator::{PipelineContext, PipelineOrchestrator, StrategyTable};
pub use performance::PerformanceTracker;
pub use strategy::{OrderPreference, Strategy, StrategyDecider, StrategyDecision, StrategyThresholds};
