//! Zen Watcher: normalized security-event stream for cluster workloads
//!
//! Ingests security and compliance events from heterogeneous producers over
//! authenticated webhooks and emits a filtered, deduplicated stream of
//! canonical observations to configured sinks.
//!
//! ## Architecture
//!
//! - **Ingress**: authenticated, rate-limited webhook endpoints with a
//!   bounded handoff channel (backpressure sheds load with 503)
//! - **Filter Engine**: per-source list rules plus a boolean expression DSL
//! - **Pipeline**: worker pool running filter/dedup stages in an order
//!   chosen per source by the strategy decider
//! - **Adaptive sizing**: memory- and traffic-aware dedup cache and window
//! - **Role model**: leader replicas run optimization and persistence;
//!   every replica ingests, filters, and serves metrics

pub mod adaptive;
pub mod config;
pub mod filter;
pub mod ingress;
pub mod metrics;
pub mod optimization;
pub mod pipeline;
pub mod role;
pub mod sink;
pub mod state;
pub mod types;

// Re-export the types most callers touch
pub use config::{FilterConfig, IngesterConfig, WatcherConfig};
pub use filter::{FilterDecision, FilterEngine};
pub use metrics::{MetricsCollector, MetricsRegistry, OptimizationMetrics};
pub use pipeline::{
    DedupCache, PipelineContext, PipelineOrchestrator, Strategy, StrategyDecider, StrategyTable,
};
pub use role::{Role, RoleChecker};
pub use state::{OptimizationState, OptimizationStateManager};
pub use types::{Observation, RawEvent, Severity};
