//! Pipeline orchestrator: worker pool draining the ingress channel.
//!
//! Each worker picks an event, runs the stages in the source's current
//! strategy order, records per-stage metrics, and routes allowed
//! observations to the ingester's declared sinks. Strategy switches apply to
//! the next event a worker picks up; an in-flight event completes under the
//! order it started with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dedup::DedupCache;
use super::normalizer::normalize;
use super::performance::PerformanceTracker;
use super::strategy::{Strategy, StrategyDecision, StrategyThresholds};
use crate::config::IngesterConfig;
use crate::filter::FilterEngine;
use crate::metrics::{MetricsCollector, MetricsRegistry, OptimizationMetrics};
use crate::sink::SinkRegistry;
use crate::types::{Observation, RawEvent, Severity};

// ============================================================================
// Strategy table
// ============================================================================

struct ActiveStrategy {
    strategy: Strategy,
    last_switch: Option<Instant>,
    last_metrics: Option<OptimizationMetrics>,
}

/// Per-source active strategy shared between the workers (readers) and the
/// optimization engine (writer). Hysteresis is enforced here so every writer
/// goes through the same cooldown/confidence gate.
pub struct StrategyTable {
    entries: DashMap<String, ActiveStrategy>,
    thresholds: StrategyThresholds,
    metrics: Arc<MetricsRegistry>,
}

impl StrategyTable {
    pub fn new(thresholds: StrategyThresholds, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            entries: DashMap::new(),
            thresholds,
            metrics,
        }
    }

    /// Current strategy for a source (default until a switch is applied).
    pub fn current(&self, source: &str) -> Strategy {
        self.entries
            .get(source)
            .map(|e| e.strategy)
            .unwrap_or_default()
    }

    /// Seed a source's starting strategy without hysteresis (startup only:
    /// configured orders and persisted state).
    pub fn seed(&self, source: &str, strategy: Strategy) {
        self.entries.insert(
            source.to_string(),
            ActiveStrategy {
                strategy,
                last_switch: None,
                last_metrics: None,
            },
        );
    }

    /// Cache the latest metrics snapshot (consumed by the adaptive order).
    pub fn store_metrics(&self, source: &str, metrics: OptimizationMetrics) {
        self.entries
            .entry(source.to_string())
            .or_insert_with(|| ActiveStrategy {
                strategy: Strategy::default(),
                last_switch: None,
                last_metrics: None,
            })
            .last_metrics = Some(metrics);
    }

    fn cached_metrics(&self, source: &str) -> Option<OptimizationMetrics> {
        self.entries.get(source).and_then(|e| e.last_metrics.clone())
    }

    /// Apply a proposed switch under hysteresis.
    ///
    /// Rejected (and counted) when the proposal is below the confidence
    /// threshold or inside the cooldown. Returns whether it was applied.
    pub fn try_switch(&self, source: &str, decision: &StrategyDecision) -> bool {
        let mut entry = self
            .entries
            .entry(source.to_string())
            .or_insert_with(|| ActiveStrategy {
                strategy: Strategy::default(),
                last_switch: None,
                last_metrics: None,
            });

        if entry.strategy == decision.strategy {
            return false;
        }

        if decision.confidence < self.thresholds.confidence_threshold {
            debug!(
                source,
                proposed = %decision.strategy,
                confidence = decision.confidence,
                "Strategy switch below confidence threshold, skipped"
            );
            self.metrics
                .inc("strategy_switches_skipped_total", &[("source", source)]);
            return false;
        }

        let cooldown = std::time::Duration::from_secs(self.thresholds.cooldown_secs);
        if let Some(last) = entry.last_switch {
            if last.elapsed() < cooldown {
                debug!(
                    source,
                    proposed = %decision.strategy,
                    "Strategy switch inside cooldown, skipped"
                );
                self.metrics
                    .inc("strategy_switches_skipped_total", &[("source", source)]);
                return false;
            }
        }

        info!(
            source,
            from = %entry.strategy,
            to = %decision.strategy,
            confidence = decision.confidence,
            rationale = %decision.rationale,
            "Strategy switched"
        );
        entry.strategy = decision.strategy;
        entry.last_switch = Some(Instant::now());
        self.metrics.inc(
            "strategy_switches_total",
            &[("source", source), ("strategy", decision.strategy.as_str())],
        );
        true
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Shared handles every worker needs.
pub struct PipelineContext {
    pub filter: Arc<FilterEngine>,
    pub dedup: Arc<DedupCache>,
    pub sinks: Arc<SinkRegistry>,
    pub strategies: Arc<StrategyTable>,
    pub performance: Arc<PerformanceTracker>,
    pub collector: Arc<MetricsCollector>,
    pub metrics: Arc<MetricsRegistry>,
    /// Ingester definitions keyed by lower-cased name.
    pub ingesters: HashMap<String, IngesterConfig>,
}

/// Worker pool consuming the bounded ingress channel.
pub struct PipelineOrchestrator {
    ctx: Arc<PipelineContext>,
    receiver: Arc<Mutex<mpsc::Receiver<RawEvent>>>,
    workers: usize,
}

impl PipelineOrchestrator {
    pub fn new(ctx: PipelineContext, receiver: mpsc::Receiver<RawEvent>, workers: usize) -> Self {
        Self {
            ctx: Arc::new(ctx),
            receiver: Arc::new(Mutex::new(receiver)),
            workers: workers.max(1),
        }
    }

    pub fn context(&self) -> Arc<PipelineContext> {
        self.ctx.clone()
    }

    /// Run the worker pool until cancellation. Returns when all workers exit.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(workers = self.workers, "Pipeline orchestrator starting");

        let mut tasks = JoinSet::new();
        for worker_id in 0..self.workers {
            let ctx = self.ctx.clone();
            let receiver = self.receiver.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                worker_loop(worker_id, ctx, receiver, cancel).await;
            });
        }

        while tasks.join_next().await.is_some() {}
        info!("Pipeline orchestrator stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<PipelineContext>,
    receiver: Arc<Mutex<mpsc::Receiver<RawEvent>>>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "Pipeline worker started");
    loop {
        let event = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            }
        };
        let Some(event) = event else {
            break; // Channel closed: ingress is gone.
        };
        process_event(&ctx, event).await;
    }
    debug!(worker_id, "Pipeline worker stopped");
}

/// Stage outcome for metric accounting.
enum Outcome {
    Emitted,
    Filtered(&'static str),
    Deduplicated,
}

async fn process_event(ctx: &PipelineContext, event: RawEvent) {
    let started = Instant::now();

    let Some(ingester) = ctx.ingesters.get(&event.ingester.to_lowercase()) else {
        warn!(ingester = %event.ingester, "Event for unknown ingester dropped");
        ctx.metrics
            .inc("events_unroutable_total", &[("ingester", event.ingester.as_str())]);
        return;
    };

    let observation = normalize(ingester, &event);
    let source = observation.source.clone();
    let strategy = ctx.strategies.current(&source);

    let outcome = run_stages(ctx, ingester, &observation, strategy).await;

    let latency = started.elapsed();
    ctx.performance.record(&source, latency);
    let low_severity = observation.severity <= Severity::Low;
    let (filtered, deduped) = match &outcome {
        Outcome::Filtered(_) => (true, false),
        Outcome::Deduplicated => (false, true),
        Outcome::Emitted => (false, false),
    };
    ctx.collector
        .record(&source, latency, filtered, deduped, low_severity);
    ctx.metrics
        .inc("events_processed_total", &[("source", source.as_str())]);

    match outcome {
        Outcome::Emitted => {
            ctx.metrics.inc("events_emitted_total", &[("source", source.as_str())]);
        }
        Outcome::Filtered(reason) => {
            debug!(source = %source, reason, "Observation filtered");
            ctx.metrics.inc("events_filtered_total", &[("source", source.as_str())]);
        }
        Outcome::Deduplicated => {
            ctx.metrics.inc("events_deduped_total", &[("source", source.as_str())]);
        }
    }
}

/// Execute filter and dedup in the order the strategy dictates, then emit.
async fn run_stages(
    ctx: &PipelineContext,
    ingester: &IngesterConfig,
    observation: &Observation,
    strategy: Strategy,
) -> Outcome {
    let dedup_first = match strategy {
        Strategy::FilterFirst => false,
        Strategy::DedupFirst => true,
        // Hybrid: low-severity floods are cheapest to collapse before
        // filtering; higher severities go through the filter immediately.
        Strategy::Hybrid => observation.severity <= Severity::Low,
        // Adaptive: follow whichever stage has been removing more events
        // according to the last published snapshot.
        Strategy::Adaptive => ctx
            .strategies
            .cached_metrics(&observation.source)
            .map(|m| m.dedup_effectiveness > m.filter_effectiveness)
            .unwrap_or(false),
    };

    if dedup_first {
        if ctx.dedup.check_and_record(&observation.fingerprint()) {
            return Outcome::Deduplicated;
        }
        let decision = ctx.filter.allow(observation);
        if !decision.allowed {
            return Outcome::Filtered(decision.reason);
        }
    } else {
        let decision = ctx.filter.allow(observation);
        if !decision.allowed {
            return Outcome::Filtered(decision.reason);
        }
        if ctx.dedup.check_and_record(&observation.fingerprint()) {
            return Outcome::Deduplicated;
        }
    }

    emit(ctx, ingester, observation).await;
    Outcome::Emitted
}

/// Route to every declared sink; failures are counted, never retried.
async fn emit(ctx: &PipelineContext, ingester: &IngesterConfig, observation: &Observation) {
    for sink_name in &ingester.sinks {
        match ctx.sinks.get(sink_name) {
            Some(sink) => {
                if let Err(e) = sink.emit(observation).await {
                    warn!(sink = %sink_name, error = %e, "Sink emit failed");
                    ctx.metrics.inc("sink_errors", &[("sink", sink_name)]);
                }
            }
            None => {
                warn!(sink = %sink_name, "Ingester references unknown sink");
                ctx.metrics.inc("sink_errors", &[("sink", sink_name)]);
            }
        }
    }
}
