//! Periodic decide -> publish -> persist loop.
//!
//! Each tick, for every source with samples in the rolling window: snapshot
//! the metrics, ask the decider, and if optimization is warranted propose
//! the switch to the strategy table (which enforces cooldown and confidence
//! hysteresis). Every proposal is recorded in the state manager and
//! persisted atomically, applied or not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::pipeline::{OrderPreference, StrategyDecider, StrategyTable};
use crate::state::{DecisionRecord, OptimizationStateManager};

pub struct OptimizationEngine {
    decider: StrategyDecider,
    collector: Arc<MetricsCollector>,
    strategies: Arc<StrategyTable>,
    state: Arc<OptimizationStateManager>,
    /// Per-source configured preferences, keyed by source tag.
    preferences: HashMap<String, OrderPreference>,
    interval: Duration,
}

impl OptimizationEngine {
    pub fn new(
        decider: StrategyDecider,
        collector: Arc<MetricsCollector>,
        strategies: Arc<StrategyTable>,
        state: Arc<OptimizationStateManager>,
        preferences: HashMap<String, OrderPreference>,
        interval: Duration,
    ) -> Self {
        Self {
            decider,
            collector,
            strategies,
            state,
            preferences,
            interval,
        }
    }

    /// Run the decision loop until cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Optimization engine started");

        // Desync from other replicas' ticks after a leadership flap.
        let jitter = {
            use rand::Rng;
            rand::thread_rng().gen_range(0..1_000)
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(jitter)) => {}
        }

        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Optimization engine stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.pass();
        }
    }

    /// One decision pass over all active sources.
    fn pass(&self) {
        for source in self.collector.active_sources() {
            let metrics = self.collector.snapshot(&source);
            let default_pref = OrderPreference {
                order: None,
                auto_optimize: true,
            };
            let pref = self.preferences.get(&source).unwrap_or(&default_pref);

            // Publish the snapshot for the adaptive per-event ordering.
            if let Some(ref m) = metrics {
                self.strategies.store_metrics(&source, m.clone());
            }

            if !self.decider.should_optimize(metrics.as_ref(), pref) {
                continue;
            }

            let decision = self.decider.decide(metrics.as_ref(), pref);
            if decision.strategy == self.strategies.current(&source) {
                continue;
            }

            let applied = self.strategies.try_switch(&source, &decision);
            debug!(
                source = %source,
                strategy = %decision.strategy,
                confidence = decision.confidence,
                applied,
                "Optimization decision"
            );

            let record = DecisionRecord {
                strategy: decision.strategy,
                confidence: decision.confidence,
                rationale: decision.rationale,
                applied,
                at: Utc::now(),
            };
            if let Err(e) = self.state.record_decision(&source, record, metrics) {
                warn!(source = %source, error = %e, "Failed to persist optimization state");
            }
        }
    }
}
