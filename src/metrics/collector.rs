//! Per-source rolling metrics window feeding the strategy decider.
//!
//! Samples are pruned to the configured horizon (default 10 minutes) on
//! every write and snapshot; the derived `OptimizationMetrics` are advisory
//! inputs for optimization decisions, never an authoritative count.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Hard bound on retained samples per source, independent of the horizon.
const MAX_SAMPLES_PER_SOURCE: usize = 50_000;

/// One processed event's contribution to the window.
#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency: Duration,
    filtered: bool,
    deduped: bool,
    low_severity: bool,
}

/// Derived rolling-window metrics for one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationMetrics {
    pub processed: u64,
    pub filtered: u64,
    pub deduped: u64,
    pub avg_latency_ms: f64,
    /// filtered / processed over the window, in [0,1].
    pub filter_effectiveness: f64,
    /// deduped / processed over the window, in [0,1].
    pub dedup_effectiveness: f64,
    pub events_per_minute: f64,
    /// Share of LOW/UNKNOWN severity events, in [0,1].
    pub low_severity_percent: f64,
}

/// Rolling per-source sample store.
pub struct MetricsCollector {
    window: Duration,
    sources: RwLock<HashMap<String, VecDeque<Sample>>>,
}

impl MetricsCollector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Record one processed event.
    pub fn record(
        &self,
        source: &str,
        latency: Duration,
        filtered: bool,
        deduped: bool,
        low_severity: bool,
    ) {
        let sample = Sample {
            at: Instant::now(),
            latency,
            filtered,
            deduped,
            low_severity,
        };
        let mut sources = match self.sources.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ring = sources.entry(source.to_string()).or_default();
        ring.push_back(sample);
        if ring.len() > MAX_SAMPLES_PER_SOURCE {
            ring.pop_front();
        }
        Self::prune(ring, self.window);
    }

    /// Snapshot the derived metrics for one source. `None` when the window
    /// holds no samples.
    pub fn snapshot(&self, source: &str) -> Option<OptimizationMetrics> {
        let mut sources = match self.sources.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ring = sources.get_mut(source)?;
        Self::prune(ring, self.window);
        if ring.is_empty() {
            return None;
        }

        let processed = ring.len() as u64;
        let filtered = ring.iter().filter(|s| s.filtered).count() as u64;
        let deduped = ring.iter().filter(|s| s.deduped).count() as u64;
        let low = ring.iter().filter(|s| s.low_severity).count() as u64;
        let total_latency: Duration = ring.iter().map(|s| s.latency).sum();

        let span = ring
            .back()
            .map(|newest| newest.at.duration_since(ring[0].at))
            .unwrap_or_default()
            .as_secs_f64()
            .max(1.0);

        Some(OptimizationMetrics {
            processed,
            filtered,
            deduped,
            avg_latency_ms: total_latency.as_secs_f64() * 1000.0 / processed as f64,
            filter_effectiveness: filtered as f64 / processed as f64,
            dedup_effectiveness: deduped as f64 / processed as f64,
            events_per_minute: processed as f64 / span * 60.0,
            low_severity_percent: low as f64 / processed as f64,
        })
    }

    /// Sources with at least one sample in the window.
    pub fn active_sources(&self) -> Vec<String> {
        let sources = match self.sources.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sources
            .iter()
            .filter(|(_, ring)| !ring.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Aggregate events/sec across all sources over the last minute.
    pub fn total_events_per_second(&self) -> f64 {
        self.events_per_second_over(Duration::from_secs(60))
    }

    /// Aggregate events/sec across all sources over a caller-chosen horizon
    /// (capped at the collector window).
    pub fn events_per_second_over(&self, horizon: Duration) -> f64 {
        let sources = match self.sources.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let horizon = self.window.min(horizon);
        let recent: usize = sources
            .values()
            .map(|ring| {
                ring.iter()
                    .rev()
                    .take_while(|s| now.duration_since(s.at) <= horizon)
                    .count()
            })
            .sum();
        recent as f64 / horizon.as_secs_f64().max(1.0)
    }

    fn prune(ring: &mut VecDeque<Sample>, window: Duration) {
        let now = Instant::now();
        while let Some(front) = ring.front() {
            if now.duration_since(front.at) > window {
                ring.pop_front();
            } else {
                break;
            }
        }
    }
}
