//! Runtime metrics: labeled counters/gauges with text-format exposition.
//!
//! No client crate: counters are plain atomics behind a concurrent label
//! table and the /metrics endpoint hand-formats Prometheus text (version
//! 0.0.4) from them, the same way the rest of the process's observability
//! surface is built.

mod collector;

pub use collector::{MetricsCollector, OptimizationMetrics};

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Label set attached to one metric series. Kept sorted for stable identity.
type LabelSet = Vec<(String, String)>;

#[derive(Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: &'static str,
    labels: LabelSet,
}

/// Process-wide metric registry.
///
/// Counter names used across the watcher:
/// - `filter_decisions{source, decision, reason}`
/// - `events_processed_total{source}` / `events_emitted_total{source}`
/// - `webhook_requests_total{endpoint, code}`
/// - `webhook_dropped{endpoint}`
/// - `webhook_rate_limited_scope{scope}`
/// - `sink_errors{sink}`
/// - `strategy_switches_total{source, strategy}`
/// - `strategy_switches_skipped_total{source}`
pub struct MetricsRegistry {
    counters: DashMap<SeriesKey, Arc<AtomicU64>>,
    gauges: DashMap<SeriesKey, Arc<AtomicU64>>,
    started_at: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Increment a labeled counter by 1.
    pub fn inc(&self, name: &'static str, labels: &[(&str, &str)]) {
        self.add(name, labels, 1);
    }

    /// Increment a labeled counter by `delta`.
    pub fn add(&self, name: &'static str, labels: &[(&str, &str)], delta: u64) {
        self.series(&self.counters, name, labels)
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Set a labeled gauge.
    pub fn set_gauge(&self, name: &'static str, labels: &[(&str, &str)], value: u64) {
        self.series(&self.gauges, name, labels)
            .store(value, Ordering::Relaxed);
    }

    /// Read a counter value (0 when never written). Used by tests and the
    /// /ha/metrics report.
    pub fn counter_value(&self, name: &'static str, labels: &[(&str, &str)]) -> u64 {
        let key = make_key(name, labels);
        self.counters
            .get(&key)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Process uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn series(
        &self,
        table: &DashMap<SeriesKey, Arc<AtomicU64>>,
        name: &'static str,
        labels: &[(&str, &str)],
    ) -> Arc<AtomicU64> {
        let key = make_key(name, labels);
        table
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .value()
            .clone()
    }

    /// Render all series as Prometheus text format (version 0.0.4).
    pub fn render(&self) -> String {
        let mut body = String::with_capacity(4096);

        body.push_str("# HELP zen_watcher_uptime_seconds Process uptime in seconds\n");
        body.push_str("# TYPE zen_watcher_uptime_seconds gauge\n");
        body.push_str(&format!("zen_watcher_uptime_seconds {}\n", self.uptime_secs()));

        let mut lines: Vec<String> = Vec::with_capacity(self.counters.len() + self.gauges.len());
        for entry in self.counters.iter() {
            lines.push(format_series(entry.key(), entry.value().load(Ordering::Relaxed)));
        }
        for entry in self.gauges.iter() {
            lines.push(format_series(entry.key(), entry.value().load(Ordering::Relaxed)));
        }
        lines.sort();
        for line in lines {
            body.push_str(&line);
            body.push('\n');
        }
        body
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn make_key(name: &'static str, labels: &[(&str, &str)]) -> SeriesKey {
    let mut labels: LabelSet = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    labels.sort();
    SeriesKey { name, labels }
}

fn format_series(key: &SeriesKey, value: u64) -> String {
    if key.labels.is_empty() {
        return format!("{} {}", key.name, value);
    }
    let labels = key
        .labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}{{{}}} {}", key.name, labels, value)
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let reg = MetricsRegistry::new();
        reg.inc("filter_decisions", &[("source", "trivy"), ("decision", "allow"), ("reason", "all_passed")]);
        reg.inc("filter_decisions", &[("source", "trivy"), ("decision", "allow"), ("reason", "all_passed")]);
        reg.inc("filter_decisions", &[("source", "falco"), ("decision", "reject"), ("reason", "min_severity")]);

        assert_eq!(
            reg.counter_value(
                "filter_decisions",
                &[("source", "trivy"), ("decision", "allow"), ("reason", "all_passed")]
            ),
            2
        );
        assert_eq!(
            reg.counter_value(
                "filter_decisions",
                &[("source", "falco"), ("decision", "reject"), ("reason", "min_severity")]
            ),
            1
        );
    }

    #[test]
    fn label_order_does_not_split_series() {
        let reg = MetricsRegistry::new();
        reg.inc("webhook_requests_total", &[("endpoint", "falco"), ("code", "200")]);
        reg.inc("webhook_requests_total", &[("code", "200"), ("endpoint", "falco")]);
        assert_eq!(
            reg.counter_value("webhook_requests_total", &[("endpoint", "falco"), ("code", "200")]),
            2
        );
    }

    #[test]
    fn render_contains_labeled_series() {
        let reg = MetricsRegistry::new();
        reg.inc("webhook_dropped", &[("endpoint", "falco")]);
        let body = reg.render();
        assert!(body.contains("zen_watcher_uptime_seconds"));
        assert!(body.contains("webhook_dropped{endpoint=\"falco\"} 1"));
    }
}
