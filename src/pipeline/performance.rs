//! Per-source processing performance tracking.
//!
//! Bounded rolling ring of observed latencies plus lifetime throughput,
//! guarded by a single RW lock per the shared-state rules.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::config::defaults::LATENCY_RING_SIZE;

#[derive(Debug)]
struct SourcePerf {
    started_at: Instant,
    last_seen: Instant,
    latencies: VecDeque<Duration>,
    total_processed: u64,
}

impl SourcePerf {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            last_seen: now,
            latencies: VecDeque::with_capacity(LATENCY_RING_SIZE),
            total_processed: 0,
        }
    }
}

/// Tracks rolling latency and lifetime throughput per source.
pub struct PerformanceTracker {
    sources: RwLock<HashMap<String, SourcePerf>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Record one processed event's latency.
    pub fn record(&self, source: &str, latency: Duration) {
        let mut sources = match self.sources.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let perf = sources
            .entry(source.to_string())
            .or_insert_with(SourcePerf::new);
        if perf.latencies.len() >= LATENCY_RING_SIZE {
            perf.latencies.pop_front();
        }
        perf.latencies.push_back(latency);
        perf.total_processed += 1;
        perf.last_seen = Instant::now();
    }

    /// Arithmetic mean over the ring; zero when the ring is empty.
    pub fn average_latency(&self, source: &str) -> Duration {
        self.read(source, |perf| {
            if perf.latencies.is_empty() {
                return Duration::ZERO;
            }
            let total: Duration = perf.latencies.iter().sum();
            total / perf.latencies.len() as u32
        })
    }

    /// Maximum latency currently in the ring.
    pub fn peak_latency(&self, source: &str) -> Duration {
        self.read(source, |perf| {
            perf.latencies.iter().max().copied().unwrap_or(Duration::ZERO)
        })
    }

    /// Lifetime events/sec since the source first appeared; zero when inactive.
    pub fn throughput(&self, source: &str) -> f64 {
        self.read(source, |perf| {
            let elapsed = perf.started_at.elapsed().as_secs_f64();
            if elapsed <= 0.0 || perf.total_processed == 0 {
                0.0
            } else {
                perf.total_processed as f64 / elapsed
            }
        })
    }

    pub fn total_processed(&self, source: &str) -> u64 {
        self.read(source, |perf| perf.total_processed)
    }

    /// Clear all tracked state for one source.
    pub fn reset(&self, source: &str) {
        let mut sources = match self.sources.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sources.remove(source);
    }

    fn read<T: Default>(&self, source: &str, f: impl FnOnce(&SourcePerf) -> T) -> T {
        let sources = match self.sources.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sources.get(source).map(f).unwrap_or_default()
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_returns_zeros() {
        let tracker = PerformanceTracker::new();
        assert_eq!(tracker.average_latency("trivy"), Duration::ZERO);
        assert_eq!(tracker.peak_latency("trivy"), Duration::ZERO);
        assert_eq!(tracker.throughput("trivy"), 0.0);
    }

    #[test]
    fn average_and_peak() {
        let tracker = PerformanceTracker::new();
        tracker.record("trivy", Duration::from_millis(10));
        tracker.record("trivy", Duration::from_millis(20));
        tracker.record("trivy", Duration::from_millis(30));
        assert_eq!(tracker.average_latency("trivy"), Duration::from_millis(20));
        assert_eq!(tracker.peak_latency("trivy"), Duration::from_millis(30));
        assert_eq!(tracker.total_processed("trivy"), 3);
    }

    #[test]
    fn ring_is_bounded() {
        let tracker = PerformanceTracker::new();
        for _ in 0..(LATENCY_RING_SIZE + 100) {
            tracker.record("falco", Duration::from_millis(1));
        }
        // Total keeps counting past the ring bound.
        assert_eq!(tracker.total_processed("falco"), (LATENCY_RING_SIZE + 100) as u64);
        let sources = tracker.sources.read().unwrap();
        assert_eq!(sources.get("falco").unwrap().latencies.len(), LATENCY_RING_SIZE);
    }

    #[test]
    fn reset_clears_source() {
        let tracker = PerformanceTracker::new();
        tracker.record("trivy", Duration::from_millis(10));
        tracker.reset("trivy");
        assert_eq!(tracker.total_processed("trivy"), 0);
        assert_eq!(tracker.average_latency("trivy"), Duration::ZERO);
    }

    #[test]
    fn sources_are_independent() {
        let tracker = PerformanceTracker::new();
        tracker.record("trivy", Duration::from_millis(10));
        tracker.record("falco", Duration::from_millis(50));
        assert_eq!(tracker.peak_latency("trivy"), Duration::from_millis(10));
        assert_eq!(tracker.peak_latency("falco"), Duration::from_millis(50));
    }
}
