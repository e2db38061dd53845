//! Adaptive dedup-cache sizing loop.
//!
//! Every tick the sizer derives a pressure score and maps it onto a target
//! entry capacity between the configured low and high sizes, publishes the
//! target to the cache, and sweeps expired entries. Memory-based sizing
//! combines a 0.7-weighted resident-set term with a 0.3-weighted growth
//! term; traffic-based sizing interpolates on aggregate events/sec.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::memory::MemoryProbe;
use crate::config::defaults::{MEMORY_PRESSURE_HIGH, MEMORY_PRESSURE_LOW, SIZER_HISTORY_SIZE};
use crate::config::AdaptiveConfig;
use crate::metrics::{MetricsCollector, MetricsRegistry};
use crate::pipeline::DedupCache;

/// One sizing pass, kept for logging.
#[derive(Debug, Clone, Copy)]
struct SizingSample {
    pressure: Option<f64>,
    events_per_sec: f64,
    target: usize,
}

pub struct CacheSizer {
    config: AdaptiveConfig,
    dedup: Arc<DedupCache>,
    collector: Arc<MetricsCollector>,
    metrics: Arc<MetricsRegistry>,
    probe: MemoryProbe,
}

impl CacheSizer {
    pub fn new(
        config: AdaptiveConfig,
        dedup: Arc<DedupCache>,
        collector: Arc<MetricsCollector>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            dedup,
            collector,
            metrics,
            probe: MemoryProbe::new(),
        }
    }

    /// Run the sizing loop until cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.cache_interval_secs,
            memory_based = self.config.memory_based_sizing,
            "Cache sizer started"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.cache_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;

        let mut history: VecDeque<SizingSample> = VecDeque::with_capacity(SIZER_HISTORY_SIZE);
        let mut prev_rss: Option<u64> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cache sizer stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let events_per_sec = self.collector.total_events_per_second();
            let (pressure, target) = self.compute_target(events_per_sec, &mut prev_rss);

            self.dedup.set_capacity(target);
            self.dedup.sweep();
            self.metrics
                .set_gauge("dedup_cache_target_size", &[], target as u64);
            self.metrics
                .set_gauge("dedup_cache_entries", &[], self.dedup.len() as u64);

            let sample = SizingSample {
                pressure,
                events_per_sec,
                target,
            };
            if history.len() >= SIZER_HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(sample);

            debug!(
                pressure = ?pressure,
                events_per_sec,
                target,
                entries = self.dedup.len(),
                "Cache sizing pass"
            );
        }
    }

    /// Target capacity for the current conditions. Returns the pressure
    /// score when memory-based sizing was used.
    fn compute_target(&self, events_per_sec: f64, prev_rss: &mut Option<u64>) -> (Option<f64>, usize) {
        if self.config.memory_based_sizing {
            if let Some(sample) = self.probe.sample() {
                let growth = match *prev_rss {
                    Some(prev) if prev > 0 && sample.rss_bytes > prev => {
                        ((sample.rss_bytes - prev) as f64 / prev as f64).clamp(0.0, 1.0)
                    }
                    _ => 0.0,
                };
                *prev_rss = Some(sample.rss_bytes);

                let pressure = (0.7 * sample.rss_fraction() + 0.3 * growth).clamp(0.0, 1.0);
                return (Some(pressure), self.target_from_pressure(pressure));
            }
            // Probe unavailable: fall through to traffic-based sizing.
        }
        (None, self.target_from_traffic(events_per_sec))
    }

    /// High pressure shrinks toward the low size; low pressure grows toward
    /// the high size; linear in between.
    fn target_from_pressure(&self, pressure: f64) -> usize {
        let low = self.config.cache_low_size as f64;
        let high = self.config.cache_high_size as f64;
        if pressure > MEMORY_PRESSURE_HIGH {
            return self.config.cache_low_size;
        }
        if pressure < MEMORY_PRESSURE_LOW {
            return self.config.cache_high_size;
        }
        let span = MEMORY_PRESSURE_HIGH - MEMORY_PRESSURE_LOW;
        let t = (pressure - MEMORY_PRESSURE_LOW) / span;
        (high - t * (high - low)).round() as usize
    }

    /// Light traffic keeps the cache small; heavy traffic grows it.
    fn target_from_traffic(&self, events_per_sec: f64) -> usize {
        let low_eps = self.config.traffic_low_eps;
        let high_eps = self.config.traffic_high_eps;
        if events_per_sec < low_eps {
            return self.config.cache_low_size;
        }
        if events_per_sec > high_eps {
            return self.config.cache_high_size;
        }
        let t = (events_per_sec - low_eps) / (high_eps - low_eps).max(f64::EPSILON);
        let low = self.config.cache_low_size as f64;
        let high = self.config.cache_high_size as f64;
        (low + t * (high - low)).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer(memory_based: bool) -> CacheSizer {
        let config = AdaptiveConfig {
            memory_based_sizing: memory_based,
            cache_low_size: 1_000,
            cache_high_size: 50_000,
            traffic_low_eps: 50.0,
            traffic_high_eps: 500.0,
            ..Default::default()
        };
        let metrics = Arc::new(MetricsRegistry::new());
        CacheSizer::new(
            config,
            Arc::new(DedupCache::with_defaults()),
            Arc::new(MetricsCollector::new(Duration::from_secs(600))),
            metrics,
        )
    }

    #[test]
    fn pressure_extremes_pin_to_bounds() {
        let s = sizer(true);
        assert_eq!(s.target_from_pressure(0.9), 1_000);
        assert_eq!(s.target_from_pressure(0.1), 50_000);
    }

    #[test]
    fn pressure_midpoint_interpolates() {
        let s = sizer(true);
        let mid = s.target_from_pressure(0.55);
        assert!(mid > 1_000 && mid < 50_000);
        // Monotonic: more pressure, smaller cache.
        assert!(s.target_from_pressure(0.7) < s.target_from_pressure(0.4));
    }

    #[test]
    fn traffic_extremes_pin_to_bounds() {
        let s = sizer(false);
        assert_eq!(s.target_from_traffic(10.0), 1_000);
        assert_eq!(s.target_from_traffic(1_000.0), 50_000);
    }

    #[test]
    fn traffic_midpoint_interpolates_monotonically() {
        let s = sizer(false);
        let a = s.target_from_traffic(100.0);
        let b = s.target_from_traffic(400.0);
        assert!(a < b);
        assert!(a > 1_000 && b < 50_000);
    }

    #[tokio::test]
    async fn loop_publishes_target_and_stops_on_cancel() {
        let config = AdaptiveConfig {
            cache_interval_secs: 1,
            memory_based_sizing: false,
            ..Default::default()
        };
        let dedup = Arc::new(DedupCache::with_defaults());
        let metrics = Arc::new(MetricsRegistry::new());
        let sizer = CacheSizer::new(
            config,
            dedup.clone(),
            Arc::new(MetricsCollector::new(Duration::from_secs(600))),
            metrics,
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sizer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Idle traffic pins the capacity at the low bound.
        assert_eq!(dedup.capacity(), 1_000);
    }
}
