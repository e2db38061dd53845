//! Adaptive dedup-window sizing loop.
//!
//! Every tick the sizer looks at events/sec over the five-minute sample:
//! quiet sources keep the long window (more collapsing), floods shrink to
//! the short window (bounded memory and fresher emissions), and anything in
//! between takes the arithmetic mean of the two bounds. The bounded sample
//! history exists for logging only, never policy.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::defaults::{SIZER_HISTORY_SIZE, WINDOW_SAMPLE_SECS};
use crate::config::AdaptiveConfig;
use crate::metrics::{MetricsCollector, MetricsRegistry};
use crate::pipeline::DedupCache;

pub struct WindowSizer {
    config: AdaptiveConfig,
    dedup: Arc<DedupCache>,
    collector: Arc<MetricsCollector>,
    metrics: Arc<MetricsRegistry>,
}

impl WindowSizer {
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
        }
    }

    /// Run the sizing loop until cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.window_interval_secs,
            short_secs = self.config.window_short_secs,
            long_secs = self.config.window_long_secs,
            "Dedup window sizer started"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.window_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut history: VecDeque<(f64, u64)> = VecDeque::with_capacity(SIZER_HISTORY_SIZE);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Dedup window sizer stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let events_per_sec = self
                .collector
                .events_per_second_over(Duration::from_secs(WINDOW_SAMPLE_SECS));
            let window_secs = self.window_for(events_per_sec);

            self.dedup.set_window(Duration::from_secs(window_secs));
            self.metrics.set_gauge("dedup_window_seconds", &[], window_secs);

            if history.len() >= SIZER_HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back((events_per_sec, window_secs));

            debug!(events_per_sec, window_secs, "Dedup window sizing pass");
        }
    }

    fn window_for(&self, events_per_sec: f64) -> u64 {
        if events_per_sec < self.config.traffic_low_eps {
            self.config.window_long_secs
        } else if events_per_sec > self.config.traffic_high_eps {
            self.config.window_short_secs
        } else {
            (self.config.window_short_secs + self.config.window_long_secs) / 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> WindowSizer {
        let config = AdaptiveConfig {
            window_short_secs: 60,
            window_long_secs: 900,
            traffic_low_eps: 50.0,
            traffic_high_eps: 500.0,
            ..Default::default()
        };
        WindowSizer::new(
            config,
            Arc::new(DedupCache::with_defaults()),
            Arc::new(MetricsCollector::new(Duration::from_secs(600))),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn quiet_traffic_gets_long_window() {
        assert_eq!(sizer().window_for(5.0), 900);
    }

    #[test]
    fn flood_traffic_gets_short_window() {
        assert_eq!(sizer().window_for(1_000.0), 60);
    }

    #[test]
    fn mid_traffic_gets_the_mean() {
        assert_eq!(sizer().window_for(200.0), 480);
    }

    #[tokio::test]
    async fn loop_publishes_window_and_stops_on_cancel() {
        let config = AdaptiveConfig {
            window_interval_secs: 1,
            window_short_secs: 60,
            window_long_secs: 900,
            ..Default::default()
        };
        let dedup = Arc::new(DedupCache::with_defaults());
        let sizer = WindowSizer::new(
            config,
            dedup.clone(),
            Arc::new(MetricsCollector::new(Duration::from_secs(600))),
            Arc::new(MetricsRegistry::new()),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sizer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(dedup.window(), Duration::from_secs(900));
    }
}
