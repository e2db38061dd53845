//! Processing-order strategy selection.
//!
//! The decider maps a source's rolling metrics onto one of the four stage
//! orders. Thresholds are configurable; the defaults encode the observed
//! break-even points: heavy low-severity traffic favors filtering first,
//! high duplicate ratios favor deduplication first.

use serde::{Deserialize, Serialize};

use crate::metrics::OptimizationMetrics;

/// Processing-stage order used by the pipeline workers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    FilterFirst,
    DedupFirst,
    /// Dedup-first for low-severity events, filter-first otherwise.
    Hybrid,
    /// Per-event order chosen from the last effectiveness snapshot.
    Adaptive,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::FilterFirst => "filter_first",
            Strategy::DedupFirst => "dedup_first",
            Strategy::Hybrid => "hybrid",
            Strategy::Adaptive => "adaptive",
        }
    }

    /// Parse a configured order name; "auto" and unknown values yield None.
    pub fn parse(s: &str) -> Option<Strategy> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter_first" => Some(Strategy::FilterFirst),
            "dedup_first" => Some(Strategy::DedupFirst),
            "hybrid" => Some(Strategy::Hybrid),
            "adaptive" => Some(Strategy::Adaptive),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source's configured ordering preference.
#[derive(Debug, Clone, Default)]
pub struct OrderPreference {
    /// Explicit order; `None` means "auto".
    pub order: Option<Strategy>,
    /// Whether automatic strategy optimization may run for this source.
    pub auto_optimize: bool,
}

/// Thresholds gating each strategy, plus the hysteresis knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyThresholds {
    /// Low-severity share at or above which filter-first wins.
    pub low_severity_ratio: f64,
    /// Dedup effectiveness at or above which dedup-first wins.
    pub dedup_effectiveness: f64,
    /// Events/minute at or above which hybrid is considered.
    pub volume_per_minute: f64,
    /// Dedup effectiveness band (exclusive) that qualifies for hybrid.
    pub hybrid_dedup_low: f64,
    /// Minimum confidence for an applied switch.
    pub confidence_threshold: f64,
    /// Minimum seconds between applied switches for one source.
    pub cooldown_secs: u64,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            low_severity_ratio: 0.70,
            dedup_effectiveness: 0.50,
            volume_per_minute: 100.0,
            hybrid_dedup_low: 0.30,
            confidence_threshold: crate::config::defaults::STRATEGY_CONFIDENCE_THRESHOLD,
            cooldown_secs: crate::config::defaults::STRATEGY_COOLDOWN_SECS,
        }
    }
}

/// Outcome of a strategy decision.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDecision {
    pub strategy: Strategy,
    /// Self-assessed strength in [0,1].
    pub confidence: f64,
    pub rationale: String,
}

/// Stateless decider over rolling metrics and configured preferences.
#[derive(Debug, Clone)]
pub struct StrategyDecider {
    thresholds: StrategyThresholds,
}

impl StrategyDecider {
    pub fn new(thresholds: StrategyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &StrategyThresholds {
        &self.thresholds
    }

    /// Pick a strategy for a source.
    ///
    /// A non-auto configured order always wins. With auto-optimize disabled
    /// or no metrics, the source default (filter-first) applies.
    pub fn decide(
        &self,
        metrics: Option<&OptimizationMetrics>,
        pref: &OrderPreference,
    ) -> StrategyDecision {
        if let Some(configured) = pref.order {
            return StrategyDecision {
                strategy: configured,
                confidence: 1.0,
                rationale: "configured order".to_string(),
            };
        }

        if !pref.auto_optimize {
            return StrategyDecision {
                strategy: Strategy::FilterFirst,
                confidence: 1.0,
                rationale: "auto-optimize disabled".to_string(),
            };
        }

        let Some(m) = metrics else {
            return StrategyDecision {
                strategy: Strategy::FilterFirst,
                confidence: self.confidence(None, Strategy::FilterFirst),
                rationale: "no metrics yet".to_string(),
            };
        };

        let t = &self.thresholds;
        let (strategy, rationale) = if m.low_severity_percent >= t.low_severity_ratio {
            (
                Strategy::FilterFirst,
                format!("low-severity share {:.2} >= {:.2}", m.low_severity_percent, t.low_severity_ratio),
            )
        } else if m.dedup_effectiveness >= t.dedup_effectiveness {
            (
                Strategy::DedupFirst,
                format!("dedup effectiveness {:.2} >= {:.2}", m.dedup_effectiveness, t.dedup_effectiveness),
            )
        } else if m.events_per_minute >= t.volume_per_minute
            && m.dedup_effectiveness > t.hybrid_dedup_low
            && m.dedup_effectiveness < t.dedup_effectiveness
        {
            (
                Strategy::Hybrid,
                format!("volume {:.0}/min with mid-band dedup {:.2}", m.events_per_minute, m.dedup_effectiveness),
            )
        } else if m.events_per_minute >= 2.0 * t.volume_per_minute {
            (
                Strategy::Adaptive,
                format!("volume {:.0}/min >= 2x threshold", m.events_per_minute),
            )
        } else {
            (Strategy::FilterFirst, "no threshold crossed".to_string())
        };

        StrategyDecision {
            strategy,
            confidence: self.confidence(Some(m), strategy),
            rationale,
        }
    }

    /// Whether a threshold is crossed at all (and auto-optimize allows acting).
    pub fn should_optimize(&self, metrics: Option<&OptimizationMetrics>, pref: &OrderPreference) -> bool {
        if !pref.auto_optimize || pref.order.is_some() {
            return false;
        }
        let Some(m) = metrics else { return false };
        let t = &self.thresholds;
        m.low_severity_percent >= t.low_severity_ratio
            || m.dedup_effectiveness >= t.dedup_effectiveness
            || m.events_per_minute >= t.volume_per_minute
    }

    /// Confidence: base 0.5, bonuses for sample size, clear-cut
    /// effectiveness margins, and strong volume. Clamped to 1.0.
    fn confidence(&self, metrics: Option<&OptimizationMetrics>, strategy: Strategy) -> f64 {
        let mut confidence: f64 = 0.5;
        let Some(m) = metrics else {
            return confidence;
        };
        let t = &self.thresholds;

        if m.processed >= 500 {
            confidence += 0.2;
        }

        let clear_margin = match strategy {
            Strategy::FilterFirst => m.low_severity_percent - t.low_severity_ratio,
            Strategy::DedupFirst => m.dedup_effectiveness - t.dedup_effectiveness,
            Strategy::Hybrid | Strategy::Adaptive => 0.0,
        };
        if clear_margin >= 0.15 {
            confidence += 0.2;
        }

        if m.events_per_minute >= 2.0 * t.volume_per_minute {
            confidence += 0.1;
        }

        confidence.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(low_sev: f64, dedup: f64, epm: f64, processed: u64) -> OptimizationMetrics {
        OptimizationMetrics {
            processed,
            low_severity_percent: low_sev,
            dedup_effectiveness: dedup,
            events_per_minute: epm,
            ..Default::default()
        }
    }

    fn auto_pref() -> OrderPreference {
        OrderPreference {
            order: None,
            auto_optimize: true,
        }
    }

    #[test]
    fn configured_order_wins() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let m = metrics(0.95, 0.9, 1000.0, 1000);
        let d = decider.decide(
            Some(&m),
            &OrderPreference {
                order: Some(Strategy::DedupFirst),
                auto_optimize: true,
            },
        );
        assert_eq!(d.strategy, Strategy::DedupFirst);
        assert!((d.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn auto_optimize_disabled_uses_default() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let m = metrics(0.95, 0.9, 1000.0, 1000);
        let d = decider.decide(
            Some(&m),
            &OrderPreference {
                order: None,
                auto_optimize: false,
            },
        );
        assert_eq!(d.strategy, Strategy::FilterFirst);
    }

    #[test]
    fn no_metrics_uses_default() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let d = decider.decide(None, &auto_pref());
        assert_eq!(d.strategy, Strategy::FilterFirst);
        assert!((d.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn low_severity_picks_filter_first() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let m = metrics(0.75, 0.1, 50.0, 100);
        assert_eq!(decider.decide(Some(&m), &auto_pref()).strategy, Strategy::FilterFirst);
    }

    #[test]
    fn high_dedup_picks_dedup_first() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let m = metrics(0.2, 0.6, 50.0, 100);
        assert_eq!(decider.decide(Some(&m), &auto_pref()).strategy, Strategy::DedupFirst);
    }

    #[test]
    fn mid_band_dedup_at_volume_picks_hybrid() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let m = metrics(0.2, 0.4, 150.0, 300);
        assert_eq!(decider.decide(Some(&m), &auto_pref()).strategy, Strategy::Hybrid);
    }

    #[test]
    fn double_volume_picks_adaptive() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let m = metrics(0.2, 0.1, 250.0, 500);
        assert_eq!(decider.decide(Some(&m), &auto_pref()).strategy, Strategy::Adaptive);
    }

    #[test]
    fn confidence_grows_with_samples_and_margin() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let weak = metrics(0.71, 0.1, 50.0, 50);
        let strong = metrics(0.95, 0.1, 250.0, 2000);
        let weak_d = decider.decide(Some(&weak), &auto_pref());
        let strong_d = decider.decide(Some(&strong), &auto_pref());
        assert!(strong_d.confidence > weak_d.confidence);
        assert!(strong_d.confidence <= 1.0);
    }

    #[test]
    fn should_optimize_requires_auto_and_threshold() {
        let decider = StrategyDecider::new(StrategyThresholds::default());
        let hot = metrics(0.9, 0.1, 50.0, 100);
        let cold = metrics(0.1, 0.1, 5.0, 10);
        assert!(decider.should_optimize(Some(&hot), &auto_pref()));
        assert!(!decider.should_optimize(Some(&cold), &auto_pref()));
        assert!(!decider.should_optimize(
            Some(&hot),
            &OrderPreference {
                order: None,
                auto_optimize: false
            }
        ));
        assert!(!decider.should_optimize(None, &auto_pref()));
    }

    #[test]
    fn strategy_names_round_trip() {
        for s in [
            Strategy::FilterFirst,
            Strategy::DedupFirst,
            Strategy::Hybrid,
            Strategy::Adaptive,
        ] {
            assert_eq!(Strategy::parse(s.as_str()), Some(s));
        }
        assert_eq!(Strategy::parse("auto"), None);
    }
}
