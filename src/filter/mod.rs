//! Filter engine: per-source list rules plus the expression DSL.
//!
//! The active config is an immutable snapshot behind an `ArcSwap`; updates
//! build a new compiled snapshot (expression parsed once) and publish it
//! atomically, so an evaluation sees either the old or the new config in
//! full, never a mix.

pub mod expression;

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::filter::{contains_ci, FilterConfig};
use crate::metrics::MetricsRegistry;
use crate::types::Observation;
use expression::{evaluate, parse, Expr};

// Reject/allow reason strings recorded in `filter_decisions{...}` and
// returned to callers.
pub const REASON_ALL_PASSED: &str = "all_passed";
pub const REASON_EXPRESSION_PASSED: &str = "expression_passed";
pub const REASON_EXPRESSION_FILTERED: &str = "expression_filtered";
pub const REASON_SOURCE_DISABLED: &str = "source_disabled";
pub const REASON_GLOBAL_EXCLUDE_NAMESPACE: &str = "global_exclude_namespace";
pub const REASON_GLOBAL_INCLUDE_NAMESPACE: &str = "global_include_namespace";
pub const REASON_MIN_SEVERITY: &str = "min_severity";
pub const REASON_INCLUDE_SEVERITY: &str = "include_severity";
pub const REASON_EXCLUDE_EVENT_TYPE: &str = "exclude_event_type";
pub const REASON_INCLUDE_EVENT_TYPE: &str = "include_event_type";
pub const REASON_EXCLUDE_NAMESPACE: &str = "exclude_namespace";
pub const REASON_INCLUDE_NAMESPACE: &str = "include_namespace";
pub const REASON_EXCLUDE_KIND: &str = "exclude_kind";
pub const REASON_INCLUDE_KIND: &str = "include_kind";
pub const REASON_EXCLUDE_CATEGORY: &str = "exclude_category";
pub const REASON_INCLUDE_CATEGORY: &str = "include_category";
pub const REASON_EXCLUDE_RULE: &str = "exclude_rule";

/// Outcome of a filter evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDecision {
    pub allowed: bool,
    pub reason: &'static str,
}

impl FilterDecision {
    fn allow(reason: &'static str) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn reject(reason: &'static str) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Filter config with its expression compiled once per install.
struct CompiledConfig {
    config: FilterConfig,
    /// Parsed expression; `None` when the config has none or parsing failed
    /// (a parse failure bypasses the expression stage, it never rejects).
    expression: Option<Expr>,
}

impl CompiledConfig {
    fn compile(config: FilterConfig) -> Self {
        let expression = if config.expression.is_empty() {
            None
        } else {
            match parse(&config.expression) {
                Ok(ast) => Some(ast),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        expression = %config.expression,
                        "Filter expression failed to parse, falling back to list rules"
                    );
                    None
                }
            }
        };
        Self { config, expression }
    }
}

/// The filter engine. Cheap to clone handles are not needed; share via `Arc`.
pub struct FilterEngine {
    snapshot: ArcSwap<CompiledConfig>,
    metrics: Arc<MetricsRegistry>,
}

impl FilterEngine {
    pub fn new(config: FilterConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(CompiledConfig::compile(config)),
            metrics,
        }
    }

    /// Install a new config snapshot atomically.
    pub fn update_config(&self, mut config: FilterConfig) {
        config.normalize();
        self.snapshot.store(Arc::new(CompiledConfig::compile(config)));
    }

    /// Evaluate an observation. Deterministic for a fixed config snapshot.
    pub fn allow(&self, obs: &Observation) -> FilterDecision {
        let snapshot = self.snapshot.load();
        let decision = Self::evaluate(&snapshot, obs);

        let source_label = if obs.source.is_empty() {
            "unknown".to_string()
        } else {
            obs.source.to_lowercase()
        };
        self.metrics.inc(
            "filter_decisions",
            &[
                ("source", source_label.as_str()),
                ("decision", if decision.allowed { "allow" } else { "reject" }),
                ("reason", decision.reason),
            ],
        );
        decision
    }

    fn evaluate(snapshot: &CompiledConfig, obs: &Observation) -> FilterDecision {
        // 1. Expression stage. Evaluation errors fall through to list rules.
        let mut expression_passed = false;
        if let Some(ref ast) = snapshot.expression {
            match evaluate(ast, &obs.as_json()) {
                Ok(false) => return FilterDecision::reject(REASON_EXPRESSION_FILTERED),
                Ok(true) => expression_passed = true,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        source = %obs.source,
                        "Expression evaluation failed, falling through to list rules"
                    );
                }
            }
        }
        let allow_reason = if expression_passed {
            REASON_EXPRESSION_PASSED
        } else {
            REASON_ALL_PASSED
        };

        // 2. Source scoping: no source or no filter entry means allow.
        let source = obs.source.to_lowercase();
        if source.is_empty() {
            return FilterDecision::allow(allow_reason);
        }
        let Some(filter) = snapshot.config.source(&source) else {
            return FilterDecision::allow(allow_reason);
        };

        // 3. Explicitly disabled source.
        if !filter.is_enabled() {
            return FilterDecision::reject(REASON_SOURCE_DISABLED);
        }

        // 4. Global namespace lists, deny before include. Cluster-scoped
        // events (empty namespace) skip namespace checks.
        if !obs.namespace.is_empty() {
            if contains_ci(&snapshot.config.exclude_namespaces, &obs.namespace) {
                return FilterDecision::reject(REASON_GLOBAL_EXCLUDE_NAMESPACE);
            }
            if !snapshot.config.include_namespaces.is_empty()
                && !contains_ci(&snapshot.config.include_namespaces, &obs.namespace)
            {
                return FilterDecision::reject(REASON_GLOBAL_INCLUDE_NAMESPACE);
            }
        }

        // 5. Severity: the exact allow-list overrides the minimum.
        if !filter.include_severity.is_empty() {
            if !contains_ci(&filter.include_severity, obs.severity.as_str()) {
                return FilterDecision::reject(REASON_INCLUDE_SEVERITY);
            }
        } else if let Some(min) = filter.min_severity_rank() {
            if obs.severity < min {
                return FilterDecision::reject(REASON_MIN_SEVERITY);
            }
        }

        // 6. Exclude-then-include list pairs; exclude short-circuits.
        if let Some(reason) = check_lists(
            &obs.event_type,
            &filter.exclude_event_types,
            &filter.include_event_types,
            REASON_EXCLUDE_EVENT_TYPE,
            REASON_INCLUDE_EVENT_TYPE,
        ) {
            return FilterDecision::reject(reason);
        }
        if !obs.namespace.is_empty() {
            if let Some(reason) = check_lists(
                &obs.namespace,
                &filter.exclude_namespaces,
                &filter.include_namespaces,
                REASON_EXCLUDE_NAMESPACE,
                REASON_INCLUDE_NAMESPACE,
            ) {
                return FilterDecision::reject(reason);
            }
        }
        if let Some(reason) = check_lists(
            &obs.resource.kind,
            &filter.exclude_kinds,
            &filter.include_kinds,
            REASON_EXCLUDE_KIND,
            REASON_INCLUDE_KIND,
        ) {
            return FilterDecision::reject(reason);
        }
        if let Some(reason) = check_lists(
            &obs.category,
            &filter.exclude_categories,
            &filter.include_categories,
            REASON_EXCLUDE_CATEGORY,
            REASON_INCLUDE_CATEGORY,
        ) {
            return FilterDecision::reject(reason);
        }

        // 7. Rule exclusion (policy-engine sources); empty rule is skipped.
        if let Some(rule) = obs.rule() {
            if !rule.is_empty() && contains_ci(&filter.exclude_rules, rule) {
                return FilterDecision::reject(REASON_EXCLUDE_RULE);
            }
        }

        FilterDecision::allow(allow_reason)
    }
}

/// Evaluate an exclude/include list pair for one field. Empty field values
/// skip the check; exclude wins before include is consulted.
fn check_lists(
    value: &str,
    exclude: &[String],
    include: &[String],
    exclude_reason: &'static str,
    include_reason: &'static str,
) -> Option<&'static str> {
    if value.is_empty() {
        return None;
    }
    if contains_ci(exclude, value) {
        return Some(exclude_reason);
    }
    if !include.is_empty() && !contains_ci(include, value) {
        return Some(include_reason);
    }
    None
}
