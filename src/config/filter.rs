//! Filter configuration: per-source list filters plus the optional
//! boolean expression, and the layered-merge algebra.
//!
//! The on-wire form is the JSON payload of the filter ConfigMap key. Field
//! names accept both camelCase and the PascalCase spelling older payloads
//! carry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Severity;

// ============================================================================
// Source filter
// ============================================================================

/// Filter rules scoped to a single producer.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceFilter {
    /// `None` means enabled; only an explicit `false` disables the source.
    #[serde(alias = "Enabled")]
    pub enabled: Option<bool>,
    /// Minimum severity, compared on the CRITICAL>HIGH>MEDIUM>LOW>UNKNOWN
    /// ordering. An unparseable value is treated as "no opinion".
    #[serde(alias = "MinSeverity")]
    pub min_severity: Option<String>,
    /// Exact severity allow-list; non-empty overrides `min_severity`.
    #[serde(alias = "IncludeSeverity")]
    pub include_severity: Vec<String>,
    #[serde(alias = "ExcludeEventTypes")]
    pub exclude_event_types: Vec<String>,
    #[serde(alias = "IncludeEventTypes")]
    pub include_event_types: Vec<String>,
    #[serde(alias = "ExcludeNamespaces")]
    pub exclude_namespaces: Vec<String>,
    #[serde(alias = "IncludeNamespaces")]
    pub include_namespaces: Vec<String>,
    #[serde(alias = "ExcludeKinds")]
    pub exclude_kinds: Vec<String>,
    #[serde(alias = "IncludeKinds")]
    pub include_kinds: Vec<String>,
    /// Alias list folded into `exclude_kinds` at load time.
    #[serde(alias = "IgnoreKinds")]
    pub ignore_kinds: Vec<String>,
    #[serde(alias = "ExcludeCategories")]
    pub exclude_categories: Vec<String>,
    #[serde(alias = "IncludeCategories")]
    pub include_categories: Vec<String>,
    /// Policy rule names to drop (exclude only; empty rules are skipped).
    #[serde(alias = "ExcludeRules")]
    pub exclude_rules: Vec<String>,
}

impl SourceFilter {
    /// Effective minimum severity, when one is configured and parseable.
    pub fn min_severity_rank(&self) -> Option<Severity> {
        self.min_severity.as_deref().and_then(Severity::parse)
    }

    /// Source enabled unless explicitly disabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }
}

// ============================================================================
// Filter config
// ============================================================================

/// Complete filter configuration: global namespace lists, the optional
/// expression, and per-source rules keyed by lower-cased source name.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Boolean expression DSL; evaluated before list rules when non-empty.
    #[serde(alias = "Expression")]
    pub expression: String,
    #[serde(alias = "IncludeNamespaces")]
    pub include_namespaces: Vec<String>,
    #[serde(alias = "ExcludeNamespaces")]
    pub exclude_namespaces: Vec<String>,
    #[serde(alias = "Sources")]
    pub sources: HashMap<String, SourceFilter>,
}

impl FilterConfig {
    /// Allow-all config with an initialized source map.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalize in place: lower-case source keys and fold `ignore_kinds`
    /// into `exclude_kinds`. Idempotent.
    pub fn normalize(&mut self) {
        let sources = std::mem::take(&mut self.sources);
        for (key, mut filter) in sources {
            let ignored = std::mem::take(&mut filter.ignore_kinds);
            for kind in ignored {
                push_unique_ci(&mut filter.exclude_kinds, kind);
            }
            self.sources.insert(key.to_lowercase(), filter);
        }
    }

    /// Look up the filter for a source tag (callers pass lower-case).
    pub fn source(&self, source: &str) -> Option<&SourceFilter> {
        self.sources.get(source)
    }
}

// ============================================================================
// Layered merge
// ============================================================================

/// Merge layered filter configs (base first, overlays after).
///
/// - Exclude lists union, deduplicated case-insensitively with the first-seen
///   case preserved.
/// - Include lists intersect; an empty list carries no opinion.
/// - `min_severity` takes the more restrictive (higher ordinal) value.
/// - `enabled` is a logical AND with explicit `false` dominating.
/// - A later non-empty `expression` replaces an earlier one.
///
/// Pure and associative; no inputs yields an empty allow-all config.
pub fn merge_filter_configs(layers: &[FilterConfig]) -> FilterConfig {
    let mut merged = FilterConfig::empty();

    for layer in layers {
        let mut layer = layer.clone();
        layer.normalize();

        if !layer.expression.is_empty() {
            merged.expression = layer.expression.clone();
        }
        union_ci(&mut merged.exclude_namespaces, &layer.exclude_namespaces);
        intersect_ci(&mut merged.include_namespaces, &layer.include_namespaces);

        for (source, filter) in layer.sources {
            match merged.sources.get_mut(&source) {
                Some(existing) => merge_source_filter(existing, &filter),
                None => {
                    merged.sources.insert(source, filter);
                }
            }
        }
    }

    merged
}

fn merge_source_filter(base: &mut SourceFilter, overlay: &SourceFilter) {
    base.enabled = match (base.enabled, overlay.enabled) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), _) | (_, Some(true)) => Some(true),
        (None, None) => None,
    };

    base.min_severity = match (base.min_severity_rank(), overlay.min_severity_rank()) {
        (Some(a), Some(b)) => {
            let winner = if a >= b { a } else { b };
            Some(winner.as_str().to_string())
        }
        (Some(a), None) => Some(a.as_str().to_string()),
        (None, Some(b)) => Some(b.as_str().to_string()),
        (None, None) => None,
    };

    intersect_ci(&mut base.include_severity, &overlay.include_severity);
    union_ci(&mut base.exclude_event_types, &overlay.exclude_event_types);
    intersect_ci(&mut base.include_event_types, &overlay.include_event_types);
    union_ci(&mut base.exclude_namespaces, &overlay.exclude_namespaces);
    intersect_ci(&mut base.include_namespaces, &overlay.include_namespaces);
    union_ci(&mut base.exclude_kinds, &overlay.exclude_kinds);
    intersect_ci(&mut base.include_kinds, &overlay.include_kinds);
    union_ci(&mut base.exclude_categories, &overlay.exclude_categories);
    intersect_ci(&mut base.include_categories, &overlay.include_categories);
    union_ci(&mut base.exclude_rules, &overlay.exclude_rules);
}

/// Append `item` unless a case-insensitive equal is already present.
fn push_unique_ci(list: &mut Vec<String>, item: String) {
    if !list.iter().any(|e| e.eq_ignore_ascii_case(&item)) {
        list.push(item);
    }
}

/// Case-insensitive union preserving first-seen case.
fn union_ci(base: &mut Vec<String>, overlay: &[String]) {
    for item in overlay {
        push_unique_ci(base, item.clone());
    }
}

/// Case-insensitive intersection; an empty side carries no opinion.
fn intersect_ci(base: &mut Vec<String>, overlay: &[String]) {
    if overlay.is_empty() {
        return;
    }
    if base.is_empty() {
        *base = overlay.to_vec();
        return;
    }
    base.retain(|e| overlay.iter().any(|o| o.eq_ignore_ascii_case(e)));
}

/// Case-insensitive membership test used across the filter engine.
pub fn contains_ci(list: &[String], item: &str) -> bool {
    list.iter().any(|e| e.eq_ignore_ascii_case(item))
}
