//! Ingester configuration: the declarative wire contract for one producer.
//!
//! Each ingester registers a webhook path, a field mapping that shapes the
//! producer's payload into the canonical `Observation`, and the sinks that
//! receive the normalized records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dotted field paths into the producer payload, plus defaults for fields
/// the producer does not carry.
///
/// Paths use the same dotted syntax as the filter expression DSL
/// (`output_fields.k8s.ns.name`); a missing path yields the default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldMapping {
    pub severity: Option<String>,
    pub namespace: Option<String>,
    pub category: Option<String>,
    pub event_type: Option<String>,
    pub resource_kind: Option<String>,
    pub resource_name: Option<String>,
    pub resource_namespace: Option<String>,
    pub rule: Option<String>,
    /// RFC3339 timestamp path; receive time is used when absent or invalid.
    pub detected_at: Option<String>,
    /// Fallbacks applied when the mapped path is missing.
    pub default_category: Option<String>,
    pub default_event_type: Option<String>,
    /// Severity name (upper-cased) -> priority in [0,1].
    pub priority: HashMap<String, f64>,
}

/// One producer's endpoint and normalization contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngesterConfig {
    /// Producer tag; becomes `Observation::source` (lower-cased).
    pub name: String,
    /// Webhook path registered on the ingress router, e.g. "/falco/webhook".
    pub path: String,
    #[serde(default)]
    pub mapping: FieldMapping,
    /// Sink names receiving this producer's normalized observations.
    #[serde(default)]
    pub sinks: Vec<String>,
    /// Processing order: "auto" (default) or an explicit strategy name.
    #[serde(default = "default_order")]
    pub processing_order: String,
    /// Whether the optimization engine may switch this source's strategy.
    #[serde(default = "default_true")]
    pub auto_optimize: bool,
}

fn default_order() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

impl IngesterConfig {
    /// Lower-cased source tag for filter/metric scoping.
    pub fn source_tag(&self) -> String {
        self.name.to_lowercase()
    }

    /// The decider-facing ordering preference.
    pub fn order_preference(&self) -> crate::pipeline::OrderPreference {
        crate::pipeline::OrderPreference {
            order: crate::pipeline::Strategy::parse(&self.processing_order),
            auto_optimize: self.auto_optimize,
        }
    }
}
