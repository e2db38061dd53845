//! Shared data structures for the observation pipeline
//!
//! This module defines the core types flowing through the watcher:
//! - Ingress: RawEvent (webhook payload + envelope metadata)
//! - Pipeline: Observation (the canonical normalized record), Severity
//! - Sinks: Observation is the only type that crosses the sink boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Severity
// ============================================================================

/// Severity of an observation, ordered CRITICAL > HIGH > MEDIUM > LOW > UNKNOWN.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl Severity {
    /// Ordinal rank used for min-severity comparisons.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Unknown => 0,
        }
    }

    /// Parse a severity string case-insensitively. Unrecognized values map to None.
    pub fn parse(s: &str) -> Option<Severity> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Severity::Critical),
            "HIGH" => Some(Severity::High),
            "MEDIUM" => Some(Severity::Medium),
            "LOW" => Some(Severity::Low),
            "UNKNOWN" => Some(Severity::Unknown),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

// ============================================================================
// Observation
// ============================================================================

/// Reference to the cluster resource an observation is about.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourceRef {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// The canonical normalized event record emitted to sinks.
///
/// Invariants: `source` is non-empty and lower-cased after normalization,
/// `severity` is upper-cased on the wire. `detected_at` is monotonic-ish per
/// source but carries no global ordering guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Producer tag (lower-cased), e.g. "falco", "trivy", "kyverno".
    pub source: String,
    /// Domain, e.g. "security", "compliance", "vulnerability".
    pub category: String,
    pub event_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub resource: ResourceRef,
    /// Free-form payload fields; includes `rule` for policy-style sources.
    #[serde(default)]
    pub details: Map<String, Value>,
    pub detected_at: DateTime<Utc>,
    /// Mapped priority in [0,1] when the producer's severity table covers it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    pub correlation_id: String,
}

impl Observation {
    /// The `rule` detail field, when present (policy-engine sources).
    pub fn rule(&self) -> Option<&str> {
        self.details.get("rule").and_then(Value::as_str)
    }

    /// Dedup fingerprint: stable digest over the identity-bearing fields.
    ///
    /// Excludes `detected_at` and `correlation_id` so repeated firings of the
    /// same finding collapse inside the dedup window.
    pub fn fingerprint(&self) -> String {
        let key = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.source,
            self.category,
            self.event_type,
            self.namespace,
            self.resource.kind,
            self.resource.name,
            self.rule().unwrap_or(""),
        );
        format!("{:x}", md5::compute(key.as_bytes()))
    }

    /// Nested JSON view consumed by the expression evaluator's field paths.
    ///
    /// Top-level keys mirror the wire form; the whole record is additionally
    /// mirrored under `spec.*` because operator-written expressions address
    /// fields that way (`spec.severity >= "HIGH"`).
    pub fn as_json(&self) -> Value {
        let mut root = serde_json::json!({
            "source": self.source,
            "category": self.category,
            "eventType": self.event_type,
            "severity": self.severity.as_str(),
            "namespace": self.namespace,
            "resource": {
                "kind": self.resource.kind,
                "name": self.resource.name,
                "namespace": self.resource.namespace,
            },
            "details": Value::Object(self.details.clone()),
            "detectedAt": self.detected_at.to_rfc3339(),
            "correlationId": self.correlation_id,
        });
        if let Some(p) = self.priority {
            root["priority"] = serde_json::json!(p);
        }
        let spec = root.clone();
        root["spec"] = spec;
        root
    }
}

/// Generate a fresh correlation id for events that arrive without one.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Raw ingress events
// ============================================================================

/// A decoded webhook payload plus its ingress envelope, queued for the pipeline.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Name of the ingester whose endpoint accepted this payload.
    pub ingester: String,
    /// Decoded JSON body as received from the producer.
    pub payload: Value,
    /// Correlation id: taken from the payload when present, else generated.
    pub correlation_id: String,
    /// Wall-clock receive time, used for end-to-end latency accounting.
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_observation() -> Observation {
        Observation {
            source: "trivy".to_string(),
            category: "vulnerability".to_string(),
            event_type: "CVE-2024-1234".to_string(),
            severity: Severity::High,
            namespace: "default".to_string(),
            resource: ResourceRef {
                kind: "Deployment".to_string(),
                name: "web".to_string(),
                namespace: "default".to_string(),
            },
            details: Map::new(),
            detected_at: Utc::now(),
            priority: Some(0.8),
            correlation_id: "abc-123".to_string(),
        }
    }

    #[test]
    fn severity_ordering_matches_rank() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Unknown);
    }

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("  High "), Some(Severity::High));
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn severity_serializes_upper_case() {
        let json = serde_json::to_string(&Severity::Medium).unwrap();
        assert_eq!(json, "\"MEDIUM\"");
    }

    #[test]
    fn fingerprint_ignores_timestamps() {
        let a = sample_observation();
        let mut b = a.clone();
        b.detected_at = Utc::now() + chrono::Duration::seconds(30);
        b.correlation_id = "different".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_resource() {
        let a = sample_observation();
        let mut b = a.clone();
        b.resource.name = "api".to_string();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn as_json_mirrors_under_spec() {
        let obs = sample_observation();
        let v = obs.as_json();
        assert_eq!(v["severity"], "HIGH");
        assert_eq!(v["spec"]["severity"], "HIGH");
        assert_eq!(v["spec"]["resource"]["kind"], "Deployment");
    }

    #[test]
    fn observation_round_trips_camel_case() {
        let obs = sample_observation();
        let json = serde_json::to_value(&obs).unwrap();
        assert!(json.get("eventType").is_some());
        assert!(json.get("detectedAt").is_some());
        let back: Observation = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type, obs.event_type);
    }
}
