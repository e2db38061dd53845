//! Payload normalization: raw producer JSON -> canonical `Observation`.
//!
//! The shaping is driven entirely by the ingester's declared field mapping;
//! nothing here knows producer specifics. Missing mapped paths fall back to
//! the mapping's defaults, and an unmappable timestamp falls back to the
//! ingress receive time.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::{FieldMapping, IngesterConfig};
use crate::types::{Observation, RawEvent, ResourceRef, Severity};

/// Walk a dotted path through nested objects; numeric segments index arrays.
pub fn json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn mapped_string(payload: &Value, path: &Option<String>) -> Option<String> {
    let path = path.as_deref()?;
    let value = json_path(payload, path)?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn mapped_timestamp(payload: &Value, mapping: &FieldMapping) -> Option<DateTime<Utc>> {
    let raw = mapped_string(payload, &mapping.detected_at)?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Shape a raw event into the canonical observation per the ingester's
/// mapping. Infallible: every field has a defined fallback.
pub fn normalize(ingester: &IngesterConfig, raw: &RawEvent) -> Observation {
    let mapping = &ingester.mapping;
    let payload = &raw.payload;

    let severity = mapped_string(payload, &mapping.severity)
        .and_then(|s| Severity::parse(&s))
        .unwrap_or_default();

    let category = mapped_string(payload, &mapping.category)
        .or_else(|| mapping.default_category.clone())
        .unwrap_or_else(|| "unknown".to_string())
        .to_lowercase();

    let event_type = mapped_string(payload, &mapping.event_type)
        .or_else(|| mapping.default_event_type.clone())
        .unwrap_or_else(|| "event".to_string());

    let namespace = mapped_string(payload, &mapping.namespace).unwrap_or_default();

    let resource = ResourceRef {
        kind: mapped_string(payload, &mapping.resource_kind).unwrap_or_default(),
        name: mapped_string(payload, &mapping.resource_name).unwrap_or_default(),
        namespace: mapped_string(payload, &mapping.resource_namespace)
            .unwrap_or_else(|| namespace.clone()),
    };

    // Details carry the full payload object so downstream filters and sinks
    // can address producer-specific fields, plus the extracted rule.
    let mut details: Map<String, Value> = match payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };
    if let Some(rule) = mapped_string(payload, &mapping.rule) {
        details.insert("rule".to_string(), Value::String(rule));
    }

    let priority = mapping.priority.get(severity.as_str()).copied();

    Observation {
        source: ingester.source_tag(),
        category,
        event_type,
        severity,
        namespace,
        resource,
        details,
        detected_at: mapped_timestamp(payload, mapping).unwrap_or(raw.received_at),
        priority,
        correlation_id: raw.correlation_id.clone(),
    }
}
