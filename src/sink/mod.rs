//! Sink boundary: where normalized observations leave the pipeline.
//!
//! Concrete durable writers (CRD, blob, message bus) live behind this trait
//! as external collaborators; the in-tree implementations are the log sink
//! for operators and a memory sink for tests. Sink failures are counted by
//! the orchestrator and never retried inline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::Observation;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink {0} rejected observation: {1}")]
    Rejected(String, String),

    #[error("sink {0} unavailable: {1}")]
    Unavailable(String, String),
}

/// A destination for normalized observations.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn emit(&self, observation: &Observation) -> Result<(), SinkError>;
}

// ============================================================================
// Registry
// ============================================================================

/// Named sink lookup used by the orchestrator's emit stage.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, Arc<dyn Sink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.insert(sink.name().to_string(), sink);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Sink>> {
        self.sinks.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.sinks.keys().cloned().collect()
    }
}

// ============================================================================
// Implementations
// ============================================================================

/// Writes each observation as a structured log line.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, observation: &Observation) -> Result<(), SinkError> {
        tracing::info!(
            source = %observation.source,
            severity = %observation.severity,
            category = %observation.category,
            event_type = %observation.event_type,
            namespace = %observation.namespace,
            correlation_id = %observation.correlation_id,
            "observation"
        );
        Ok(())
    }
}

/// Collects observations in memory; test-only destination.
#[derive(Default)]
pub struct MemorySink {
    name: String,
    received: std::sync::Mutex<Vec<Observation>>,
}

impl MemorySink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn drain(&self) -> Vec<Observation> {
        match self.received.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn count(&self) -> usize {
        match self.received.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn emit(&self, observation: &Observation) -> Result<(), SinkError> {
        match self.received.lock() {
            Ok(mut guard) => guard.push(observation.clone()),
            Err(poisoned) => poisoned.into_inner().push(observation.clone()),
        }
        Ok(())
    }
}

/// Always-failing sink for error-path tests.
pub struct FailingSink {
    name: String,
}

impl FailingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn emit(&self, _observation: &Observation) -> Result<(), SinkError> {
        Err(SinkError::Unavailable(self.name.clone(), "always down".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceRef;
    use chrono::Utc;

    fn obs() -> Observation {
        Observation {
            source: "trivy".to_string(),
            category: "vulnerability".to_string(),
            event_type: "CVE-1".to_string(),
            severity: crate::types::Severity::High,
            namespace: "default".to_string(),
            resource: ResourceRef::default(),
            details: serde_json::Map::new(),
            detected_at: Utc::now(),
            priority: None,
            correlation_id: "c".to_string(),
        }
    }

    #[tokio::test]
    async fn memory_sink_collects() {
        let sink = MemorySink::new("mem");
        sink.emit(&obs()).await.unwrap();
        sink.emit(&obs()).await.unwrap();
        assert_eq!(sink.count(), 2);
        assert_eq!(sink.drain().len(), 2);
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn registry_resolves_by_name() {
        let mut registry = SinkRegistry::new();
        registry.register(Arc::new(LogSink));
        registry.register(Arc::new(MemorySink::new("mem")));
        assert!(registry.get("log").is_some());
        assert!(registry.get("mem").is_some());
        assert!(registry.get("crd").is_none());
    }
}
