//! HTTP handlers: webhook intake, health/readiness, metrics, HA reports.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::auth::AuthConfig;
use super::ratelimit::{rate_limit_key, RateLimiter};
use crate::adaptive::MemoryProbe;
use crate::config::defaults;
use crate::metrics::{MetricsCollector, MetricsRegistry};
use crate::role::RoleChecker;
use crate::types::{new_correlation_id, RawEvent};

/// Replica identity for the HA endpoints.
#[derive(Debug, Clone)]
pub struct ReplicaIdentity {
    pub id: String,
    pub namespace: String,
}

impl ReplicaIdentity {
    /// `HOSTNAME` + `POD_NAMESPACE`, namespace falling back to the
    /// service-account file, then "default".
    pub fn from_env() -> Self {
        let id = std::env::var("HOSTNAME").unwrap_or_else(|_| "zen-watcher".to_string());
        let namespace = std::env::var("POD_NAMESPACE")
            .ok()
            .or_else(|| {
                std::fs::read_to_string(defaults::SERVICE_ACCOUNT_NAMESPACE_FILE)
                    .ok()
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "default".to_string());
        Self { id, namespace }
    }
}

/// Shared state for all ingress handlers.
#[derive(Clone)]
pub struct IngressState {
    pub auth: Arc<AuthConfig>,
    pub limiter: Arc<RateLimiter>,
    pub events: mpsc::Sender<RawEvent>,
    pub metrics: Arc<MetricsRegistry>,
    pub collector: Arc<MetricsCollector>,
    pub ready: Arc<AtomicBool>,
    pub replica: ReplicaIdentity,
    pub role: Option<Arc<RoleChecker>>,
}

impl IngressState {
    fn count_request(&self, endpoint: &str, code: &str) {
        self.metrics.inc(
            "webhook_requests_total",
            &[("endpoint", endpoint), ("code", code)],
        );
    }
}

// ============================================================================
// Webhook intake
// ============================================================================

/// One configured ingester's POST endpoint.
///
/// Order: auth -> rate limit -> decode -> enqueue. The body-size cap runs in
/// the router layer (413 before this handler sees the request), and axum's
/// method routing answers 405 for non-POST.
pub async fn webhook(
    endpoint: String,
    path: String,
    State(state): State<IngressState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Authentication.
    if let Err(failure) = state.auth.authorize(peer.ip(), &headers) {
        warn!(
            endpoint = %endpoint,
            peer = %peer.ip(),
            reason = %failure,
            "Webhook request rejected by auth"
        );
        state.count_request(&endpoint, "401");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response();
    }

    // Rate limiting, keyed per endpoint (or client IP for shallow paths).
    let client_ip = state.auth.client_ip(peer.ip(), &headers);
    let (key, scope) = rate_limit_key(&path, client_ip);
    if !state.limiter.check(&key) {
        state.count_request(&endpoint, "429");
        state
            .metrics
            .inc("webhook_rate_limited_scope", &[("scope", scope.as_str())]);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(axum::http::header::RETRY_AFTER, "60")],
            Json(serde_json::json!({
                "error": "rate_limited",
                "endpoint": endpoint,
            })),
        )
            .into_response();
    }

    // Decode.
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(endpoint = %endpoint, error = %e, "Webhook body failed to decode");
            state.count_request(&endpoint, "400");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "decode_error"})),
            )
                .into_response();
        }
    };

    let correlation_id = payload
        .get("correlationId")
        .and_then(serde_json::Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(new_correlation_id);

    let event = RawEvent {
        ingester: endpoint.clone(),
        payload,
        correlation_id: correlation_id.clone(),
        received_at: Utc::now(),
    };

    // Bounded handoff: a full channel sheds load instead of blocking.
    match state.events.try_send(event) {
        Ok(()) => {
            state.count_request(&endpoint, "200");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "ok",
                    "correlationId": correlation_id,
                })),
            )
                .into_response()
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            state.metrics.inc("webhook_dropped", &[("endpoint", endpoint.as_str())]);
            state.count_request(&endpoint, "503");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "queue_full"})),
            )
                .into_response()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(endpoint = %endpoint, "Ingress channel closed, shutting down?");
            state.count_request(&endpoint, "503");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "shutting_down"})),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Health / readiness / metrics
// ============================================================================

/// GET /healthz, /health: process liveness, no dependency checks.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /readyz, /ready: 200 once startup initialization completed.
pub async fn ready(State(state): State<IngressState>) -> Response {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(serde_json::json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "starting"})),
        )
            .into_response()
    }
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(state): State<IngressState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
}

// ============================================================================
// HA endpoints (registered only when HA is enabled)
// ============================================================================

/// GET /ha/health
pub async fn ha_health(State(state): State<IngressState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "replica": state.replica.id,
        "namespace": state.replica.namespace,
        "healthy": true,
        "ready": state.ready.load(Ordering::Relaxed),
    }))
}

/// GET /ha/metrics
pub async fn ha_metrics(State(state): State<IngressState>) -> Json<serde_json::Value> {
    let queue_depth = state.events.max_capacity() - state.events.capacity();
    let rss_bytes = MemoryProbe::new().sample().map(|s| s.rss_bytes);
    Json(serde_json::json!({
        "replica": state.replica.id,
        "uptimeSeconds": state.metrics.uptime_secs(),
        "memoryRssBytes": rss_bytes,
        "eventsPerSecond": state.collector.total_events_per_second(),
        "queueDepth": queue_depth,
    }))
}

/// GET /ha/status
pub async fn ha_status(State(state): State<IngressState>) -> Json<serde_json::Value> {
    let queue_depth = state.events.max_capacity() - state.events.capacity();
    let load = if state.events.max_capacity() > 0 {
        queue_depth as f64 / state.events.max_capacity() as f64
    } else {
        0.0
    };
    let role = state
        .role
        .as_ref()
        .map(|r| r.current_role().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Json(serde_json::json!({
        "replica": state.replica.id,
        "role": role,
        "queueDepth": queue_depth,
        "load": load,
    }))
}
