//! Webhook ingress: router construction and server lifecycle.
//!
//! Each configured ingester registers one POST route; registration is
//! add-only, so removing an ingester takes effect at the next restart (known
//! limitation). Fixed routes serve health, readiness, metrics, and the
//! optional HA reports.

pub mod auth;
pub mod handlers;
pub mod ratelimit;

pub use auth::{AuthConfig, AuthFailure, Cidr};
pub use handlers::{IngressState, ReplicaIdentity};
pub use ratelimit::{rate_limit_key, RateLimiter, RateLimiterConfig, RateScope};

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{defaults, IngesterConfig};

/// Body-size cap from `SERVER_MAX_REQUEST_BYTES`, defaulting to 1 MiB.
pub fn max_request_bytes_from_env() -> usize {
    std::env::var("SERVER_MAX_REQUEST_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(defaults::MAX_REQUEST_BYTES)
}

/// Graceful-shutdown bound from `HTTP_SHUTDOWN_TIMEOUT` (seconds).
pub fn shutdown_timeout_from_env() -> Duration {
    let secs = std::env::var("HTTP_SHUTDOWN_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(defaults::HTTP_SHUTDOWN_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Build the application router.
///
/// Webhook routes carry the body-size cap; over-cap requests get 413 before
/// the handler runs. Non-POST methods on webhook paths get 405 from the
/// method router.
pub fn build_router(
    state: IngressState,
    ingesters: &[IngesterConfig],
    max_body_bytes: usize,
    ha_enabled: bool,
) -> Router {
    let mut webhook_routes: Router<IngressState> = Router::new();
    for ingester in ingesters {
        let endpoint = ingester.source_tag();
        let path = ingester.path.clone();
        info!(endpoint = %endpoint, path = %path, "Registering webhook endpoint");
        let route_path = path.clone();
        webhook_routes = webhook_routes.route(
            &route_path,
            post(
                move |state: axum::extract::State<IngressState>,
                      connect: axum::extract::ConnectInfo<SocketAddr>,
                      headers: axum::http::HeaderMap,
                      body: axum::body::Bytes| {
                    handlers::webhook(endpoint.clone(), path.clone(), state, connect, headers, body)
                },
            ),
        );
    }
    let webhook_routes = webhook_routes
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes));

    let mut router: Router<IngressState> = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/readyz", get(handlers::ready))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .merge(webhook_routes);

    if ha_enabled {
        router = router
            .route("/ha/health", get(handlers::ha_health))
            .route("/ha/metrics", get(handlers::ha_metrics))
            .route("/ha/status", get(handlers::ha_status));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve the router until cancellation, then shut down gracefully within
/// the timeout (remaining handlers are abandoned past the bound).
pub async fn run_server(
    listener: tokio::net::TcpListener,
    router: Router,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");

    let graceful = cancel.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        graceful.cancelled().await;
    })
    .into_future();

    tokio::pin!(server);
    tokio::select! {
        result = &mut server => result,
        () = async {
            cancel.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "Graceful shutdown timed out, abandoning remaining handlers"
            );
            Ok(())
        }
    }
}

/// Loopback-only debug server (enabled via `ENABLE_PPROF`).
///
/// Serves GET /debug/status with process runtime numbers. Deliberately not
/// reachable off-host.
pub async fn run_debug_server(port: u16, cancel: CancellationToken) -> std::io::Result<()> {
    use axum::Json;

    let started = std::time::Instant::now();
    let app = Router::new().route(
        "/debug/status",
        get(move || async move {
            let probe = crate::adaptive::MemoryProbe::new();
            let sample = probe.sample();
            Json(serde_json::json!({
                "uptimeSeconds": started.elapsed().as_secs(),
                "rssBytes": sample.map(|s| s.rss_bytes),
                "totalMemoryBytes": sample.map(|s| s.total_bytes),
                "workers": std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(0),
            }))
        }),
    );

    let listener =
        tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
    info!(port, "Debug server listening on loopback");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
}

/// Warn about `WATCHER_*`/`WEBHOOK_*`/`SERVER_*` variables this build does
/// not recognize, so typos surface instead of silently doing nothing.
pub fn warn_unrecognized_env() {
    const KNOWN: &[&str] = &[
        "WATCHER_PORT",
        "PPROF_PORT",
        "ENABLE_PPROF",
        "WEBHOOK_AUTH_TOKEN",
        "WEBHOOK_AUTH_DISABLED",
        "WEBHOOK_ALLOWED_IPS",
        "SERVER_TRUSTED_PROXY_CIDRS",
        "WEBHOOK_RATE_LIMIT",
        "SERVER_MAX_REQUEST_BYTES",
        "HTTP_SHUTDOWN_TIMEOUT",
        "FILTER_CONFIGMAP_NAME",
        "FILTER_CONFIGMAP_NAMESPACE",
        "FILTER_CONFIGMAP_KEY",
        "LEADER_CHECK_INTERVAL",
        "ROLE_ANNOTATIONS_FILE",
        "HA_ENABLED",
        "HOSTNAME",
        "POD_NAMESPACE",
        "ZEN_CONFIG",
    ];
    for (key, _) in std::env::vars() {
        let relevant = key.starts_with("WATCHER_")
            || key.starts_with("WEBHOOK_")
            || key.starts_with("SERVER_")
            || key.starts_with("FILTER_CONFIGMAP_");
        if relevant && !KNOWN.contains(&key.as_str()) {
            warn!(var = %key, "Unrecognized environment variable ignored");
        }
    }
}
