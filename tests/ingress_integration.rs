//! Ingress integration tests.
//!
//! Exercises the full router stack (auth, rate limiting, body cap, decode,
//! bounded handoff) with in-process requests. The peer address is injected
//! with `MockConnectInfo`, exactly as the production server injects it via
//! `into_make_service_with_connect_info`.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use tokio::sync::mpsc;
use tower::ServiceExt;

use zen_watcher::config::{FieldMapping, IngesterConfig};
use zen_watcher::ingress::{
    build_router, AuthConfig, Cidr, IngressState, RateLimiter, RateLimiterConfig, ReplicaIdentity,
};
use zen_watcher::metrics::{MetricsCollector, MetricsRegistry};
use zen_watcher::types::RawEvent;

const PEER: [u8; 4] = [127, 0, 0, 1];

fn falco_ingester() -> IngesterConfig {
    IngesterConfig {
        name: "falco".to_string(),
        path: "/falco/webhook".to_string(),
        mapping: FieldMapping::default(),
        sinks: vec!["log".to_string()],
        processing_order: "auto".to_string(),
        auto_optimize: true,
    }
}

struct TestIngress {
    router: axum::Router,
    rx: mpsc::Receiver<RawEvent>,
    metrics: Arc<MetricsRegistry>,
}

fn test_ingress(auth: AuthConfig, limiter: RateLimiterConfig, channel_capacity: usize) -> TestIngress {
    let metrics = Arc::new(MetricsRegistry::new());
    let (tx, rx) = mpsc::channel(channel_capacity);
    let state = IngressState {
        auth: Arc::new(auth),
        limiter: Arc::new(RateLimiter::new(limiter)),
        events: tx,
        metrics: metrics.clone(),
        collector: Arc::new(MetricsCollector::new(Duration::from_secs(600))),
        ready: Arc::new(AtomicBool::new(true)),
        replica: ReplicaIdentity {
            id: "zen-watcher-0".to_string(),
            namespace: "zen".to_string(),
        },
        role: None,
    };
    let router = build_router(state, &[falco_ingester()], 1024 * 1024, true)
        .layer(MockConnectInfo(SocketAddr::from((PEER, 51234))));
    TestIngress {
        router,
        rx,
        metrics,
    }
}

fn default_limiter() -> RateLimiterConfig {
    RateLimiterConfig {
        max_tokens: 1_000,
        refill_interval: Duration::from_secs(60),
        bucket_ttl: Duration::from_secs(3600),
    }
}

fn open_auth() -> AuthConfig {
    AuthConfig {
        disabled: true,
        ..Default::default()
    }
}

fn post_json(path: &str, body: &str) -> Request<Body> {
    Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let ingress = test_ingress(open_auth(), default_limiter(), 10);
    for path in ["/healthz", "/health", "/readyz", "/ready"] {
        let resp = ingress
            .router
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "path {}", path);
    }
}

#[tokio::test]
async fn readiness_is_503_before_startup_completes() {
    let mut ingress = test_ingress(open_auth(), default_limiter(), 10);
    // Rebuild with ready=false.
    let metrics = Arc::new(MetricsRegistry::new());
    let (tx, _rx) = mpsc::channel(10);
    let state = IngressState {
        auth: Arc::new(open_auth()),
        limiter: Arc::new(RateLimiter::new(default_limiter())),
        events: tx,
        metrics,
        collector: Arc::new(MetricsCollector::new(Duration::from_secs(600))),
        ready: Arc::new(AtomicBool::new(false)),
        replica: ReplicaIdentity {
            id: "r".to_string(),
            namespace: "ns".to_string(),
        },
        role: None,
    };
    ingress.router = build_router(state, &[], 1024, false)
        .layer(MockConnectInfo(SocketAddr::from((PEER, 51234))));

    let resp = ingress
        .router
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn webhook_accepts_and_enqueues() {
    let mut ingress = test_ingress(open_auth(), default_limiter(), 10);
    let resp = ingress
        .router
        .clone()
        .oneshot(post_json("/falco/webhook", r#"{"rule": "x"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let event = ingress.rx.try_recv().expect("one event enqueued");
    assert_eq!(event.ingester, "falco");
    assert!(!event.correlation_id.is_empty());
}

#[tokio::test]
async fn webhook_preserves_provided_correlation_id() {
    let mut ingress = test_ingress(open_auth(), default_limiter(), 10);
    let resp = ingress
        .router
        .clone()
        .oneshot(post_json("/falco/webhook", r#"{"correlationId": "abc-1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(ingress.rx.try_recv().unwrap().correlation_id, "abc-1");
}

#[tokio::test]
async fn non_post_is_405() {
    let ingress = test_ingress(open_auth(), default_limiter(), 10);
    let resp = ingress
        .router
        .oneshot(Request::get("/falco/webhook").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn undecodable_body_is_400() {
    let mut ingress = test_ingress(open_auth(), default_limiter(), 10);
    let resp = ingress
        .router
        .clone()
        .oneshot(post_json("/falco/webhook", "{not json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(ingress.rx.try_recv().is_err());
}

#[tokio::test]
async fn oversized_body_is_413() {
    let ingress = test_ingress(open_auth(), default_limiter(), 10);
    let big = format!(r#"{{"pad": "{}"}}"#, "x".repeat(2 * 1024 * 1024));
    let resp = ingress
        .router
        .oneshot(post_json("/falco/webhook", &big))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn wrong_then_right_token() {
    let auth = AuthConfig {
        token: Some("sekrit".to_string()),
        ..Default::default()
    };
    let mut ingress = test_ingress(auth, default_limiter(), 10);

    let wrong = Request::post("/falco/webhook")
        .header("authorization", "Bearer nope!!")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"rule": "x"}"#))
        .unwrap();
    let resp = ingress.router.clone().oneshot(wrong).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let right = Request::post("/falco/webhook")
        .header("authorization", "Bearer sekrit")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"rule": "x"}"#))
        .unwrap();
    let resp = ingress.router.clone().oneshot(right).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Exactly one event made it through.
    assert!(ingress.rx.try_recv().is_ok());
    assert!(ingress.rx.try_recv().is_err());
    assert_eq!(
        ingress
            .metrics
            .counter_value("webhook_requests_total", &[("endpoint", "falco"), ("code", "401")]),
        1
    );
}

#[tokio::test]
async fn missing_token_is_401_when_auth_required() {
    let auth = AuthConfig {
        token: Some("sekrit".to_string()),
        ..Default::default()
    };
    let ingress = test_ingress(auth, default_limiter(), 10);
    let resp = ingress
        .router
        .oneshot(post_json("/falco/webhook", r#"{}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rate_limit_exhaustion_returns_429_with_retry_after() {
    let limiter = RateLimiterConfig {
        max_tokens: 5,
        refill_interval: Duration::from_secs(60),
        bucket_ttl: Duration::from_secs(3600),
    };
    let ingress = test_ingress(open_auth(), limiter, 100);

    let mut ok = 0;
    let mut limited = 0;
    for _ in 0..20 {
        let resp = ingress
            .router
            .clone()
            .oneshot(post_json("/falco/webhook", r#"{}"#))
            .await
            .unwrap();
        match resp.status() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => {
                limited += 1;
                assert_eq!(resp.headers().get("retry-after").unwrap(), "60");
                let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
                let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
                assert_eq!(parsed["endpoint"], "falco");
            }
            other => panic!("unexpected status {}", other),
        }
    }
    // Capacity 5 plus at most a token of refill inside the loop.
    assert!(ok >= 5 && ok <= 6, "ok = {}", ok);
    assert!(limited >= 14);
    assert_eq!(
        ingress
            .metrics
            .counter_value("webhook_rate_limited_scope", &[("scope", "endpoint")]),
        limited as u64
    );
}

#[tokio::test]
async fn full_queue_returns_503_and_counts_drop_once() {
    let mut ingress = test_ingress(open_auth(), default_limiter(), 1);

    let resp = ingress
        .router
        .clone()
        .oneshot(post_json("/falco/webhook", r#"{"n": 1}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Channel (capacity 1) is now full.
    let resp = ingress
        .router
        .clone()
        .oneshot(post_json("/falco/webhook", r#"{"n": 2}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        ingress
            .metrics
            .counter_value("webhook_dropped", &[("endpoint", "falco")]),
        1
    );

    // Draining the queue lets traffic through again.
    ingress.rx.try_recv().unwrap();
    let resp = ingress
        .router
        .clone()
        .oneshot(post_json("/falco/webhook", r#"{"n": 3}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn ip_allow_list_with_trusted_proxy_header() {
    // Peer is the proxy (127.0.0.1, trusted); real client comes from XFF.
    let auth = AuthConfig {
        allowed: vec![Cidr::parse("203.0.113.0/24").unwrap()],
        trusted_proxies: vec![Cidr::parse("127.0.0.0/8").unwrap()],
        ..Default::default()
    };
    let ingress = test_ingress(auth, default_limiter(), 10);

    let allowed = Request::post("/falco/webhook")
        .header("x-forwarded-for", "203.0.113.5")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = ingress.router.clone().oneshot(allowed).await.unwrap();
    // Peer itself is not in the allow-list; only the forwarded client is.
    // With the proxy trusted, the forwarded client is used and passes.
    assert_eq!(resp.status(), StatusCode::OK);

    let denied = Request::post("/falco/webhook")
        .header("x-forwarded-for", "198.51.100.9")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = ingress.router.clone().oneshot(denied).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn forged_header_without_trusted_proxy_is_ignored() {
    let auth = AuthConfig {
        allowed: vec![Cidr::parse("203.0.113.0/24").unwrap()],
        trusted_proxies: vec![],
        ..Default::default()
    };
    let ingress = test_ingress(auth, default_limiter(), 10);

    // The forged XFF claims an allowed IP, but the peer is untrusted, so
    // the peer address (127.0.0.1) is used and rejected.
    let forged = Request::post("/falco/webhook")
        .header("x-forwarded-for", "203.0.113.5")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = ingress.router.oneshot(forged).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn metrics_endpoint_serves_text_format() {
    let ingress = test_ingress(open_auth(), default_limiter(), 10);
    let _ = ingress
        .router
        .clone()
        .oneshot(post_json("/falco/webhook", "{}"))
        .await
        .unwrap();

    let resp = ingress
        .router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("zen_watcher_uptime_seconds"));
    assert!(text.contains("webhook_requests_total{code=\"200\",endpoint=\"falco\"} 1"));
}

#[tokio::test]
async fn ha_endpoints_registered_only_when_enabled() {
    let ingress = test_ingress(open_auth(), default_limiter(), 10);
    let resp = ingress
        .router
        .clone()
        .oneshot(Request::get("/ha/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["replica"], "zen-watcher-0");

    // HA disabled: same route 404s.
    let metrics = Arc::new(MetricsRegistry::new());
    let (tx, _rx) = mpsc::channel(10);
    let state = IngressState {
        auth: Arc::new(open_auth()),
        limiter: Arc::new(RateLimiter::new(default_limiter())),
        events: tx,
        metrics,
        collector: Arc::new(MetricsCollector::new(Duration::from_secs(600))),
        ready: Arc::new(AtomicBool::new(true)),
        replica: ReplicaIdentity {
            id: "r".to_string(),
            namespace: "ns".to_string(),
        },
        role: None,
    };
    let no_ha = build_router(state, &[], 1024, false)
        .layer(MockConnectInfo(SocketAddr::from((PEER, 51234))));
    let resp = no_ha
        .oneshot(Request::get("/ha/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
