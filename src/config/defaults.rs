//! Built-in defaults for tunables that are not usually overridden.

/// Bounded webhook -> pipeline channel capacity.
pub const INGRESS_CHANNEL_CAPACITY: usize = 10_000;

/// Rolling latency ring size per source.
pub const LATENCY_RING_SIZE: usize = 1_000;

/// Per-source decision history ring size.
pub const DECISION_HISTORY_SIZE: usize = 100;

/// Rolling metrics window for strategy decisions.
pub const METRICS_WINDOW_SECS: u64 = 600;

/// Minimum seconds between applied strategy switches for one source.
pub const STRATEGY_COOLDOWN_SECS: u64 = 60;

/// Minimum decider confidence for an applied switch.
pub const STRATEGY_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Optimization engine tick.
pub const OPTIMIZATION_INTERVAL_SECS: u64 = 30;

/// Adaptive cache sizer tick.
pub const CACHE_SIZER_INTERVAL_SECS: u64 = 30;

/// Dedup-window sizer tick.
pub const WINDOW_SIZER_INTERVAL_SECS: u64 = 60;

/// Dedup-window traffic sample horizon.
pub const WINDOW_SAMPLE_SECS: u64 = 300;

/// Cache size bounds.
pub const CACHE_LOW_SIZE: usize = 1_000;
pub const CACHE_HIGH_SIZE: usize = 50_000;

/// Dedup window bounds.
pub const DEDUP_WINDOW_SHORT_SECS: u64 = 60;
pub const DEDUP_WINDOW_LONG_SECS: u64 = 900;

/// Traffic interpolation thresholds (events/sec).
pub const TRAFFIC_LOW_EPS: f64 = 50.0;
pub const TRAFFIC_HIGH_EPS: f64 = 500.0;

/// Memory-pressure interpolation thresholds.
pub const MEMORY_PRESSURE_LOW: f64 = 0.3;
pub const MEMORY_PRESSURE_HIGH: f64 = 0.8;

/// Sizer sample history bound (logging only, never policy).
pub const SIZER_HISTORY_SIZE: usize = 100;

/// Webhook body-size cap (bytes) unless `SERVER_MAX_REQUEST_BYTES` overrides.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Rate limiter: tokens per refill interval unless `WEBHOOK_RATE_LIMIT` overrides.
pub const RATE_LIMIT_TOKENS: u64 = 100;

/// Rate limiter refill interval.
pub const RATE_LIMIT_REFILL_SECS: u64 = 60;

/// Idle bucket eviction TTL.
pub const RATE_LIMIT_BUCKET_TTL_SECS: u64 = 3_600;

/// Role annotation polled on the replica's own identity object.
pub const ROLE_ANNOTATION_KEY: &str = "zen-lead/role";

/// Role re-check interval unless `LEADER_CHECK_INTERVAL` overrides.
pub const LEADER_CHECK_INTERVAL_SECS: u64 = 5;

/// Downward-API annotations file mounted into the pod.
pub const ROLE_ANNOTATIONS_FILE: &str = "/etc/podinfo/annotations";

/// Graceful HTTP shutdown bound unless `HTTP_SHUTDOWN_TIMEOUT` overrides.
pub const HTTP_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Filter ConfigMap selection defaults.
pub const FILTER_CONFIGMAP_NAME: &str = "zen-watcher-filters";
pub const FILTER_CONFIGMAP_KEY: &str = "filters.json";

/// Namespace fallback file when `POD_NAMESPACE` is unset.
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Debug (pprof-analog) server port unless `PPROF_PORT` overrides.
pub const DEBUG_PORT: u16 = 6060;
