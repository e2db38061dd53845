//! Zen Watcher controller entry point.
//!
//! Wires the ingress surface, pipeline worker pool, adaptive sizers, config
//! watcher, and role-gated optimization engine together, then serves until
//! SIGTERM/ctrl-c.
//!
//! # Environment Variables
//!
//! - `WATCHER_PORT`: main HTTP port (default 8080)
//! - `WEBHOOK_AUTH_TOKEN` / `WEBHOOK_ALLOWED_IPS` / `WEBHOOK_AUTH_DISABLED`:
//!   webhook authentication
//! - `SERVER_TRUSTED_PROXY_CIDRS`: proxies whose forwarding headers count
//! - `WEBHOOK_RATE_LIMIT`, `SERVER_MAX_REQUEST_BYTES`, `HTTP_SHUTDOWN_TIMEOUT`
//! - `FILTER_CONFIGMAP_NAME/NAMESPACE/KEY`: filter config selection
//! - `LEADER_CHECK_INTERVAL`, `ROLE_ANNOTATIONS_FILE`: role polling
//! - `ENABLE_PPROF`, `PPROF_PORT`: loopback debug server
//! - `RUST_LOG`: log filter (default info), `LOG_FORMAT=json` for JSON logs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zen_watcher::adaptive::{CacheSizer, WindowSizer};
use zen_watcher::config::{
    self, defaults, loader, watcher, FilterConfigSelector, WatcherConfig,
};
use zen_watcher::filter::FilterEngine;
use zen_watcher::ingress::{
    self, AuthConfig, IngressState, RateLimiter, RateLimiterConfig, ReplicaIdentity,
};
use zen_watcher::metrics::{MetricsCollector, MetricsRegistry};
use zen_watcher::optimization::OptimizationEngine;
use zen_watcher::pipeline::{
    DedupCache, PerformanceTracker, PipelineContext, PipelineOrchestrator, Strategy,
    StrategyDecider, StrategyTable,
};
use zen_watcher::role::{watch_leader, RoleChecker};
use zen_watcher::sink::{LogSink, SinkRegistry};
use zen_watcher::state::OptimizationStateManager;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "zen-watcher")]
#[command(about = "Zen Watcher security event controller")]
#[command(version)]
struct CliArgs {
    /// Override the server bind address (default from config, "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Directory where the filter ConfigMap is mounted
    #[arg(long, default_value = "/etc/zen-watcher/filters", env = "FILTER_CONFIG_MOUNT")]
    filter_mount: String,

    /// Directory for persisted per-source optimization state
    #[arg(long, env = "STATE_DIR")]
    state_dir: Option<String>,
}

// ============================================================================
// Logging
// ============================================================================

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = CliArgs::parse();
    ingress::warn_unrecognized_env();

    let mut app_config = WatcherConfig::load().context("failed to load bootstrap config")?;
    if let Some(addr) = cli.addr {
        app_config.server_addr = addr;
    }
    if let Some(dir) = cli.state_dir {
        app_config.state_dir = dir;
    }

    info!(
        addr = %app_config.server_addr,
        ingesters = app_config.ingesters.len(),
        workers = app_config.effective_workers(),
        "🚀 Starting Zen Watcher"
    );
    if app_config.ingesters.is_empty() {
        warn!("No ingesters configured; the ingress surface has no webhook endpoints");
    }

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    // ------------------------------------------------------------------
    // Shared observability
    // ------------------------------------------------------------------
    let metrics = Arc::new(MetricsRegistry::new());
    let collector = Arc::new(MetricsCollector::new(Duration::from_secs(
        defaults::METRICS_WINDOW_SECS,
    )));

    // ------------------------------------------------------------------
    // Filter engine + hot reload
    // ------------------------------------------------------------------
    let selector = FilterConfigSelector::from_env();
    let store = loader::FileConfigStore::new(cli.filter_mount.clone());
    let initial_filters = match loader::load_filter_config(&store, &selector) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Initial filter config load failed, starting allow-all");
            config::FilterConfig::empty()
        }
    };
    let filter_engine = Arc::new(FilterEngine::new(initial_filters, metrics.clone()));

    {
        let watched_path = store.key_path(&selector.key);
        let engine = filter_engine.clone();
        tasks.spawn(watcher::run_filter_config_watcher(
            watched_path,
            Box::new(loader::FileConfigStore::new(cli.filter_mount.clone())),
            selector,
            cancel.clone(),
            move |config| engine.update_config(config),
        ));
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------
    let dedup = Arc::new(DedupCache::new(
        Duration::from_secs(app_config.adaptive.window_long_secs),
        app_config.adaptive.cache_high_size,
    ));
    let strategies = Arc::new(StrategyTable::new(
        app_config.thresholds.clone(),
        metrics.clone(),
    ));
    let performance = Arc::new(PerformanceTracker::new());

    let mut sinks = SinkRegistry::new();
    sinks.register(Arc::new(LogSink));
    let sinks = Arc::new(sinks);

    let state_manager = Arc::new(OptimizationStateManager::new(&app_config.state_dir));
    if let Err(e) = state_manager.load_all() {
        warn!(error = %e, "Optimization state load failed, starting fresh");
    }

    // Seed strategies: configured orders win, else resume persisted state.
    let mut preferences = HashMap::new();
    for ingester in &app_config.ingesters {
        let source = ingester.source_tag();
        let pref = ingester.order_preference();
        if let Some(configured) = pref.order {
            strategies.seed(&source, configured);
        } else if let Some(persisted) = state_manager.get(&source) {
            strategies.seed(&source, persisted.current_strategy);
        } else {
            strategies.seed(&source, Strategy::default());
        }
        preferences.insert(source, pref);
    }

    let (event_tx, event_rx) = mpsc::channel(app_config.channel_capacity);

    let ingesters_by_name: HashMap<String, config::IngesterConfig> = app_config
        .ingesters
        .iter()
        .map(|i| (i.source_tag(), i.clone()))
        .collect();

    let orchestrator = PipelineOrchestrator::new(
        PipelineContext {
            filter: filter_engine,
            dedup: dedup.clone(),
            sinks,
            strategies: strategies.clone(),
            performance,
            collector: collector.clone(),
            metrics: metrics.clone(),
            ingesters: ingesters_by_name,
        },
        event_rx,
        app_config.effective_workers(),
    );
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { orchestrator.run(cancel).await });
    }

    // ------------------------------------------------------------------
    // Adaptive sizers
    // ------------------------------------------------------------------
    tasks.spawn(
        CacheSizer::new(
            app_config.adaptive.clone(),
            dedup.clone(),
            collector.clone(),
            metrics.clone(),
        )
        .run(cancel.clone()),
    );
    tasks.spawn(
        WindowSizer::new(
            app_config.adaptive.clone(),
            dedup,
            collector.clone(),
            metrics.clone(),
        )
        .run(cancel.clone()),
    );

    // ------------------------------------------------------------------
    // Role watcher + leader-gated optimization engine
    // ------------------------------------------------------------------
    let role_checker = Arc::new(RoleChecker::from_env());
    {
        let thresholds = app_config.thresholds.clone();
        let collector = collector.clone();
        let strategies = strategies.clone();
        let state_manager = state_manager.clone();
        let parent_cancel = cancel.clone();
        let engine_cancel: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

        let checker = role_checker.clone();
        tasks.spawn(watch_leader(checker, cancel.clone(), move |role| {
            let mut slot = match engine_cancel.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if role.is_leader() {
                if slot.is_some() {
                    return;
                }
                info!("Promoted to leader, starting optimization engine");
                let child = parent_cancel.child_token();
                let engine = OptimizationEngine::new(
                    StrategyDecider::new(thresholds.clone()),
                    collector.clone(),
                    strategies.clone(),
                    state_manager.clone(),
                    preferences.clone(),
                    Duration::from_secs(defaults::OPTIMIZATION_INTERVAL_SECS),
                );
                tokio::spawn(engine.run(child.clone()));
                *slot = Some(child);
            } else if let Some(child) = slot.take() {
                info!("Stepped down to follower, stopping optimization engine");
                child.cancel();
            }
        }));
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::from_env()));
    limiter.start_sweeper();

    let ready = Arc::new(AtomicBool::new(false));
    let ha_enabled = app_config.ha_enabled
        || std::env::var("HA_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

    let ingress_state = IngressState {
        auth: Arc::new(AuthConfig::from_env()),
        limiter: limiter.clone(),
        events: event_tx,
        metrics: metrics.clone(),
        collector,
        ready: ready.clone(),
        replica: ReplicaIdentity::from_env(),
        role: Some(role_checker),
    };
    let router = ingress::build_router(
        ingress_state,
        &app_config.ingesters,
        ingress::max_request_bytes_from_env(),
        ha_enabled,
    );

    let listener = tokio::net::TcpListener::bind(&app_config.server_addr)
        .await
        .with_context(|| format!("cannot bind {}", app_config.server_addr))?;

    {
        let cancel = cancel.clone();
        let shutdown_timeout = ingress::shutdown_timeout_from_env();
        tasks.spawn(async move {
            if let Err(e) = ingress::run_server(listener, router, cancel, shutdown_timeout).await {
                warn!(error = %e, "HTTP server exited with error");
            }
        });
    }

    // Loopback debug server, opt-in.
    if std::env::var("ENABLE_PPROF")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        let port = std::env::var("PPROF_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults::DEBUG_PORT);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = ingress::run_debug_server(port, cancel).await {
                warn!(error = %e, "Debug server exited with error");
            }
        });
    }

    // Startup complete: readiness flips, traffic may arrive.
    ready.store(true, Ordering::Relaxed);
    info!("Startup complete, ready to serve");

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------
    shutdown_signal().await;
    info!("Shutdown signal received, stopping components");
    cancel.cancel();
    limiter.stop();

    while tasks.join_next().await.is_some() {}
    info!("Zen Watcher stopped");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
