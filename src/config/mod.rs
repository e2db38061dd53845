//! Watcher configuration
//!
//! Two layers of configuration with different lifecycles:
//!
//! - **Bootstrap config** (`WatcherConfig`): channel sizes, worker counts,
//!   strategy thresholds, ingester definitions. Loaded once at startup from
//!   `zen-watcher.toml` (path via `ZEN_CONFIG` or CWD) with env overrides,
//!   then immutable.
//! - **Filter config** (`FilterConfig`): loaded from the mounted ConfigMap
//!   key selected by `FILTER_CONFIGMAP_NAME/NAMESPACE/KEY`, hot-reloaded by
//!   the polling watcher, and installed into the filter engine as an atomic
//!   snapshot.

pub mod defaults;
pub mod filter;
mod ingester;
pub mod loader;
pub mod watcher;

pub use filter::{merge_filter_configs, FilterConfig, SourceFilter};
pub use ingester::{FieldMapping, IngesterConfig};
pub use loader::{ConfigError, ConfigStore, FileConfigStore, FilterConfigSelector};

use serde::{Deserialize, Serialize};

use crate::pipeline::strategy::StrategyThresholds;

// ============================================================================
// Bootstrap config
// ============================================================================

/// Process-lifetime configuration loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// HTTP bind address; port overridden by `WATCHER_PORT`.
    pub server_addr: String,
    /// Bounded ingress channel capacity (webhook -> pipeline handoff).
    pub channel_capacity: usize,
    /// Pipeline worker count; 0 means "CPU count".
    pub workers: usize,
    /// Directory for persisted per-source optimization state.
    pub state_dir: String,
    /// Strategy decision thresholds.
    pub thresholds: StrategyThresholds,
    /// Adaptive sizing bounds and tick intervals.
    pub adaptive: AdaptiveConfig,
    /// Producer endpoint declarations.
    pub ingesters: Vec<IngesterConfig>,
    /// Register the /ha/* replica endpoints.
    pub ha_enabled: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:8080".to_string(),
            channel_capacity: defaults::INGRESS_CHANNEL_CAPACITY,
            workers: 0,
            state_dir: "./data/optimization".to_string(),
            thresholds: StrategyThresholds::default(),
            adaptive: AdaptiveConfig::default(),
            ingesters: Vec::new(),
            ha_enabled: false,
        }
    }
}

/// Bounds and cadence for the adaptive cache / dedup-window sizers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Cache sizer tick in seconds.
    pub cache_interval_secs: u64,
    /// Dedup-window sizer tick in seconds.
    pub window_interval_secs: u64,
    /// Cache entry bounds.
    pub cache_low_size: usize,
    pub cache_high_size: usize,
    /// Dedup window bounds in seconds.
    pub window_short_secs: u64,
    pub window_long_secs: u64,
    /// Traffic thresholds (events/sec) for interpolation.
    pub traffic_low_eps: f64,
    pub traffic_high_eps: f64,
    /// Use memory-pressure sizing for the cache (else traffic-based).
    pub memory_based_sizing: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            cache_interval_secs: defaults::CACHE_SIZER_INTERVAL_SECS,
            window_interval_secs: defaults::WINDOW_SIZER_INTERVAL_SECS,
            cache_low_size: defaults::CACHE_LOW_SIZE,
            cache_high_size: defaults::CACHE_HIGH_SIZE,
            window_short_secs: defaults::DEDUP_WINDOW_SHORT_SECS,
            window_long_secs: defaults::DEDUP_WINDOW_LONG_SECS,
            traffic_low_eps: defaults::TRAFFIC_LOW_EPS,
            traffic_high_eps: defaults::TRAFFIC_HIGH_EPS,
            memory_based_sizing: true,
        }
    }
}

impl WatcherConfig {
    /// Load the bootstrap config.
    ///
    /// Order: `ZEN_CONFIG` env path, then `zen-watcher.toml` in the working
    /// directory, then built-in defaults. A present-but-malformed file is a
    /// fatal startup error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ZEN_CONFIG")
            .ok()
            .map(std::path::PathBuf::from)
            .or_else(|| {
                let cwd = std::path::PathBuf::from("zen-watcher.toml");
                cwd.exists().then_some(cwd)
            });

        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(&p)
                    .map_err(|e| ConfigError::Io(p.display().to_string(), e))?;
                let parsed: WatcherConfig = toml::from_str(&raw)
                    .map_err(|e| ConfigError::Parse(format!("{}: {}", p.display(), e)))?;
                tracing::info!(path = %p.display(), "Loaded bootstrap config");
                parsed
            }
            None => {
                tracing::info!("No bootstrap config file found, using defaults");
                WatcherConfig::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the recognized environment-variable surface on top of the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("WATCHER_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    let host = self
                        .server_addr
                        .rsplit_once(':')
                        .map_or("0.0.0.0", |(h, _)| h);
                    self.server_addr = format!("{}:{}", host, p);
                }
                Err(_) => {
                    tracing::warn!(value = %port, "Ignoring unparseable WATCHER_PORT");
                }
            }
        }
    }

    /// Effective worker count (`workers`, or CPU count when 0).
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = WatcherConfig::default();
        assert_eq!(c.server_addr, "0.0.0.0:8080");
        assert!(c.channel_capacity > 0);
        assert!(c.effective_workers() > 0);
    }

    #[test]
    fn bootstrap_toml_parses() {
        let toml_src = r#"
            server_addr = "0.0.0.0:9090"
            channel_capacity = 500
            workers = 2

            [[ingesters]]
            name = "falco"
            path = "/falco/webhook"
            sinks = ["log"]
        "#;
        let c: WatcherConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(c.channel_capacity, 500);
        assert_eq!(c.ingesters.len(), 1);
        assert_eq!(c.ingesters[0].name, "falco");
    }
}
