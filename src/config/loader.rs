//! Filter config loading from the annotated storage object.
//!
//! The watcher consumes its filter ConfigMap the client-free way: the
//! ConfigMap is volume-mounted into the pod and each key is a file under the
//! mount directory. `ConfigStore` is the seam; the production implementation
//! reads mounted files, tests substitute an in-memory store.

use std::collections::HashMap;
use std::path::PathBuf;

use super::defaults;
use super::filter::FilterConfig;

/// Errors surfaced by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("malformed config payload: {0}")]
    Parse(String),
}

/// Which ConfigMap and key holds the filter payload.
///
/// Driven by `FILTER_CONFIGMAP_NAME`, `FILTER_CONFIGMAP_NAMESPACE`, and
/// `FILTER_CONFIGMAP_KEY`, with defaults for all three. The namespace falls
/// back to `POD_NAMESPACE`, then the service-account namespace file.
#[derive(Debug, Clone)]
pub struct FilterConfigSelector {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

impl FilterConfigSelector {
    pub fn from_env() -> Self {
        let namespace = std::env::var("FILTER_CONFIGMAP_NAMESPACE")
            .or_else(|_| std::env::var("POD_NAMESPACE"))
            .ok()
            .or_else(|| {
                std::fs::read_to_string(defaults::SERVICE_ACCOUNT_NAMESPACE_FILE)
                    .ok()
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "default".to_string());

        Self {
            name: std::env::var("FILTER_CONFIGMAP_NAME")
                .unwrap_or_else(|_| defaults::FILTER_CONFIGMAP_NAME.to_string()),
            namespace,
            key: std::env::var("FILTER_CONFIGMAP_KEY")
                .unwrap_or_else(|_| defaults::FILTER_CONFIGMAP_KEY.to_string()),
        }
    }
}

// ============================================================================
// Config store seam
// ============================================================================

/// Read access to the cluster's annotated config storage.
///
/// `Ok(None)` means the object or key is absent, which callers treat as an
/// empty (allow-all) config. Errors are transient I/O; callers keep their
/// last-known-good snapshot and retry on the next tick.
pub trait ConfigStore: Send + Sync {
    fn fetch(&self, name: &str, namespace: &str, key: &str) -> Result<Option<String>, ConfigError>;
}

/// Mounted-volume implementation: `<mount_dir>/<key>`.
///
/// The mount path itself encodes the ConfigMap name/namespace (set up by the
/// deployment manifest), so only the key is resolved here.
pub struct FileConfigStore {
    mount_dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(mount_dir: impl Into<PathBuf>) -> Self {
        Self {
            mount_dir: mount_dir.into(),
        }
    }

    /// Path of a key file inside the mount.
    pub fn key_path(&self, key: &str) -> PathBuf {
        self.mount_dir.join(key)
    }
}

impl ConfigStore for FileConfigStore {
    fn fetch(&self, _name: &str, _namespace: &str, key: &str) -> Result<Option<String>, ConfigError> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Io(path.display().to_string(), e)),
        }
    }
}

/// In-memory store for tests and local runs.
#[derive(Default)]
pub struct StaticConfigStore {
    entries: HashMap<String, String>,
}

impl StaticConfigStore {
    pub fn with_entry(key: &str, payload: &str) -> Self {
        let mut entries = HashMap::new();
        entries.insert(key.to_string(), payload.to_string());
        Self { entries }
    }
}

impl ConfigStore for StaticConfigStore {
    fn fetch(&self, _name: &str, _namespace: &str, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.entries.get(key).cloned())
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load and normalize the filter config from the store.
///
/// Absent object or key yields the empty allow-all config; a malformed
/// payload is an error so the caller can keep its previous snapshot.
pub fn load_filter_config(
    store: &dyn ConfigStore,
    selector: &FilterConfigSelector,
) -> Result<FilterConfig, ConfigError> {
    let raw = store.fetch(&selector.name, &selector.namespace, &selector.key)?;

    let mut config = match raw {
        Some(payload) => serde_json::from_str::<FilterConfig>(&payload)
            .map_err(|e| ConfigError::Parse(e.to_string()))?,
        None => {
            tracing::info!(
                name = %selector.name,
                key = %selector.key,
                "Filter config absent, using allow-all defaults"
            );
            FilterConfig::empty()
        }
    };

    config.normalize();
    Ok(config)
}
