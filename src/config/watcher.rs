//! Polling-based watcher for the mounted filter config.
//!
//! Checks the key file's mtime every 2 seconds. When a change is detected,
//! debounces for 500ms (kubelet updates ConfigMap mounts via symlink swaps
//! that can appear in stages), reloads, and installs the new snapshot via
//! the provided callback. A failed reload keeps the previous snapshot.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use super::filter::FilterConfig;
use super::loader::{load_filter_config, ConfigStore, FilterConfigSelector};

/// Interval between mtime checks.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Debounce delay after detecting a change.
const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// Run the filter config watcher loop until cancellation.
///
/// `watched_path` is the mounted key file; `install` receives each
/// successfully reloaded config.
pub async fn run_filter_config_watcher<F>(
    watched_path: PathBuf,
    store: Box<dyn ConfigStore>,
    selector: FilterConfigSelector,
    cancel: CancellationToken,
    install: F,
) where
    F: Fn(FilterConfig) + Send + Sync + 'static,
{
    tracing::info!(path = %watched_path.display(), "Filter config watcher started");

    let mut last_mtime = get_mtime(&watched_path);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Filter config watcher stopping");
                return;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let current = match get_mtime(&watched_path) {
            Some(t) => t,
            None => {
                if last_mtime.is_some() {
                    tracing::warn!(
                        path = %watched_path.display(),
                        "Filter config file not accessible, keeping current snapshot"
                    );
                    last_mtime = None;
                }
                continue;
            }
        };

        let changed = match last_mtime {
            Some(prev) => current != prev,
            None => true, // File reappeared
        };
        if !changed {
            continue;
        }

        // Debounce: re-check that the write settled before reloading.
        tokio::time::sleep(DEBOUNCE_DELAY).await;
        if get_mtime(&watched_path) != Some(current) {
            continue;
        }
        last_mtime = Some(current);

        match load_filter_config(store.as_ref(), &selector) {
            Ok(config) => {
                tracing::info!(
                    sources = config.sources.len(),
                    has_expression = !config.expression.is_empty(),
                    "Filter config reloaded"
                );
                install(config);
            }
            Err(e) => {
                tracing::error!(error = %e, "Filter config reload failed, keeping previous snapshot");
            }
        }
    }
}

/// Read the modification time of a file, returning None on any error.
fn get_mtime(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
}
