//! Leader/follower role derived from the replica's own annotations.
//!
//! The pod's annotations are mounted via the Downward API as a file of
//! `key="value"` lines. The checker caches the parsed role for the
//! configured interval; `watch_leader` polls on that interval and fires a
//! callback on every transition, including the first observation. Read
//! errors keep the last known role and retry silently on the next tick.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::defaults;

/// Replica role. `Unknown` exists only before the first successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unknown,
    Leader,
    Follower,
}

impl Role {
    pub fn is_leader(self) -> bool {
        self == Role::Leader
    }

    fn from_annotation(value: Option<&str>) -> Role {
        match value {
            Some(v) if v.eq_ignore_ascii_case("leader") => Role::Leader,
            // Missing annotation or any other value means follower.
            _ => Role::Follower,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unknown => write!(f, "unknown"),
            Role::Leader => write!(f, "leader"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

struct CachedRole {
    role: Role,
    read_at: Option<Instant>,
}

/// Reads and caches the replica's role annotation.
pub struct RoleChecker {
    annotations_file: PathBuf,
    interval: Duration,
    cache: Mutex<CachedRole>,
}

impl RoleChecker {
    pub fn new(annotations_file: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            annotations_file: annotations_file.into(),
            interval,
            cache: Mutex::new(CachedRole {
                role: Role::Unknown,
                read_at: None,
            }),
        }
    }

    /// Build from the environment: `ROLE_ANNOTATIONS_FILE` and
    /// `LEADER_CHECK_INTERVAL` (seconds), with defaults for both.
    pub fn from_env() -> Self {
        let file = std::env::var("ROLE_ANNOTATIONS_FILE")
            .unwrap_or_else(|_| defaults::ROLE_ANNOTATIONS_FILE.to_string());
        let interval = std::env::var("LEADER_CHECK_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults::LEADER_CHECK_INTERVAL_SECS);
        Self::new(file, Duration::from_secs(interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current role, served from cache inside the check interval.
    pub fn current_role(&self) -> Role {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let fresh = cache
            .read_at
            .is_some_and(|at| at.elapsed() < self.interval);
        if fresh {
            return cache.role;
        }

        match self.read_role() {
            Ok(role) => {
                cache.role = role;
                cache.read_at = Some(Instant::now());
                role
            }
            // Transient read failure: keep the last known role, retry next
            // tick without extending the cache window.
            Err(_) => cache.role,
        }
    }

    fn read_role(&self) -> std::io::Result<Role> {
        let contents = std::fs::read_to_string(&self.annotations_file)?;
        Ok(Role::from_annotation(parse_annotation(
            &contents,
            defaults::ROLE_ANNOTATION_KEY,
        )))
    }
}

/// Parse one key out of a Downward-API annotations file (`key="value"` lines).
fn parse_annotation<'a>(contents: &'a str, key: &str) -> Option<&'a str> {
    for line in contents.lines() {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        if k.trim() == key {
            return Some(v.trim().trim_matches('"'));
        }
    }
    None
}

/// Poll the role on the checker's interval and fire `on_transition` on every
/// change, including the first observation. Runs until cancellation.
pub async fn watch_leader<F>(checker: std::sync::Arc<RoleChecker>, cancel: CancellationToken, on_transition: F)
where
    F: Fn(Role) + Send + Sync + 'static,
{
    let mut last = Role::Unknown;
    let mut ticker = tokio::time::interval(checker.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Role watcher stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let role = checker.current_role();
        if role != last && role != Role::Unknown {
            tracing::info!(from = %last, to = %role, "Replica role transition");
            on_transition(role);
            last = role;
        }
    }
}
