//! Per-source optimization state with atomic file persistence.
//!
//! One JSON file per source under the configured directory, written
//! temp-then-rename so readers never observe a torn file. The in-memory map
//! is authoritative while the process leads; files exist so a restarted
//! leader resumes from the last decisions.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::defaults::DECISION_HISTORY_SIZE;
use crate::metrics::OptimizationMetrics;
use crate::pipeline::Strategy;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state io failure for {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("state serialization failure for {0}: {1}")]
    Serialize(String, #[source] serde_json::Error),

    #[error("state file {0} is malformed: {1}")]
    Malformed(String, #[source] serde_json::Error),
}

/// One recorded strategy decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub strategy: Strategy,
    pub confidence: f64,
    pub rationale: String,
    pub applied: bool,
    pub at: DateTime<Utc>,
}

/// Persisted per-source optimization state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationState {
    pub current_strategy: Strategy,
    /// Bounded decision ring, oldest first.
    pub decision_history: VecDeque<DecisionRecord>,
    pub last_decision: Option<DateTime<Utc>>,
    /// Names of dynamic rules currently in force for this source.
    pub active_rules: Vec<String>,
    pub last_metrics: Option<OptimizationMetrics>,
    pub last_updated: DateTime<Utc>,
}

impl Default for OptimizationState {
    fn default() -> Self {
        Self {
            current_strategy: Strategy::default(),
            decision_history: VecDeque::new(),
            last_decision: None,
            active_rules: Vec::new(),
            last_metrics: None,
            last_updated: Utc::now(),
        }
    }
}

/// In-memory state map plus its persistence directory.
pub struct OptimizationStateManager {
    dir: PathBuf,
    states: RwLock<HashMap<String, OptimizationState>>,
}

impl OptimizationStateManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Load every `<source>.json` under the directory into memory. Missing
    /// directory is fine (first run).
    pub fn load_all(&self) -> Result<usize, StateError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StateError::Io(self.dir.display().to_string(), e)),
        };

        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") || stem.starts_with('.') {
                continue;
            }
            if let Some(state) = self.load(stem)? {
                let mut states = self.write_lock();
                states.insert(stem.to_string(), state);
                loaded += 1;
            }
        }
        tracing::info!(loaded, dir = %self.dir.display(), "Optimization state loaded");
        Ok(loaded)
    }

    /// Record a decision: update the ring, current strategy and timestamps,
    /// then persist the source's state atomically.
    pub fn record_decision(
        &self,
        source: &str,
        record: DecisionRecord,
        metrics: Option<OptimizationMetrics>,
    ) -> Result<(), StateError> {
        let state = {
            let mut states = self.write_lock();
            let state = states.entry(source.to_string()).or_default();
            if state.decision_history.len() >= DECISION_HISTORY_SIZE {
                state.decision_history.pop_front();
            }
            if record.applied {
                state.current_strategy = record.strategy;
            }
            state.last_decision = Some(record.at);
            state.last_updated = Utc::now();
            if let Some(m) = metrics {
                state.last_metrics = Some(m);
            }
            state.decision_history.push_back(record);
            state.clone()
        };
        self.save(source, &state)
    }

    /// Current in-memory state for a source.
    pub fn get(&self, source: &str) -> Option<OptimizationState> {
        let states = match self.states.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        states.get(source).cloned()
    }

    /// Serialize to `<dir>/.<source>.tmp` (mode 0600) then rename into
    /// place. Any failure removes the temp file and surfaces the error.
    pub fn save(&self, source: &str, state: &OptimizationState) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StateError::Io(self.dir.display().to_string(), e))?;

        let tmp_path = self.dir.join(format!(".{}.tmp", source));
        let final_path = self.file_path(source);

        let payload = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::Serialize(source.to_string(), e))?;

        let write_result = write_restricted(&tmp_path, &payload)
            .and_then(|()| std::fs::rename(&tmp_path, &final_path));

        match write_result {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(StateError::Io(final_path.display().to_string(), e))
            }
        }
    }

    /// Load one source's persisted state. Missing file is `Ok(None)`.
    pub fn load(&self, source: &str) -> Result<Option<OptimizationState>, StateError> {
        let path = self.file_path(source);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::Io(path.display().to_string(), e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StateError::Malformed(path.display().to_string(), e))
    }

    /// Remove a source's state file and in-memory entry.
    pub fn delete(&self, source: &str) -> Result<(), StateError> {
        {
            let mut states = self.write_lock();
            states.remove(source);
        }
        let path = self.file_path(source);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Io(path.display().to_string(), e)),
        }
    }

    pub fn file_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.json", source))
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, OptimizationState>> {
        match self.states.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Write a file owner-readable only (0600) where the platform supports it.
fn write_restricted(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, payload)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
