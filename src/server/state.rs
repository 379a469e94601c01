use crate::error::{Error, Result};
use crate::server::ServerStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Point-in-time view of one server record.
///
/// This is both what readers of the registry get back and what is written
/// to the state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    /// Current status
    pub status: ServerStatus,
    /// Last known process id, kept after exit
    pub pid: Option<u32>,
    /// Consecutive successful liveness probes
    #[serde(default)]
    pub consecutive_healthy_checks: u32,
    /// When the current or last instance was launched
    pub last_start: Option<DateTime<Utc>>,
    /// Automatic restarts since the server was last healthy
    #[serde(default)]
    pub restart_count: u32,
}

/// Document written to the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// PID of the supervisor that wrote the file
    #[serde(default)]
    pub supervisor_pid: Option<u32>,
    /// End of the most recent health sweep
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Per-server snapshots
    #[serde(default)]
    pub servers: BTreeMap<String, ServerSnapshot>,
}

/// Best-effort JSON store for [`PersistedState`].
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so readers never see a half-written document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file, propagating any error
    pub fn try_load(&self) -> Result<PersistedState> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Persistence(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Serialization(format!("Failed to parse state file: {}", e)))
    }

    /// Read the state file; a missing or corrupt file is `None`
    pub fn load(&self) -> Option<PersistedState> {
        if !self.path.exists() {
            return None;
        }
        match self.try_load() {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable state file");
                None
            }
        }
    }

    /// Write a state document
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Other("Failed to lock state store".to_string()))?;
        self.write(state)
    }

    /// Build a document with `build` and write it while holding the store's
    /// write lock, so concurrent writers cannot reorder snapshots.
    pub(crate) fn save_with<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce() -> Result<PersistedState>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Other("Failed to lock state store".to_string()))?;
        let state = build()?;
        self.write(&state)
    }

    fn write(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Serialization(format!("Failed to serialize state: {}", e)))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(|e| {
            Error::Persistence(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::Persistence(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }
}
