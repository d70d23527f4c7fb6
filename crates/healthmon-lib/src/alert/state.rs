//! Persisted dispatcher state

use crate::error::PersistenceError;
use crate::models::{AlertCondition, AlertState, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Alert states per metric plus the recent notification history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatcherState {
    #[serde(default)]
    pub states: BTreeMap<MetricKind, AlertState>,
    /// Most recent notified alerts, oldest first
    #[serde(default)]
    pub history: VecDeque<AlertCondition>,
}

/// JSON file holding a [`DispatcherState`]
#[derive(Debug, Clone)]
pub struct AlertStateStore {
    path: PathBuf,
}

impl AlertStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state; a missing or unreadable file yields empty state
    pub fn load(&self) -> DispatcherState {
        if !self.path.exists() {
            return DispatcherState::default();
        }

        let loaded = fs::read(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))
            .and_then(|data| {
                serde_json::from_slice::<DispatcherState>(&data).map_err(PersistenceError::from)
            });

        match loaded {
            Ok(state) => {
                let active: Vec<&str> = state
                    .states
                    .iter()
                    .filter(|(_, s)| s.is_active)
                    .map(|(k, _)| k.as_str())
                    .collect();
                info!(path = %self.path.display(), active = ?active, "Loaded alert state");
                state
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to load alert state, starting fresh");
                DispatcherState::default()
            }
        }
    }

    /// Write atomically via a temp file and rename
    pub fn save(&self, state: &DispatcherState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let temp_path = self.path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| PersistenceError::io(&temp_path, e))?;

        fs::rename(&temp_path, &self.path).map_err(|e| PersistenceError::io(&self.path, e))
    }
}
