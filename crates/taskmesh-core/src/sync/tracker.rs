//! The persistent version-tracking cache.
//!
//! Maps every cross-source identity to its local task id, per-source
//! external ids and version counters, and the last time it was
//! synchronized. The cache survives process restarts so previously-matched
//! tasks re-attach their identity on fetch instead of being re-matched on
//! every run; a reverse stable-key index (`source_id:task_id`) serves that
//! lookup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::SyncError;

/// Everything tracked about one cross-source identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackedEntry {
    /// Id of the local store copy, if one exists or ever existed.
    #[serde(default)]
    pub local_id: Option<String>,
    /// Source id → that source's record id.
    #[serde(default)]
    pub external_ids: HashMap<String, String>,
    /// Source id → monotonic version counter.
    #[serde(default)]
    pub versions: HashMap<String, u64>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerState {
    /// sync_id → entry.
    #[serde(default)]
    entries: HashMap<String, TrackedEntry>,
    /// Stable key (`source_id:task_id`) → sync_id.
    #[serde(default)]
    keys: HashMap<String, String>,
}

/// Disk-backed sync-state cache. Loaded at startup, saved after each pass.
pub struct SyncTracker {
    state: Mutex<TrackerState>,
    path: PathBuf,
}

impl SyncTracker {
    /// Loads the cache from `path`. A missing file yields an empty cache;
    /// an unparsable one is preserved as `.backup` and reset, which only
    /// costs one re-matching pass.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let state = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
            match serde_json::from_str(&json) {
                Ok(state) => state,
                Err(e) => {
                    let backup = backup_path(&path);
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "sync-state cache is corrupt; preserving a backup and starting empty"
                    );
                    fs::copy(&path, &backup).map_err(|e| SyncError::io(&backup, e))?;
                    TrackerState::default()
                }
            }
        } else {
            TrackerState::default()
        };

        Ok(Self {
            state: Mutex::new(state),
            path,
        })
    }

    /// Writes the cache to disk.
    pub fn save(&self) -> Result<(), SyncError> {
        let json = {
            let state = self.state.lock();
            serde_json::to_string_pretty(&*state)?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
            }
        }
        fs::write(&self.path, json).map_err(|e| SyncError::io(&self.path, e))?;
        Ok(())
    }

    /// The stable lookup key for a record that has no `sync_id` yet.
    pub fn stable_key(source_id: &str, task_id: &str) -> String {
        format!("{source_id}:{task_id}")
    }

    /// Resolves a record back to its known identity.
    pub fn lookup_sync_id(&self, source_id: &str, task_id: &str) -> Option<String> {
        self.state
            .lock()
            .keys
            .get(&Self::stable_key(source_id, task_id))
            .cloned()
    }

    pub fn entry(&self, sync_id: &str) -> Option<TrackedEntry> {
        self.state.lock().entries.get(sync_id).cloned()
    }

    /// Records that `task_id` in `source_id` belongs to `sync_id`.
    pub fn record_mapping(&self, sync_id: &str, source_id: &str, task_id: &str, is_local: bool) {
        let mut state = self.state.lock();
        let entry = state.entries.entry(sync_id.to_string()).or_default();
        if is_local {
            entry.local_id = Some(task_id.to_string());
        }
        entry
            .external_ids
            .insert(source_id.to_string(), task_id.to_string());
        state
            .keys
            .insert(Self::stable_key(source_id, task_id), sync_id.to_string());
    }

    pub fn external_id(&self, sync_id: &str, source_id: &str) -> Option<String> {
        self.state
            .lock()
            .entries
            .get(sync_id)
            .and_then(|e| e.external_ids.get(source_id).cloned())
    }

    pub fn local_id(&self, sync_id: &str) -> Option<String> {
        self.state
            .lock()
            .entries
            .get(sync_id)
            .and_then(|e| e.local_id.clone())
    }

    pub fn last_sync_at(&self, sync_id: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .entries
            .get(sync_id)
            .and_then(|e| e.last_sync_at)
    }

    /// Stamps the identity as synchronized at `at`.
    pub fn mark_synced(&self, sync_id: &str, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        let entry = state.entries.entry(sync_id.to_string()).or_default();
        entry.last_sync_at = Some(at);
    }

    /// Bumps and returns the version counter for one side.
    pub fn bump_version(&self, sync_id: &str, source_id: &str) -> u64 {
        let mut state = self.state.lock();
        let entry = state.entries.entry(sync_id.to_string()).or_default();
        let version = entry.versions.entry(source_id.to_string()).or_insert(0);
        *version += 1;
        *version
    }

    pub fn version(&self, sync_id: &str, source_id: &str) -> u64 {
        self.state
            .lock()
            .entries
            .get(sync_id)
            .and_then(|e| e.versions.get(source_id).copied())
            .unwrap_or(0)
    }

    /// Forgets an identity and all of its key mappings.
    pub fn remove(&self, sync_id: &str) {
        let mut state = self.state.lock();
        state.entries.remove(sync_id);
        state.keys.retain(|_, sid| sid.as_str() != sync_id);
    }

    /// Drops one source's mapping from an identity.
    pub fn remove_source_mapping(&self, sync_id: &str, source_id: &str) {
        let mut state = self.state.lock();
        let removed = match state.entries.get_mut(sync_id) {
            Some(entry) => entry.external_ids.remove(source_id),
            None => None,
        };
        if let Some(task_id) = removed {
            state.keys.remove(&SyncTracker::stable_key(source_id, &task_id));
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(path.as_os_str());
    name.push(".backup");
    PathBuf::from(name)
}
