//! The synchronization engine.
//!
//! The matcher and conflict resolver are pure functions over collections of
//! task records with attached sync metadata; the engine composes them and
//! talks to the local store and any number of external source adapters.

pub mod conflict;
pub mod engine;
pub mod matcher;
pub mod tracker;

mod error;

pub use conflict::{ConflictField, ConflictInfo, ConflictResolver, SuggestedResolution};
pub use engine::{SyncEngine, SyncEvent, SyncReport};
pub use error::SyncError;
pub use matcher::{MatchGroup, TaskMatcher};
pub use tracker::SyncTracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::SourceKind;
use crate::task::Task;

/// Where a record stands relative to its cross-source peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    #[default]
    Pending,
    Conflict,
    LocalOnly,
    RemoteOnly,
}

/// Sync metadata attached to a task record for the duration of a pass.
#[derive(Debug, Clone)]
pub struct SyncMeta {
    pub source: SourceKind,
    /// Id of the adapter that produced the record.
    pub source_id: String,
    pub sync_id: Option<String>,
    /// Monotonic per-side counter, bumped when a pass records a new state.
    pub version: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    /// Source id of the conflicting side, in manual mode.
    pub conflict_with: Option<String>,
}

impl SyncMeta {
    pub fn new(source: SourceKind, source_id: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            sync_id: None,
            version: 0,
            last_sync_at: None,
            sync_status: SyncStatus::Pending,
            conflict_with: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.source == SourceKind::Local
    }
}

/// A task record together with its sync metadata.
#[derive(Debug, Clone)]
pub struct SyncedTask {
    pub task: Task,
    pub meta: SyncMeta,
}

impl SyncedTask {
    pub fn new(task: Task, meta: SyncMeta) -> Self {
        Self { task, meta }
    }

    /// True when the record changed since it was last synchronized. A record
    /// that was never synchronized counts as modified.
    pub fn modified_since_sync(&self) -> bool {
        match self.meta.last_sync_at {
            Some(last_sync) => self.task.last_modified > last_sync,
            None => true,
        }
    }
}
