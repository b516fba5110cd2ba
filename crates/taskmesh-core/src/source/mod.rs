//! Source adapters.
//!
//! Every origin of task data — the local store included — is presented to
//! the sync engine through the same narrow contract, so the engine can treat
//! local and remote populations uniformly. Provider-specific wire protocols
//! live behind implementations of [`TaskSource`]; this crate only ships the
//! local adapter.

mod local;

pub use local::LocalSource;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::task::{Task, TaskPatch};

/// Source id of the local store adapter.
pub const LOCAL_SOURCE_ID: &str = "local";

/// Broad classification of where task records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Api,
    Calendar,
}

/// Emitted when a source detects an external change to its task set.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub source_id: String,
}

/// Errors surfaced by source adapters.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("task not found in source: {0}")]
    NotFound(String),

    #[error("source is read-only")]
    ReadOnly,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// The 4-method contract every task source is reduced to, plus identity and
/// change notification.
///
/// `get_tasks` must be a non-destructive read. Implementations report their
/// own failures; the engine isolates them per source. Tasks returned by
/// `get_tasks` carry the source's own record ids in `Task::id` — those ids
/// are what `update_task`/`delete_task` later receive back.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Stable identifier of this source instance.
    fn id(&self) -> &str;

    /// What family of source this is.
    fn kind(&self) -> SourceKind;

    /// Read-only sources are never pushed to.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Current task set of this source.
    async fn get_tasks(&self) -> Result<Vec<Task>, SourceError>;

    /// Creates a record for `task` and returns its external id.
    async fn create_task(&self, task: &Task) -> Result<String, SourceError>;

    /// Partially updates the record behind `external_id`.
    async fn update_task(&self, external_id: &str, patch: &TaskPatch) -> Result<(), SourceError>;

    /// Deletes the record behind `external_id`.
    async fn delete_task(&self, external_id: &str) -> Result<(), SourceError>;

    /// Change notifications, when the source can detect external edits.
    /// Sources without change detection return `None` and rely on periodic
    /// sync.
    fn subscribe(&self) -> Option<broadcast::Receiver<SourceEvent>> {
        None
    }
}
