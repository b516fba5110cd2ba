use std::path::PathBuf;
use thiserror::Error;

use crate::source::SourceError;
use crate::store::StoreError;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync already in progress")]
    AlreadyRunning,

    #[error("source {id}: {source}")]
    Source {
        id: String,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn source(id: impl Into<String>, source: SourceError) -> Self {
        SyncError::Source {
            id: id.into(),
            source,
        }
    }
}
