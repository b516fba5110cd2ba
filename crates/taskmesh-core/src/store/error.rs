use std::path::PathBuf;
use thiserror::Error;

use crate::config::MAX_TASK_DEPTH;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Parent task not found: {0}")]
    ParentNotFound(String),

    #[error("Cannot nest under {parent}: maximum depth of {max} reached")]
    DepthLimitExceeded { parent: String, max: u8 },

    #[error("Task {0} is under a canceled parent")]
    ParentCanceled(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn depth_limit(parent: &str) -> Self {
        StoreError::DepthLimitExceeded {
            parent: parent.to_string(),
            max: MAX_TASK_DEPTH,
        }
    }
}
