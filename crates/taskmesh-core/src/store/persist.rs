use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::DOCUMENT_VERSION;
use crate::task::Task;

use super::error::StoreError;

/// The durable on-disk shape of the store: a versioned document with the
/// active and archived task arrays. Instants serialize as ISO-8601 strings
/// through chrono's serde support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub archived: Vec<Task>,
}

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

impl Default for TaskDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            tasks: Vec::new(),
            archived: Vec::new(),
        }
    }
}

/// `tasks.json` → `tasks.json.backup`.
pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".backup");
    PathBuf::from(name)
}

/// Loads the task document from `path`.
///
/// A missing file yields an empty document. An unparsable file is preserved
/// as a `.backup` copy before an empty document is returned; the original is
/// never silently overwritten.
pub(crate) fn load_document(path: &Path) -> Result<TaskDocument, StoreError> {
    if !path.exists() {
        return Ok(TaskDocument::default());
    }

    let json = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    match serde_json::from_str(&json) {
        Ok(doc) => Ok(doc),
        Err(e) => {
            let backup = backup_path(path);
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "task document is corrupt; preserving a backup and starting empty"
            );
            fs::copy(path, &backup).map_err(|e| StoreError::io(&backup, e))?;
            Ok(TaskDocument::default())
        }
    }
}

/// Writes the task document to `path`, creating parent directories as
/// needed.
pub(crate) fn write_document(path: &Path, doc: &TaskDocument) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let json = serde_json::to_string_pretty(doc)?;
    fs::write(path, json).map_err(|e| StoreError::io(path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_document() {
        let temp = TempDir::new().unwrap();
        let doc = load_document(&temp.path().join("tasks.json")).unwrap();
        assert_eq!(doc.version, DOCUMENT_VERSION);
        assert!(doc.tasks.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.json");

        let mut doc = TaskDocument::default();
        doc.tasks.push(Task::new("Water plants", "local"));
        write_document(&path, &doc).unwrap();

        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].description, "Water plants");
    }

    #[test]
    fn test_missing_version_defaults_to_one() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.json");
        fs::write(&path, r#"{"tasks": [], "archived": []}"#).unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.version, 1);
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.json");
        fs::write(&path, "{not json").unwrap();

        let doc = load_document(&path).unwrap();
        assert!(doc.tasks.is_empty());

        let backup = backup_path(&path);
        assert!(backup.exists());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{not json");
        // The original is left in place untouched.
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }
}
