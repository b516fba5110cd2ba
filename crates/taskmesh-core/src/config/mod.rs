//! Configuration management for Taskmesh.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `taskmesh.toml` file
//! 3. User config `~/.config/taskmesh/config.toml`
//! 4. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local store configuration.
    pub store: StoreConfig,

    /// Synchronization configuration.
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./taskmesh.toml` (project local)
    /// 2. `~/.config/taskmesh/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        // Try project-local config first
        if Path::new("taskmesh.toml").exists() {
            return Self::from_file("taskmesh.toml");
        }

        // Try user config
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskmesh").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Use defaults
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TASKMESH_DATA_DIR") {
            self.store.data_dir = dir;
        }
        if let Ok(direction) = std::env::var("TASKMESH_SYNC_DIRECTION") {
            if let Some(d) = SyncDirection::parse(&direction) {
                self.sync.direction = d;
            }
        }
        if let Ok(strategy) = std::env::var("TASKMESH_SYNC_STRATEGY") {
            if let Some(s) = ConflictStrategy::parse(&strategy) {
                self.sync.strategy = s;
            }
        }
        if let Ok(minutes) = std::env::var("TASKMESH_SYNC_INTERVAL_MINUTES") {
            if let Ok(n) = minutes.parse() {
                self.sync.auto_interval_minutes = n;
            }
        }
    }
}

/// Local store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory for taskmesh data (default: ".taskmesh").
    pub data_dir: String,

    /// Task document file name.
    pub tasks_file: String,

    /// Sync-state cache file name.
    pub tracker_file: String,

    /// Quiet period before staged mutations hit disk, in milliseconds.
    pub save_debounce_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            tasks_file: DEFAULT_TASKS_FILE.to_string(),
            tracker_file: DEFAULT_TRACKER_FILE.to_string(),
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
        }
    }
}

impl StoreConfig {
    /// Get the full path to the task document.
    pub fn tasks_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.tasks_file)
    }

    /// Get the full path to the sync-state cache.
    pub fn tracker_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.tracker_file)
    }
}

/// Which way task records are allowed to flow during a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    #[default]
    Bidirectional,
    ImportOnly,
    ExportOnly,
}

impl SyncDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bidirectional" => Some(Self::Bidirectional),
            "import-only" => Some(Self::ImportOnly),
            "export-only" => Some(Self::ExportOnly),
            _ => None,
        }
    }

    /// True when remote records may be written into the local store.
    pub fn allows_import(&self) -> bool {
        matches!(self, Self::Bidirectional | Self::ImportOnly)
    }

    /// True when local records may be pushed to remote sources.
    pub fn allows_export(&self) -> bool {
        matches!(self, Self::Bidirectional | Self::ExportOnly)
    }
}

/// How a detected conflict is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    LocalWin,
    RemoteWin,
    #[default]
    NewestWin,
    /// Conflicts are surfaced in the sync result instead of being resolved.
    Manual,
}

impl ConflictStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local-win" => Some(Self::LocalWin),
            "remote-win" => Some(Self::RemoteWin),
            "newest-win" => Some(Self::NewestWin),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Fields a merge rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeField {
    Description,
    Detail,
    Priority,
    Status,
    DueDate,
    StartDate,
    Tags,
}

/// Where a merge rule takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeSource {
    /// Keep the local value.
    Local,
    /// Take the remote value if it is defined.
    Remote,
    /// Take the value from whichever record was modified last.
    Newest,
}

/// A per-field merge rule, applied by the conflict resolver when configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRule {
    pub field: MergeField,
    pub take: MergeSource,
}

/// Synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source ids that participate in sync. Empty means every registered
    /// source participates.
    pub enabled_sources: Vec<String>,

    /// Sync direction.
    pub direction: SyncDirection,

    /// Conflict resolution strategy.
    pub strategy: ConflictStrategy,

    /// Automatic sync interval in minutes. 0 disables automatic sync.
    pub auto_interval_minutes: u64,

    /// Quiet period after a change event before a reactive sync, in
    /// milliseconds.
    pub change_debounce_ms: u64,

    /// Minimum description similarity for fuzzy matching.
    pub match_threshold: f64,

    /// Per-field merge rules. Empty means whole-record resolution.
    pub merge_rules: Vec<MergeRule>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled_sources: Vec::new(),
            direction: SyncDirection::default(),
            strategy: ConflictStrategy::default(),
            auto_interval_minutes: DEFAULT_AUTO_INTERVAL_MINUTES,
            change_debounce_ms: DEFAULT_CHANGE_DEBOUNCE_MS,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            merge_rules: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// True when `source_id` participates in sync.
    pub fn source_enabled(&self, source_id: &str) -> bool {
        self.enabled_sources.is_empty()
            || self.enabled_sources.iter().any(|s| s == source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.data_dir, DEFAULT_DATA_DIR);
        assert_eq!(config.sync.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(config.sync.direction, SyncDirection::Bidirectional);
        assert_eq!(config.sync.strategy, ConflictStrategy::NewestWin);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[store]
data_dir = ".custom-mesh"

[sync]
direction = "import-only"
strategy = "manual"
auto_interval_minutes = 15

[[sync.merge_rules]]
field = "description"
take = "newest"

[[sync.merge_rules]]
field = "due-date"
take = "remote"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.data_dir, ".custom-mesh");
        assert_eq!(config.sync.direction, SyncDirection::ImportOnly);
        assert_eq!(config.sync.strategy, ConflictStrategy::Manual);
        assert_eq!(config.sync.auto_interval_minutes, 15);
        assert_eq!(config.sync.merge_rules.len(), 2);
        assert_eq!(config.sync.merge_rules[1].field, MergeField::DueDate);
        assert_eq!(config.sync.merge_rules[1].take, MergeSource::Remote);
    }

    #[test]
    fn test_direction_gates() {
        assert!(SyncDirection::Bidirectional.allows_import());
        assert!(SyncDirection::Bidirectional.allows_export());
        assert!(SyncDirection::ImportOnly.allows_import());
        assert!(!SyncDirection::ImportOnly.allows_export());
        assert!(!SyncDirection::ExportOnly.allows_import());
        assert!(SyncDirection::ExportOnly.allows_export());
    }

    #[test]
    fn test_source_enabled() {
        let mut sync = SyncConfig::default();
        assert!(sync.source_enabled("anything"));

        sync.enabled_sources = vec!["caldav".to_string()];
        assert!(sync.source_enabled("caldav"));
        assert!(!sync.source_enabled("slack"));
    }
}
