//! Default values for Taskmesh configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// Store Defaults
// ============================================================================

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = ".taskmesh";

/// Default task document file name.
pub const DEFAULT_TASKS_FILE: &str = "tasks.json";

/// Default sync-state cache file name.
pub const DEFAULT_TRACKER_FILE: &str = "sync-state.json";

/// Quiet period before staged mutations are written to disk (milliseconds).
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 500;

/// Maximum task depth. 0 is a root, so this allows three hierarchy levels.
pub const MAX_TASK_DEPTH: u8 = 2;

/// Version written into new task documents.
pub const DOCUMENT_VERSION: u32 = 1;

// ============================================================================
// Sync Defaults
// ============================================================================

/// Minimum description similarity for two tasks to fuzzy-match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;

/// Quiet period after a source change event before a sync runs (milliseconds).
pub const DEFAULT_CHANGE_DEBOUNCE_MS: u64 = 2000;

/// Automatic sync interval in minutes. 0 disables automatic sync.
pub const DEFAULT_AUTO_INTERVAL_MINUTES: u64 = 0;

/// Window within which two edits count as near-simultaneous when suggesting
/// a conflict resolution (seconds).
pub const CONFLICT_SUGGEST_WINDOW_SECS: i64 = 60;
