//! Taskmesh core: a local task store with hierarchical status consistency
//! and an engine that synchronizes it against heterogeneous external task
//! and calendar sources.

pub mod config;
pub mod source;
pub mod store;
pub mod sync;
pub mod task;

pub use config::{Config, ConfigError, ConflictStrategy, StoreConfig, SyncConfig, SyncDirection};
pub use source::{LocalSource, SourceError, SourceEvent, SourceKind, TaskSource};
pub use store::{
    NewTask, Propagation, StoreError, StoreEvent, TaskQuery, TaskStore, UpdateOptions,
};
pub use sync::{
    ConflictInfo, ConflictResolver, MatchGroup, SyncEngine, SyncError, SyncEvent, SyncMeta,
    SyncReport, SyncStatus, SyncTracker, SyncedTask, TaskMatcher,
};
pub use task::{Priority, Task, TaskKind, TaskPatch, TaskStatus};
