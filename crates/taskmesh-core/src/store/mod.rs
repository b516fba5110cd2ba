//! The authoritative local task store.
//!
//! Tasks live in one flat id-keyed map (arena-style); the parent/child
//! hierarchy is expressed through id references, so status propagation can
//! reach any node without ownership cycles. Status changes cascade downward
//! to descendants and upward to ancestors as a recursive state machine,
//! guarded by explicit direction flags rather than cycle detection — the
//! tree is acyclic by construction (every child has exactly one parent,
//! enforced at creation).
//!
//! Mutations are staged in memory and flushed by a debounced writer;
//! [`TaskStore::flush`] must run before final teardown.

mod error;
mod persist;

pub use error::StoreError;
pub use persist::TaskDocument;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{StoreConfig, MAX_TASK_DEPTH};
use crate::source::LOCAL_SOURCE_ID;
use crate::task::{Priority, Task, TaskKind, TaskPatch, TaskStatus};

/// Which way a status change propagates through the hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    #[default]
    Both,
    Down,
    Up,
    None,
}

impl Propagation {
    fn descends(&self) -> bool {
        matches!(self, Self::Both | Self::Down)
    }

    fn ascends(&self) -> bool {
        matches!(self, Self::Both | Self::Up)
    }
}

/// Options for [`TaskStore::update_task`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub propagation: Propagation,
    /// Prevents re-entrant propagation during a cascade step.
    pub skip_cascade: bool,
    /// Allows a status change on a child whose parent is canceled. Used only
    /// by the cascade mechanism itself.
    pub bypass_cancel_lock: bool,
}

/// Parameters for creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub description: String,
    pub kind: TaskKind,
    pub priority: Priority,
    pub detail: Option<String>,
    pub tags: std::collections::BTreeSet<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
}

impl NewTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Filters for [`TaskStore::get_all_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub include_archived: bool,
    pub status: Option<TaskStatus>,
    pub source: Option<String>,
}

/// Change notification emitted after a mutation is applied.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Created(String),
    Updated(String),
    Deleted(String),
}

struct StoreState {
    tasks: HashMap<String, Task>,
}

struct StoreInner {
    state: RwLock<StoreState>,
    path: PathBuf,
    save_delay: Duration,
    /// Handle of the pending debounced write, if any.
    pending_save: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<StoreEvent>,
}

/// Handle to the hierarchical task store. Cheap to clone; all clones share
/// the same state.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<StoreInner>,
}

impl TaskStore {
    /// Opens the store backed by the document at `path`, recovering from a
    /// corrupt document by preserving a `.backup` copy and starting empty.
    pub fn open(path: impl Into<PathBuf>, save_delay: Duration) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = persist::load_document(&path)?;

        let mut tasks = HashMap::new();
        for task in doc.tasks {
            tasks.insert(task.id.clone(), task);
        }
        for mut task in doc.archived {
            task.archived = true;
            tasks.insert(task.id.clone(), task);
        }

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState { tasks }),
                path,
                save_delay,
                pending_save: Mutex::new(None),
                events,
            }),
        })
    }

    /// Opens the store at the configured location.
    pub fn with_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open(
            config.tasks_path(),
            Duration::from_millis(config.save_debounce_ms),
        )
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Returns a task by id.
    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.state.read().await.tasks.get(id).cloned()
    }

    /// Returns tasks matching `query`, ordered by creation date.
    pub async fn get_all_tasks(&self, query: &TaskQuery) -> Vec<Task> {
        let state = self.inner.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| query.include_archived || !t.archived)
            .filter(|t| query.status.map_or(true, |s| t.status == s))
            .filter(|t| query.source.as_deref().map_or(true, |s| t.source_id == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_date.cmp(&b.created_date));
        tasks
    }

    /// Creates a task. A child requires an existing parent and is rejected
    /// once the parent sits at the maximum depth.
    pub async fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        let task = {
            let mut state = self.inner.state.write().await;

            let (depth, parent_id) = match &new.parent_id {
                Some(pid) => {
                    let parent = state
                        .tasks
                        .get(pid)
                        .ok_or_else(|| StoreError::ParentNotFound(pid.clone()))?;
                    if parent.depth >= MAX_TASK_DEPTH {
                        return Err(StoreError::depth_limit(pid));
                    }
                    (parent.depth + 1, Some(pid.clone()))
                }
                None => (0, None),
            };

            let mut task = Task::new(&new.description, LOCAL_SOURCE_ID);
            task.kind = new.kind;
            task.priority = new.priority;
            task.detail = new.detail;
            task.tags = new.tags;
            task.start_date = new.start_date;
            task.due_date = new.due_date;
            task.parent_id = parent_id.clone();
            task.depth = depth;

            if let Some(pid) = &parent_id {
                if let Some(parent) = state.tasks.get_mut(pid) {
                    parent.child_ids.push(task.id.clone());
                }
            }

            state.tasks.insert(task.id.clone(), task.clone());
            task
        };

        self.schedule_save();
        self.emit(StoreEvent::Created(task.id.clone()));
        Ok(task)
    }

    /// Inserts a copy of a remote record as a new root-level local task,
    /// keeping its content and `sync_id` but minting a fresh local id.
    pub async fn import_task(&self, source: &Task) -> Result<Task, StoreError> {
        let task = {
            let mut state = self.inner.state.write().await;
            let mut task = source.clone();
            task.id = Uuid::new_v4().to_string();
            task.parent_id = None;
            task.child_ids = Vec::new();
            task.depth = 0;
            task.source_id = LOCAL_SOURCE_ID.to_string();
            state.tasks.insert(task.id.clone(), task.clone());
            task
        };

        self.schedule_save();
        self.emit(StoreEvent::Created(task.id.clone()));
        Ok(task)
    }

    /// Applies `patch` to a task and runs the status cascade.
    ///
    /// A direct status change on a child under a canceled parent is rejected
    /// unless `options.bypass_cancel_lock` is set.
    pub async fn update_task(
        &self,
        id: &str,
        patch: TaskPatch,
        options: UpdateOptions,
    ) -> Result<Task, StoreError> {
        let mut changed: Vec<String> = Vec::new();
        let updated = {
            let mut state = self.inner.state.write().await;
            let now = Utc::now();

            let (old_status, parent_id) = {
                let task = state
                    .tasks
                    .get(id)
                    .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
                (task.status, task.parent_id.clone())
            };

            if patch.status.is_some() && !options.bypass_cancel_lock {
                if let Some(pid) = &parent_id {
                    let parent_canceled = state
                        .tasks
                        .get(pid)
                        .map(|p| p.status == TaskStatus::Canceled)
                        .unwrap_or(false);
                    if parent_canceled {
                        return Err(StoreError::ParentCanceled(id.to_string()));
                    }
                }
            }

            let new_status = {
                // Existence checked above; the map is untouched in between.
                let task = state
                    .tasks
                    .get_mut(id)
                    .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
                apply_patch(task, &patch, now);
                task.status
            };

            if new_status != old_status && !options.skip_cascade {
                if options.propagation.descends() {
                    cascade_down(&mut state.tasks, id, new_status, now, &mut changed);
                }
                if options.propagation.ascends() {
                    bubble_up(&mut state.tasks, id, now, &mut changed);
                }
            }

            state
                .tasks
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?
        };

        self.schedule_save();
        self.emit(StoreEvent::Updated(id.to_string()));
        for cid in changed {
            self.emit(StoreEvent::Updated(cid));
        }
        Ok(updated)
    }

    /// Records the cross-source identity of a task. Bookkeeping only: the
    /// task's `last_modified` is left untouched so the assignment does not
    /// mark the task as locally edited.
    pub async fn assign_sync_id(&self, id: &str, sync_id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.inner.state.write().await;
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
            task.sync_id = Some(sync_id.to_string());
        }
        self.schedule_save();
        Ok(())
    }

    /// Deletes a task and, recursively, all of its descendants.
    pub async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        let removed = {
            let mut state = self.inner.state.write().await;

            if !state.tasks.contains_key(id) {
                return Err(StoreError::TaskNotFound(id.to_string()));
            }

            if let Some(pid) = state.tasks.get(id).and_then(|t| t.parent_id.clone()) {
                if let Some(parent) = state.tasks.get_mut(&pid) {
                    parent.child_ids.retain(|c| c != id);
                }
            }

            let mut ids = Vec::new();
            collect_subtree(&state.tasks, id, &mut ids);
            for tid in &ids {
                state.tasks.remove(tid);
            }
            ids
        };

        self.schedule_save();
        for tid in removed {
            self.emit(StoreEvent::Deleted(tid));
        }
        Ok(())
    }

    /// Moves a task to the archive. Archived tasks are excluded from default
    /// queries but remain in the durable document.
    pub async fn archive_task(&self, id: &str) -> Result<Task, StoreError> {
        let task = {
            let mut state = self.inner.state.write().await;
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
            task.archived = true;
            task.last_modified = Utc::now();
            task.clone()
        };

        self.schedule_save();
        self.emit(StoreEvent::Updated(id.to_string()));
        Ok(task)
    }

    /// Number of tasks, archived included.
    pub async fn len(&self) -> usize {
        self.inner.state.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cancels any pending debounced write and writes the document now.
    /// Must be invoked on shutdown paths before final teardown.
    pub async fn flush(&self) -> Result<(), StoreError> {
        if let Some(handle) = self.inner.pending_save.lock().take() {
            handle.abort();
        }
        self.write_now().await
    }

    /// Re-arms the debounced writer. The most recent state at fire time is
    /// what lands on disk; bursts of edits collapse into one write.
    fn schedule_save(&self) {
        let store = self.clone();
        let delay = self.inner.save_delay;
        let mut pending = self.inner.pending_save.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = store.write_now().await {
                warn!(error = %e, "debounced task document write failed");
            }
        }));
    }

    async fn write_now(&self) -> Result<(), StoreError> {
        let doc = {
            let state = self.inner.state.read().await;
            let mut tasks: Vec<Task> = Vec::new();
            let mut archived: Vec<Task> = Vec::new();
            for task in state.tasks.values() {
                if task.archived {
                    archived.push(task.clone());
                } else {
                    tasks.push(task.clone());
                }
            }
            tasks.sort_by(|a, b| a.created_date.cmp(&b.created_date));
            archived.sort_by(|a, b| a.created_date.cmp(&b.created_date));
            TaskDocument {
                version: crate::config::DOCUMENT_VERSION,
                tasks,
                archived,
            }
        };

        persist::write_document(&self.inner.path, &doc)?;
        debug!(path = %self.inner.path.display(), "task document written");
        Ok(())
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.inner.events.send(event);
    }
}

fn apply_patch(task: &mut Task, patch: &TaskPatch, now: DateTime<Utc>) {
    if let Some(description) = &patch.description {
        task.description = description.clone();
    }
    if let Some(detail) = &patch.detail {
        task.detail = detail.clone();
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(tags) = &patch.tags {
        task.tags = tags.clone();
    }
    if let Some(start_date) = patch.start_date {
        task.start_date = start_date;
    }
    if let Some(due_date) = patch.due_date {
        task.due_date = due_date;
    }
    if let Some(archived) = patch.archived {
        task.archived = archived;
    }
    task.last_modified = now;
    if let Some(status) = patch.status {
        if status != task.status {
            task.set_status(status, now);
        }
    }
}

/// Walks the subtree under `id` (inclusive), collecting ids depth-first.
fn collect_subtree(tasks: &HashMap<String, Task>, id: &str, out: &mut Vec<String>) {
    out.push(id.to_string());
    let child_ids = match tasks.get(id) {
        Some(task) => task.child_ids.clone(),
        None => return,
    };
    for child_id in child_ids {
        collect_subtree(tasks, &child_id, out);
    }
}

/// Downward propagation: the parent's new status is applied to descendants
/// per the cascade rules. `InProgress` never propagates down.
fn cascade_down(
    tasks: &mut HashMap<String, Task>,
    id: &str,
    status: TaskStatus,
    now: DateTime<Utc>,
    changed: &mut Vec<String>,
) {
    let child_ids = match tasks.get(id) {
        Some(task) => task.child_ids.clone(),
        None => return,
    };

    for child_id in child_ids {
        let apply = match tasks.get(&child_id) {
            Some(child) => match status {
                TaskStatus::Done => child.status != TaskStatus::Done,
                TaskStatus::Canceled => child.status != TaskStatus::Canceled,
                // A revert reopens only terminal descendants.
                TaskStatus::Todo => child.status.is_terminal(),
                TaskStatus::InProgress => false,
            },
            None => {
                warn!(task = %child_id, "dangling child reference during cascade");
                continue;
            }
        };

        if apply {
            if let Some(child) = tasks.get_mut(&child_id) {
                child.set_status(status, now);
                changed.push(child_id.clone());
            }
        }
        cascade_down(tasks, &child_id, status, now, changed);
    }
}

/// Upward propagation: re-evaluates the parent after a child's status
/// change, bubbling further up on every applied transition.
fn bubble_up(
    tasks: &mut HashMap<String, Task>,
    child_id: &str,
    now: DateTime<Utc>,
    changed: &mut Vec<String>,
) {
    let (child_status, parent_id) = match tasks.get(child_id) {
        Some(task) => (task.status, task.parent_id.clone()),
        None => return,
    };
    let Some(parent_id) = parent_id else {
        return;
    };
    let Some(parent) = tasks.get(&parent_id) else {
        warn!(task = %parent_id, "dangling parent reference during cascade");
        return;
    };
    let parent_status = parent.status;

    let next = match child_status {
        TaskStatus::Done => {
            let all_done = parent
                .child_ids
                .iter()
                .all(|cid| tasks.get(cid).map_or(true, |c| c.status == TaskStatus::Done));
            if all_done {
                Some(TaskStatus::Done)
            } else if parent_status == TaskStatus::Todo {
                Some(TaskStatus::InProgress)
            } else {
                None
            }
        }
        TaskStatus::InProgress => {
            (parent_status == TaskStatus::Todo).then_some(TaskStatus::InProgress)
        }
        // A reopened child demotes a done parent back to in-progress.
        TaskStatus::Todo => (parent_status == TaskStatus::Done).then_some(TaskStatus::InProgress),
        TaskStatus::Canceled => None,
    };

    if let Some(status) = next {
        if status != parent_status {
            if let Some(parent) = tasks.get_mut(&parent_id) {
                parent.set_status(status, now);
                changed.push(parent_id.clone());
            }
            bubble_up(tasks, &parent_id, now, changed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (TaskStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = TaskStore::open(
            temp.path().join("tasks.json"),
            Duration::from_millis(10),
        )
        .unwrap();
        (store, temp)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (store, _temp) = test_store().await;

        let task = store.create_task(NewTask::new("Buy milk")).await.unwrap();
        let loaded = store.get_task(&task.id).await.unwrap();
        assert_eq!(loaded.description, "Buy milk");
        assert_eq!(loaded.depth, 0);
    }

    #[tokio::test]
    async fn test_child_depth_derived() {
        let (store, _temp) = test_store().await;

        let root = store.create_task(NewTask::new("root")).await.unwrap();
        let child = store
            .create_task(NewTask::new("child").under(&root.id))
            .await
            .unwrap();

        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));

        let root = store.get_task(&root.id).await.unwrap();
        assert_eq!(root.child_ids, vec![child.id.clone()]);
    }

    #[tokio::test]
    async fn test_missing_parent_rejected() {
        let (store, _temp) = test_store().await;

        let err = store
            .create_task(NewTask::new("orphan").under("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let (store, _temp) = test_store().await;

        let root = store.create_task(NewTask::new("root")).await.unwrap();
        let child = store
            .create_task(NewTask::new("child").under(&root.id))
            .await
            .unwrap();
        let grandchild = store
            .create_task(NewTask::new("grandchild").under(&child.id))
            .await
            .unwrap();

        store.delete_task(&child.id).await.unwrap();

        assert!(store.get_task(&child.id).await.is_none());
        assert!(store.get_task(&grandchild.id).await.is_none());
        let root = store.get_task(&root.id).await.unwrap();
        assert!(root.child_ids.is_empty());
    }

    #[tokio::test]
    async fn test_archived_excluded_by_default() {
        let (store, _temp) = test_store().await;

        let task = store.create_task(NewTask::new("old news")).await.unwrap();
        store.archive_task(&task.id).await.unwrap();

        assert!(store.get_all_tasks(&TaskQuery::default()).await.is_empty());

        let all = store
            .get_all_tasks(&TaskQuery {
                include_archived: true,
                ..TaskQuery::default()
            })
            .await;
        assert_eq!(all.len(), 1);
    }
}
