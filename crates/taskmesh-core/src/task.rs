use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a task.
///
/// Tasks move `Todo → InProgress → Done`; `Canceled` is reachable from any
/// non-terminal state, and `Todo` is reachable back from the terminal states
/// as an explicit revert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Canceled => "canceled",
        }
    }

    /// Returns true for states no further work happens in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled)
    }
}

/// What kind of record a task is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Todo,
    Reminder,
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// The canonical unit of work.
///
/// Hierarchy is expressed through `parent_id`/`child_ids` references into a
/// flat store map; `depth` is derived from the parent chain and never set by
/// callers directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Locally unique, stable identifier.
    pub id: String,
    /// Cross-source identity, assigned lazily by the matcher.
    #[serde(default)]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub kind: TaskKind,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub cancelled: bool,
    pub description: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Insertion order doubles as display order.
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub depth: u8,
    #[serde(default)]
    pub archived: bool,
    pub last_modified: DateTime<Utc>,
    /// Which source produced this record.
    pub source_id: String,
}

impl Task {
    /// Creates a new root-level task owned by the given source.
    pub fn new(description: impl Into<String>, source_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            sync_id: None,
            kind: TaskKind::Todo,
            status: TaskStatus::Todo,
            completed: false,
            cancelled: false,
            description: description.into(),
            detail: None,
            priority: Priority::Normal,
            tags: BTreeSet::new(),
            created_date: now,
            start_date: None,
            due_date: None,
            cancelled_date: None,
            completion_date: None,
            parent_id: None,
            child_ids: Vec::new(),
            depth: 0,
            archived: false,
            last_modified: now,
            source_id: source_id.into(),
        }
    }

    /// Moves the task to `status`, keeping the completion/cancellation
    /// booleans and dates consistent with it.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        match status {
            TaskStatus::Done => {
                self.completed = true;
                self.cancelled = false;
                self.completion_date = Some(now);
                self.cancelled_date = None;
            }
            TaskStatus::Canceled => {
                self.completed = false;
                self.cancelled = true;
                self.completion_date = None;
                self.cancelled_date = Some(now);
            }
            TaskStatus::Todo | TaskStatus::InProgress => {
                self.completed = false;
                self.cancelled = false;
                self.completion_date = None;
                self.cancelled_date = None;
            }
        }
        self.status = status;
        self.last_modified = now;
    }

    /// The date the matcher compares tasks on: due date if present,
    /// otherwise start date.
    pub fn primary_date(&self) -> Option<DateTime<Utc>> {
        self.due_date.or(self.start_date)
    }
}

/// A partial update to a task.
///
/// `None` leaves a field untouched. For the optional fields the outer option
/// selects whether to write at all; `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub description: Option<String>,
    pub detail: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub tags: Option<BTreeSet<String>>,
    pub start_date: Option<Option<DateTime<Utc>>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub archived: Option<bool>,
}

impl TaskPatch {
    /// A patch that only moves the status.
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Captures every syncable field of `task`, for pushing a resolved
    /// winner to the other side.
    pub fn from_task(task: &Task) -> Self {
        Self {
            status: Some(task.status),
            description: Some(task.description.clone()),
            detail: Some(task.detail.clone()),
            priority: Some(task.priority),
            tags: Some(task.tags.clone()),
            start_date: Some(task.start_date),
            due_date: Some(task.due_date),
            archived: Some(task.archived),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.description.is_none()
            && self.detail.is_none()
            && self.priority.is_none()
            && self.tags.is_none()
            && self.start_date.is_none()
            && self.due_date.is_none()
            && self.archived.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("Buy milk", "local");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.depth, 0);
        assert!(!task.completed);
        assert!(task.child_ids.is_empty());
    }

    #[test]
    fn test_set_status_done_stamps_completion() {
        let mut task = Task::new("Buy milk", "local");
        let now = Utc::now();
        task.set_status(TaskStatus::Done, now);
        assert!(task.completed);
        assert!(!task.cancelled);
        assert_eq!(task.completion_date, Some(now));
        assert!(task.cancelled_date.is_none());
    }

    #[test]
    fn test_set_status_revert_clears_terminal_state() {
        let mut task = Task::new("Buy milk", "local");
        task.set_status(TaskStatus::Canceled, Utc::now());
        task.set_status(TaskStatus::Todo, Utc::now());
        assert!(!task.completed);
        assert!(!task.cancelled);
        assert!(task.completion_date.is_none());
        assert!(task.cancelled_date.is_none());
    }

    #[test]
    fn test_primary_date_prefers_due() {
        let mut task = Task::new("Buy milk", "local");
        assert!(task.primary_date().is_none());

        let start = Utc::now();
        task.start_date = Some(start);
        assert_eq!(task.primary_date(), Some(start));

        let due = Utc::now();
        task.due_date = Some(due);
        assert_eq!(task.primary_date(), Some(due));
    }
}
