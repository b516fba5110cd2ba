//! Conflict detection and resolution.
//!
//! A conflict exists only when both sides of a logically-identical task were
//! modified since their last recorded sync AND a critical field actually
//! differs by value. Resolution is strategy-driven; free-text fields are
//! never merged semantically, only selected whole.

use std::collections::HashMap;

use chrono::Duration;

use crate::config::{
    ConflictStrategy, MergeField, MergeRule, MergeSource, CONFLICT_SUGGEST_WINDOW_SECS,
};
use crate::task::Task;

use super::{SyncStatus, SyncedTask};

/// The fields whose disagreement constitutes a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictField {
    Description,
    Completed,
    DueDate,
    StartDate,
    Priority,
    Status,
}

impl ConflictField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Completed => "completed",
            Self::DueDate => "due_date",
            Self::StartDate => "start_date",
            Self::Priority => "priority",
            Self::Status => "status",
        }
    }
}

/// Informational hint about which way a conflict probably should resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestedResolution {
    Local,
    Remote,
    /// The two edits landed close together; a field merge is likely wanted.
    Merge,
}

/// A detected disagreement between two sides of one logical task.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub sync_id: String,
    pub local: SyncedTask,
    pub remote: SyncedTask,
    pub fields: Vec<ConflictField>,
    pub suggested: SuggestedResolution,
}

/// Resolves conflicts according to the configured strategy and optional
/// per-field merge rules.
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    merge_rules: Vec<MergeRule>,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            merge_rules: Vec::new(),
        }
    }

    pub fn with_merge_rules(mut self, rules: Vec<MergeRule>) -> Self {
        self.merge_rules = rules;
        self
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Finds conflicts between the local and remote populations.
    ///
    /// Only `sync_id`s present on both sides are considered; a side that was
    /// not modified since its last sync gates the conflict off entirely.
    pub fn detect_conflicts(
        &self,
        local: &[SyncedTask],
        remote: &[SyncedTask],
    ) -> Vec<ConflictInfo> {
        let mut remote_by_id: HashMap<&str, &SyncedTask> = HashMap::new();
        for task in remote {
            if let Some(sid) = task.meta.sync_id.as_deref() {
                // First member per sync_id is authoritative for the pass.
                remote_by_id.entry(sid).or_insert(task);
            }
        }

        let mut conflicts = Vec::new();
        for local_task in local {
            let Some(sid) = local_task.meta.sync_id.as_deref() else {
                continue;
            };
            let Some(remote_task) = remote_by_id.get(sid) else {
                continue;
            };

            if !local_task.modified_since_sync() || !remote_task.modified_since_sync() {
                continue;
            }

            let fields = critical_diffs(&local_task.task, &remote_task.task);
            if fields.is_empty() {
                continue;
            }

            conflicts.push(ConflictInfo {
                sync_id: sid.to_string(),
                local: local_task.clone(),
                remote: (*remote_task).clone(),
                fields,
                suggested: suggest(&local_task.task, &remote_task.task),
            });
        }
        conflicts
    }

    /// Resolves one conflict per the configured strategy.
    ///
    /// In manual mode the local record is returned unmodified but stamped
    /// `sync_status = Conflict` with `conflict_with` naming the remote
    /// source; the caller must not silently apply such a result.
    pub fn resolve_conflict(&self, conflict: &ConflictInfo) -> SyncedTask {
        match self.strategy {
            ConflictStrategy::LocalWin => conflict.local.clone(),
            ConflictStrategy::RemoteWin => conflict.remote.clone(),
            ConflictStrategy::NewestWin => {
                // Ties favor local.
                if conflict.remote.task.last_modified > conflict.local.task.last_modified {
                    conflict.remote.clone()
                } else {
                    conflict.local.clone()
                }
            }
            ConflictStrategy::Manual => {
                let mut resolved = conflict.local.clone();
                resolved.meta.sync_status = SyncStatus::Conflict;
                resolved.meta.conflict_with = Some(conflict.remote.meta.source_id.clone());
                resolved
            }
        }
    }

    /// Resolves every conflict, keyed by `sync_id`.
    pub fn resolve_conflicts(&self, conflicts: &[ConflictInfo]) -> HashMap<String, SyncedTask> {
        conflicts
            .iter()
            .map(|c| (c.sync_id.clone(), self.resolve_conflict(c)))
            .collect()
    }

    /// Field-level merge.
    ///
    /// Applies only the configured rules; every other field keeps the local
    /// value. With no rules configured, merging degenerates to whole-record
    /// newest-win.
    pub fn merge_fields(&self, local: &SyncedTask, remote: &SyncedTask) -> Task {
        if self.merge_rules.is_empty() {
            return if remote.task.last_modified > local.task.last_modified {
                remote.task.clone()
            } else {
                local.task.clone()
            };
        }

        let mut merged = local.task.clone();
        let remote_newer = remote.task.last_modified > local.task.last_modified;

        for rule in &self.merge_rules {
            let take_remote = match rule.take {
                MergeSource::Local => false,
                MergeSource::Remote => true,
                // Compared per task, not per field.
                MergeSource::Newest => remote_newer,
            };
            if !take_remote {
                continue;
            }
            apply_remote_field(&mut merged, &remote.task, rule.field);
        }

        merged
    }
}

/// Copies one field from `remote` into `merged`. Optional fields move only
/// when the remote value is defined.
fn apply_remote_field(merged: &mut Task, remote: &Task, field: MergeField) {
    match field {
        MergeField::Description => merged.description = remote.description.clone(),
        MergeField::Detail => {
            if remote.detail.is_some() {
                merged.detail = remote.detail.clone();
            }
        }
        MergeField::Priority => merged.priority = remote.priority,
        MergeField::Status => {
            merged.set_status(remote.status, remote.last_modified);
        }
        MergeField::DueDate => {
            if remote.due_date.is_some() {
                merged.due_date = remote.due_date;
            }
        }
        MergeField::StartDate => {
            if remote.start_date.is_some() {
                merged.start_date = remote.start_date;
            }
        }
        MergeField::Tags => {
            if !remote.tags.is_empty() {
                merged.tags = remote.tags.clone();
            }
        }
    }
}

/// The critical fields that differ between two records. Dates are compared
/// by instant equality.
pub fn critical_diffs(a: &Task, b: &Task) -> Vec<ConflictField> {
    let mut fields = Vec::new();
    if a.description != b.description {
        fields.push(ConflictField::Description);
    }
    if a.completed != b.completed {
        fields.push(ConflictField::Completed);
    }
    if a.due_date != b.due_date {
        fields.push(ConflictField::DueDate);
    }
    if a.start_date != b.start_date {
        fields.push(ConflictField::StartDate);
    }
    if a.priority != b.priority {
        fields.push(ConflictField::Priority);
    }
    if a.status != b.status {
        fields.push(ConflictField::Status);
    }
    fields
}

/// Near-simultaneous edits suggest a merge; otherwise the newer side.
fn suggest(local: &Task, remote: &Task) -> SuggestedResolution {
    let delta = local.last_modified - remote.last_modified;
    if delta.abs() < Duration::seconds(CONFLICT_SUGGEST_WINDOW_SECS) {
        SuggestedResolution::Merge
    } else if local.last_modified > remote.last_modified {
        SuggestedResolution::Local
    } else {
        SuggestedResolution::Remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;
    use crate::sync::SyncMeta;
    use crate::task::TaskStatus;
    use chrono::Utc;

    fn synced(description: &str, source: SourceKind, source_id: &str, sync_id: &str) -> SyncedTask {
        let mut task = Task::new(description, source_id);
        task.sync_id = Some(sync_id.to_string());
        let mut meta = SyncMeta::new(source, source_id);
        meta.sync_id = Some(sync_id.to_string());
        SyncedTask::new(task, meta)
    }

    #[test]
    fn test_no_conflict_without_critical_diff() {
        let resolver = ConflictResolver::new(ConflictStrategy::NewestWin);
        let local = synced("Buy milk", SourceKind::Local, "local", "s1");
        let mut remote = synced("Buy milk", SourceKind::Api, "chat", "s1");
        remote.task.detail = Some("2 liters".to_string());

        // Both sides count as modified (never synced), but no critical field
        // differs.
        let conflicts = resolver.detect_conflicts(&[local], &[remote]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_suggest_merge_for_near_simultaneous_edits() {
        let local = Task::new("a", "local");
        let mut remote = Task::new("a", "chat");
        remote.last_modified = local.last_modified + Duration::seconds(30);
        assert_eq!(suggest(&local, &remote), SuggestedResolution::Merge);

        remote.last_modified = local.last_modified + Duration::seconds(120);
        assert_eq!(suggest(&local, &remote), SuggestedResolution::Remote);
    }

    #[test]
    fn test_manual_stamps_conflict() {
        let resolver = ConflictResolver::new(ConflictStrategy::Manual);
        let local = synced("Buy milk", SourceKind::Local, "local", "s1");
        let mut remote = synced("Buy oat milk", SourceKind::Api, "chat", "s1");
        remote.task.set_status(TaskStatus::Done, Utc::now());

        let conflicts = resolver.detect_conflicts(&[local.clone()], &[remote]);
        assert_eq!(conflicts.len(), 1);

        let resolved = resolver.resolve_conflict(&conflicts[0]);
        assert_eq!(resolved.task.description, "Buy milk");
        assert_eq!(resolved.meta.sync_status, SyncStatus::Conflict);
        assert_eq!(resolved.meta.conflict_with.as_deref(), Some("chat"));
    }

    #[test]
    fn test_merge_rules_take_remote_only_when_defined() {
        let resolver = ConflictResolver::new(ConflictStrategy::NewestWin).with_merge_rules(vec![
            MergeRule {
                field: MergeField::DueDate,
                take: MergeSource::Remote,
            },
            MergeRule {
                field: MergeField::Description,
                take: MergeSource::Local,
            },
        ]);

        let mut local = synced("Buy milk", SourceKind::Local, "local", "s1");
        local.task.due_date = Some(Utc::now());
        let remote = synced("Buy oat milk", SourceKind::Api, "chat", "s1");

        let merged = resolver.merge_fields(&local, &remote);
        // Remote due date is undefined, so the local one stays.
        assert_eq!(merged.due_date, local.task.due_date);
        assert_eq!(merged.description, "Buy milk");
    }
}
