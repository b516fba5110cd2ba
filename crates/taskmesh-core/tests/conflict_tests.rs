use chrono::{Duration, Utc};

use taskmesh_core::{
    config::{MergeField, MergeRule, MergeSource},
    ConflictResolver, ConflictStrategy, Priority, SourceKind, SyncMeta, SyncStatus, SyncedTask,
    Task, TaskStatus,
};

fn side(description: &str, kind: SourceKind, source_id: &str) -> SyncedTask {
    let mut task = Task::new(description, source_id);
    task.sync_id = Some("s1".to_string());
    let mut meta = SyncMeta::new(kind, source_id);
    meta.sync_id = Some("s1".to_string());
    SyncedTask::new(task, meta)
}

fn local(description: &str) -> SyncedTask {
    side(description, SourceKind::Local, "local")
}

fn remote(description: &str) -> SyncedTask {
    side(description, SourceKind::Api, "chat")
}

#[test]
fn test_conflict_requires_both_sides_modified() {
    let resolver = ConflictResolver::new(ConflictStrategy::NewestWin);

    let mut l = local("Buy milk");
    let r = remote("Buy oat milk");

    // Local was synced after its last edit; only the remote side moved.
    l.meta.last_sync_at = Some(l.task.last_modified + Duration::seconds(5));

    let conflicts = resolver.detect_conflicts(&[l], &[r]);
    assert!(conflicts.is_empty());
}

#[test]
fn test_conflict_detected_when_both_dirty() {
    let resolver = ConflictResolver::new(ConflictStrategy::NewestWin);

    let l = local("Buy milk");
    let mut r = remote("Buy oat milk");
    r.task.priority = Priority::High;

    let conflicts = resolver.detect_conflicts(&[l], &[r]);
    assert_eq!(conflicts.len(), 1);
    let fields: Vec<&str> = conflicts[0].fields.iter().map(|f| f.as_str()).collect();
    assert!(fields.contains(&"description"));
    assert!(fields.contains(&"priority"));
}

#[test]
fn test_missing_last_sync_counts_as_modified() {
    let resolver = ConflictResolver::new(ConflictStrategy::NewestWin);

    // Neither side was ever synced: both count as modified.
    let l = local("Buy milk");
    let r = remote("Buy almond milk");
    let conflicts = resolver.detect_conflicts(&[l], &[r]);
    assert_eq!(conflicts.len(), 1);
}

#[test]
fn test_newest_win_tie_favors_local() {
    let resolver = ConflictResolver::new(ConflictStrategy::NewestWin);

    let mut l = local("Local version");
    let mut r = remote("Remote version");
    let instant = Utc::now();
    l.task.last_modified = instant;
    r.task.last_modified = instant;

    let conflicts = resolver.detect_conflicts(&[l], &[r]);
    let winner = resolver.resolve_conflict(&conflicts[0]);
    assert_eq!(winner.task.description, "Local version");
}

#[test]
fn test_newest_win_prefers_later_edit() {
    let resolver = ConflictResolver::new(ConflictStrategy::NewestWin);

    let l = local("Local version");
    let mut r = remote("Remote version");
    r.task.last_modified = l.task.last_modified + Duration::minutes(5);

    let conflicts = resolver.detect_conflicts(&[l], &[r]);
    let winner = resolver.resolve_conflict(&conflicts[0]);
    assert_eq!(winner.task.description, "Remote version");
}

#[test]
fn test_whole_record_strategies() {
    let l = local("Local version");
    let r = remote("Remote version");

    let conflicts =
        ConflictResolver::new(ConflictStrategy::LocalWin).detect_conflicts(&[l], &[r]);

    let local_winner = ConflictResolver::new(ConflictStrategy::LocalWin)
        .resolve_conflict(&conflicts[0]);
    assert_eq!(local_winner.task.description, "Local version");

    let remote_winner = ConflictResolver::new(ConflictStrategy::RemoteWin)
        .resolve_conflict(&conflicts[0]);
    assert_eq!(remote_winner.task.description, "Remote version");
}

#[test]
fn test_manual_mode_stamps_and_keeps_local() {
    let resolver = ConflictResolver::new(ConflictStrategy::Manual);

    let l = local("Local version");
    let mut r = remote("Remote version");
    r.task.set_status(TaskStatus::Done, Utc::now());

    let conflicts = resolver.detect_conflicts(&[l.clone()], &[r]);
    let resolved = resolver.resolve_conflict(&conflicts[0]);

    assert_eq!(resolved.task.description, l.task.description);
    assert_eq!(resolved.task.status, l.task.status);
    assert_eq!(resolved.meta.sync_status, SyncStatus::Conflict);
    assert_eq!(resolved.meta.conflict_with.as_deref(), Some("chat"));
}

#[test]
fn test_resolve_conflicts_keyed_by_sync_id() {
    let resolver = ConflictResolver::new(ConflictStrategy::LocalWin);

    let l = local("Local version");
    let r = remote("Remote version");
    let conflicts = resolver.detect_conflicts(&[l], &[r]);

    let resolutions = resolver.resolve_conflicts(&conflicts);
    assert_eq!(resolutions.len(), 1);
    assert!(resolutions.contains_key("s1"));
}

#[test]
fn test_merge_without_rules_is_newest_win() {
    let resolver = ConflictResolver::new(ConflictStrategy::NewestWin);

    let l = local("Local version");
    let mut r = remote("Remote version");
    r.task.last_modified = l.task.last_modified + Duration::seconds(1);

    let merged = resolver.merge_fields(&l, &r);
    assert_eq!(merged.description, "Remote version");
}

#[test]
fn test_merge_rules_apply_per_field() {
    let resolver = ConflictResolver::new(ConflictStrategy::NewestWin).with_merge_rules(vec![
        MergeRule {
            field: MergeField::Description,
            take: MergeSource::Local,
        },
        MergeRule {
            field: MergeField::Priority,
            take: MergeSource::Remote,
        },
        MergeRule {
            field: MergeField::DueDate,
            take: MergeSource::Newest,
        },
    ]);

    let mut l = local("Local version");
    l.task.due_date = Some(Utc::now());
    let mut r = remote("Remote version");
    r.task.priority = Priority::High;
    r.task.due_date = Some(Utc::now() + Duration::days(1));
    r.task.last_modified = l.task.last_modified + Duration::seconds(30);

    let merged = resolver.merge_fields(&l, &r);
    assert_eq!(merged.description, "Local version");
    assert_eq!(merged.priority, Priority::High);
    // Remote is newer, so the newest-rule takes its due date.
    assert_eq!(merged.due_date, r.task.due_date);
}
