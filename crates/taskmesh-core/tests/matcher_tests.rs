use chrono::{Duration, TimeZone, Utc};

use taskmesh_core::{SourceKind, SyncMeta, SyncedTask, Task, TaskMatcher};

fn local(description: &str) -> SyncedTask {
    SyncedTask::new(
        Task::new(description, "local"),
        SyncMeta::new(SourceKind::Local, "local"),
    )
}

fn remote(description: &str, source_id: &str) -> SyncedTask {
    SyncedTask::new(
        Task::new(description, source_id),
        SyncMeta::new(SourceKind::Api, source_id),
    )
}

fn with_due(mut task: SyncedTask, year: i32, month: u32, day: u32, hour: u32) -> SyncedTask {
    task.task.due_date = Some(Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap());
    task
}

#[test]
fn test_whitespace_variants_land_in_one_group() {
    let matcher = TaskMatcher::default();
    let a = with_due(local("Buy milk"), 2026, 8, 10, 9);
    let b = with_due(remote(" buy  milk ", "chat"), 2026, 8, 10, 18);

    let groups = matcher.match_tasks(vec![a, b]);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].tasks.len(), 2);
    assert!(groups[0].has_local);
    assert!(groups[0].has_remote);

    // Both members adopted the minted identity.
    let sid = groups[0].sync_id.clone();
    for member in &groups[0].tasks {
        assert_eq!(member.meta.sync_id.as_deref(), Some(sid.as_str()));
        assert_eq!(member.task.sync_id.as_deref(), Some(sid.as_str()));
    }
}

#[test]
fn test_different_calendar_days_never_match() {
    let matcher = TaskMatcher::default();
    let a = with_due(local("Buy milk"), 2026, 8, 10, 23);
    let b = with_due(remote("Buy milk", "chat"), 2026, 8, 11, 1);

    let groups = matcher.match_tasks(vec![a, b]);
    assert_eq!(groups.len(), 2);
}

#[test]
fn test_one_sided_date_never_matches() {
    let matcher = TaskMatcher::default();
    let a = with_due(local("Buy milk"), 2026, 8, 10, 9);
    let b = remote("Buy milk", "chat");

    let groups = matcher.match_tasks(vec![a, b]);
    assert_eq!(groups.len(), 2);
}

#[test]
fn test_undated_identical_descriptions_match() {
    let matcher = TaskMatcher::default();
    let groups = matcher.match_tasks(vec![local("Water plants"), remote("water plants", "cal")]);
    assert_eq!(groups.len(), 1);
}

#[test]
fn test_existing_sync_id_wins_over_fuzzy() {
    let matcher = TaskMatcher::default();

    let mut a = local("Completely rewritten description");
    a.meta.sync_id = Some("shared".to_string());
    a.task.sync_id = Some("shared".to_string());
    let mut b = remote("Buy milk", "chat");
    b.meta.sync_id = Some("shared".to_string());
    b.task.sync_id = Some("shared".to_string());

    let groups = matcher.match_tasks(vec![a, b]);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].sync_id, "shared");
}

#[test]
fn test_unmatched_task_becomes_singleton() {
    let matcher = TaskMatcher::default();
    let groups = matcher.match_tasks(vec![local("Buy milk"), remote("File taxes", "chat")]);
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert_eq!(group.tasks.len(), 1);
        assert!(!group.sync_id.is_empty());
    }
}

#[test]
fn test_dissimilar_descriptions_stay_apart() {
    let matcher = TaskMatcher::default();
    let a = with_due(local("Buy milk"), 2026, 8, 10, 9);
    let b = with_due(remote("Fix the leaking tap in the bathroom", "chat"), 2026, 8, 10, 9);

    let groups = matcher.match_tasks(vec![a, b]);
    assert_eq!(groups.len(), 2);
}

#[test]
fn test_empty_descriptions_decided_by_date_alone() {
    let matcher = TaskMatcher::default();
    // Normalization strips both to "", so similarity is 1.0 and the date
    // decides.
    let a = with_due(local("!!!"), 2026, 8, 10, 9);
    let b = with_due(remote("???", "chat"), 2026, 8, 10, 20);
    let c = with_due(remote("...", "cal"), 2026, 8, 12, 9);

    let groups = matcher.match_tasks(vec![a, b, c]);
    assert_eq!(groups.len(), 2);
    let sizes: Vec<usize> = groups.iter().map(|g| g.tasks.len()).collect();
    assert!(sizes.contains(&2));
    assert!(sizes.contains(&1));
}

#[test]
fn test_sources_recorded_per_group() {
    let matcher = TaskMatcher::default();
    let start = Utc::now() + Duration::days(3);

    let mut a = local("Team retro notes");
    a.task.start_date = Some(start);
    let mut b = remote("team retro notes", "chat");
    b.task.start_date = Some(start);

    let groups = matcher.match_tasks(vec![a, b]);
    assert_eq!(groups.len(), 1);
    let sources: Vec<&str> = groups[0].sources.iter().map(String::as_str).collect();
    assert_eq!(sources, vec!["chat", "local"]);
}
