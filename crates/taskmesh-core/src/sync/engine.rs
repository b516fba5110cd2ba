//! Sync orchestration.
//!
//! Drives the end-to-end pipeline — fetch from every registered source,
//! match, detect and resolve conflicts, compute the change sets, apply them
//! in the configured direction, report — and owns scheduling: manual
//! trigger, debounced reactive trigger, and the periodic trigger.
//!
//! One pass at a time: a `sync()` call while another pass runs returns an
//! unsuccessful report immediately and performs no work. There is no
//! mid-pipeline cancellation; callers can only decline to start a pass.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConflictStrategy, SyncConfig, SyncDirection};
use crate::source::{LocalSource, SourceEvent, SourceKind, TaskSource, LOCAL_SOURCE_ID};
use crate::store::{TaskStore, UpdateOptions};
use crate::task::{Task, TaskPatch};

use super::conflict::{critical_diffs, ConflictInfo, ConflictResolver};
use super::matcher::{MatchGroup, TaskMatcher};
use super::tracker::SyncTracker;
use super::{SyncError, SyncMeta, SyncedTask};

/// Outcome of one synchronization pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub conflicts: usize,
    /// One entry per isolated failure; a non-empty list does not imply the
    /// pass failed as a whole.
    pub errors: Vec<String>,
    /// Conflicts left for the caller to act on, in manual mode.
    pub unresolved: Vec<ConflictInfo>,
    pub success: bool,
}

impl SyncReport {
    fn begin() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            fetched: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            conflicts: 0,
            errors: Vec::new(),
            unresolved: Vec::new(),
            success: true,
        }
    }
}

/// Lifecycle notifications emitted around each pass.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    Completed(SyncReport),
}

struct EngineInner {
    store: TaskStore,
    local: LocalSource,
    sources: RwLock<Vec<Arc<dyn TaskSource>>>,
    tracker: SyncTracker,
    config: SyncConfig,
    matcher: TaskMatcher,
    resolver: ConflictResolver,
    running: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    /// Pending debounced reactive sync, if any.
    debounce: Mutex<Option<JoinHandle<()>>>,
    /// The self-re-arming periodic sync loop, if started.
    auto: Mutex<Option<JoinHandle<()>>>,
}

/// The sync orchestrator. Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(store: TaskStore, config: SyncConfig, tracker: SyncTracker) -> Self {
        let matcher = TaskMatcher::new(config.match_threshold);
        let resolver =
            ConflictResolver::new(config.strategy).with_merge_rules(config.merge_rules.clone());
        let local = LocalSource::new(store.clone());
        let (events, _) = broadcast::channel(64);

        let engine = Self {
            inner: Arc::new(EngineInner {
                store,
                local,
                sources: RwLock::new(Vec::new()),
                tracker,
                config,
                matcher,
                resolver,
                running: AtomicBool::new(false),
                events,
                debounce: Mutex::new(None),
                auto: Mutex::new(None),
            }),
        };

        // Local edits feed the same debounced trigger as remote changes.
        if let Some(rx) = engine.inner.local.subscribe() {
            engine.spawn_change_listener(rx);
        }

        engine
    }

    /// Registers an external source adapter and starts listening for its
    /// change notifications.
    pub fn register_source(&self, source: Arc<dyn TaskSource>) {
        if let Some(rx) = source.subscribe() {
            self.spawn_change_listener(rx);
        }
        self.inner.sources.write().push(source);
    }

    /// Subscribes to sync lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &TaskStore {
        &self.inner.store
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.inner.tracker
    }

    /// Runs one synchronization pass.
    ///
    /// Re-entrant calls return immediately with an unsuccessful report; this
    /// is the at-most-one-concurrent-pass guarantee.
    pub async fn sync(&self) -> SyncReport {
        let mut report = SyncReport::begin();

        if self.inner.running.swap(true, Ordering::SeqCst) {
            report.errors.push(SyncError::AlreadyRunning.to_string());
            report.success = false;
            report.finished_at = Utc::now();
            return report;
        }

        let _ = self.inner.events.send(SyncEvent::Started);
        info!("sync started");

        if let Err(e) = self.run_pipeline(&mut report).await {
            warn!(error = %e, "sync pass failed");
            report.errors.push(e.to_string());
            report.success = false;
        }

        if let Err(e) = self.inner.tracker.save() {
            warn!(error = %e, "failed to persist sync-state cache");
            report.errors.push(e.to_string());
        }

        report.finished_at = Utc::now();
        self.inner.running.store(false, Ordering::SeqCst);

        info!(
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            conflicts = report.conflicts,
            errors = report.errors.len(),
            "sync completed"
        );
        let _ = self.inner.events.send(SyncEvent::Completed(report.clone()));
        report
    }

    /// Schedules a debounced sync: bursts of change events within the quiet
    /// period collapse into one pass. The last trigger wins the timer;
    /// intermediate triggers are coalesced, not queued.
    pub fn notify_change(&self) {
        let engine = self.clone();
        let delay = Duration::from_millis(self.inner.config.change_debounce_ms);
        let mut pending = self.inner.debounce.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let report = engine.sync().await;
            debug!(success = report.success, "debounced sync finished");
        }));
    }

    /// Starts the periodic trigger: a single-shot sleep that re-arms after
    /// each completed run, so scheduled passes can never overlap. Does
    /// nothing when the configured interval is zero.
    pub fn start_auto_sync(&self) {
        let minutes = self.inner.config.auto_interval_minutes;
        if minutes == 0 {
            return;
        }
        let engine = self.clone();
        let period = Duration::from_secs(minutes * 60);
        let mut slot = self.inner.auto.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let report = engine.sync().await;
                debug!(success = report.success, "scheduled sync finished");
            }
        }));
    }

    /// Stops the periodic and debounced triggers. In-flight passes finish.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.auto.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.debounce.lock().take() {
            handle.abort();
        }
    }

    fn spawn_change_listener(&self, mut rx: broadcast::Receiver<SourceEvent>) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        debug!(source = %event.source_id, "source change detected");
                        engine.notify_change();
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn run_pipeline(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        // 1. Fetch. Each source settles independently: a failed fetch is
        // recorded and contributes zero tasks without aborting the pass.
        let mut records: Vec<SyncedTask> = Vec::new();
        let mut fetched_ok: HashSet<String> = HashSet::new();

        let local_tasks = self
            .inner
            .local
            .get_tasks()
            .await
            .map_err(|e| SyncError::source(LOCAL_SOURCE_ID, e))?;
        fetched_ok.insert(LOCAL_SOURCE_ID.to_string());
        for task in local_tasks {
            records.push(self.decorate(task, SourceKind::Local, LOCAL_SOURCE_ID));
        }

        let sources = self.enabled_sources();
        for source in &sources {
            match source.get_tasks().await {
                Ok(tasks) => {
                    fetched_ok.insert(source.id().to_string());
                    for task in tasks {
                        records.push(self.decorate(task, source.kind(), source.id()));
                    }
                }
                Err(e) => {
                    warn!(source = source.id(), error = %e, "source fetch failed; skipping for this pass");
                    report.errors.push(SyncError::source(source.id(), e).to_string());
                }
            }
        }
        report.fetched = records.len();

        // 2. Match.
        let groups = self.inner.matcher.match_tasks(records);

        // 3. Conflicts.
        let locals: Vec<SyncedTask> = groups
            .iter()
            .flat_map(|g| g.tasks.iter())
            .filter(|t| t.meta.is_local())
            .cloned()
            .collect();
        let remotes: Vec<SyncedTask> = groups
            .iter()
            .flat_map(|g| g.tasks.iter())
            .filter(|t| !t.meta.is_local())
            .cloned()
            .collect();

        let conflicts = self.inner.resolver.detect_conflicts(&locals, &remotes);
        report.conflicts = conflicts.len();

        let manual = self.inner.resolver.strategy() == ConflictStrategy::Manual;
        let mut conflicted: HashSet<String> = HashSet::new();
        let resolutions = if manual {
            // Surface the conflicts with the local side stamped, and keep
            // the groups out of automatic change computation.
            report.unresolved = conflicts
                .iter()
                .map(|c| ConflictInfo {
                    local: self.inner.resolver.resolve_conflict(c),
                    ..c.clone()
                })
                .collect();
            conflicted = conflicts.iter().map(|c| c.sync_id.clone()).collect();
            Default::default()
        } else {
            self.inner.resolver.resolve_conflicts(&conflicts)
        };

        // 4 + 5. Change computation and application, group by group. Writes
        // are only issued once a task's full change is known.
        for group in &groups {
            if conflicted.contains(&group.sync_id) {
                report.skipped += 1;
                continue;
            }
            self.apply_group(group, resolutions.get(&group.sync_id), &sources, &fetched_ok, report)
                .await;
        }

        Ok(())
    }

    /// Attaches sync metadata to a fetched record, re-attaching a known
    /// identity through the stable key `source_id:task_id` when the record
    /// itself carries no `sync_id`.
    fn decorate(&self, mut task: Task, kind: SourceKind, source_id: &str) -> SyncedTask {
        let mut meta = SyncMeta::new(kind, source_id);
        let sync_id = task
            .sync_id
            .clone()
            .or_else(|| self.inner.tracker.lookup_sync_id(source_id, &task.id));
        if let Some(sid) = &sync_id {
            meta.last_sync_at = self.inner.tracker.last_sync_at(sid);
            meta.version = self.inner.tracker.version(sid, source_id);
        }
        meta.sync_id = sync_id.clone();
        task.sync_id = sync_id;
        SyncedTask::new(task, meta)
    }

    async fn apply_group(
        &self,
        group: &MatchGroup,
        resolution: Option<&SyncedTask>,
        sources: &[Arc<dyn TaskSource>],
        fetched_ok: &HashSet<String>,
        report: &mut SyncReport,
    ) {
        let sync_id = group.sync_id.as_str();
        let direction = self.inner.config.direction;
        let local = group.local();

        // One authoritative member per source for this pass.
        let mut remotes: Vec<&SyncedTask> = Vec::new();
        let mut seen = HashSet::new();
        for task in group.remotes() {
            if seen.insert(task.meta.source_id.clone()) {
                remotes.push(task);
            }
        }

        match (local, remotes.is_empty()) {
            (None, false) => {
                self.apply_remote_only(sync_id, &remotes, direction, sources, report)
                    .await
            }
            (Some(local), true) => {
                self.apply_local_only(sync_id, local, direction, sources, fetched_ok, report)
                    .await
            }
            (Some(local), false) => {
                self.apply_both(sync_id, local, &remotes, resolution, direction, sources, report)
                    .await
            }
            (None, true) => {}
        }
    }

    async fn apply_remote_only(
        &self,
        sync_id: &str,
        remotes: &[&SyncedTask],
        direction: SyncDirection,
        sources: &[Arc<dyn TaskSource>],
        report: &mut SyncReport,
    ) {
        // A tracked local copy that no longer exists means the task was
        // deleted locally; propagate the deletion outward.
        if self.inner.tracker.local_id(sync_id).is_some() {
            if direction.allows_export() {
                for remote in remotes {
                    let Some(source) = find_source(sources, &remote.meta.source_id) else {
                        continue;
                    };
                    if source.is_read_only() {
                        continue;
                    }
                    match source.delete_task(&remote.task.id).await {
                        Ok(()) => {
                            debug!(source = source.id(), sync_id, "propagated local deletion");
                            report.deleted += 1;
                        }
                        Err(e) => report
                            .errors
                            .push(SyncError::source(source.id(), e).to_string()),
                    }
                }
                self.inner.tracker.remove(sync_id);
            } else {
                report.skipped += 1;
            }
            return;
        }

        // Remember the identity even when the direction forbids importing.
        for remote in remotes {
            self.inner
                .tracker
                .record_mapping(sync_id, &remote.meta.source_id, &remote.task.id, false);
        }

        if !direction.allows_import() {
            report.skipped += 1;
            return;
        }

        let primary = remotes[0];
        match self.inner.store.import_task(&primary.task).await {
            Ok(local_task) => {
                report.created += 1;
                self.inner
                    .tracker
                    .record_mapping(sync_id, LOCAL_SOURCE_ID, &local_task.id, true);
                self.inner.tracker.bump_version(sync_id, LOCAL_SOURCE_ID);
                self.inner.tracker.mark_synced(sync_id, Utc::now());
            }
            Err(e) => report.errors.push(SyncError::from(e).to_string()),
        }
    }

    async fn apply_local_only(
        &self,
        sync_id: &str,
        local: &SyncedTask,
        direction: SyncDirection,
        sources: &[Arc<dyn TaskSource>],
        fetched_ok: &HashSet<String>,
        report: &mut SyncReport,
    ) {
        // A mapped remote record that vanished from a source whose fetch
        // succeeded was deleted over there. A failed fetch never triggers
        // deletion.
        if let Some(entry) = self.inner.tracker.entry(sync_id) {
            let vanished: Vec<String> = entry
                .external_ids
                .keys()
                .filter(|sid| sid.as_str() != LOCAL_SOURCE_ID && fetched_ok.contains(*sid))
                .cloned()
                .collect();
            if !vanished.is_empty() {
                if direction.allows_import() {
                    match self.inner.store.delete_task(&local.task.id).await {
                        Ok(()) => {
                            debug!(sync_id, "propagated remote deletion to local store");
                            report.deleted += 1;
                            self.inner.tracker.remove(sync_id);
                        }
                        Err(e) => report.errors.push(SyncError::from(e).to_string()),
                    }
                    return;
                }
                // Not allowed to delete locally; forget the stale mappings
                // and treat the task as purely local again.
                for sid in &vanished {
                    self.inner.tracker.remove_source_mapping(sync_id, sid);
                }
            }
        }

        self.persist_local_identity(&local.task.id, sync_id).await;
        self.inner
            .tracker
            .record_mapping(sync_id, LOCAL_SOURCE_ID, &local.task.id, true);

        if !direction.allows_export() {
            report.skipped += 1;
            return;
        }

        let mut wrote = false;
        for source in sources {
            if source.is_read_only() {
                continue;
            }
            match self.inner.tracker.external_id(sync_id, source.id()) {
                Some(external_id) => {
                    if !local.modified_since_sync() {
                        continue;
                    }
                    match source
                        .update_task(&external_id, &TaskPatch::from_task(&local.task))
                        .await
                    {
                        Ok(()) => {
                            report.updated += 1;
                            self.inner.tracker.bump_version(sync_id, source.id());
                            wrote = true;
                        }
                        Err(e) => report
                            .errors
                            .push(SyncError::source(source.id(), e).to_string()),
                    }
                }
                None => match source.create_task(&local.task).await {
                    Ok(external_id) => {
                        report.created += 1;
                        self.inner
                            .tracker
                            .record_mapping(sync_id, source.id(), &external_id, false);
                        self.inner.tracker.bump_version(sync_id, source.id());
                        wrote = true;
                    }
                    Err(e) => report
                        .errors
                        .push(SyncError::source(source.id(), e).to_string()),
                },
            }
        }

        if wrote {
            self.inner.tracker.mark_synced(sync_id, Utc::now());
        } else {
            report.skipped += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_both(
        &self,
        sync_id: &str,
        local: &SyncedTask,
        remotes: &[&SyncedTask],
        resolution: Option<&SyncedTask>,
        direction: SyncDirection,
        sources: &[Arc<dyn TaskSource>],
        report: &mut SyncReport,
    ) {
        self.persist_local_identity(&local.task.id, sync_id).await;
        self.inner
            .tracker
            .record_mapping(sync_id, LOCAL_SOURCE_ID, &local.task.id, true);
        for remote in remotes {
            self.inner
                .tracker
                .record_mapping(sync_id, &remote.meta.source_id, &remote.task.id, false);
        }

        let local_dirty = local.modified_since_sync();
        let remote_dirty = remotes.iter().any(|r| r.modified_since_sync());
        if !local_dirty && !remote_dirty {
            report.skipped += 1;
            return;
        }

        let primary = remotes[0];
        let winner: Task = match resolution {
            Some(resolved) => resolved.task.clone(),
            None if local_dirty && !remote_dirty => local.task.clone(),
            None if remote_dirty && !local_dirty => primary.task.clone(),
            // Both sides moved without a detected conflict (or per-field
            // rules are configured): merge by the same winner rules.
            None => self.inner.resolver.merge_fields(local, primary),
        };

        let mut wrote = false;

        if direction.allows_import() && content_differs(&winner, &local.task) {
            match self
                .inner
                .store
                .update_task(
                    &local.task.id,
                    TaskPatch::from_task(&winner),
                    UpdateOptions::default(),
                )
                .await
            {
                Ok(_) => {
                    report.updated += 1;
                    self.inner.tracker.bump_version(sync_id, LOCAL_SOURCE_ID);
                    wrote = true;
                }
                Err(e) => report.errors.push(SyncError::from(e).to_string()),
            }
        }

        if direction.allows_export() {
            for source in sources {
                if source.is_read_only() {
                    continue;
                }
                let member = remotes.iter().find(|r| r.meta.source_id == source.id());
                let external_id = member
                    .map(|m| m.task.id.clone())
                    .or_else(|| self.inner.tracker.external_id(sync_id, source.id()));
                match external_id {
                    Some(external_id) => {
                        let unchanged =
                            member.map_or(false, |m| !content_differs(&winner, &m.task));
                        if unchanged {
                            continue;
                        }
                        match source
                            .update_task(&external_id, &TaskPatch::from_task(&winner))
                            .await
                        {
                            Ok(()) => {
                                report.updated += 1;
                                self.inner.tracker.bump_version(sync_id, source.id());
                                wrote = true;
                            }
                            Err(e) => report
                                .errors
                                .push(SyncError::source(source.id(), e).to_string()),
                        }
                    }
                    None => match source.create_task(&winner).await {
                        Ok(external_id) => {
                            report.created += 1;
                            self.inner
                                .tracker
                                .record_mapping(sync_id, source.id(), &external_id, false);
                            self.inner.tracker.bump_version(sync_id, source.id());
                            wrote = true;
                        }
                        Err(e) => report
                            .errors
                            .push(SyncError::source(source.id(), e).to_string()),
                    },
                }
            }
        }

        if wrote {
            self.inner.tracker.mark_synced(sync_id, Utc::now());
        } else {
            report.skipped += 1;
        }
    }

    /// Writes a freshly-minted identity back onto the store's copy so it
    /// survives restarts without a tracker lookup.
    async fn persist_local_identity(&self, task_id: &str, sync_id: &str) {
        let current = self.inner.store.get_task(task_id).await;
        if let Some(current) = current {
            if current.sync_id.as_deref() != Some(sync_id) {
                if let Err(e) = self.inner.store.assign_sync_id(task_id, sync_id).await {
                    warn!(task = task_id, error = %e, "failed to persist sync id");
                }
            }
        }
    }

    fn enabled_sources(&self) -> Vec<Arc<dyn TaskSource>> {
        self.inner
            .sources
            .read()
            .iter()
            .filter(|s| self.inner.config.source_enabled(s.id()))
            .cloned()
            .collect()
    }
}

fn find_source<'a>(
    sources: &'a [Arc<dyn TaskSource>],
    id: &str,
) -> Option<&'a Arc<dyn TaskSource>> {
    sources.iter().find(|s| s.id() == id)
}

/// Whether two records disagree on anything a sync write would carry.
fn content_differs(a: &Task, b: &Task) -> bool {
    !critical_diffs(a, b).is_empty() || a.detail != b.detail || a.tags != b.tags
}
