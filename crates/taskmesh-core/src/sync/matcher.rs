//! Cross-source identity matching.
//!
//! Establishes which task records from independently-evolving sources are
//! the "same" logical task, without a shared global key: records either
//! carry a previously-assigned `sync_id`, or they are fuzzy-matched on
//! normalized description similarity plus their primary date.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::config::DEFAULT_MATCH_THRESHOLD;
use crate::task::Task;

use super::SyncedTask;

/// Injectable edit-distance metric.
pub type DistanceFn = fn(&str, &str) -> usize;

/// A set of records believed to represent one real-world task, sharing one
/// `sync_id`.
#[derive(Debug, Clone)]
pub struct MatchGroup {
    pub sync_id: String,
    pub tasks: Vec<SyncedTask>,
    /// Adapter ids present in this group.
    pub sources: BTreeSet<String>,
    pub has_local: bool,
    pub has_remote: bool,
}

impl MatchGroup {
    fn new(sync_id: String) -> Self {
        Self {
            sync_id,
            tasks: Vec::new(),
            sources: BTreeSet::new(),
            has_local: false,
            has_remote: false,
        }
    }

    fn push(&mut self, mut task: SyncedTask) {
        task.meta.sync_id = Some(self.sync_id.clone());
        task.task.sync_id = Some(self.sync_id.clone());
        self.sources.insert(task.meta.source_id.clone());
        if task.meta.is_local() {
            self.has_local = true;
        } else {
            self.has_remote = true;
        }
        self.tasks.push(task);
    }

    /// The first local member, if any.
    pub fn local(&self) -> Option<&SyncedTask> {
        self.tasks.iter().find(|t| t.meta.is_local())
    }

    /// Remote members in input order.
    pub fn remotes(&self) -> impl Iterator<Item = &SyncedTask> {
        self.tasks.iter().filter(|t| !t.meta.is_local())
    }
}

/// Groups task records into cross-source identities.
///
/// The similarity threshold and the distance metric are injectable so
/// alternate metrics can be substituted without touching the pipeline.
pub struct TaskMatcher {
    threshold: f64,
    distance: DistanceFn,
}

impl Default for TaskMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            distance: levenshtein,
        }
    }
}

impl TaskMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn with_distance(mut self, distance: DistanceFn) -> Self {
        self.distance = distance;
        self
    }

    /// Partitions `tasks` into match groups.
    ///
    /// Records carrying a `sync_id` are grouped by it first. The rest are
    /// compared against the first member of each existing group, then
    /// against other still-ungrouped records (minting a fresh `sync_id` for
    /// a new pair), and finally become singleton groups. Ties break
    /// first-match-wins in input order; grouping is deterministic for a
    /// fixed input order but not stable under reordering.
    pub fn match_tasks(&self, tasks: Vec<SyncedTask>) -> Vec<MatchGroup> {
        let mut groups: Vec<MatchGroup> = Vec::new();
        let mut ungrouped: Vec<SyncedTask> = Vec::new();

        // Fast path: previously-matched records.
        for task in tasks {
            let sync_id = task.meta.sync_id.clone().or_else(|| task.task.sync_id.clone());
            match sync_id {
                Some(sid) => {
                    if let Some(group) = groups.iter_mut().find(|g| g.sync_id == sid) {
                        group.push(task);
                    } else {
                        let mut group = MatchGroup::new(sid);
                        group.push(task);
                        groups.push(group);
                    }
                }
                None => ungrouped.push(task),
            }
        }

        // Fuzzy path: try existing groups, then other ungrouped records.
        let mut pending: Vec<SyncedTask> = Vec::new();
        for task in ungrouped {
            if let Some(group) = groups
                .iter_mut()
                .find(|g| self.is_match(&g.tasks[0].task, &task.task))
            {
                group.push(task);
                continue;
            }

            match pending
                .iter()
                .position(|p| self.is_match(&p.task, &task.task))
            {
                Some(i) => {
                    let partner = pending.remove(i);
                    let mut group = MatchGroup::new(Uuid::new_v4().to_string());
                    group.push(partner);
                    group.push(task);
                    groups.push(group);
                }
                None => pending.push(task),
            }
        }

        // Whatever never matched becomes its own identity.
        for task in pending {
            let mut group = MatchGroup::new(Uuid::new_v4().to_string());
            group.push(task);
            groups.push(group);
        }

        groups
    }

    /// The fuzzy-match predicate: description similarity at or above the
    /// threshold AND the same primary date (due date if present, else start
    /// date), compared by calendar day.
    pub fn is_match(&self, a: &Task, b: &Task) -> bool {
        self.similarity(&a.description, &b.description) >= self.threshold
            && same_primary_day(a, b)
    }

    /// Similarity of two descriptions after normalization:
    /// `1 − distance / max(len)`. Two empty strings are fully similar.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = normalize_description(a);
        let b = normalize_description(b);

        let max_len = a.chars().count().max(b.chars().count());
        if max_len == 0 {
            return 1.0;
        }

        let dist = (self.distance)(&a, &b);
        1.0 - dist as f64 / max_len as f64
    }
}

/// Lower-cases and strips everything but alphanumeric characters, which
/// keeps CJK text intact while dropping whitespace and punctuation.
pub fn normalize_description(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Classic two-row Levenshtein edit distance over characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut cur = Vec::with_capacity(b.len() + 1);
        cur.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur.push((prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1));
        }
        prev = cur;
    }
    prev[b.len()]
}

/// Primary dates are equal when both are absent, unequal when exactly one
/// is, and otherwise compared by calendar day with time-of-day ignored.
pub fn same_primary_day(a: &Task, b: &Task) -> bool {
    match (a.primary_date(), b.primary_date()) {
        (None, None) => true,
        (Some(x), Some(y)) => x.date_naive() == y.date_naive(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_description(" Buy  milk! "), "buymilk");
        assert_eq!(normalize_description("買い物リスト"), "買い物リスト");
        assert_eq!(normalize_description("--- ,,, "), "");
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
    }

    #[test]
    fn test_empty_descriptions_are_fully_similar() {
        let matcher = TaskMatcher::default();
        assert_eq!(matcher.similarity("", ""), 1.0);
        assert_eq!(matcher.similarity("!!!", "???"), 1.0);
    }

    #[test]
    fn test_whitespace_variants_match() {
        let matcher = TaskMatcher::default();
        assert!(matcher.similarity("Buy milk", " buy  milk ") >= 0.8);
    }

    #[test]
    fn test_custom_distance_is_used() {
        fn zero(_: &str, _: &str) -> usize {
            0
        }
        let matcher = TaskMatcher::new(1.0).with_distance(zero);
        assert_eq!(matcher.similarity("abc", "xyz"), 1.0);
    }
}
