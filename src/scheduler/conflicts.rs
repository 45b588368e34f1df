//! Overlap detection between placed tasks.
//!
//! # Algorithm
//! Sweep over placed tasks sorted by start. For each task, only the tasks
//! starting before it ends can overlap it, so the inner scan stops at the
//! first later start. Cost is O(n log n + k) for k overlapping pairs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::{intervals_overlap, SchedulingStatus, Task, TaskId};
use crate::store::TimeRange;

/// An unordered pair of conflicting tasks, lower id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictPair {
    /// Lower task id.
    pub first: TaskId,
    /// Higher task id.
    pub second: TaskId,
}

impl ConflictPair {
    /// Creates the canonical pair for two task ids.
    pub fn new(a: TaskId, b: TaskId) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }

    /// Both ids, lower first.
    pub fn ids(&self) -> [TaskId; 2] {
        [self.first, self.second]
    }
}

/// Finds pairs of tasks whose placements overlap.
///
/// A pair conflicts when both tasks have a start, their intervals overlap,
/// they are not both fixed, and (with `valid_only`) at least one of them
/// is Valid. The pair is reported when either member intersects `range`.
///
/// Tasks are assumed to belong to one schedule.
pub fn find_conflicting_tasks<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    range: TimeRange,
    valid_only: bool,
) -> BTreeSet<ConflictPair> {
    let mut placed: Vec<(i64, i64, TaskId, &Task)> = tasks
        .into_iter()
        .filter_map(|t| {
            let (start, end) = t.interval()?;
            Some((start, end, t.id?, t))
        })
        .collect();
    placed.sort_by_key(|&(start, _, id, _)| (start, id));

    let mut pairs = BTreeSet::new();
    for (i, &(a_start, a_end, a_id, a)) in placed.iter().enumerate() {
        for &(b_start, b_end, b_id, b) in &placed[i + 1..] {
            if b_start >= a_end {
                break;
            }
            if !intervals_overlap(a_start, a_end, b_start, b_end) {
                continue;
            }
            if a.is_fixed() && b.is_fixed() {
                continue;
            }
            if valid_only
                && !(a.has_status(SchedulingStatus::Valid) || b.has_status(SchedulingStatus::Valid))
            {
                continue;
            }
            if range.intersects(a_start, a_end) || range.intersects(b_start, b_end) {
                pairs.insert(ConflictPair::new(a_id, b_id));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleId;

    const SCHEDULE: ScheduleId = ScheduleId(1);

    fn placed(id: u64, start: i64, duration: i64) -> Task {
        Task::floating(SCHEDULE, format!("t{id}"), duration)
            .with_id(TaskId(id))
            .placed_at(start)
    }

    fn fixed(id: u64, start: i64, duration: i64) -> Task {
        Task::fixed(SCHEDULE, format!("f{id}"), start, duration).with_id(TaskId(id))
    }

    fn pair(a: u64, b: u64) -> ConflictPair {
        ConflictPair::new(TaskId(a), TaskId(b))
    }

    #[test]
    fn test_pair_is_canonical() {
        assert_eq!(pair(5, 2), pair(2, 5));
        assert_eq!(pair(5, 2).first, TaskId(2));
    }

    #[test]
    fn test_overlaps_found_once() {
        let tasks = vec![placed(1, 0, 10), placed(2, 5, 10), placed(3, 10, 5)];
        let pairs = find_conflicting_tasks(&tasks, TimeRange::all(), false);
        assert_eq!(pairs, BTreeSet::from([pair(1, 2), pair(2, 3)]));
    }

    #[test]
    fn test_same_start_conflicts() {
        let tasks = vec![placed(2, 0, 1), placed(1, 0, 1)];
        let pairs = find_conflicting_tasks(&tasks, TimeRange::all(), false);
        assert_eq!(pairs, BTreeSet::from([pair(1, 2)]));
    }

    #[test]
    fn test_long_task_spans_many() {
        let tasks = vec![placed(1, 0, 100), placed(2, 10, 5), placed(3, 50, 5)];
        let pairs = find_conflicting_tasks(&tasks, TimeRange::all(), false);
        assert_eq!(pairs, BTreeSet::from([pair(1, 2), pair(1, 3)]));
    }

    #[test]
    fn test_fixed_pairs_excluded() {
        let tasks = vec![fixed(1, 0, 10), fixed(2, 5, 10), placed(3, 8, 10)];
        let pairs = find_conflicting_tasks(&tasks, TimeRange::all(), false);
        assert_eq!(pairs, BTreeSet::from([pair(1, 3), pair(2, 3)]));
    }

    #[test]
    fn test_valid_only() {
        let tasks = vec![
            placed(1, 0, 10).with_status(SchedulingStatus::Invalid),
            placed(2, 5, 10).with_status(SchedulingStatus::Invalid),
            placed(3, 20, 10),
            fixed(4, 25, 10),
        ];
        assert_eq!(
            find_conflicting_tasks(&tasks, TimeRange::all(), true),
            BTreeSet::from([pair(3, 4)])
        );
        assert_eq!(find_conflicting_tasks(&tasks, TimeRange::all(), false).len(), 2);
    }

    #[test]
    fn test_unplaced_ignored() {
        let tasks = vec![
            placed(1, 0, 10),
            Task::floating(SCHEDULE, "u", 10).with_id(TaskId(2)),
        ];
        assert!(find_conflicting_tasks(&tasks, TimeRange::all(), false).is_empty());
    }

    #[test]
    fn test_range_filter_either_member() {
        // 1 = [0,10), 2 = [8,30): only 2 reaches into [20,40).
        let tasks = vec![placed(1, 0, 10), placed(2, 8, 22)];
        assert_eq!(
            find_conflicting_tasks(&tasks, TimeRange::between(20, 40), false),
            BTreeSet::from([pair(1, 2)])
        );
        // Only 1 reaches into [0,5).
        assert_eq!(
            find_conflicting_tasks(&tasks, TimeRange::between(0, 5), false).len(),
            1
        );
        assert!(find_conflicting_tasks(&tasks, TimeRange::from(30), false).is_empty());
    }
}
