//! Bad-order detection.
//!
//! A Valid task with a predecessor is badly ordered when its placement no
//! longer honours the link: the predecessor is not placed (Valid or
//! Done), or the task starts before the predecessor ends, or it must
//! start immediately after the predecessor and does not.
//!
//! Invalidating one task can make its successor bad, so callers re-run
//! the detector until it finds nothing.

use std::collections::{BTreeSet, HashMap};

use crate::models::{SchedulingStatus, Task, TaskId};

/// Finds Valid tasks whose predecessor link is violated.
///
/// Links to tasks outside `tasks` are skipped.
pub fn find_badly_ordered_tasks<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
) -> BTreeSet<TaskId> {
    let tasks: Vec<&Task> = tasks.into_iter().collect();
    let by_id: HashMap<TaskId, &Task> = tasks
        .iter()
        .filter_map(|t| Some((t.id?, *t)))
        .collect();

    tasks
        .iter()
        .filter(|t| t.has_status(SchedulingStatus::Valid))
        .filter_map(|t| {
            let previous = by_id.get(&t.previous_task_id?)?;
            is_badly_ordered(previous, t).then_some(t.id).flatten()
        })
        .collect()
}

fn is_badly_ordered(previous: &Task, task: &Task) -> bool {
    let previous_placed = previous.has_status(SchedulingStatus::Valid)
        || previous.has_status(SchedulingStatus::Done);
    let (Some(previous_end), Some(start)) = (previous.end_ms(), task.start_ms) else {
        return true;
    };
    !previous_placed
        || start < previous_end
        || (task.immediately_follows_previous == Some(true) && start != previous_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleId;

    fn placed(id: u64, start: i64) -> Task {
        Task::floating(ScheduleId(1), format!("t{id}"), 10)
            .with_id(TaskId(id))
            .placed_at(start)
    }

    fn bad(tasks: &[Task]) -> Vec<u64> {
        find_badly_ordered_tasks(tasks).into_iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_well_ordered_chain() {
        let tasks = vec![
            placed(1, 0),
            placed(2, 10).with_previous(TaskId(1)),
            placed(3, 50).with_previous(TaskId(2)),
        ];
        assert!(bad(&tasks).is_empty());
    }

    #[test]
    fn test_starts_before_predecessor_ends() {
        let tasks = vec![placed(1, 0), placed(2, 5).with_previous(TaskId(1))];
        assert_eq!(bad(&tasks), vec![2]);
    }

    #[test]
    fn test_predecessor_not_placed() {
        let tasks = vec![
            placed(1, 0).with_status(SchedulingStatus::Invalid),
            placed(2, 20).with_previous(TaskId(1)),
            Task::floating(ScheduleId(1), "u", 10).with_id(TaskId(3)),
            placed(4, 40).with_previous(TaskId(3)),
        ];
        assert_eq!(bad(&tasks), vec![2, 4]);
    }

    #[test]
    fn test_done_predecessor_is_placed() {
        let tasks = vec![
            placed(1, 0).with_status(SchedulingStatus::Done),
            placed(2, 10).with_previous(TaskId(1)),
        ];
        assert!(bad(&tasks).is_empty());
    }

    #[test]
    fn test_immediate_succession() {
        let tasks = vec![
            placed(1, 0),
            placed(2, 10)
                .with_previous(TaskId(1))
                .with_immediately_follows(true),
            placed(3, 25)
                .with_previous(TaskId(2))
                .with_immediately_follows(true),
        ];
        assert_eq!(bad(&tasks), vec![3]);
    }

    #[test]
    fn test_only_valid_successors_reported() {
        let tasks = vec![
            placed(1, 0),
            placed(2, 5)
                .with_previous(TaskId(1))
                .with_status(SchedulingStatus::Invalid),
        ];
        assert!(bad(&tasks).is_empty());
    }
}
