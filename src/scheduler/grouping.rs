//! Ordered task chains.
//!
//! Floating tasks may name a predecessor. This module splits a flat set of
//! floating tasks into disjoint chains, each ordered head to tail, so a
//! predecessor is always handled before its successor.
//!
//! # Algorithm
//! Chains live in an arena indexed by creation order. Two maps track the
//! open ends of every chain:
//! - `pointed_to`: id of a chain's tail → chain (a successor may attach)
//! - `pointing`: predecessor awaited by a chain's head → chain
//!
//! Each task, in input order, extends a chain whose tail is its
//! predecessor, prepends to a chain whose head awaits it, joins two such
//! chains, or starts a new one. Every step is O(1) expected map work, so
//! grouping is O(n).
//!
//! # Output order
//! Chains come out in the order they were first created, i.e. insertion
//! order of the first-seen chain anchor. This is stable but not a sort by
//! any task attribute.

use std::collections::{HashMap, VecDeque};

use crate::error::{Result, ScheduleError};
use crate::models::{Task, TaskId};

/// Groups floating tasks into ordered chains.
///
/// Links to tasks outside `tasks` are ignored: such a task heads its chain.
///
/// # Errors
/// `InvariantViolation` if a task is not floating, has no id, or the links
/// form a cycle.
///
/// # Example
///
/// ```
/// use u_calendar::models::{ScheduleId, Task, TaskId};
/// use u_calendar::scheduler::build_ordered_task_groups;
///
/// let schedule = ScheduleId(1);
/// let tasks = vec![
///     Task::floating(schedule, "b", 10).with_id(TaskId(2)).with_previous(TaskId(1)),
///     Task::floating(schedule, "a", 10).with_id(TaskId(1)),
///     Task::floating(schedule, "c", 10).with_id(TaskId(3)),
/// ];
/// let groups = build_ordered_task_groups(tasks).unwrap();
/// assert_eq!(groups.len(), 2);
/// assert_eq!(groups[0][0].name, "a");
/// assert_eq!(groups[0][1].name, "b");
/// ```
pub fn build_ordered_task_groups(tasks: Vec<Task>) -> Result<Vec<Vec<Task>>> {
    let mut chains: Vec<Option<VecDeque<Task>>> = Vec::new();
    let mut pointed_to: HashMap<TaskId, usize> = HashMap::new();
    let mut pointing: HashMap<TaskId, usize> = HashMap::new();

    for task in tasks {
        let id = match task.id {
            Some(id) if task.is_floating() => id,
            _ => {
                return Err(ScheduleError::invariant(format!(
                    "only floating tasks with ids can be grouped, got {:?} ({:?})",
                    task.id, task.task_type
                )))
            }
        };
        let previous = task.previous_task_id;
        let tail_chain = previous.and_then(|p| pointed_to.get(&p).copied());
        let head_chain = pointing.get(&id).copied();

        match (tail_chain, head_chain) {
            (Some(tail), Some(head)) => {
                if tail == head {
                    return Err(ScheduleError::invariant(format!(
                        "ordering cycle through task {id}"
                    )));
                }
                let suffix = take_chain(&mut chains, head)?;
                let joined = chain_mut(&mut chains, tail)?;
                joined.push_back(task);
                joined.extend(suffix);
                let new_tail = joined.back().and_then(|t| t.id);

                if let Some(p) = previous {
                    pointed_to.remove(&p);
                }
                pointing.remove(&id);
                if let Some(new_tail) = new_tail {
                    pointed_to.insert(new_tail, tail);
                }
            }
            (Some(tail), None) => {
                chain_mut(&mut chains, tail)?.push_back(task);
                if let Some(p) = previous {
                    pointed_to.remove(&p);
                }
                pointed_to.insert(id, tail);
            }
            (None, Some(head)) => {
                chain_mut(&mut chains, head)?.push_front(task);
                pointing.remove(&id);
                if let Some(p) = previous {
                    pointing.insert(p, head);
                }
            }
            (None, None) => {
                let index = chains.len();
                chains.push(Some(VecDeque::from([task])));
                pointed_to.insert(id, index);
                if let Some(p) = previous {
                    pointing.insert(p, index);
                }
            }
        }
    }

    Ok(chains
        .into_iter()
        .flatten()
        .map(Vec::from)
        .collect())
}

fn chain_mut(chains: &mut [Option<VecDeque<Task>>], index: usize) -> Result<&mut VecDeque<Task>> {
    chains
        .get_mut(index)
        .and_then(Option::as_mut)
        .ok_or_else(|| ScheduleError::invariant(format!("chain {index} already merged")))
}

fn take_chain(chains: &mut [Option<VecDeque<Task>>], index: usize) -> Result<VecDeque<Task>> {
    chains
        .get_mut(index)
        .and_then(Option::take)
        .ok_or_else(|| ScheduleError::invariant(format!("chain {index} already merged")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleId;

    fn floating(id: u64) -> Task {
        Task::floating(ScheduleId(1), format!("t{id}"), 1).with_id(TaskId(id))
    }

    fn ids(groups: &[Vec<Task>]) -> Vec<Vec<u64>> {
        groups
            .iter()
            .map(|g| g.iter().filter_map(|t| t.id).map(|id| id.0).collect())
            .collect()
    }

    #[test]
    fn test_grouping_sizes() {
        let tasks = vec![
            floating(0),
            floating(1).with_previous(TaskId(0)),
            floating(2).with_previous(TaskId(1)),
            floating(3),
            floating(4).with_previous(TaskId(3)),
            floating(5),
        ];
        let groups = build_ordered_task_groups(tasks).unwrap();
        assert_eq!(ids(&groups), vec![vec![0, 1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn test_grouping_reversed_input() {
        let tasks = vec![
            floating(2).with_previous(TaskId(1)),
            floating(1).with_previous(TaskId(0)),
            floating(0),
        ];
        let groups = build_ordered_task_groups(tasks).unwrap();
        assert_eq!(ids(&groups), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_grouping_joins_two_chains() {
        // 0 → 1 and 2 → 3 exist before 2 links them as 0 → 1 → 2 → 3.
        let tasks = vec![
            floating(0),
            floating(3).with_previous(TaskId(2)),
            floating(1).with_previous(TaskId(0)),
            floating(2).with_previous(TaskId(1)),
        ];
        let groups = build_ordered_task_groups(tasks).unwrap();
        assert_eq!(ids(&groups), vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_grouping_external_predecessor() {
        // Task 7 is not part of the input; 8 heads its own chain.
        let tasks = vec![floating(8).with_previous(TaskId(7)), floating(9)];
        let groups = build_ordered_task_groups(tasks).unwrap();
        assert_eq!(ids(&groups), vec![vec![8], vec![9]]);
    }

    #[test]
    fn test_grouping_rejects_fixed() {
        let tasks = vec![Task::fixed(ScheduleId(1), "m", 0, 5).with_id(TaskId(1))];
        assert!(matches!(
            build_ordered_task_groups(tasks),
            Err(ScheduleError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_grouping_rejects_cycle() {
        let tasks = vec![
            floating(1).with_previous(TaskId(2)),
            floating(2).with_previous(TaskId(1)),
        ];
        assert!(matches!(
            build_ordered_task_groups(tasks),
            Err(ScheduleError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_grouping_empty() {
        assert!(build_ordered_task_groups(Vec::new()).unwrap().is_empty());
    }
}
