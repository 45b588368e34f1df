//! Input validation for tasks and schedules.
//!
//! Two layers of checks:
//! - **Caller-facing** ([`Violation`]): codes attached to
//!   [`ScheduleError::InvalidInput`] and [`ScheduleError::NotFound`].
//!   Entity checks collect every violation; cross-entity checks
//!   ([`check_valid`]) fail fast on broken references.
//! - **Schedule-wide** ([`validate_schedule`]): structural integrity of a
//!   whole aggregate before it is committed. Detects:
//!   - Missing or duplicate task IDs
//!   - Tasks that break their own invariants
//!   - Predecessor links to unknown or fixed tasks
//!   - Predecessors claimed by more than one successor
//!   - Circular ordering (DAG validation)
//!   - Unsorted or overlapping windows
//!
//! # Reference
//! Cormen et al. (2009), "Introduction to Algorithms", Ch. 22.4 (Topological Sort)

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Result, ScheduleError};
use crate::models::{Task, TaskId};

/// Reasons a request was rejected, each with a client-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Violation {
    TaskTypeInvalid,
    TaskDurationInvalid,
    TaskScheduleInvalid,
    TaskStartInvalid,
    TaskStatusInvalid,
    TaskOrderInvalid,
    TaskOrderNotAvailable,
    TaskWindowsNotAllowedForType,
    TaskWindowsNotAllowedForOperation,
    TaskNotFound,
    ScheduleNameInvalid,
    ScheduleNotFound,
    WindowStartEndInvalid,
    WindowNotFound,
    ObjectNullIdRequired,
    ObjectIdRequired,
    ObjectUpdateNotAllowed,
    GenericMessage,
}

impl Violation {
    /// Human-readable description.
    pub fn message(self) -> &'static str {
        match self {
            Self::TaskTypeInvalid => "The provided task type is not valid",
            Self::TaskDurationInvalid => "The provided task duration is not valid",
            Self::TaskScheduleInvalid => "The provided schedule for a task is not valid",
            Self::TaskStartInvalid => "The provided task start time is not valid",
            Self::TaskStatusInvalid => "The provided task status is not valid",
            Self::TaskOrderInvalid => "The provided ordering for a task is not valid",
            Self::TaskOrderNotAvailable => {
                "The provided ordering for a task is already taken by another task"
            }
            Self::TaskWindowsNotAllowedForType => "Task cannot have windows for this task type",
            Self::TaskWindowsNotAllowedForOperation => {
                "Task cannot have windows for this operation"
            }
            Self::TaskNotFound => {
                "Task was not found. It may have been deleted, or you may not be authorized to view it."
            }
            Self::ScheduleNameInvalid => "The provided schedule name is not valid",
            Self::ScheduleNotFound => {
                "Schedule was not found. It may have been deleted, or you may not be authorized to view it."
            }
            Self::WindowStartEndInvalid => "Start/end times invalid for a window",
            Self::WindowNotFound => {
                "Window was not found. It may have been deleted, or you may not be authorized to view it."
            }
            Self::ObjectNullIdRequired => "The id of the newly added object should be null",
            Self::ObjectIdRequired => "Id of the object is required",
            Self::ObjectUpdateNotAllowed => {
                "One or more of the updated properties of this object is not allowed to be updated."
            }
            Self::GenericMessage => "Incorrect usage. Please read the documentation and try again",
        }
    }
}

/// Checks a task against the other tasks of its schedule.
///
/// Requirements, on top of [`Task::validate`]:
/// - a named predecessor exists in `schedule_tasks`, is floating and is
///   not the task itself (fails fast with `TaskOrderInvalid`);
/// - no other task already follows that predecessor (`TaskOrderNotAvailable`,
///   collected with the structural violations).
///
/// Schedule existence is the caller's concern: `schedule_tasks` is the
/// snapshot of `task.schedule_id`.
pub fn check_valid<'a>(
    task: &Task,
    schedule_tasks: impl IntoIterator<Item = &'a Task>,
) -> Result<()> {
    let schedule_tasks: Vec<&Task> = schedule_tasks.into_iter().collect();
    let mut errors = task.validate();

    if let Some(previous_id) = task.previous_task_id {
        let previous = schedule_tasks.iter().find(|t| t.id == Some(previous_id));
        let acceptable = task.id != Some(previous_id)
            && previous.is_some_and(|p| p.is_floating() && p.schedule_id == task.schedule_id);
        if !acceptable {
            return Err(ScheduleError::invalid(Violation::TaskOrderInvalid));
        }

        let taken = schedule_tasks
            .iter()
            .any(|t| t.previous_task_id == Some(previous_id) && t.id != task.id);
        if taken {
            errors.push(Violation::TaskOrderNotAvailable);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ScheduleError::InvalidInput(errors))
    }
}

/// Validation result.
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// A schedule-wide validation error.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Error category.
    pub kind: ValidationErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of schedule-wide validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A stored task has no id.
    MissingId,
    /// Two tasks share the same ID.
    DuplicateId,
    /// A task breaks its own invariants.
    InvalidTask,
    /// A task's predecessor is unknown or not floating.
    InvalidPredecessor,
    /// Two tasks name the same predecessor.
    DuplicateSuccessor,
    /// Predecessor links form a cycle.
    CyclicDependency,
    /// Windows are unsorted or overlap.
    UnconsolidatedWindows,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Validates every task of one schedule aggregate.
///
/// Checks:
/// 1. All tasks have an id, no two share one
/// 2. Every task passes [`Task::validate`]
/// 3. Every predecessor exists in the aggregate and is floating
/// 4. No predecessor has more than one successor
/// 5. No circular ordering
/// 6. Windows are sorted by start and do not touch or overlap
///
/// # Returns
/// `Ok(())` if all checks pass, `Err(errors)` with all detected issues.
pub fn validate_schedule(tasks: &[Task]) -> ValidationResult {
    let mut errors = Vec::new();

    let mut by_id: HashMap<TaskId, &Task> = HashMap::new();
    for task in tasks {
        match task.id {
            None => errors.push(ValidationError::new(
                ValidationErrorKind::MissingId,
                format!("Task '{}' has no id", task.name),
            )),
            Some(id) => {
                if by_id.insert(id, task).is_some() {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::DuplicateId,
                        format!("Duplicate task ID: {id}"),
                    ));
                }
            }
        }
    }

    for task in tasks {
        let violations = task.validate();
        if !violations.is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidTask,
                format!("Task {:?} is invalid: {violations:?}", task.id),
            ));
        }
    }

    let mut successors: HashSet<TaskId> = HashSet::new();
    for task in tasks {
        let Some(previous_id) = task.previous_task_id else {
            continue;
        };
        if !by_id.get(&previous_id).is_some_and(|p| p.is_floating()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidPredecessor,
                format!(
                    "Task {:?} references unknown or fixed predecessor {previous_id}",
                    task.id
                ),
            ));
        }
        if !successors.insert(previous_id) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateSuccessor,
                format!("Task {previous_id} is followed by more than one task"),
            ));
        }
    }

    if let Some(cycle_err) = detect_cycles(tasks) {
        errors.push(cycle_err);
    }

    for task in tasks {
        let consolidated = task.windows().windows(2).all(|pair| {
            match (pair[0].end_ms, pair[1].start_ms) {
                (Some(end), Some(start)) => start > end,
                _ => false,
            }
        });
        if !consolidated {
            errors.push(ValidationError::new(
                ValidationErrorKind::UnconsolidatedWindows,
                format!("Task {:?} has unsorted or overlapping windows", task.id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Detects cycles in the ordering graph.
///
/// # Algorithm
/// Every task has at most one predecessor, so the graph is a set of
/// paths and rings. From each task, walk `previous_task_id` links until a
/// chain head, a missing predecessor, or a task already known to be
/// acyclic. Meeting a task twice on one walk is a cycle. Each task is
/// walked past once, so the check is O(n) with no recursion.
fn detect_cycles(tasks: &[Task]) -> Option<ValidationError> {
    let previous: HashMap<TaskId, Option<TaskId>> = tasks
        .iter()
        .filter_map(|t| Some((t.id?, t.previous_task_id)))
        .collect();

    let mut acyclic: HashSet<TaskId> = HashSet::new();
    for task in tasks {
        let mut on_walk: HashSet<TaskId> = HashSet::new();
        let mut cursor = task.id;
        while let Some(id) = cursor {
            if acyclic.contains(&id) {
                break;
            }
            if !on_walk.insert(id) {
                return Some(ValidationError::new(
                    ValidationErrorKind::CyclicDependency,
                    format!("Circular ordering detected involving task {id}"),
                ));
            }
            cursor = previous.get(&id).copied().flatten();
        }
        acyclic.extend(on_walk);
    }

    None
}
