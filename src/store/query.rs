//! Query primitives over aggregate snapshots.
//!
//! These are the read paths the engine relies on. They take any iterator
//! of task references, so they run equally over a fresh
//! [`AggregateSnapshot`](super::AggregateSnapshot) or over the working
//! state of a [`UnitOfWork`](super::UnitOfWork).

use regex::Regex;

use crate::error::{ensure, Result, ScheduleError};
use crate::models::{SchedulingStatus, Task, TaskId};

/// Optional `[start_ms, end_ms)` bounds of a range query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Lower bound (ms); `None` = unbounded.
    pub start_ms: Option<i64>,
    /// Upper bound (ms); `None` = unbounded.
    pub end_ms: Option<i64>,
}

impl TimeRange {
    /// Creates a range with the given (possibly open) bounds.
    pub fn new(start_ms: Option<i64>, end_ms: Option<i64>) -> Self {
        Self { start_ms, end_ms }
    }

    /// Unbounded on both sides.
    pub fn all() -> Self {
        Self::default()
    }

    /// `[start_ms, +∞)`.
    pub fn from(start_ms: i64) -> Self {
        Self::new(Some(start_ms), None)
    }

    /// `[start_ms, end_ms)`.
    pub fn between(start_ms: i64, end_ms: i64) -> Self {
        Self::new(Some(start_ms), Some(end_ms))
    }

    /// Whether the interval `[start, end)` falls in this range.
    ///
    /// With both bounds `a`, `b`: the interval starts inside, ends inside,
    /// or covers the range. With only a start, the interval must end after
    /// it; with only an end, it must start before it.
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        match (self.start_ms, self.end_ms) {
            (Some(a), Some(b)) => {
                (start >= a && start < b) || (end > a && end <= b) || (start <= a && end >= b)
            }
            (Some(a), None) => end > a,
            (None, Some(b)) => start < b,
            (None, None) => true,
        }
    }
}

/// Finds placed tasks intersecting `range`, sorted by ascending start
/// (ties by id).
///
/// `name` matches case-insensitively. With `%` or `_` it is a SQL `LIKE`
/// pattern over the whole name, otherwise a substring.
pub fn find_tasks<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    range: TimeRange,
    name: Option<&str>,
) -> Result<Vec<&'a Task>> {
    let matcher = name.map(name_matcher).transpose()?;
    let mut found: Vec<&Task> = tasks
        .into_iter()
        .filter(|t| {
            t.interval()
                .is_some_and(|(start, end)| range.intersects(start, end))
        })
        .filter(|t| matcher.as_ref().map_or(true, |m| m.is_match(&t.name)))
        .collect();
    found.sort_by_key(|t| (t.start_ms, t.id));
    Ok(found)
}

/// Finds floating tasks; with `only_needing_scheduling`, just those that
/// are Unscheduled, Failed or Invalid.
pub fn find_floating_tasks<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    only_needing_scheduling: bool,
) -> Vec<&'a Task> {
    tasks
        .into_iter()
        .filter(|t| t.is_floating())
        .filter(|t| !only_needing_scheduling || t.needs_scheduling())
        .collect()
}

/// Finds the floating task ordered directly after `previous_id`.
///
/// # Errors
/// `InvariantViolation` if more than one task claims that predecessor.
pub fn find_task_after<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    previous_id: TaskId,
) -> Result<Option<&'a Task>> {
    let mut successors = tasks
        .into_iter()
        .filter(|t| t.is_floating() && t.previous_task_id == Some(previous_id));
    let first = successors.next();
    ensure(successors.next().is_none(), || {
        format!("task {previous_id} is followed by more than one task")
    })?;
    Ok(first)
}

/// Finds Valid tasks starting before `time_ms`.
pub fn find_tasks_starting_before<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    time_ms: i64,
) -> Vec<&'a Task> {
    tasks
        .into_iter()
        .filter(|t| t.has_status(SchedulingStatus::Valid))
        .filter(|t| t.start_ms.is_some_and(|start| start < time_ms))
        .collect()
}

fn name_matcher(pattern: &str) -> Result<Regex> {
    let source = if pattern.contains(['%', '_']) {
        let mut source = String::from("(?is)^");
        for c in pattern.chars() {
            match c {
                '%' => source.push_str(".*"),
                '_' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        source.push('$');
        source
    } else {
        format!("(?i){}", regex::escape(pattern))
    };
    Regex::new(&source)
        .map_err(|e| ScheduleError::invariant(format!("name pattern {pattern:?}: {e}")))
}
