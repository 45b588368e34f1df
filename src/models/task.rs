//! Task model.
//!
//! A task is something on a schedule that has to be done. It is the
//! aggregate root for per-task scheduling state: type, duration,
//! placement, ordering link and its owned windows.
//!
//! # Task types
//! - **Fixed**: an appointment. Its start is set explicitly by the user.
//! - **Floating**: the start is managed by the engine, which places the
//!   task inside its windows, after its predecessor, and clear of other
//!   tasks. Only floating tasks carry a [`SchedulingStatus`].
//!
//! # Window consolidation
//! Windows are kept sorted ascending by start (open starts first, ties by
//! id) and never overlap. Adding a window merges it with every window it
//! touches; windows merged away are handed back so the store can delete
//! the orphans.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{ScheduleId, Window, WindowId};
use crate::error::{ensure, Result, ScheduleError};
use crate::validation::Violation;

entity_id!(
    /// Store-assigned task identifier.
    TaskId
);

/// Whether the task's start is user-set or engine-managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Explicit, user-set start. Never auto-placed.
    Fixed,
    /// Start managed by the engine.
    Floating,
}

/// Placement state of a floating task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingStatus {
    /// No start yet; the engine has not tried to place it.
    Unscheduled,
    /// Has a start that obeys all constraints.
    Valid,
    /// Has a start that breaks some constraint.
    Invalid,
    /// No start; the engine tried to place it and could not.
    Failed,
    /// Has a start and the work is complete. Never touched by the engine.
    Done,
}

impl SchedulingStatus {
    /// Whether a task in this status must carry a start.
    pub fn requires_start(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid | Self::Done)
    }

    /// Whether a task in this status is picked up by a default auto-schedule.
    pub fn needs_scheduling(self) -> bool {
        matches!(self, Self::Unscheduled | Self::Failed | Self::Invalid)
    }
}

/// A task on a schedule.
///
/// The end of a task is derived (`start + duration`) and never stored,
/// so it cannot drift from its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier; `None` until persisted.
    pub id: Option<TaskId>,
    /// Owning schedule.
    pub schedule_id: ScheduleId,
    /// Human-readable name.
    pub name: String,
    /// Free-form notes.
    #[serde(default)]
    pub description: String,
    /// Displayed as an all-day entry.
    #[serde(default)]
    pub all_day: bool,
    /// Fixed or floating.
    pub task_type: TaskType,
    /// Length of the task (ms). Must be positive.
    pub duration_ms: i64,
    /// Start time (ms).
    pub start_ms: Option<i64>,
    /// Placement state; floating tasks only.
    pub scheduling_status: Option<SchedulingStatus>,
    /// Task this one must be placed after; floating tasks only.
    pub previous_task_id: Option<TaskId>,
    /// Must start exactly when the previous task ends.
    pub immediately_follows_previous: Option<bool>,
    #[serde(default)]
    windows: Vec<Window>,
}

impl Task {
    fn base(schedule_id: ScheduleId, name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: None,
            schedule_id,
            name: name.into(),
            description: String::new(),
            all_day: false,
            task_type,
            duration_ms: 0,
            start_ms: None,
            scheduling_status: None,
            previous_task_id: None,
            immediately_follows_previous: None,
            windows: Vec::new(),
        }
    }

    /// Creates a fixed task (an appointment).
    pub fn fixed(
        schedule_id: ScheduleId,
        name: impl Into<String>,
        start_ms: i64,
        duration_ms: i64,
    ) -> Self {
        Self {
            duration_ms,
            start_ms: Some(start_ms),
            ..Self::base(schedule_id, name, TaskType::Fixed)
        }
    }

    /// Creates an unscheduled floating task.
    pub fn floating(schedule_id: ScheduleId, name: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            duration_ms,
            scheduling_status: Some(SchedulingStatus::Unscheduled),
            ..Self::base(schedule_id, name, TaskType::Floating)
        }
    }

    /// Sets the identifier.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the task as an all-day entry.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = all_day;
        self
    }

    /// Orders this task after another one.
    pub fn with_previous(mut self, previous: TaskId) -> Self {
        self.previous_task_id = Some(previous);
        self
    }

    /// Requires this task to start exactly when its predecessor ends.
    pub fn with_immediately_follows(mut self, immediately: bool) -> Self {
        self.immediately_follows_previous = Some(immediately);
        self
    }

    /// Sets the start time.
    pub fn with_start(mut self, start_ms: i64) -> Self {
        self.start_ms = Some(start_ms);
        self
    }

    /// Sets the scheduling status.
    pub fn with_status(mut self, status: SchedulingStatus) -> Self {
        self.scheduling_status = Some(status);
        self
    }

    /// Places a floating task at `start_ms` with status Valid.
    pub fn placed_at(self, start_ms: i64) -> Self {
        self.with_start(start_ms).with_status(SchedulingStatus::Valid)
    }

    /// Windows in ascending order, never overlapping.
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub(crate) fn set_windows(&mut self, windows: Vec<Window>) {
        self.windows = windows;
    }

    /// Derived end time (ms); `None` without a start or if the end is
    /// past `i64::MAX`.
    pub fn end_ms(&self) -> Option<i64> {
        self.start_ms?.checked_add(self.duration_ms)
    }

    /// Occupied interval `[start, end)`; `None` without a start.
    pub fn interval(&self) -> Option<(i64, i64)> {
        Some((self.start_ms?, self.end_ms()?))
    }

    /// Whether the task is fixed.
    pub fn is_fixed(&self) -> bool {
        self.task_type == TaskType::Fixed
    }

    /// Whether the task is floating.
    pub fn is_floating(&self) -> bool {
        self.task_type == TaskType::Floating
    }

    /// Whether the task currently has status `status`.
    pub fn has_status(&self, status: SchedulingStatus) -> bool {
        self.scheduling_status == Some(status)
    }

    /// Whether this is a floating task awaiting (re)placement.
    pub fn needs_scheduling(&self) -> bool {
        self.is_floating()
            && self
                .scheduling_status
                .is_some_and(SchedulingStatus::needs_scheduling)
    }

    /// Checks the task's own invariants, collecting every violation.
    ///
    /// - duration is positive;
    /// - start + duration does not overflow;
    /// - fixed: has a start, no status, no predecessor, no windows;
    /// - floating: has a status; has a start iff the status is Valid,
    ///   Invalid or Done;
    /// - a task never precedes itself.
    pub fn validate(&self) -> Vec<Violation> {
        let mut errors = Vec::new();
        if self.duration_ms <= 0 {
            errors.push(Violation::TaskDurationInvalid);
        }
        if self.start_ms.is_some() && self.end_ms().is_none() {
            errors.push(Violation::TaskStartInvalid);
        }

        match self.task_type {
            TaskType::Fixed => {
                if self.start_ms.is_none() {
                    errors.push(Violation::TaskStartInvalid);
                }
                if self.scheduling_status.is_some() {
                    errors.push(Violation::TaskStatusInvalid);
                }
                if self.previous_task_id.is_some() {
                    errors.push(Violation::TaskOrderInvalid);
                }
                if !self.windows.is_empty() {
                    errors.push(Violation::TaskWindowsNotAllowedForType);
                }
            }
            TaskType::Floating => match self.scheduling_status {
                None => errors.push(Violation::TaskStatusInvalid),
                Some(status) => {
                    if status.requires_start() != self.start_ms.is_some() {
                        errors.push(Violation::TaskStartInvalid);
                    }
                }
            },
        }

        if self.id.is_some() && self.previous_task_id == self.id {
            errors.push(Violation::TaskOrderInvalid);
        }
        errors
    }

    /// Whether [`validate`](Self::validate) finds nothing.
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Fails with an invariant violation if the task is not valid.
    pub fn assert_valid(&self) -> Result<()> {
        let errors = self.validate();
        ensure(errors.is_empty(), || {
            format!("task {:?} is not valid: {errors:?}", self.id)
        })
    }

    /// Adds a window during which this task can be done.
    ///
    /// The window list is rebuilt sorted and consolidated, so the window
    /// may be absorbed by existing coverage, or may widen or swallow
    /// existing windows.
    ///
    /// # Errors
    /// - `InvalidInput` if the task is not floating or the window is invalid.
    /// - `InvariantViolation` if the task itself is invalid, or two windows
    ///   with an open start both lack an id (their order is undefined).
    ///
    /// # Returns
    /// Previously stored windows removed by consolidation.
    pub fn add_window(&mut self, window: Window) -> Result<Vec<Window>> {
        let mut errors = Vec::new();
        if !self.is_floating() {
            errors.push(Violation::TaskTypeInvalid);
        }
        errors.extend(window.validate());
        if !errors.is_empty() {
            return Err(ScheduleError::InvalidInput(errors));
        }
        self.assert_valid()?;

        let unordered = self
            .windows
            .iter()
            .chain(std::iter::once(&window))
            .filter(|w| w.start_ms.is_none() && w.id.is_none())
            .count();
        ensure(unordered <= 1, || {
            format!("task {:?}: window order undefined for open-start windows without ids", self.id)
        })?;

        let mut candidates: Vec<(bool, Window)> = std::mem::take(&mut self.windows)
            .into_iter()
            .map(|w| (false, w))
            .chain(std::iter::once((true, window)))
            .collect();
        candidates.sort_by(|(_, a), (_, b)| window_order(a, b));

        let mut merged: Vec<Window> = Vec::with_capacity(candidates.len());
        let mut removed = Vec::new();
        for (inserted, current) in candidates {
            match merged.last_mut() {
                Some(previous) if touches(previous, &current) => {
                    if ends_later(&current, previous) {
                        previous.end_ms = current.end_ms;
                    }
                    if !inserted {
                        removed.push(current);
                    }
                }
                _ => merged.push(current),
            }
        }

        self.windows = merged;
        Ok(removed)
    }

    /// Removes the window with the given id.
    ///
    /// # Errors
    /// `NotFound` if the task is not floating or has no such window.
    pub fn remove_window(&mut self, window_id: WindowId) -> Result<Window> {
        let index = self
            .windows
            .iter()
            .position(|w| w.id == Some(window_id))
            .filter(|_| self.is_floating())
            .ok_or(ScheduleError::NotFound(Violation::WindowNotFound))?;
        Ok(self.windows.remove(index))
    }

    /// Whether this task and `other` occupy overlapping time.
    ///
    /// # Errors
    /// `InvariantViolation` unless both tasks are valid and have a start.
    pub fn overlaps(&self, other: &Task) -> Result<bool> {
        let (a_start, a_end) = self.placed_interval()?;
        let (b_start, b_end) = other.placed_interval()?;
        Ok(intervals_overlap(a_start, a_end, b_start, b_end))
    }

    /// Whether the task's placement fits inside one of its windows.
    ///
    /// # Errors
    /// `InvariantViolation` unless the task is valid, floating and placed.
    pub fn fits_in_windows(&self) -> Result<bool> {
        let (start, end) = self.placed_interval()?;
        ensure(self.is_floating(), || {
            format!("window fit checked on fixed task {:?}", self.id)
        })?;
        for window in &self.windows {
            if window.fits(start, end)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Toggles the task between fixed and floating.
    ///
    /// Floating → fixed loses the windows, the ordering fields and the
    /// status, and the start becomes `now_ms` (the task turns into an
    /// appointment happening now). Fixed → floating keeps the start and
    /// marks it Valid.
    ///
    /// # Errors
    /// `InvariantViolation` if the task is not valid.
    ///
    /// # Returns
    /// Windows dropped by the conversion.
    pub fn change_type(&mut self, now_ms: i64) -> Result<Vec<Window>> {
        self.assert_valid()?;
        match self.task_type {
            TaskType::Floating => {
                let dropped = std::mem::take(&mut self.windows);
                self.task_type = TaskType::Fixed;
                self.start_ms = Some(now_ms);
                self.scheduling_status = None;
                self.immediately_follows_previous = None;
                self.previous_task_id = None;
                Ok(dropped)
            }
            TaskType::Fixed => {
                self.task_type = TaskType::Floating;
                self.scheduling_status = Some(SchedulingStatus::Valid);
                Ok(Vec::new())
            }
        }
    }

    /// Clears the placement of a floating task.
    pub fn unschedule(&mut self) {
        self.start_ms = None;
        self.scheduling_status = Some(SchedulingStatus::Unscheduled);
    }

    /// Places a floating task at `start_ms` with status Valid.
    pub fn place(&mut self, start_ms: i64) {
        self.start_ms = Some(start_ms);
        self.scheduling_status = Some(SchedulingStatus::Valid);
    }

    /// Records a failed placement attempt.
    pub fn fail(&mut self) {
        self.start_ms = None;
        self.scheduling_status = Some(SchedulingStatus::Failed);
    }

    /// Moves a Valid task to Invalid. Returns whether anything changed.
    pub fn invalidate(&mut self) -> bool {
        if self.has_status(SchedulingStatus::Valid) {
            self.scheduling_status = Some(SchedulingStatus::Invalid);
            true
        } else {
            false
        }
    }

    fn placed_interval(&self) -> Result<(i64, i64)> {
        self.assert_valid()?;
        self.interval()
            .ok_or_else(|| ScheduleError::invariant(format!("task {:?} has no start", self.id)))
    }
}

/// Four-way overlap test of `[a_start, a_end)` and `[b_start, b_end)`.
///
/// Touching intervals (`a_end == b_start`) do not overlap.
pub fn intervals_overlap(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    (a_start <= b_start && b_start < a_end)
        || (a_start < b_end && b_end <= a_end)
        || (b_start <= a_start && a_start < b_end)
        || (b_start < a_end && a_end <= b_end)
}

/// Ascending by start, open starts first; open-start ties by id.
fn window_order(a: &Window, b: &Window) -> Ordering {
    a.start_ms.cmp(&b.start_ms).then_with(|| {
        if a.start_ms.is_none() {
            a.id.cmp(&b.id)
        } else {
            Ordering::Equal
        }
    })
}

/// Whether `current` (sorted after `previous`) must merge into it.
fn touches(previous: &Window, current: &Window) -> bool {
    match (previous.end_ms, current.start_ms) {
        (None, _) | (_, None) => true,
        (Some(end), Some(start)) => start <= end,
    }
}

/// Whether `current` reaches further right than `previous` (open end = +∞).
fn ends_later(current: &Window, previous: &Window) -> bool {
    match (current.end_ms, previous.end_ms) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(current_end), Some(previous_end)) => current_end > previous_end,
    }
}
