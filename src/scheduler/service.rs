//! Scheduling orchestrator.
//!
//! [`TaskService`] is the only way tasks change. Every mutating operation
//! runs inside one [`UnitOfWork`]:
//!
//! 1. Lock every schedule the operation touches.
//! 2. Apply the mutation to the working copy.
//! 3. Run the invalidation sweep over each touched schedule, since one
//!    local change can invalidate other tasks transitively.
//! 4. Commit. A stale version token retries the whole operation, up to
//!    [`EngineConfig::max_commit_attempts`].
//!
//! # Sweep
//! Conflicting Valid tasks are invalidated pairwise. Bad-order detection
//! then runs to a fixed point in an explicit loop bounded by the task
//! count + 1 (or [`EngineConfig::sweep_pass_limit`]).
//!
//! # Floating status transitions
//! `Unscheduled → {Valid, Failed}` by auto-placement, `Valid → Invalid` by
//! the sweep, `{Valid, Invalid, Failed} → Unscheduled` by unscheduling.
//! Done tasks are never touched by the engine.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::conflicts::{find_conflicting_tasks, ConflictPair};
use super::grouping::build_ordered_task_groups;
use super::ordering::find_badly_ordered_tasks;
use super::slot::find_first_available_slot;
use crate::config::EngineConfig;
use crate::error::{Result, ScheduleError};
use crate::models::{ScheduleId, SchedulingStatus, Task, TaskId, Window, WindowId};
use crate::store::{query, ScheduleStore, TimeRange, UnitOfWork};
use crate::validation::{self, Violation};

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Runs task operations against a [`ScheduleStore`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use u_calendar::models::{SchedulingStatus, Task};
/// use u_calendar::scheduler::TaskService;
/// use u_calendar::store::InMemoryStore;
///
/// let store = Arc::new(InMemoryStore::new());
/// let schedule = store.create_schedule("Work").unwrap();
/// let service = TaskService::new(store);
///
/// let id = service.create(Task::floating(schedule.id, "Write report", 3_600_000)).unwrap();
/// let failed = service.auto_schedule(schedule.id, None, Some(0)).unwrap();
/// assert!(failed.is_empty());
///
/// let task = service.read(id).unwrap();
/// assert_eq!(task.scheduling_status, Some(SchedulingStatus::Valid));
/// assert_eq!(task.start_ms, Some(0));
/// ```
pub struct TaskService<S: ScheduleStore> {
    store: Arc<S>,
    config: EngineConfig,
    clock: fn() -> i64,
}

impl<S: ScheduleStore> TaskService<S> {
    /// Creates a service with the default configuration.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            clock: system_clock,
        }
    }

    /// Creates a service with a custom configuration.
    ///
    /// # Errors
    /// `Config` if the configuration is unusable.
    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(store)
        })
    }

    /// Replaces the wall clock (ms since epoch) used for "now".
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------

    /// Creates a task and returns its id.
    ///
    /// # Errors
    /// - `InvalidInput(ObjectNullIdRequired)` if the task already has an id.
    /// - `InvalidInput(TaskWindowsNotAllowedForOperation)` if it has windows;
    ///   windows are added with [`add_window`](Self::add_window).
    /// - Anything [`check_valid`](Self::check_valid) reports.
    pub fn create(&self, task: Task) -> Result<TaskId> {
        if task.id.is_some() {
            return Err(ScheduleError::invalid(Violation::ObjectNullIdRequired));
        }
        if !task.windows().is_empty() {
            return Err(ScheduleError::invalid(
                Violation::TaskWindowsNotAllowedForOperation,
            ));
        }
        self.transact("create", |uow| {
            uow.lock(task.schedule_id)?;
            validation::check_valid(&task, uow.schedule_tasks(task.schedule_id))?;
            let id = uow.insert(task.clone())?;
            self.sweep(uow, task.schedule_id)?;
            Ok(id)
        })
    }

    /// Updates a task's plain fields.
    ///
    /// The stored windows are kept whatever `task` carries. A Valid
    /// floating task that no longer fits its windows is invalidated.
    ///
    /// # Errors
    /// - `InvalidInput(ObjectIdRequired)` if the task has no id.
    /// - `InvalidInput(ObjectUpdateNotAllowed)` if the type, predecessor or
    ///   schedule would change; dedicated operations handle those.
    /// - Anything [`check_valid`](Self::check_valid) reports.
    pub fn update(&self, task: Task) -> Result<()> {
        let id = task
            .id
            .ok_or_else(|| ScheduleError::invalid(Violation::ObjectIdRequired))?;
        self.transact("update", |uow| {
            uow.lock(task.schedule_id)?;
            validation::check_valid(&task, uow.schedule_tasks(task.schedule_id))?;
            let existing = uow.lock_task(id)?;
            if existing.task_type != task.task_type
                || existing.previous_task_id != task.previous_task_id
                || existing.schedule_id != task.schedule_id
            {
                return Err(ScheduleError::invalid(Violation::ObjectUpdateNotAllowed));
            }

            let mut updated = task.clone();
            updated.set_windows(existing.windows().to_vec());
            invalidate_unfitting(&mut updated)?;
            *uow.task_mut(id)? = updated;
            self.sweep(uow, task.schedule_id)?;
            Ok(())
        })
    }

    /// Deletes a task and its windows. Its successor, if any, now follows
    /// the deleted task's predecessor.
    pub fn delete(&self, task_id: TaskId) -> Result<()> {
        self.transact("delete", |uow| {
            let task = uow.lock_task(task_id)?.clone();
            splice_out(uow, &task)?;
            uow.delete(task_id)?;
            self.sweep(uow, task.schedule_id)?;
            Ok(())
        })
    }

    /// Toggles a task between fixed and floating.
    ///
    /// A floating task leaves its chain first. See [`Task::change_type`]
    /// for the conversion itself; "now" comes from the service clock.
    pub fn change_type(&self, task_id: TaskId) -> Result<()> {
        self.transact("change_type", |uow| {
            let task = uow.lock_task(task_id)?.clone();
            if task.is_floating() {
                splice_out(uow, &task)?;
            }
            let dropped = uow.task_mut(task_id)?.change_type((self.clock)())?;
            uow.orphan_windows(dropped.iter().map(|w| w.id));
            self.sweep(uow, task.schedule_id)?;
            Ok(())
        })
    }

    /// Moves a task to another schedule.
    ///
    /// The task leaves its chain. A floating task arrives Unscheduled with
    /// no predecessor. Both schedules are swept.
    pub fn move_to_schedule(&self, task_id: TaskId, new_schedule_id: ScheduleId) -> Result<()> {
        self.transact("move_to_schedule", |uow| {
            let task = uow.lock_task(task_id)?.clone();
            uow.lock(new_schedule_id)?;
            splice_out(uow, &task)?;

            let moved = uow.task_mut(task_id)?;
            moved.schedule_id = new_schedule_id;
            if moved.is_floating() {
                moved.previous_task_id = None;
                moved.immediately_follows_previous = None;
                moved.unschedule();
            }
            info!(
                %task_id,
                from = %task.schedule_id,
                to = %new_schedule_id,
                "moved task to another schedule"
            );

            self.sweep(uow, task.schedule_id)?;
            self.sweep(uow, new_schedule_id)?;
            Ok(())
        })
    }

    /// Orders `task_id` directly after `after_task_id`.
    ///
    /// The moved task's old successor inherits its old predecessor, and the
    /// task previously following `after_task_id` now follows the moved task.
    ///
    /// # Errors
    /// - `InvalidInput(TaskOrderInvalid)` if both ids are the same.
    /// - `InvalidInput(TaskScheduleInvalid)` if the tasks are on different
    ///   schedules.
    /// - `InvalidInput(TaskTypeInvalid)` unless both tasks are floating.
    pub fn move_after(&self, task_id: TaskId, after_task_id: TaskId) -> Result<()> {
        if task_id == after_task_id {
            return Err(ScheduleError::invalid(Violation::TaskOrderInvalid));
        }
        self.transact("move_after", |uow| {
            let task = uow.lock_task(task_id)?.clone();
            let after = uow.lock_task(after_task_id)?;
            if after.schedule_id != task.schedule_id {
                return Err(ScheduleError::invalid(Violation::TaskScheduleInvalid));
            }
            if !(task.is_floating() && after.is_floating()) {
                return Err(ScheduleError::invalid(Violation::TaskTypeInvalid));
            }

            splice_out(uow, &task)?;
            uow.task_mut(task_id)?.previous_task_id = None;
            let displaced = query::find_task_after(uow.schedule_tasks(task.schedule_id), after_task_id)?
                .and_then(|t| t.id);
            if let Some(displaced) = displaced {
                uow.task_mut(displaced)?.previous_task_id = Some(task_id);
            }
            uow.task_mut(task_id)?.previous_task_id = Some(after_task_id);

            self.sweep(uow, task.schedule_id)?;
            Ok(())
        })
    }

    /// Adds a window to a floating task.
    ///
    /// The store assigns the window id. Returns the stored windows merged
    /// away by consolidation; they are deleted on commit.
    ///
    /// # Errors
    /// `InvalidInput(ObjectNullIdRequired)` if the window already has an id,
    /// plus anything [`Task::add_window`] reports.
    pub fn add_window(&self, task_id: TaskId, window: Window) -> Result<Vec<Window>> {
        if window.id.is_some() {
            return Err(ScheduleError::invalid(Violation::ObjectNullIdRequired));
        }
        self.transact("add_window", |uow| {
            let schedule_id = uow.lock_task(task_id)?.schedule_id;
            let window = window.clone().with_id(uow.allocate_window_id());

            let task = uow.task_mut(task_id)?;
            let removed = task.add_window(window)?;
            invalidate_unfitting(task)?;

            uow.orphan_windows(removed.iter().map(|w| w.id));
            self.sweep(uow, schedule_id)?;
            Ok(removed)
        })
    }

    /// Removes a window from a floating task, invalidating the task if it
    /// no longer fits the remaining windows.
    pub fn remove_window(&self, task_id: TaskId, window_id: WindowId) -> Result<()> {
        self.transact("remove_window", |uow| {
            let schedule_id = uow.lock_task(task_id)?.schedule_id;

            let task = uow.task_mut(task_id)?;
            let removed = task.remove_window(window_id)?;
            invalidate_unfitting(task)?;

            uow.orphan_windows([removed.id]);
            self.sweep(uow, schedule_id)?;
            Ok(())
        })
    }

    /// Places floating tasks at the earliest start that honours their
    /// windows, predecessors and every other placed task.
    ///
    /// # Algorithm
    /// 1. Targets are `task_ids`, or every floating task that is
    ///    Unscheduled, Failed or Invalid.
    /// 2. Targets are unscheduled and the schedule is swept.
    /// 3. Targets are grouped into chains so predecessors go first.
    /// 4. Per task: a predecessor must be Valid, and the search starts no
    ///    earlier than the predecessor's start. Windows are tried in order,
    ///    each clamped to the earliest start; no windows means
    ///    `[earliest, +∞)`. A slot that breaks immediate succession fails.
    ///
    /// `earliest_start` defaults to now.
    ///
    /// # Returns
    /// Ids of the tasks that could not be placed (status Failed).
    ///
    /// # Errors
    /// Explicit ids must exist (`NotFound`), belong to the schedule
    /// (`TaskScheduleInvalid`), be floating (`TaskTypeInvalid`) and not be
    /// Done (`TaskStatusInvalid`).
    pub fn auto_schedule(
        &self,
        schedule_id: ScheduleId,
        task_ids: Option<&[TaskId]>,
        earliest_start: Option<i64>,
    ) -> Result<Vec<TaskId>> {
        let earliest = earliest_start.unwrap_or_else(self.clock);
        self.transact("auto_schedule", |uow| {
            uow.lock(schedule_id)?;
            let targets: Vec<TaskId> = match task_ids {
                Some(ids) => {
                    let mut seen = HashSet::new();
                    let mut targets = Vec::new();
                    for &id in ids {
                        self.unschedulable_member(uow, schedule_id, id)?;
                        if seen.insert(id) {
                            targets.push(id);
                        }
                    }
                    targets
                }
                None => query::find_floating_tasks(uow.schedule_tasks(schedule_id), true)
                    .into_iter()
                    .filter_map(|t| t.id)
                    .collect(),
            };

            for &id in &targets {
                uow.task_mut(id)?.unschedule();
            }
            self.sweep(uow, schedule_id)?;

            let tasks = targets
                .iter()
                .map(|&id| uow.task(id).cloned())
                .collect::<Result<Vec<_>>>()?;
            let mut failed = Vec::new();
            for chain in build_ordered_task_groups(tasks)? {
                for task in chain {
                    let Some(id) = task.id else { continue };
                    if !self.place(uow, id, earliest)? {
                        failed.push(id);
                    }
                }
            }

            self.sweep(uow, schedule_id)?;
            info!(
                %schedule_id,
                targets = targets.len(),
                failed = failed.len(),
                earliest,
                "auto-schedule finished"
            );
            Ok(failed)
        })
    }

    /// Resets floating tasks to Unscheduled without a start.
    ///
    /// # Errors
    /// Each task must exist (`NotFound`), belong to the schedule
    /// (`TaskScheduleInvalid`), be floating (`TaskTypeInvalid`) and not be
    /// Done (`TaskStatusInvalid`).
    pub fn unschedule(&self, schedule_id: ScheduleId, task_ids: &[TaskId]) -> Result<()> {
        self.transact("unschedule", |uow| {
            uow.lock(schedule_id)?;
            for &id in task_ids {
                self.unschedulable_member(uow, schedule_id, id)?;
                uow.task_mut(id)?.unschedule();
            }
            self.sweep(uow, schedule_id)?;
            Ok(())
        })
    }

    /// Runs the invalidation sweep on its own.
    ///
    /// # Returns
    /// The number of tasks moved from Valid to Invalid.
    pub fn invalidate_bad_tasks(&self, schedule_id: ScheduleId) -> Result<usize> {
        self.transact("invalidate_bad_tasks", |uow| {
            uow.lock(schedule_id)?;
            self.sweep(uow, schedule_id)
        })
    }

    /// Invalidates Valid tasks starting before `now_ms`, then sweeps.
    ///
    /// # Returns
    /// The number of tasks invalidated for starting in the past.
    pub fn invalidate_past_tasks(&self, schedule_id: ScheduleId, now_ms: i64) -> Result<usize> {
        self.transact("invalidate_past_tasks", |uow| {
            uow.lock(schedule_id)?;
            let past: Vec<TaskId> =
                query::find_tasks_starting_before(uow.schedule_tasks(schedule_id), now_ms)
                    .into_iter()
                    .filter_map(|t| t.id)
                    .collect();
            let mut count = 0;
            for id in past {
                if uow.invalidate(id)? {
                    count += 1;
                }
            }
            self.sweep(uow, schedule_id)?;
            Ok(count)
        })
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Reads a task.
    pub fn read(&self, task_id: TaskId) -> Result<Task> {
        self.store.read_task(task_id)
    }

    /// Placed tasks of a schedule intersecting `range`, by ascending start.
    /// See [`query::find_tasks`] for the name filter.
    pub fn find_tasks(
        &self,
        schedule_id: ScheduleId,
        range: TimeRange,
        name: Option<&str>,
    ) -> Result<Vec<Task>> {
        let snapshot = self.store.snapshot(schedule_id)?;
        Ok(query::find_tasks(&snapshot.tasks, range, name)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Overlapping task pairs of a schedule.
    /// See [`find_conflicting_tasks`](super::find_conflicting_tasks).
    pub fn find_conflicting_tasks(
        &self,
        schedule_id: ScheduleId,
        range: TimeRange,
        valid_only: bool,
    ) -> Result<BTreeSet<ConflictPair>> {
        let snapshot = self.store.snapshot(schedule_id)?;
        Ok(find_conflicting_tasks(&snapshot.tasks, range, valid_only))
    }

    /// All floating tasks of a schedule, grouped into ordered chains.
    pub fn find_floating_tasks_ordered(&self, schedule_id: ScheduleId) -> Result<Vec<Vec<Task>>> {
        let snapshot = self.store.snapshot(schedule_id)?;
        let floating = query::find_floating_tasks(&snapshot.tasks, false)
            .into_iter()
            .cloned()
            .collect();
        build_ordered_task_groups(floating)
    }

    /// Valid tasks of a schedule starting before `time_ms`.
    pub fn find_tasks_starting_before(
        &self,
        schedule_id: ScheduleId,
        time_ms: i64,
    ) -> Result<Vec<Task>> {
        let snapshot = self.store.snapshot(schedule_id)?;
        Ok(query::find_tasks_starting_before(&snapshot.tasks, time_ms)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Checks a task structurally and against its schedule.
    ///
    /// # Errors
    /// - `NotFound(ScheduleNotFound)` if the schedule does not exist.
    /// - `InvalidInput` as described in [`validation::check_valid`].
    pub fn check_valid(&self, task: &Task) -> Result<()> {
        let snapshot = self.store.snapshot(task.schedule_id)?;
        validation::check_valid(task, &snapshot.tasks)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Runs `body` in a fresh unit of work and commits it, retrying the
    /// whole operation when the commit loses an optimistic-lock race.
    fn transact<T>(
        &self,
        operation: &'static str,
        mut body: impl FnMut(&mut UnitOfWork<'_, S>) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            let mut uow = UnitOfWork::new(&*self.store);
            let outcome = match body(&mut uow) {
                Ok(value) => uow.commit().map(|()| value),
                Err(err) => Err(err),
            };
            match outcome {
                Err(err) if err.is_retryable() && attempt < self.config.max_commit_attempts => {
                    warn!(operation, attempt, error = %err, "commit conflict, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Invalidates conflicting and badly ordered tasks until nothing changes.
    fn sweep(&self, uow: &mut UnitOfWork<'_, S>, schedule_id: ScheduleId) -> Result<usize> {
        let mut count = 0;

        let pairs = find_conflicting_tasks(uow.schedule_tasks(schedule_id), TimeRange::all(), true);
        for id in pairs.iter().flat_map(ConflictPair::ids) {
            if uow.invalidate(id)? {
                count += 1;
            }
        }
        let conflicting = count;

        let limit = self
            .config
            .pass_limit_for(uow.schedule_task_count(schedule_id));
        let mut passes = 0;
        loop {
            let bad = find_badly_ordered_tasks(uow.schedule_tasks(schedule_id));
            if bad.is_empty() {
                break;
            }
            passes += 1;
            if passes > limit {
                return Err(ScheduleError::invariant(format!(
                    "bad-order sweep of schedule {schedule_id} exceeded {limit} passes"
                )));
            }
            for id in bad {
                if uow.invalidate(id)? {
                    count += 1;
                }
            }
        }

        debug!(
            %schedule_id,
            conflicting,
            badly_ordered = count - conflicting,
            passes,
            "sweep finished"
        );
        Ok(count)
    }

    /// Places one floating task; returns whether it became Valid.
    fn place(&self, uow: &mut UnitOfWork<'_, S>, task_id: TaskId, earliest: i64) -> Result<bool> {
        let task = uow.task(task_id)?.clone();
        let mut earliest = earliest;
        let mut predecessor_end = None;

        if let Some(previous_id) = task.previous_task_id {
            let previous = uow.task(previous_id)?;
            match previous.interval() {
                Some((start, end)) if previous.has_status(SchedulingStatus::Valid) => {
                    earliest = earliest.max(start);
                    predecessor_end = Some(end);
                }
                _ => {
                    debug!(%task_id, %previous_id, "predecessor not placed");
                    uow.task_mut(task_id)?.fail();
                    return Ok(false);
                }
            }
        }

        let ranges: Vec<(i64, Option<i64>)> = if task.windows().is_empty() {
            vec![(earliest, None)]
        } else {
            task.windows()
                .iter()
                .map(|w| (w.start_ms.map_or(earliest, |s| s.max(earliest)), w.end_ms))
                .collect()
        };

        let mut slot = None;
        for (from, until) in ranges {
            let busy: Vec<(i64, i64)> = query::find_tasks(
                uow.schedule_tasks(task.schedule_id),
                TimeRange::new(Some(from), until),
                None,
            )?
            .into_iter()
            .filter_map(Task::interval)
            .collect();
            slot = find_first_available_slot(busy, from, until, task.duration_ms);
            if slot.is_some() {
                break;
            }
        }

        let honours_succession = match (slot, predecessor_end) {
            (Some(start), Some(end)) if task.immediately_follows_previous == Some(true) => {
                start == end
            }
            _ => true,
        };

        let target = uow.task_mut(task_id)?;
        match slot {
            Some(start) if honours_succession => {
                debug!(%task_id, start, "task placed");
                target.place(start);
                Ok(true)
            }
            _ => {
                debug!(%task_id, ?slot, "no slot found");
                target.fail();
                Ok(false)
            }
        }
    }

    /// Checks that `task_id` is a floating, not-Done task of `schedule_id`.
    fn unschedulable_member(
        &self,
        uow: &UnitOfWork<'_, S>,
        schedule_id: ScheduleId,
        task_id: TaskId,
    ) -> Result<()> {
        let task = match uow.task(task_id) {
            Ok(task) if task.schedule_id == schedule_id => task,
            Ok(_) => return Err(ScheduleError::invalid(Violation::TaskScheduleInvalid)),
            Err(_) => {
                let stored = self.store.read_task(task_id)?;
                if stored.schedule_id == schedule_id {
                    return Err(uow.stale(schedule_id));
                }
                return Err(ScheduleError::invalid(Violation::TaskScheduleInvalid));
            }
        };
        if !task.is_floating() {
            return Err(ScheduleError::invalid(Violation::TaskTypeInvalid));
        }
        if task.has_status(SchedulingStatus::Done) {
            return Err(ScheduleError::invalid(Violation::TaskStatusInvalid));
        }
        Ok(())
    }
}

/// Detaches a task from its chain: its successor, if any, now follows the
/// task's predecessor.
fn splice_out<S: ScheduleStore + ?Sized>(uow: &mut UnitOfWork<'_, S>, task: &Task) -> Result<()> {
    let Some(id) = task.id else {
        return Ok(());
    };
    let successor = query::find_task_after(uow.schedule_tasks(task.schedule_id), id)?
        .and_then(|t| t.id);
    if let Some(successor) = successor {
        uow.task_mut(successor)?.previous_task_id = task.previous_task_id;
    }
    Ok(())
}

/// Invalidates a Valid floating task placed outside all of its windows.
/// A task without windows is unconstrained.
fn invalidate_unfitting(task: &mut Task) -> Result<()> {
    if task.is_floating()
        && task.has_status(SchedulingStatus::Valid)
        && !task.windows().is_empty()
        && !task.fits_in_windows()?
    {
        task.invalidate();
    }
    Ok(())
}
