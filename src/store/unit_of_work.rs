//! Unit of work over one or more schedule aggregates.
//!
//! A unit of work locks schedules optimistically: [`UnitOfWork::lock`]
//! loads a snapshot and remembers its version. Every read and write of
//! the operation then goes through the working copy; nothing reaches the
//! store until [`UnitOfWork::commit`]. Dropping a unit of work without
//! committing discards its changes.

use std::collections::{BTreeMap, BTreeSet};

use super::{ChangeSet, ScheduleStore};
use crate::error::{Result, ScheduleError};
use crate::models::{ScheduleId, Task, TaskId, WindowId};
use crate::validation::{validate_schedule, Violation};

/// Working copy of the aggregates touched by one operation.
pub struct UnitOfWork<'s, S: ScheduleStore + ?Sized> {
    store: &'s S,
    versions: BTreeMap<ScheduleId, u64>,
    tasks: BTreeMap<TaskId, Task>,
    dirty: BTreeSet<TaskId>,
    deleted: BTreeSet<TaskId>,
    orphaned_windows: Vec<WindowId>,
}

impl<'s, S: ScheduleStore + ?Sized> UnitOfWork<'s, S> {
    /// Starts an empty unit of work.
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            versions: BTreeMap::new(),
            tasks: BTreeMap::new(),
            dirty: BTreeSet::new(),
            deleted: BTreeSet::new(),
            orphaned_windows: Vec::new(),
        }
    }

    /// Locks a schedule, loading its tasks into the working copy.
    /// Locking an already locked schedule is a no-op.
    ///
    /// # Errors
    /// `NotFound(ScheduleNotFound)` if the schedule does not exist.
    pub fn lock(&mut self, schedule_id: ScheduleId) -> Result<()> {
        if self.versions.contains_key(&schedule_id) {
            return Ok(());
        }
        let snapshot = self.store.snapshot(schedule_id)?;
        self.versions.insert(schedule_id, snapshot.version);
        for task in snapshot.tasks {
            if let Some(id) = task.id {
                self.tasks.entry(id).or_insert(task);
            }
        }
        Ok(())
    }

    /// Whether `schedule_id` is locked by this unit of work.
    pub fn is_locked(&self, schedule_id: ScheduleId) -> bool {
        self.versions.contains_key(&schedule_id)
    }

    /// Reads a task from the store and locks its schedule.
    ///
    /// Returns the working copy, which reflects the locked snapshot.
    ///
    /// # Errors
    /// - `NotFound(TaskNotFound)` if the task does not exist or was deleted
    ///   by this unit of work.
    /// - `AggregateConflict` if the task joined an already locked schedule
    ///   after it was locked.
    pub fn lock_task(&mut self, task_id: TaskId) -> Result<&Task> {
        if self.deleted.contains(&task_id) {
            return Err(ScheduleError::NotFound(Violation::TaskNotFound));
        }
        if !self.tasks.contains_key(&task_id) {
            let schedule_id = self.store.read_task(task_id)?.schedule_id;
            if self.is_locked(schedule_id) {
                return Err(self.stale(schedule_id));
            }
            self.lock(schedule_id)?;
        }
        self.task(task_id)
    }

    /// Conflict error for a locked schedule whose snapshot is out of date.
    pub(crate) fn stale(&self, schedule_id: ScheduleId) -> ScheduleError {
        let expected = self.versions.get(&schedule_id).copied().unwrap_or_default();
        match self.store.snapshot(schedule_id) {
            Ok(snapshot) => ScheduleError::AggregateConflict {
                schedule_id,
                expected,
                actual: snapshot.version,
            },
            Err(err) => err,
        }
    }

    /// A task of a locked schedule.
    ///
    /// # Errors
    /// `NotFound(TaskNotFound)` if the task is not in any locked schedule.
    pub fn task(&self, task_id: TaskId) -> Result<&Task> {
        self.tasks
            .get(&task_id)
            .ok_or(ScheduleError::NotFound(Violation::TaskNotFound))
    }

    /// Mutable access to a task; the task is written back on commit.
    pub fn task_mut(&mut self, task_id: TaskId) -> Result<&mut Task> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(ScheduleError::NotFound(Violation::TaskNotFound))?;
        self.dirty.insert(task_id);
        Ok(task)
    }

    /// Tasks currently belonging to `schedule_id`, by id.
    pub fn schedule_tasks(&self, schedule_id: ScheduleId) -> impl Iterator<Item = &Task> + '_ {
        self.tasks
            .values()
            .filter(move |t| t.schedule_id == schedule_id)
    }

    /// Number of tasks currently belonging to `schedule_id`.
    pub fn schedule_task_count(&self, schedule_id: ScheduleId) -> usize {
        self.schedule_tasks(schedule_id).count()
    }

    /// Moves a Valid task to Invalid; returns whether anything changed.
    pub fn invalidate(&mut self, task_id: TaskId) -> Result<bool> {
        let changed = self
            .tasks
            .get_mut(&task_id)
            .ok_or(ScheduleError::NotFound(Violation::TaskNotFound))?
            .invalidate();
        if changed {
            self.dirty.insert(task_id);
        }
        Ok(changed)
    }

    /// Adds a new task, assigning it an id.
    ///
    /// # Errors
    /// `InvariantViolation` if the task's schedule is not locked.
    pub fn insert(&mut self, mut task: Task) -> Result<TaskId> {
        if !self.is_locked(task.schedule_id) {
            return Err(ScheduleError::invariant(format!(
                "insert into unlocked schedule {}",
                task.schedule_id
            )));
        }
        let id = self.store.allocate_task_id();
        task.id = Some(id);
        self.tasks.insert(id, task);
        self.dirty.insert(id);
        Ok(id)
    }

    /// Deletes a task together with its windows.
    pub fn delete(&mut self, task_id: TaskId) -> Result<Task> {
        let task = self
            .tasks
            .remove(&task_id)
            .ok_or(ScheduleError::NotFound(Violation::TaskNotFound))?;
        self.dirty.remove(&task_id);
        self.deleted.insert(task_id);
        Ok(task)
    }

    /// Records windows that no task owns any more.
    pub fn orphan_windows(&mut self, windows: impl IntoIterator<Item = Option<WindowId>>) {
        self.orphaned_windows.extend(windows.into_iter().flatten());
    }

    /// Reserves a fresh window id.
    pub fn allocate_window_id(&self) -> WindowId {
        self.store.allocate_window_id()
    }

    /// Validates every locked aggregate and commits the changes.
    ///
    /// # Errors
    /// - `InvariantViolation` if a locked aggregate is inconsistent; nothing
    ///   is written.
    /// - `AggregateConflict` if a locked schedule changed since it was locked.
    pub fn commit(self) -> Result<()> {
        for &schedule_id in self.versions.keys() {
            let tasks: Vec<Task> = self.schedule_tasks(schedule_id).cloned().collect();
            if let Err(errors) = validate_schedule(&tasks) {
                let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
                return Err(ScheduleError::invariant(format!(
                    "schedule {schedule_id} inconsistent before commit: {}",
                    messages.join("; ")
                )));
            }
        }

        let Self {
            store,
            versions,
            mut tasks,
            dirty,
            deleted,
            orphaned_windows,
        } = self;

        let changes = ChangeSet {
            expected_versions: versions,
            upserts: dirty.iter().filter_map(|id| tasks.remove(id)).collect(),
            deleted_tasks: deleted.into_iter().collect(),
            orphaned_windows,
        };
        tracing::debug!(
            schedules = changes.expected_versions.len(),
            upserts = changes.upserts.len(),
            deleted = changes.deleted_tasks.len(),
            orphaned_windows = changes.orphaned_windows.len(),
            "committing unit of work"
        );
        store.commit(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SchedulingStatus, Window};
    use crate::store::InMemoryStore;

    fn seeded() -> (InMemoryStore, ScheduleId, TaskId) {
        let store = InMemoryStore::new();
        let schedule = store.create_schedule("Work").unwrap();
        let task = store
            .insert_task(Task::floating(schedule.id, "a", 10).placed_at(0))
            .unwrap();
        (store, schedule.id, task)
    }

    #[test]
    fn test_reads_come_from_working_copy() {
        let (store, schedule_id, task_id) = seeded();
        let mut uow = UnitOfWork::new(&store);
        uow.lock(schedule_id).unwrap();
        uow.task_mut(task_id).unwrap().name = "renamed".into();

        assert_eq!(uow.task(task_id).unwrap().name, "renamed");
        assert_eq!(store.read_task(task_id).unwrap().name, "a");
        uow.commit().unwrap();
        assert_eq!(store.read_task(task_id).unwrap().name, "renamed");
    }

    #[test]
    fn test_drop_discards_changes() {
        let (store, schedule_id, task_id) = seeded();
        {
            let mut uow = UnitOfWork::new(&store);
            uow.lock(schedule_id).unwrap();
            uow.delete(task_id).unwrap();
        }
        assert!(store.read_task(task_id).is_ok());
    }

    #[test]
    fn test_lock_task_locks_its_schedule() {
        let (store, schedule_id, task_id) = seeded();
        let mut uow = UnitOfWork::new(&store);
        assert_eq!(uow.lock_task(task_id).unwrap().name, "a");
        assert!(uow.is_locked(schedule_id));
        assert!(matches!(
            uow.lock_task(TaskId(999)),
            Err(ScheduleError::NotFound(Violation::TaskNotFound))
        ));
    }

    #[test]
    fn test_lock_task_sees_stale_snapshot() {
        let (store, schedule_id, _) = seeded();
        let mut uow = UnitOfWork::new(&store);
        uow.lock(schedule_id).unwrap();
        let late = store
            .insert_task(Task::floating(schedule_id, "late", 5))
            .unwrap();

        let err = uow.lock_task(late).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            ScheduleError::AggregateConflict { expected, actual, .. } if actual > expected
        ));
    }

    #[test]
    fn test_lock_task_after_delete() {
        let (store, _, task_id) = seeded();
        let mut uow = UnitOfWork::new(&store);
        uow.lock_task(task_id).unwrap();
        uow.delete(task_id).unwrap();
        assert!(matches!(
            uow.lock_task(task_id),
            Err(ScheduleError::NotFound(Violation::TaskNotFound))
        ));
    }

    #[test]
    fn test_stale_version_conflicts() {
        let (store, schedule_id, task_id) = seeded();
        let mut first = UnitOfWork::new(&store);
        first.lock(schedule_id).unwrap();
        let mut second = UnitOfWork::new(&store);
        second.lock(schedule_id).unwrap();

        first.invalidate(task_id).unwrap();
        first.commit().unwrap();

        // Even an unchanged aggregate commit fails once the version moved.
        let err = second.commit().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            store.read_task(task_id).unwrap().scheduling_status,
            Some(SchedulingStatus::Invalid)
        );
    }

    #[test]
    fn test_commit_rejects_inconsistent_aggregate() {
        let (store, schedule_id, task_id) = seeded();
        let mut uow = UnitOfWork::new(&store);
        uow.lock(schedule_id).unwrap();
        uow.task_mut(task_id).unwrap().previous_task_id = Some(TaskId(404));
        assert!(matches!(
            uow.commit(),
            Err(ScheduleError::InvariantViolation(_))
        ));
        assert_eq!(store.read_task(task_id).unwrap().previous_task_id, None);
    }

    #[test]
    fn test_insert_requires_lock() {
        let (store, schedule_id, _) = seeded();
        let mut uow = UnitOfWork::new(&store);
        let task = Task::floating(schedule_id, "b", 5);
        assert!(uow.insert(task.clone()).is_err());

        uow.lock(schedule_id).unwrap();
        let id = uow.insert(task).unwrap();
        uow.commit().unwrap();
        assert_eq!(store.read_task(id).unwrap().name, "b");
    }

    #[test]
    fn test_delete_with_orphans() {
        let (store, schedule_id, _) = seeded();
        let mut task = Task::floating(schedule_id, "windowed", 5);
        task.add_window(Window::bounded(0, 100)).unwrap();
        let task_id = store.insert_task(task).unwrap();
        let window_id = store.read_task(task_id).unwrap().windows()[0].id;
        assert!(window_id.is_some());

        let mut uow = UnitOfWork::new(&store);
        uow.lock(schedule_id).unwrap();
        uow.delete(task_id).unwrap();
        uow.commit().unwrap();
        assert!(store.read_task(task_id).is_err());
        assert_eq!(store.window_count().unwrap(), 0);
    }
}
