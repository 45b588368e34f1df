//! In-memory store implementation.
//!
//! [`InMemoryStore`] keeps schedules, tasks and a window ownership index
//! behind one `RwLock`, so a commit is trivially atomic.
//!
//! ## Limitations
//!
//! - **No persistence**: all state is lost when the process exits
//! - **Single-process only**: state is not shared across process boundaries

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::{AggregateSnapshot, ChangeSet, ScheduleStore};
use crate::error::{Result, ScheduleError};
use crate::models::{Schedule, ScheduleId, Task, TaskId, WindowId};
use crate::validation::Violation;

#[derive(Debug, Default)]
struct State {
    schedules: HashMap<ScheduleId, (Schedule, u64)>,
    tasks: HashMap<TaskId, Task>,
    window_owners: HashMap<WindowId, TaskId>,
}

impl State {
    fn index_windows(&mut self, task: &Task) {
        if let Some(task_id) = task.id {
            for id in task.windows().iter().filter_map(|w| w.id) {
                self.window_owners.insert(id, task_id);
            }
        }
    }

    fn remove_task(&mut self, task_id: TaskId) {
        if let Some(task) = self.tasks.remove(&task_id) {
            for id in task.windows().iter().filter_map(|w| w.id) {
                self.window_owners.remove(&id);
            }
        }
    }

    fn bump(&mut self, schedule_id: ScheduleId) {
        if let Some((_, version)) = self.schedules.get_mut(&schedule_id) {
            *version += 1;
        }
    }
}

/// Thread-safe in-memory [`ScheduleStore`].
///
/// ## Example
///
/// ```rust
/// use u_calendar::models::Task;
/// use u_calendar::store::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// let schedule = store.create_schedule("Work").unwrap();
/// let id = store.insert_task(Task::fixed(schedule.id, "Standup", 0, 900_000)).unwrap();
/// assert_eq!(store.task_count().unwrap(), 1);
/// # let _ = id;
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<State>,
    next_schedule_id: AtomicU64,
    next_task_id: AtomicU64,
    next_window_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a lock poison error to an invariant violation.
fn poison_err<T>(_: PoisonError<T>) -> ScheduleError {
    ScheduleError::invariant("store lock poisoned")
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_schedule_id: AtomicU64::new(1),
            next_task_id: AtomicU64::new(1),
            next_window_id: AtomicU64::new(1),
        }
    }

    /// Creates a schedule.
    ///
    /// # Errors
    /// `InvalidInput(ScheduleNameInvalid)` if the name is blank.
    pub fn create_schedule(&self, name: impl Into<String>) -> Result<Schedule> {
        let id = ScheduleId(self.next_schedule_id.fetch_add(1, Ordering::Relaxed));
        let schedule = Schedule::new(id, name);
        let errors = schedule.validate();
        if !errors.is_empty() {
            return Err(ScheduleError::InvalidInput(errors));
        }
        let mut state = self.state.write().map_err(poison_err)?;
        state.schedules.insert(id, (schedule.clone(), 0));
        Ok(schedule)
    }

    /// Stores a task as-is, bypassing the engine's checks.
    ///
    /// Missing task and window ids are assigned. Meant for seeding
    /// fixtures and imports; the schedule's version is bumped.
    ///
    /// # Errors
    /// `NotFound(ScheduleNotFound)` if the task's schedule does not exist.
    pub fn insert_task(&self, mut task: Task) -> Result<TaskId> {
        let id = match task.id {
            Some(id) => id,
            None => self.allocate_task_id(),
        };
        task.id = Some(id);
        let windows = task
            .windows()
            .iter()
            .cloned()
            .map(|mut w| {
                if w.id.is_none() {
                    w.id = Some(self.allocate_window_id());
                }
                w
            })
            .collect();
        task.set_windows(windows);

        let mut state = self.state.write().map_err(poison_err)?;
        if !state.schedules.contains_key(&task.schedule_id) {
            return Err(ScheduleError::NotFound(Violation::ScheduleNotFound));
        }
        state.remove_task(id);
        state.index_windows(&task);
        state.bump(task.schedule_id);
        state.tasks.insert(id, task);
        Ok(id)
    }

    /// Current version of a schedule.
    pub fn version(&self, schedule_id: ScheduleId) -> Result<u64> {
        let state = self.state.read().map_err(poison_err)?;
        state
            .schedules
            .get(&schedule_id)
            .map(|(_, version)| *version)
            .ok_or(ScheduleError::NotFound(Violation::ScheduleNotFound))
    }

    /// Number of stored tasks.
    pub fn task_count(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.tasks.len())
    }

    /// Number of windows owned by some task.
    pub fn window_count(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.window_owners.len())
    }
}

impl ScheduleStore for InMemoryStore {
    fn read_schedule(&self, id: ScheduleId) -> Result<Schedule> {
        let state = self.state.read().map_err(poison_err)?;
        state
            .schedules
            .get(&id)
            .map(|(schedule, _)| schedule.clone())
            .ok_or(ScheduleError::NotFound(Violation::ScheduleNotFound))
    }

    fn read_task(&self, id: TaskId) -> Result<Task> {
        let state = self.state.read().map_err(poison_err)?;
        state
            .tasks
            .get(&id)
            .cloned()
            .ok_or(ScheduleError::NotFound(Violation::TaskNotFound))
    }

    fn snapshot(&self, schedule_id: ScheduleId) -> Result<AggregateSnapshot> {
        let state = self.state.read().map_err(poison_err)?;
        let (schedule, version) = state
            .schedules
            .get(&schedule_id)
            .ok_or(ScheduleError::NotFound(Violation::ScheduleNotFound))?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.schedule_id == schedule_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(AggregateSnapshot {
            schedule: schedule.clone(),
            version: *version,
            tasks,
        })
    }

    fn allocate_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    fn allocate_window_id(&self) -> WindowId {
        WindowId(self.next_window_id.fetch_add(1, Ordering::Relaxed))
    }

    fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;

        for (&schedule_id, &expected) in &changes.expected_versions {
            let actual = state
                .schedules
                .get(&schedule_id)
                .map(|(_, version)| *version)
                .ok_or(ScheduleError::NotFound(Violation::ScheduleNotFound))?;
            if actual != expected {
                tracing::debug!(%schedule_id, expected, actual, "stale aggregate version");
                return Err(ScheduleError::AggregateConflict {
                    schedule_id,
                    expected,
                    actual,
                });
            }
        }
        for task in &changes.upserts {
            if task.id.is_none() {
                return Err(ScheduleError::invariant(format!(
                    "commit of task '{}' without id",
                    task.name
                )));
            }
            if !changes.expected_versions.contains_key(&task.schedule_id) {
                return Err(ScheduleError::invariant(format!(
                    "commit of task {:?} into unlocked schedule {}",
                    task.id, task.schedule_id
                )));
            }
        }

        for task_id in &changes.deleted_tasks {
            state.remove_task(*task_id);
        }
        for window_id in &changes.orphaned_windows {
            state.window_owners.remove(window_id);
        }
        for task in changes.upserts {
            if let Some(id) = task.id {
                state.remove_task(id);
                state.index_windows(&task);
                state.tasks.insert(id, task);
            }
        }
        for &schedule_id in changes.expected_versions.keys() {
            state.bump(schedule_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Window;
    use std::collections::BTreeMap;

    fn expect(schedule_id: ScheduleId, version: u64) -> BTreeMap<ScheduleId, u64> {
        BTreeMap::from([(schedule_id, version)])
    }

    #[test]
    fn test_create_schedule() {
        let store = InMemoryStore::new();
        let work = store.create_schedule("Work").unwrap();
        let home = store.create_schedule("Home").unwrap();
        assert_ne!(work.id, home.id);
        assert_eq!(store.read_schedule(work.id).unwrap().name, "Work");
        assert_eq!(store.version(work.id).unwrap(), 0);

        let err = store.create_schedule(" ").unwrap_err();
        assert_eq!(err.violations(), &[Violation::ScheduleNameInvalid]);
    }

    #[test]
    fn test_insert_task_assigns_ids() {
        let store = InMemoryStore::new();
        let schedule = store.create_schedule("Work").unwrap();
        let mut task = Task::floating(schedule.id, "t", 5);
        task.add_window(Window::bounded(0, 10)).unwrap();

        let id = store.insert_task(task).unwrap();
        let stored = store.read_task(id).unwrap();
        assert_eq!(stored.id, Some(id));
        assert!(stored.windows()[0].id.is_some());
        assert_eq!(store.version(schedule.id).unwrap(), 1);
        assert_eq!(store.window_count().unwrap(), 1);

        let orphan = Task::floating(ScheduleId(77), "t", 5);
        assert!(matches!(
            store.insert_task(orphan),
            Err(ScheduleError::NotFound(Violation::ScheduleNotFound))
        ));
    }

    #[test]
    fn test_snapshot_scoped_to_schedule() {
        let store = InMemoryStore::new();
        let work = store.create_schedule("Work").unwrap();
        let home = store.create_schedule("Home").unwrap();
        store.insert_task(Task::fixed(work.id, "a", 0, 5)).unwrap();
        store.insert_task(Task::fixed(home.id, "b", 0, 5)).unwrap();
        store.insert_task(Task::fixed(work.id, "c", 0, 5)).unwrap();

        let snapshot = store.snapshot(work.id).unwrap();
        assert_eq!(snapshot.version, 2);
        let names: Vec<_> = snapshot.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(store.snapshot(ScheduleId(99)).is_err());
    }

    #[test]
    fn test_commit_bumps_version_without_changes() {
        let store = InMemoryStore::new();
        let schedule = store.create_schedule("Work").unwrap();
        let changes = ChangeSet {
            expected_versions: expect(schedule.id, 0),
            ..ChangeSet::default()
        };
        assert!(changes.is_empty());
        store.commit(changes).unwrap();
        assert_eq!(store.version(schedule.id).unwrap(), 1);
    }

    #[test]
    fn test_commit_conflict_applies_nothing() {
        let store = InMemoryStore::new();
        let schedule = store.create_schedule("Work").unwrap();
        let id = store
            .insert_task(Task::fixed(schedule.id, "a", 0, 5))
            .unwrap();
        let mut renamed = store.read_task(id).unwrap();
        renamed.name = "b".into();

        let err = store
            .commit(ChangeSet {
                expected_versions: expect(schedule.id, 0),
                upserts: vec![renamed],
                ..ChangeSet::default()
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::AggregateConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(store.read_task(id).unwrap().name, "a");
        assert_eq!(store.version(schedule.id).unwrap(), 1);
    }

    #[test]
    fn test_commit_orphans_and_deletes() {
        let store = InMemoryStore::new();
        let schedule = store.create_schedule("Work").unwrap();
        let mut task = Task::floating(schedule.id, "t", 5);
        task.add_window(Window::bounded(0, 10)).unwrap();
        task.add_window(Window::bounded(20, 30)).unwrap();
        let id = store.insert_task(task).unwrap();
        let other = store
            .insert_task(Task::fixed(schedule.id, "f", 0, 5))
            .unwrap();

        let mut stored = store.read_task(id).unwrap();
        let removed = stored.add_window(Window::bounded(5, 25)).unwrap();
        assert_eq!(removed.len(), 1);

        store
            .commit(ChangeSet {
                expected_versions: expect(schedule.id, 2),
                upserts: vec![stored],
                deleted_tasks: vec![other],
                orphaned_windows: removed.iter().filter_map(|w| w.id).collect(),
            })
            .unwrap();
        assert_eq!(store.window_count().unwrap(), 1);
        assert_eq!(store.task_count().unwrap(), 1);
        assert!(store.read_task(other).is_err());
    }

    #[test]
    fn test_commit_rejects_unlocked_upsert() {
        let store = InMemoryStore::new();
        let work = store.create_schedule("Work").unwrap();
        let home = store.create_schedule("Home").unwrap();
        let task = Task::fixed(home.id, "a", 0, 5).with_id(TaskId(50));
        let err = store
            .commit(ChangeSet {
                expected_versions: expect(work.id, 0),
                upserts: vec![task],
                ..ChangeSet::default()
            })
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvariantViolation(_)));
        assert_eq!(store.version(work.id).unwrap(), 0);
    }
}
