//! Pluggable storage for schedules and tasks.
//!
//! The [`ScheduleStore`] trait is the persistence seam of the engine. A
//! schedule and every task carrying its id form one aggregate, guarded by
//! a per-schedule version counter.
//!
//! ## Design Principles
//!
//! - **Optimistic locking**: a [`UnitOfWork`] reads an aggregate snapshot
//!   together with its version; [`ScheduleStore::commit`] applies the
//!   accumulated [`ChangeSet`] only if every version is still current.
//! - **Atomic commits**: all changes of one operation land together or
//!   not at all.
//! - **Testability**: [`InMemoryStore`] honours the full contract.

mod memory;
pub mod query;
mod unit_of_work;

use std::collections::BTreeMap;

pub use memory::InMemoryStore;
pub use query::TimeRange;
pub use unit_of_work::UnitOfWork;

use crate::error::Result;
use crate::models::{Schedule, ScheduleId, Task, TaskId, WindowId};

/// Consistent view of one schedule aggregate.
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    /// The schedule itself.
    pub schedule: Schedule,
    /// Version token observed with this snapshot.
    pub version: u64,
    /// Every task of the schedule.
    pub tasks: Vec<Task>,
}

/// Changes accumulated by a unit of work, applied atomically on commit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Version each locked schedule must still have. Every listed
    /// schedule's version is bumped on success, even with no other change.
    pub expected_versions: BTreeMap<ScheduleId, u64>,
    /// Tasks to insert or replace (with their windows).
    pub upserts: Vec<Task>,
    /// Tasks to delete, windows included.
    pub deleted_tasks: Vec<TaskId>,
    /// Windows no longer owned by any task.
    pub orphaned_windows: Vec<WindowId>,
}

impl ChangeSet {
    /// Whether nothing but the version bump would be applied.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deleted_tasks.is_empty() && self.orphaned_windows.is_empty()
    }
}

/// Storage abstraction for schedule aggregates.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; a single store is shared by every
/// caller of a [`TaskService`](crate::scheduler::TaskService).
pub trait ScheduleStore: Send + Sync {
    /// Gets a schedule by ID.
    ///
    /// # Errors
    /// `NotFound(ScheduleNotFound)` if it does not exist.
    fn read_schedule(&self, id: ScheduleId) -> Result<Schedule>;

    /// Gets a task by ID.
    ///
    /// # Errors
    /// `NotFound(TaskNotFound)` if it does not exist.
    fn read_task(&self, id: TaskId) -> Result<Task>;

    /// Loads a schedule, its version and all of its tasks.
    ///
    /// # Errors
    /// `NotFound(ScheduleNotFound)` if the schedule does not exist.
    fn snapshot(&self, schedule_id: ScheduleId) -> Result<AggregateSnapshot>;

    /// Reserves a fresh task ID.
    fn allocate_task_id(&self) -> TaskId;

    /// Reserves a fresh window ID.
    fn allocate_window_id(&self) -> WindowId;

    /// Applies a change set atomically.
    ///
    /// # Errors
    /// `AggregateConflict` if any expected version is stale; nothing is
    /// applied in that case.
    fn commit(&self, changes: ChangeSet) -> Result<()>;
}
