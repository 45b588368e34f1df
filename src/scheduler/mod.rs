//! Placement, conflict detection and the task service.
//!
//! The free functions here are pure: they work over any iterator of tasks
//! from one schedule and never touch a store. [`TaskService`] composes them
//! into transactional operations.
//!
//! # Algorithms
//!
//! - **Chain grouping**: tasks linked by predecessor references are folded
//!   into ordered chains in one pass, joining chain heads and tails as links
//!   are discovered.
//! - **First-fit slot search**: a forward sweep over sorted busy intervals,
//!   merging touching blocks, returns the earliest gap that fits.
//! - **Conflict detection**: a sort-and-sweep over placed tasks.
//! - **Bad-order detection**: a Valid successor must start no earlier than
//!   its predecessor ends (exactly then with immediate succession).
//!
//! # References
//!
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems", Ch. 4
//! - Fowler (2002), "Patterns of Enterprise Application Architecture":
//!   Unit of Work, Optimistic Offline Lock

mod conflicts;
mod grouping;
mod ordering;
mod service;
mod slot;

pub use conflicts::{find_conflicting_tasks, ConflictPair};
pub use grouping::build_ordered_task_groups;
pub use ordering::find_badly_ordered_tasks;
pub use service::TaskService;
pub use slot::find_first_available_slot;
