//! Calendar domain models.
//!
//! Provides the data types the engine reasons about: schedules, tasks and
//! the windows during which floating tasks may be placed.
//!
//! # Time Representation
//! All times are milliseconds since the Unix epoch (`i64`). Intervals are
//! half-open: a task occupies `[start_ms, start_ms + duration_ms)`.
//!
//! # Identity
//! Identifiers are assigned by the store. Freshly built entities carry
//! `None` until they are persisted.

/// Defines a store-assigned numeric identifier.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

mod schedule;
mod task;
mod window;

pub use schedule::{Schedule, ScheduleId};
pub use task::{intervals_overlap, SchedulingStatus, Task, TaskId, TaskType};
pub use window::{Window, WindowId};
