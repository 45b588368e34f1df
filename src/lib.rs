//! Calendar scheduling engine for fixed and floating tasks.
//!
//! Fixed tasks are appointments at a set time. Floating tasks have a
//! duration, optional windows during which they may happen and an optional
//! predecessor; the engine finds them a start.
//!
//! # Modules
//!
//! - **`models`**: Domain types: `Schedule`, `Task`, `Window`, typed ids
//! - **`validation`**: Task checks against their schedule, aggregate
//!   consistency (predecessor links, chain cycles, window consolidation)
//! - **`scheduler`**: Chain grouping, first-fit placement, conflict and
//!   bad-order detection, and the transactional `TaskService`
//! - **`store`**: Storage trait, range/name queries, unit of work with
//!   optimistic locking, in-memory store
//! - **`config`**: Engine tunables loaded from TOML
//! - **`error`**: Error type and client-facing messages
//!
//! # Architecture
//!
//! A schedule and all of its tasks form one aggregate guarded by a version
//! token. Every `TaskService` operation locks the aggregates it touches,
//! works on a private copy, re-runs the invalidation sweep and commits;
//! a stale token retries the operation.
//!
//! # References
//!
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems"
//! - Fowler (2002), "Patterns of Enterprise Application Architecture"

pub mod config;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod validation;

pub use config::EngineConfig;
pub use error::{Result, ScheduleError};
pub use scheduler::TaskService;
pub use store::{InMemoryStore, ScheduleStore};
