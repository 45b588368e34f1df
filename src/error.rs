//! Error types for engine operations.
//!
//! Three families of failure are distinguished:
//!
//! - **Caller errors** ([`ScheduleError::InvalidInput`], [`ScheduleError::NotFound`]):
//!   carry [`Violation`] codes and are safe to show to a client.
//! - **Bugs** ([`ScheduleError::InvariantViolation`]): an internal consistency
//!   assumption was broken. Logged with full context where raised; clients
//!   only ever see an opaque message.
//! - **Concurrency** ([`ScheduleError::AggregateConflict`]): the optimistic
//!   lock token of a schedule was stale at commit. Retry the whole operation.

use thiserror::Error;

use crate::models::ScheduleId;
use crate::validation::Violation;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Message shown to clients for failures that are not their fault.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "An internal check failed. This indicates a possible bug or use of the application in an unexpected way.";

/// Message shown to clients when a concurrent update won the race.
pub const CONFLICT_MESSAGE: &str =
    "The update you requested failed since it conflicted with another update being done at the same time. Try again.";

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Request data is malformed or breaks an operation contract.
    #[error("invalid input: {}", join_codes(.0))]
    InvalidInput(Vec<Violation>),

    /// A referenced entity does not exist.
    #[error("not found: {0:?}")]
    NotFound(Violation),

    /// An internal consistency assumption was broken.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The schedule aggregate changed between lock and commit.
    #[error("schedule {schedule_id} modified concurrently (expected version {expected}, found {actual})")]
    AggregateConflict {
        /// Schedule whose version token was stale.
        schedule_id: ScheduleId,
        /// Version observed when the schedule was locked.
        expected: u64,
        /// Version found at commit time.
        actual: u64,
    },

    /// Engine configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

fn join_codes(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{v:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ScheduleError {
    /// Single-violation input error.
    pub fn invalid(violation: Violation) -> Self {
        Self::InvalidInput(vec![violation])
    }

    /// Raises an invariant violation, logging it with its context.
    pub fn invariant(context: impl Into<String>) -> Self {
        let context = context.into();
        tracing::error!(%context, "internal invariant violated");
        Self::InvariantViolation(context)
    }

    /// Violation codes carried by caller errors (empty for other kinds).
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::InvalidInput(violations) => violations,
            Self::NotFound(violation) => std::slice::from_ref(violation),
            _ => &[],
        }
    }

    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AggregateConflict { .. })
    }

    /// Whether the failure was caused by the caller's request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NotFound(_))
    }

    /// Message safe to return to a client: one line per violation for
    /// caller errors, an opaque text otherwise.
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidInput(violations) if violations.is_empty() => {
                Violation::GenericMessage.message().to_string()
            }
            Self::InvalidInput(violations) => violations
                .iter()
                .map(|v| v.message())
                .collect::<Vec<_>>()
                .join("\n"),
            Self::NotFound(violation) => violation.message().to_string(),
            Self::AggregateConflict { .. } => CONFLICT_MESSAGE.to_string(),
            Self::InvariantViolation(_) | Self::Config(_) => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Returns an invariant violation unless `condition` holds.
pub(crate) fn ensure(condition: bool, context: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(ScheduleError::invariant(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScheduleError::InvalidInput(vec![
            Violation::TaskDurationInvalid,
            Violation::TaskStartInvalid,
        ]);
        assert_eq!(
            err.to_string(),
            "invalid input: TaskDurationInvalid, TaskStartInvalid"
        );

        let err = ScheduleError::AggregateConflict {
            schedule_id: ScheduleId(7),
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "schedule 7 modified concurrently (expected version 1, found 2)"
        );
    }

    #[test]
    fn test_client_message_hides_internals() {
        let err = ScheduleError::invariant("window ordering undefined for ids None/None");
        assert_eq!(err.client_message(), INTERNAL_ERROR_MESSAGE);
        assert!(!err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_client_message_lists_violations() {
        let err = ScheduleError::InvalidInput(vec![
            Violation::TaskTypeInvalid,
            Violation::WindowStartEndInvalid,
        ]);
        let message = err.client_message();
        assert_eq!(message.lines().count(), 2);
        assert!(message.contains(Violation::WindowStartEndInvalid.message()));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_empty_invalid_input_falls_back_to_generic() {
        let err = ScheduleError::InvalidInput(Vec::new());
        assert_eq!(err.client_message(), Violation::GenericMessage.message());
    }

    #[test]
    fn test_not_found_violations() {
        let err = ScheduleError::NotFound(Violation::TaskNotFound);
        assert_eq!(err.violations(), &[Violation::TaskNotFound]);
        assert!(err.is_client_error());
    }

    #[test]
    fn test_conflict_is_retryable() {
        let err = ScheduleError::AggregateConflict {
            schedule_id: ScheduleId(1),
            expected: 3,
            actual: 4,
        };
        assert!(err.is_retryable());
        assert_eq!(err.client_message(), CONFLICT_MESSAGE);
    }

    #[test]
    fn test_ensure() {
        assert!(ensure(true, || "unused".into()).is_ok());
        let err = ensure(false, || "broken".into()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvariantViolation(ref m) if m == "broken"));
    }
}
