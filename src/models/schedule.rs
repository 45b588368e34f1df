//! Schedule model.
//!
//! A schedule is a calendar that logically owns every task carrying its
//! id. Tasks are not embedded: a schedule can hold many of them, and they
//! are reached through store queries. The schedule is also the unit of
//! optimistic locking, because overlap and ordering are schedule-wide.

use serde::{Deserialize, Serialize};

use crate::validation::Violation;

entity_id!(
    /// Store-assigned schedule identifier.
    ScheduleId
);

/// A calendar of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Identifier.
    pub id: ScheduleId,
    /// Display name.
    pub name: String,
    /// Creation time (ms since epoch).
    pub created_at_ms: i64,
}

impl Schedule {
    /// Creates a schedule stamped with the current time.
    pub fn new(id: ScheduleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// A valid schedule has a non-blank name.
    pub fn validate(&self) -> Vec<Violation> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(Violation::ScheduleNameInvalid);
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_validate() {
        assert!(Schedule::new(ScheduleId(1), "Work").validate().is_empty());
        assert_eq!(
            Schedule::new(ScheduleId(1), "  ").validate(),
            vec![Violation::ScheduleNameInvalid]
        );
    }

    #[test]
    fn test_schedule_id_display() {
        assert_eq!(ScheduleId(42).to_string(), "42");
        assert_eq!(ScheduleId::from(3), ScheduleId(3));
    }
}
