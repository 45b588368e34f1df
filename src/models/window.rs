//! Window model.
//!
//! A window is a period of opportunity for doing a floating task. Either
//! bound may be open: a missing start extends to negative infinity, a
//! missing end to positive infinity. A window open on both sides is no
//! constraint at all and is rejected.

use serde::{Deserialize, Serialize};

use crate::error::{ensure, Result};
use crate::validation::Violation;

entity_id!(
    /// Store-assigned window identifier.
    WindowId
);

/// A permitted time range `[start_ms, end_ms)` for placing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Identifier; `None` until persisted.
    pub id: Option<WindowId>,
    /// Inclusive start (ms). `None` = open to −∞.
    pub start_ms: Option<i64>,
    /// Exclusive end (ms). `None` = open to +∞.
    pub end_ms: Option<i64>,
}

impl Window {
    /// Creates a window with the given (possibly open) bounds.
    pub fn new(start_ms: Option<i64>, end_ms: Option<i64>) -> Self {
        Self {
            id: None,
            start_ms,
            end_ms,
        }
    }

    /// Creates a window closed on both sides.
    pub fn bounded(start_ms: i64, end_ms: i64) -> Self {
        Self::new(Some(start_ms), Some(end_ms))
    }

    /// Creates a window open to +∞.
    pub fn starting_at(start_ms: i64) -> Self {
        Self::new(Some(start_ms), None)
    }

    /// Creates a window open to −∞.
    pub fn ending_at(end_ms: i64) -> Self {
        Self::new(None, Some(end_ms))
    }

    /// Sets the identifier.
    pub fn with_id(mut self, id: WindowId) -> Self {
        self.id = Some(id);
        self
    }

    /// Whether the period `[start_ms, end_ms)` lies entirely inside this window.
    ///
    /// Fails with an invariant violation unless `start_ms < end_ms`.
    pub fn fits(&self, start_ms: i64, end_ms: i64) -> Result<bool> {
        ensure(start_ms < end_ms, || {
            format!("window fit queried with empty period [{start_ms}, {end_ms})")
        })?;
        let after_start = self.start_ms.map_or(true, |s| s <= start_ms);
        let before_end = self.end_ms.map_or(true, |e| e >= end_ms);
        Ok(after_start && before_end)
    }

    /// Checks the window's own invariants.
    ///
    /// At most one bound may be open; if both are set, start < end.
    pub fn validate(&self) -> Vec<Violation> {
        let mut errors = Vec::new();
        match (self.start_ms, self.end_ms) {
            (None, None) => errors.push(Violation::WindowStartEndInvalid),
            (Some(start), Some(end)) if start >= end => {
                errors.push(Violation::WindowStartEndInvalid)
            }
            _ => {}
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScheduleError;

    #[test]
    fn test_fits_closed_window() {
        let w = Window::bounded(100, 200);
        assert!(w.fits(100, 200).unwrap());
        assert!(w.fits(150, 160).unwrap());
        assert!(!w.fits(50, 150).unwrap());
        assert!(!w.fits(150, 250).unwrap());
    }

    #[test]
    fn test_fits_open_windows() {
        assert!(Window::starting_at(0).fits(1_000_000, 2_000_000).unwrap());
        assert!(!Window::starting_at(0).fits(-10, 5).unwrap());
        assert!(Window::ending_at(0).fits(-100, 0).unwrap());
        assert!(!Window::ending_at(0).fits(-100, 1).unwrap());
    }

    #[test]
    fn test_fits_requires_nonempty_period() {
        let w = Window::bounded(0, 10);
        assert!(matches!(
            w.fits(5, 5),
            Err(ScheduleError::InvariantViolation(_))
        ));
        assert!(w.fits(6, 5).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Window::bounded(0, 1).validate().is_empty());
        assert!(Window::starting_at(0).validate().is_empty());
        assert!(Window::ending_at(0).validate().is_empty());
        assert_eq!(
            Window::new(None, None).validate(),
            vec![Violation::WindowStartEndInvalid]
        );
        assert_eq!(
            Window::bounded(10, 10).validate(),
            vec![Violation::WindowStartEndInvalid]
        );
        assert_eq!(
            Window::bounded(10, 5).validate(),
            vec![Violation::WindowStartEndInvalid]
        );
    }
}
