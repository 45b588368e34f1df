//! First-fit slot search.
//!
//! # Algorithm
//! Busy intervals arrive sorted by start. A single forward sweep merges
//! touching or overlapping intervals into one busy block and checks each
//! gap: before the first block, between blocks, and after the last block
//! (bounded by `end_ms` if set). The first gap of at least `duration_ms`
//! wins. O(n) over the busy intervals.
//!
//! # Reference
//! Pinedo (2016), "Scheduling", Ch. 4: earliest-start list scheduling

/// Finds the earliest start in `[start_ms, end_ms)` where `duration_ms`
/// fits between the `busy` intervals.
///
/// `busy` must be the `[start, end)` intervals intersecting the range,
/// sorted by start. Returns `None` if the range is shorter than the
/// duration or no gap is large enough.
///
/// # Example
///
/// ```
/// use u_calendar::scheduler::find_first_available_slot;
///
/// let busy = [(0, 1), (2, 3), (3, 4)];
/// assert_eq!(find_first_available_slot(busy, 0, None, 1), Some(1));
/// assert_eq!(find_first_available_slot(busy, 0, None, 2), Some(4));
/// assert_eq!(find_first_available_slot(busy, 0, Some(4), 3), None);
/// ```
pub fn find_first_available_slot(
    busy: impl IntoIterator<Item = (i64, i64)>,
    start_ms: i64,
    end_ms: Option<i64>,
    duration_ms: i64,
) -> Option<i64> {
    first_gap(busy.into_iter(), start_ms, end_ms, duration_ms)
        .filter(|start| start.checked_add(duration_ms).is_some())
}

fn first_gap(
    mut busy: impl Iterator<Item = (i64, i64)>,
    start_ms: i64,
    end_ms: Option<i64>,
    duration_ms: i64,
) -> Option<i64> {
    if end_ms.is_some_and(|end| end.saturating_sub(start_ms) < duration_ms) {
        return None;
    }

    let Some((first_start, first_end)) = busy.next() else {
        return Some(start_ms);
    };
    if first_start.saturating_sub(start_ms) >= duration_ms {
        return Some(start_ms);
    }

    let mut block_end = first_end;
    for (busy_start, busy_end) in busy {
        if busy_start <= block_end {
            block_end = block_end.max(busy_end);
        } else {
            if busy_start.saturating_sub(block_end) >= duration_ms {
                return Some(block_end);
            }
            block_end = busy_end;
        }
    }

    match end_ms {
        Some(end) if end.saturating_sub(block_end) < duration_ms => None,
        _ => Some(block_end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUSY: [(i64, i64); 3] = [(0, 1), (2, 3), (3, 4)];

    /// Busy intervals as a range query starting at `start` would return them.
    fn busy_from(start: i64) -> Vec<(i64, i64)> {
        BUSY.iter().copied().filter(|&(_, end)| end > start).collect()
    }

    #[test]
    fn test_gap_between_tasks() {
        assert_eq!(find_first_available_slot(busy_from(0), 0, None, 1), Some(1));
    }

    #[test]
    fn test_after_last_task() {
        assert_eq!(find_first_available_slot(busy_from(3), 3, None, 1), Some(4));
    }

    #[test]
    fn test_touching_tasks_merge() {
        assert_eq!(find_first_available_slot(busy_from(0), 0, None, 2), Some(4));
    }

    #[test]
    fn test_bounded_range_too_busy() {
        assert_eq!(find_first_available_slot(busy_from(0), 0, Some(4), 3), None);
    }

    #[test]
    fn test_before_first_task() {
        assert_eq!(
            find_first_available_slot(busy_from(-10), -10, None, 1),
            Some(-10)
        );
    }

    #[test]
    fn test_empty_range() {
        assert_eq!(find_first_available_slot(Vec::new(), 5, None, 10), Some(5));
        assert_eq!(find_first_available_slot(Vec::new(), 5, Some(14), 10), None);
        assert_eq!(find_first_available_slot(Vec::new(), 5, Some(15), 10), Some(5));
    }

    #[test]
    fn test_busy_task_started_before_range() {
        // [-5, 3) began before the range but still blocks it.
        assert_eq!(
            find_first_available_slot(vec![(-5, 3)], 0, Some(10), 5),
            Some(3)
        );
        assert_eq!(find_first_available_slot(vec![(-5, 3)], 0, Some(7), 5), None);
    }

    #[test]
    fn test_extreme_bounds() {
        assert_eq!(
            find_first_available_slot(Vec::new(), i64::MIN, Some(i64::MAX), 10),
            Some(i64::MIN)
        );
        // No room left before the end of time.
        assert_eq!(
            find_first_available_slot(vec![(0, i64::MAX - 5)], 0, None, 10),
            None
        );
        assert_eq!(
            find_first_available_slot(vec![(0, i64::MAX - 10)], 0, None, 10),
            Some(i64::MAX - 10)
        );
    }

    #[test]
    fn test_contained_task_does_not_shrink_block() {
        assert_eq!(
            find_first_available_slot(vec![(0, 10), (2, 4), (12, 20)], 0, None, 2),
            Some(10)
        );
    }
}
