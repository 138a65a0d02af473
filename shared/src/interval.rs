use serde::{Deserialize, Serialize};

use crate::errors::{IntervalError, IntervalResult};

/// Nonce range `[lower, upper)` handed to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// Inclusive
    pub lower: u64,
    /// Exclusive
    pub upper: u64,
}

impl Interval {
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// Number of nonces covered, zero for a degenerate range.
    pub fn len(&self) -> u64 {
        self.upper.saturating_sub(self.lower)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Divides `[0, upper_bound)` into `num_intervals` contiguous pieces.
///
/// Every piece is `upper_bound / num_intervals` wide except the last one,
/// whose upper bound is pinned to `upper_bound` so the integer division
/// remainder is never left unassigned. Pieces are returned in ascending order;
/// callers assign them to workers by position.
pub fn generate_intervals(upper_bound: u64, num_intervals: usize) -> IntervalResult<Vec<Interval>> {
    if num_intervals == 0 {
        return Err(IntervalError::InvalidCount(num_intervals));
    }

    let count = num_intervals as u64;
    let size = upper_bound / count;

    let mut intervals: Vec<Interval> =
        (0..count).map(|i| Interval::new(i * size, (i + 1) * size)).collect();

    // clamp the last piece onto the true bound
    if let Some(last) = intervals.last_mut() {
        last.upper = upper_bound;
    }

    Ok(intervals)
}
