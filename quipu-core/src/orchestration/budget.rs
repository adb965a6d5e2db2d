//! Slot accounting for the tasks of a single job.

use std::fmt;

/// Counts granted slots against a fixed limit and remembers the peak.
///
/// The budget performs no locking itself; it lives inside the job ledger and
/// is only touched while the ledger lock is held.
pub struct SlotBudget {
    limit: usize,
    in_use: usize,
    peak: usize,
}

impl fmt::Debug for SlotBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotBudget")
            .field("limit", &self.limit)
            .field("in_use", &self.in_use)
            .field("peak", &self.peak)
            .finish()
    }
}

impl SlotBudget {
    /// Budget allowing at most `limit` concurrent slots.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: 0,
            peak: 0,
        }
    }

    /// Takes a slot if one is free.
    pub fn try_acquire(&mut self) -> bool {
        if self.in_use < self.limit {
            self.in_use += 1;
            self.peak = self.peak.max(self.in_use);
            true
        } else {
            false
        }
    }

    /// Returns a slot. Releasing with nothing in use is a no-op.
    pub fn release(&mut self) {
        self.in_use = self.in_use.saturating_sub(1);
    }

    /// Whether another slot could be granted right now.
    pub fn has_budget(&self) -> bool {
        self.in_use < self.limit
    }

    /// `(in_use, limit)`
    pub fn utilization(&self) -> (usize, usize) {
        (self.in_use, self.limit)
    }

    /// Highest number of slots held at once.
    pub fn peak(&self) -> usize {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_limit() {
        let mut budget = SlotBudget::new(2);
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        assert_eq!(budget.utilization(), (2, 2));

        budget.release();
        assert!(budget.has_budget());
        assert!(budget.try_acquire());
        assert_eq!(budget.peak(), 2);
    }

    #[test]
    fn release_saturates() {
        let mut budget = SlotBudget::new(1);
        budget.release();
        assert_eq!(budget.utilization(), (0, 1));
    }
}
