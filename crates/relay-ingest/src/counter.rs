//! Success and failure tallies shared between handlers and the reporter

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::handler::Outcome;

/// Process-wide outcome counts.
///
/// Created once at startup and shared as `Arc<OutcomeCounter>`. Counts only
/// ever grow; they are not persisted.
#[derive(Debug, Default)]
pub struct OutcomeCounter {
    valid: AtomicU64,
    invalid: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub valid: u64,
    pub invalid: u64,
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "valid={} invalid={}", self.valid, self.invalid)
    }
}

impl OutcomeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_valid(&self) {
        self.valid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump exactly one counter for a finished message
    pub fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.increment_valid(),
            Outcome::Failure(_) => self.increment_invalid(),
        }
    }

    /// Read both counters. The two loads are independent, so a snapshot
    /// taken during ingestion may straddle an increment.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }
}
