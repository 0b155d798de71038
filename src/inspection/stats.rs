//! Process-wide pass/fail counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Inspection counters shared by every pipeline and session of a process
///
/// Increments are commutative, so concurrent runs may share one instance
/// behind an `Arc`.
#[derive(Debug, Default)]
pub struct RunningStatistics {
    total: AtomicU64,
    passed: AtomicU64,
    failed: AtomicU64,
}

impl RunningStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed run
    pub fn record(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
}

impl StatisticsSnapshot {
    /// Failed share of all runs in `[0, 1]`, zero before the first run
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed as f64 / self.total as f64
    }
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total {}, passed {}, failed {}, error rate {:.1}%",
            self.total,
            self.passed,
            self.failed,
            self.error_rate() * 100.0
        )
    }
}
