//! Cycle counters and log rate limiting for the poll loop.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Lets a log line through at most once per interval and counts what it held back.
#[derive(Debug)]
pub struct LogGate {
    last_log_time: Option<Instant>,
    suppressed_count: u64,
    interval: Duration,
}

impl LogGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_log_time: None,
            suppressed_count: 0,
            interval,
        }
    }

    /// True when the interval has passed since the last allowed log.
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last_log_time {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed_count += 1;
                false
            }
            _ => {
                self.last_log_time = Some(now);
                true
            }
        }
    }

    /// Suppressed count since the last allowed log; resets the counter.
    pub fn take_suppressed(&mut self) -> u64 {
        std::mem::take(&mut self.suppressed_count)
    }
}

/// Counters accumulated between two stats reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Analyses that went to the market data provider.
    pub api_calls: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub pending: u64,
    pub failed: u64,
    /// Full sheet writes avoided by change detection.
    pub saved: u64,
    pub cycles: u64,
}

impl CycleStats {
    /// Share of attempted writes avoided, in percent.
    pub fn efficiency(&self) -> f64 {
        let total = self.succeeded + self.saved;
        if total == 0 {
            return 0.0;
        }
        self.saved as f64 / total as f64 * 100.0
    }
}

/// Shared, lock-guarded [`CycleStats`].
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: Mutex<CycleStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, f: impl FnOnce(&mut CycleStats)) {
        f(&mut self.stats.lock());
    }

    /// Return the counters and start over.
    pub fn take(&self) -> CycleStats {
        std::mem::take(&mut *self.stats.lock())
    }
}
