//! Per-symbol failure tracking, problem symbol back-off and format discovery bookkeeping.
//!
//! Failure and problem state share one lock; discovery state has its own so the background
//! discovery tasks never contend with the polling workers.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Failure history for one symbol. Removed entirely on success.
#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    last_failure: Instant,
    consecutive: u32,
    /// Attempt ticket of the most recent failure.
    ticket: u64,
}

#[derive(Debug)]
struct StatusState {
    failures: HashMap<String, FailureRecord>,
    problems: HashSet<String>,
    /// Attempt ticket of the latest success per symbol.
    last_success: HashMap<String, u64>,
    last_reset: Instant,
}

#[derive(Debug, Default)]
struct DiscoveryState {
    in_flight: HashSet<String>,
    /// Symbols whose discovery finished successfully and that the poll loop has not rechecked yet.
    discovered: HashSet<String>,
}

/// Snapshot of the manager's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolStatistics {
    pub problem_symbols_count: usize,
    pub failed_updates_count: usize,
    pub format_discovery_count: usize,
    pub time_since_reset: Duration,
}

/// Decides whether work on a symbol should be skipped right now.
pub struct SymbolManager {
    failure_threshold: u32,
    max_problem_symbols: usize,
    problem_symbol_reset: Duration,
    status: Mutex<StatusState>,
    discovery: Mutex<DiscoveryState>,
    attempts: AtomicU64,
}

impl SymbolManager {
    pub fn new(failure_threshold: u32, max_problem_symbols: usize, problem_symbol_reset_hours: u64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            max_problem_symbols,
            problem_symbol_reset: Duration::from_secs(problem_symbol_reset_hours * 3600),
            status: Mutex::new(StatusState {
                failures: HashMap::new(),
                problems: HashSet::new(),
                last_success: HashMap::new(),
                last_reset: Instant::now(),
            }),
            discovery: Mutex::new(DiscoveryState::default()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Take a ticket for a new analysis attempt. Tickets are strictly increasing.
    pub fn begin_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a failure. Returns the consecutive failure count and whether the symbol
    /// is now in the problem set.
    pub fn track_failure(&self, symbol: &str) -> (u32, bool) {
        let ticket = self.begin_attempt();
        self.track_failure_for(symbol, ticket)
    }

    /// Record a failure observed by the attempt holding `ticket`.
    ///
    /// A failure from an attempt older than the latest recorded success is ignored.
    pub fn track_failure_for(&self, symbol: &str, ticket: u64) -> (u32, bool) {
        let mut status = self.status.lock();

        if status.last_success.get(symbol).is_some_and(|&s| s > ticket) {
            let count = status.failures.get(symbol).map(|r| r.consecutive).unwrap_or(0);
            let is_problem = status.problems.contains(symbol);
            tracing::debug!("Ignoring stale failure for {} (attempt {})", symbol, ticket);
            return (count, is_problem);
        }

        let now = Instant::now();
        let count = {
            let record = status.failures.entry(symbol.to_string()).or_insert(FailureRecord {
                last_failure: now,
                consecutive: 0,
                ticket,
            });
            record.consecutive += 1;
            record.last_failure = now;
            record.ticket = record.ticket.max(ticket);
            record.consecutive
        };

        if count < self.failure_threshold {
            return (count, false);
        }

        if status.problems.contains(symbol) {
            return (count, true);
        }

        if status.problems.len() < self.max_problem_symbols {
            warn!("Adding {} to problem symbols after {} failures", symbol, count);
            status.problems.insert(symbol.to_string());
            (count, true)
        } else {
            warn!(
                "Problem symbols limit reached ({}), not adding {} despite {} failures",
                self.max_problem_symbols, symbol, count
            );
            (count, false)
        }
    }

    /// Record a success. Clears the failure record and problem membership.
    pub fn track_success(&self, symbol: &str) {
        let ticket = self.begin_attempt();
        self.track_success_for(symbol, ticket);
    }

    /// Record a success observed by the attempt holding `ticket`.
    ///
    /// Ignored when a newer attempt has already failed.
    pub fn track_success_for(&self, symbol: &str, ticket: u64) {
        let mut status = self.status.lock();

        if status.failures.get(symbol).is_some_and(|r| r.ticket > ticket) {
            tracing::debug!("Ignoring stale success for {} (attempt {})", symbol, ticket);
            return;
        }

        let latest = status.last_success.entry(symbol.to_string()).or_insert(ticket);
        *latest = (*latest).max(ticket);

        status.failures.remove(symbol);
        if status.problems.remove(symbol) {
            info!("Removed {} from problem symbols after successful operation", symbol);
        }
    }

    /// Whether to skip a symbol. The reason is `problematic`, `recent_failure:<count>`
    /// or empty when not skipped.
    pub fn should_skip(&self, symbol: &str, retry_delay_secs: u64) -> (bool, String) {
        let status = self.status.lock();

        if status.problems.contains(symbol) {
            return (true, "problematic".to_string());
        }

        if let Some(record) = status.failures.get(symbol) {
            if record.last_failure.elapsed() < Duration::from_secs(retry_delay_secs) {
                return (true, format!("recent_failure:{}", record.consecutive));
            }
        }

        (false, String::new())
    }

    pub fn is_problem_symbol(&self, symbol: &str) -> bool {
        self.status.lock().problems.contains(symbol)
    }

    /// Problem symbols, sorted.
    pub fn problem_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.status.lock().problems.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn problem_symbols_count(&self) -> usize {
        self.status.lock().problems.len()
    }

    /// Clear the problem set once the reset interval has elapsed. Returns true when a reset happened.
    pub fn check_reset_problem_symbols(&self) -> bool {
        let mut status = self.status.lock();
        if status.last_reset.elapsed() <= self.problem_symbol_reset {
            return false;
        }

        if !status.problems.is_empty() {
            info!(
                "Resetting {} problem symbols after {} hours",
                status.problems.len(),
                self.problem_symbol_reset.as_secs() / 3600
            );
            status.problems.clear();
        }
        status.last_reset = Instant::now();
        true
    }

    /// Mark a symbol as in discovery. Returns false when it already was.
    pub fn add_format_discovery(&self, symbol: &str) -> bool {
        let mut discovery = self.discovery.lock();
        let added = discovery.in_flight.insert(symbol.to_string());
        if added {
            info!("Symbol {} is in format discovery, will check again later", symbol);
        }
        added
    }

    /// End discovery for a symbol. A successful discovery queues the symbol for a recheck.
    pub fn remove_format_discovery(&self, symbol: &str, success: bool) {
        let mut discovery = self.discovery.lock();
        if !discovery.in_flight.remove(symbol) {
            return;
        }
        if success {
            info!("Format discovery succeeded for {}, removed from tracking list", symbol);
            discovery.discovered.insert(symbol.to_string());
        } else {
            warn!("Format discovery completed for {} but failed", symbol);
        }
    }

    pub fn is_in_format_discovery(&self, symbol: &str) -> bool {
        self.discovery.lock().in_flight.contains(symbol)
    }

    /// Symbols with discovery in flight, sorted.
    pub fn format_discovery_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.discovery.lock().in_flight.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn format_discovery_count(&self) -> usize {
        self.discovery.lock().in_flight.len()
    }

    /// Symbols the poll loop should look at before its regular batches: those whose discovery
    /// just finished plus those still in flight. Finished ones are handed out once.
    pub fn take_recheck_symbols(&self) -> Vec<String> {
        let mut discovery = self.discovery.lock();
        let mut symbols: Vec<String> = discovery.discovered.drain().collect();
        for symbol in &discovery.in_flight {
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }
        symbols.sort();
        symbols
    }

    pub fn statistics(&self) -> SymbolStatistics {
        let (problem_symbols_count, failed_updates_count, time_since_reset) = {
            let status = self.status.lock();
            (status.problems.len(), status.failures.len(), status.last_reset.elapsed())
        };
        SymbolStatistics {
            problem_symbols_count,
            failed_updates_count,
            format_discovery_count: self.format_discovery_count(),
            time_since_reset,
        }
    }
}

impl Default for SymbolManager {
    fn default() -> Self {
        Self::new(3, 50, 6)
    }
}
