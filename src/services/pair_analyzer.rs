//! Per-symbol analysis with retry, result caching and sheet-update change detection.
//!
//! Cached results and the "last written to the sheet" bookkeeping are kept apart: a fresh
//! analysis replaces the cached result, while only [`PairAnalyzer::record_update`] moves the
//! update timestamp and the last written action. Both live under one lock.

use super::market_data::{AnalysisProvider, Lookup};
use super::retry::RetryPolicy;
use super::symbol_manager::SymbolManager;
use crate::error::AppError;
use crate::types::{Action, AnalysisResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What happened to a single analysis request.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Analyzed(AnalysisResult),
    /// Not attempted; carries the skip reason from the symbol manager.
    Skipped(String),
    /// Format discovery is still running.
    Pending,
    Failed,
}

impl AnalysisOutcome {
    pub fn into_result(self) -> Option<AnalysisResult> {
        match self {
            AnalysisOutcome::Analyzed(result) => Some(result),
            _ => None,
        }
    }
}

/// Number of cached results per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub buy: usize,
    pub sell: usize,
    pub wait: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: AnalysisResult,
    cached_at: Instant,
    ticket: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct UpdateRecord {
    last_update: Option<Instant>,
    last_action: Option<Action>,
}

#[derive(Debug, Default)]
struct CacheState {
    results: HashMap<String, CacheEntry>,
    updates: HashMap<String, UpdateRecord>,
}

pub struct PairAnalyzer {
    provider: Arc<dyn AnalysisProvider>,
    symbol_manager: Arc<SymbolManager>,
    retry: RetryPolicy,
    retry_delay_secs: u64,
    cache: Mutex<CacheState>,
}

impl PairAnalyzer {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        symbol_manager: Arc<SymbolManager>,
        retry: RetryPolicy,
        retry_delay_secs: u64,
    ) -> Self {
        Self {
            provider,
            symbol_manager,
            retry,
            retry_delay_secs,
            cache: Mutex::new(CacheState::default()),
        }
    }

    /// Analyze a symbol, returning the result only on success.
    pub async fn analyze(&self, symbol: &str, original_label: Option<&str>) -> Option<AnalysisResult> {
        self.analyze_detailed(symbol, original_label).await.into_result()
    }

    pub async fn analyze_detailed(&self, symbol: &str, original_label: Option<&str>) -> AnalysisOutcome {
        let (skip, reason) = self.symbol_manager.should_skip(symbol, self.retry_delay_secs);
        if skip {
            debug!("Skipping {}: {}", symbol, reason);
            return AnalysisOutcome::Skipped(reason);
        }

        if self.symbol_manager.is_in_format_discovery(symbol) {
            debug!("{} is in format discovery, waiting", symbol);
            return AnalysisOutcome::Pending;
        }

        let ticket = self.symbol_manager.begin_attempt();
        let label = format!("Analysis of {}", symbol);
        let outcome = self
            .retry
            .run(&label, || self.provider.lookup(symbol), AppError::is_transient)
            .await;

        match outcome {
            Ok(Lookup::Found(mut result)) => {
                self.symbol_manager.track_success_for(symbol, ticket);
                if self.symbol_manager.is_in_format_discovery(symbol) {
                    self.symbol_manager.remove_format_discovery(symbol, true);
                }
                if let Some(label) = original_label.filter(|l| *l != symbol) {
                    result.original_label = Some(label.to_string());
                }
                self.store_result(symbol, result.clone(), ticket);
                AnalysisOutcome::Analyzed(result)
            }
            Ok(Lookup::Discovering) => AnalysisOutcome::Pending,
            Ok(Lookup::NotFound) => {
                self.record_failure(symbol, ticket, "no data");
                AnalysisOutcome::Failed
            }
            Err(e) => {
                self.record_failure(symbol, ticket, &e.to_string());
                AnalysisOutcome::Failed
            }
        }
    }

    fn record_failure(&self, symbol: &str, ticket: u64, reason: &str) {
        let (count, problematic) = self.symbol_manager.track_failure_for(symbol, ticket);
        if problematic {
            warn!("Analysis failed for {} ({}), problematic after {} failures", symbol, reason, count);
        } else {
            warn!("Analysis failed for {} ({}), failure {}", symbol, reason, count);
        }
    }

    /// Cache a result unless a newer attempt already stored one.
    fn store_result(&self, symbol: &str, result: AnalysisResult, ticket: u64) {
        let mut cache = self.cache.lock();
        if let Some(existing) = cache.results.get(symbol) {
            if existing.ticket > ticket {
                debug!("Discarding stale result for {} (attempt {})", symbol, ticket);
                return;
            }
        }
        cache.results.insert(
            symbol.to_string(),
            CacheEntry {
                result,
                cached_at: Instant::now(),
                ticket,
            },
        );
    }

    /// Decide whether the sheet row for `symbol` needs a full write.
    ///
    /// Reasons: `new` (never written), `action_changed`, `scheduled`, or
    /// `no_change_since_<n>s` when no write is needed.
    pub fn should_update_external(
        &self,
        symbol: &str,
        result: &AnalysisResult,
        price_update_interval_secs: u64,
    ) -> (bool, String) {
        let cache = self.cache.lock();
        let record = cache.updates.get(symbol).copied().unwrap_or_default();

        let Some(last_update) = record.last_update else {
            return (true, "new".to_string());
        };

        if record.last_action != Some(result.action) {
            return (true, "action_changed".to_string());
        }

        let elapsed = last_update.elapsed();
        if elapsed >= Duration::from_secs(price_update_interval_secs) {
            return (true, "scheduled".to_string());
        }

        (false, format!("no_change_since_{}s", elapsed.as_secs()))
    }

    /// Stamp the time of a sheet write. The cached result is left untouched.
    pub fn record_update(&self, symbol: &str) {
        let mut cache = self.cache.lock();
        let action = cache.results.get(symbol).map(|e| e.result.action);
        let record = cache.updates.entry(symbol.to_string()).or_default();
        record.last_update = Some(Instant::now());
        if action.is_some() {
            record.last_action = action;
        }
    }

    /// Forget a symbol that left the sheet, including any result the provider still holds for it.
    pub fn forget(&self, symbol: &str) {
        let mut cache = self.cache.lock();
        cache.results.remove(symbol);
        cache.updates.remove(symbol);
        drop(cache);
        self.provider.forget(symbol);
    }

    /// Drop symbols with no analysis or sheet write within `max_age`. Returns how many were removed.
    pub fn clean_cache(&self, max_age: Duration) -> usize {
        let swept = self.provider.sweep();
        if swept > 0 {
            debug!("Dropped {} expired discovery results", swept);
        }

        let mut cache = self.cache.lock();
        let CacheState { results, updates } = &mut *cache;

        let symbols: HashSet<String> = results.keys().chain(updates.keys()).cloned().collect();
        let mut removed = 0;

        for symbol in symbols {
            let cached_at = results.get(&symbol).map(|e| e.cached_at);
            let updated_at = updates.get(&symbol).and_then(|u| u.last_update);
            let newest = match (cached_at, updated_at) {
                (Some(a), Some(b)) => a.max(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => {
                    updates.remove(&symbol);
                    continue;
                }
            };

            if newest.elapsed() > max_age {
                results.remove(&symbol);
                updates.remove(&symbol);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Removed {} stale cache entries", removed);
        }
        removed
    }

    pub fn cached_result(&self, symbol: &str) -> Option<AnalysisResult> {
        self.cache.lock().results.get(symbol).map(|e| e.result.clone())
    }

    /// All cached results, sorted by symbol.
    pub fn all_results(&self) -> Vec<AnalysisResult> {
        let mut results: Vec<AnalysisResult> =
            self.cache.lock().results.values().map(|e| e.result.clone()).collect();
        results.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        results
    }

    pub fn action_counts(&self) -> ActionCounts {
        let cache = self.cache.lock();
        let mut counts = ActionCounts::default();
        for entry in cache.results.values() {
            match entry.result.action {
                Action::Buy => counts.buy += 1,
                Action::Sell => counts.sell += 1,
                Action::Wait => counts.wait += 1,
            }
        }
        counts
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().results.len()
    }
}
