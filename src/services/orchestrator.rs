//! The poll loop.
//!
//! Each cycle fetches the active sheet rows, rechecks symbols coming out of format discovery,
//! gives newly added symbols priority, then runs the rest through a bounded worker pool in
//! batches. Analysis runs in spawned tasks; sheet writes and notifications only ever happen on
//! the loop itself, in the order results complete.

use super::pair_analyzer::{AnalysisOutcome, PairAnalyzer};
use super::stats::{LogGate, StatsTracker};
use super::symbol_manager::SymbolManager;
use crate::config::Config;
use crate::error::AppError;
use crate::integrations::{messages, Notifier, SheetStore};
use crate::sources::OrderExecutor;
use crate::types::{Action, AnalysisResult, OrderSide, OrderStatus, SheetRow};
use chrono::{Local, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What a single cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub rows: usize,
    pub batches: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub pending: usize,
    pub failed: usize,
    /// Full analysis writes that reached the sheet.
    pub written: usize,
    /// Full writes replaced by a timestamp refresh.
    pub saved: usize,
}

impl CycleReport {
    /// Rows that got an outcome this cycle.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.skipped + self.pending + self.failed
    }

    /// Rows that reached the market data provider. Pending lookups made the quick default request.
    pub fn upstream_calls(&self) -> usize {
        self.succeeded + self.pending + self.failed
    }
}

#[derive(Debug, Default)]
struct LoopState {
    /// Canonical symbols seen in the previous fetch. None until the first non-empty fetch.
    known_symbols: Option<HashSet<String>>,
    newly_added: HashSet<String>,
    /// Last analyzed action per symbol, for spotting a BUY that was not there before.
    last_actions: HashMap<String, Action>,
    first_run: bool,
    last_refresh: Option<Instant>,
    last_cleanup: Option<Instant>,
    last_summary: Option<NaiveDate>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    sheet: Arc<dyn SheetStore>,
    notifier: Arc<dyn Notifier>,
    analyzer: Arc<PairAnalyzer>,
    symbol_manager: Arc<SymbolManager>,
    executor: Option<Arc<dyn OrderExecutor>>,
    shutdown: Arc<AtomicBool>,
    workers: Arc<Semaphore>,
    stats: StatsTracker,
    stats_gate: LogGate,
    state: LoopState,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        sheet: Arc<dyn SheetStore>,
        notifier: Arc<dyn Notifier>,
        analyzer: Arc<PairAnalyzer>,
        symbol_manager: Arc<SymbolManager>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.bot.workers));
        let stats_gate = LogGate::new(Duration::from_secs(config.bot.stats_log_interval_secs));
        Self {
            config,
            sheet,
            notifier,
            analyzer,
            symbol_manager,
            executor: None,
            shutdown,
            workers,
            stats: StatsTracker::new(),
            stats_gate,
            state: LoopState {
                first_run: true,
                ..LoopState::default()
            },
        }
    }

    /// Place market orders on newly observed BUY signals when auto trading is enabled.
    pub fn with_executor(mut self, executor: Arc<dyn OrderExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until the shutdown flag is set. A stop or fatal-error notice is always sent on the way out.
    pub async fn run(&mut self) -> Result<(), AppError> {
        let bot = &self.config.bot;
        info!(
            "Starting poll loop: {}s interval, sheet refresh every {}s, unchanged rows rewritten every {}s",
            bot.update_interval_secs, bot.symbol_refresh_interval_secs, bot.price_update_interval_secs
        );
        info!("Batched processing enabled: batch size {}, {} workers", bot.batch_size, bot.workers);

        self.announce_startup().await;
        let outcome = self.poll_loop().await;

        match &outcome {
            Ok(()) => {
                info!("Poll loop stopped");
                self.notifier.send(messages::stopped(), true);
            }
            Err(e) => {
                error!("Poll loop failed: {}", e);
                self.notifier.send(&messages::fatal_error(&e.to_string()), true);
            }
        }
        self.notifier.flush(Duration::from_secs(5)).await;
        outcome
    }

    /// Run a single cycle and wait for queued notifications.
    pub async fn run_once(&mut self) -> Result<CycleReport, AppError> {
        let report = self.run_cycle().await;
        self.notifier.flush(Duration::from_secs(5)).await;
        report
    }

    async fn announce_startup(&self) {
        let coins = self.sheet.list_active_rows(false).await.len();
        let text = messages::startup(
            coins,
            self.config.market_data.chart_interval,
            self.config.bot.update_interval_secs,
            Local::now(),
        );
        self.notifier.send(&text, false);
    }

    async fn poll_loop(&mut self) -> Result<(), AppError> {
        while !self.is_shutting_down() {
            let started = Instant::now();
            let report = self.run_cycle().await?;
            let sleep_for = self.config.bot.update_interval().saturating_sub(started.elapsed());

            debug!(
                "Completed cycle in {:.2}s: {} analyzed, {} skipped, {} pending, {} failed, {} saved. \
                 Format discoveries in progress: {}. Next update in {:.2}s",
                started.elapsed().as_secs_f64(),
                report.succeeded,
                report.skipped,
                report.pending,
                report.failed,
                report.saved,
                self.symbol_manager.format_discovery_count(),
                sleep_for.as_secs_f64()
            );

            self.sleep_with_shutdown(sleep_for).await;
        }
        Ok(())
    }

    async fn sleep_with_shutdown(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_shutting_down() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(Duration::from_secs(1))).await;
        }
    }

    /// One pass over the sheet.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, AppError> {
        let mut report = CycleReport::default();

        self.maybe_send_daily_summary();

        let refresh_every = Duration::from_secs(self.config.bot.symbol_refresh_interval_secs);
        let force = self.state.last_refresh.map_or(true, |t| t.elapsed() >= refresh_every);
        if force {
            debug!("Refreshing active rows");
            self.state.last_refresh = Some(Instant::now());
        }
        let rows = self.sheet.list_active_rows(force).await;

        self.symbol_manager.check_reset_problem_symbols();

        report.rows = rows.len();
        if rows.is_empty() {
            warn!("No active rows found, waiting...");
            return Ok(report);
        }
        self.track_symbol_changes(&rows);

        let announce = self.state.first_run;
        if announce {
            self.notifier.send(messages::initial_intro(), false);
        }

        let mut handled: HashSet<u32> = HashSet::new();

        let recheck: HashSet<String> = self.symbol_manager.take_recheck_symbols().into_iter().collect();
        let recheck_rows: Vec<SheetRow> = rows.iter().filter(|r| recheck.contains(&r.symbol)).cloned().collect();
        if !recheck_rows.is_empty() {
            info!("Rechecking {} symbols that were in format discovery", recheck_rows.len());
        }
        for row in recheck_rows {
            if self.is_shutting_down() {
                break;
            }
            handled.insert(row.row_reference);
            let outcome = self.analyzer.analyze_detailed(&row.symbol, Some(&row.original_label)).await;
            if matches!(outcome, AnalysisOutcome::Analyzed(_)) {
                info!("Format discovery succeeded for {}, continuing processing", row.symbol);
            }
            self.handle_outcome(&row, outcome, announce, &mut report).await;
        }

        let new_rows: Vec<SheetRow> = rows
            .iter()
            .filter(|r| self.state.newly_added.contains(&r.symbol) && !handled.contains(&r.row_reference))
            .cloned()
            .collect();
        if !new_rows.is_empty() {
            info!("Processing {} new symbols first", new_rows.len());
        }
        for row in new_rows {
            if self.is_shutting_down() {
                break;
            }
            handled.insert(row.row_reference);
            let outcome = self.analyzer.analyze_detailed(&row.symbol, Some(&row.original_label)).await;
            match &outcome {
                AnalysisOutcome::Analyzed(result) => {
                    self.state.newly_added.remove(&row.symbol);
                    self.notifier.send(&messages::initial_analysis(result), false);
                    info!("New symbol {} analyzed", row.symbol);
                }
                AnalysisOutcome::Pending => {
                    info!("New symbol {} is in format discovery, will check again later", row.symbol);
                }
                _ => warn!("Failed to analyze new symbol {}", row.symbol),
            }
            // the initial card was sent above
            self.handle_outcome(&row, outcome, false, &mut report).await;
        }

        let remaining: Vec<SheetRow> = rows
            .into_iter()
            .filter(|r| !handled.contains(&r.row_reference))
            .collect();
        let batch_size = self.config.bot.batch_size.max(1);
        let total_batches = remaining.len().div_ceil(batch_size);

        for (index, batch) in remaining.chunks(batch_size).enumerate() {
            if self.is_shutting_down() {
                info!("Shutdown requested, skipping remaining batches");
                break;
            }
            info!("Processing batch {} of {}", index + 1, total_batches);
            self.process_batch(batch, announce, &mut report).await?;
            report.batches += 1;

            if index + 1 < total_batches {
                tokio::time::sleep(self.config.bot.batch_delay()).await;
            }
        }

        self.maybe_clean_cache();

        if self.state.first_run {
            self.state.first_run = false;
            self.notifier.send(messages::initial_complete(), false);
        }

        self.stats.update(|s| {
            s.cycles += 1;
            s.api_calls += report.upstream_calls() as u64;
            s.succeeded += report.succeeded as u64;
            s.skipped += report.skipped as u64;
            s.pending += report.pending as u64;
            s.failed += report.failed as u64;
            s.saved += report.saved as u64;
        });
        self.log_statistics(report.rows);

        Ok(report)
    }

    async fn process_batch(
        &mut self,
        batch: &[SheetRow],
        announce: bool,
        report: &mut CycleReport,
    ) -> Result<(), AppError> {
        let mut tasks = JoinSet::new();

        for row in batch {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|_| AppError::Anyhow(anyhow::anyhow!("analysis worker pool is closed")))?;
            let analyzer = Arc::clone(&self.analyzer);
            let row = row.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = analyzer.analyze_detailed(&row.symbol, Some(&row.original_label)).await;
                (row, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((row, outcome)) => self.handle_outcome(&row, outcome, announce, report).await,
                Err(e) => {
                    error!("Analysis task failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn handle_outcome(
        &mut self,
        row: &SheetRow,
        outcome: AnalysisOutcome,
        announce: bool,
        report: &mut CycleReport,
    ) {
        match outcome {
            AnalysisOutcome::Analyzed(result) => {
                report.succeeded += 1;
                if announce {
                    self.notifier.send(&messages::initial_analysis(&result), false);
                }
                self.publish(row, &result, report).await;
            }
            AnalysisOutcome::Skipped(reason) => {
                debug!("Skipped {}: {}", row.symbol, reason);
                report.skipped += 1;
            }
            AnalysisOutcome::Pending => report.pending += 1,
            AnalysisOutcome::Failed => report.failed += 1,
        }
    }

    /// Push a fresh result to the sheet and raise BUY alerts.
    async fn publish(&mut self, row: &SheetRow, result: &AnalysisResult, report: &mut CycleReport) {
        let previous = self.state.last_actions.insert(row.symbol.clone(), result.action);
        if result.action == Action::Buy && previous != Some(Action::Buy) {
            info!("BUY signal for {} at {}", result.display_symbol(), result.last_price);
            if let Some(text) = messages::buy_signal(result) {
                self.notifier.send(&text, true);
            }
            self.auto_trade(&row.symbol).await;
        }

        let (update, reason) = self.analyzer.should_update_external(
            &row.symbol,
            result,
            self.config.bot.price_update_interval_secs,
        );

        if update {
            debug!("Updating row {} for {} ({})", row.row_reference, row.symbol, reason);
            if self.sheet.write_analysis(row, result).await {
                self.analyzer.record_update(&row.symbol);
                report.written += 1;
            } else {
                warn!("Sheet write failed for {}, will retry next cycle", row.symbol);
            }
        } else {
            debug!("No significant change for {} ({}), refreshing timestamp", row.symbol, reason);
            if !self.sheet.write_timestamp_only(row, Utc::now()).await {
                debug!("Timestamp refresh failed for {}", row.symbol);
            }
            report.saved += 1;
        }
    }

    async fn auto_trade(&self, symbol: &str) {
        if !self.config.exchange.auto_trade {
            return;
        }
        let Some(executor) = self.executor.clone() else {
            return;
        };

        let amount = self.config.exchange.trade_amount;
        let Some(order_id) = executor.place_market_order(symbol, OrderSide::Buy, amount).await else {
            warn!("Market BUY for {} was not placed", symbol);
            return;
        };

        info!("Placed market BUY for {}: order {}", symbol, order_id);
        self.notifier.send(&messages::order_placed(symbol, &order_id, amount), true);

        let notifier = Arc::clone(&self.notifier);
        let shutdown = Arc::clone(&self.shutdown);
        let check_interval = Duration::from_secs(self.config.exchange.check_interval_secs);
        let max_checks = self.config.exchange.max_checks;
        let symbol = symbol.to_string();

        tokio::spawn(async move {
            let status = monitor_order(executor.as_ref(), &order_id, check_interval, max_checks, &shutdown).await;
            let label = status.map_or_else(|| "UNKNOWN".to_string(), |s| s.to_string());
            info!("Order {} for {} finished monitoring with status {}", order_id, symbol, label);
            notifier.send(&messages::order_finished(&symbol, &order_id, &label), false);
        });
    }

    /// Diff the fetched rows against the previous fetch. The first fetch only sets the baseline.
    fn track_symbol_changes(&mut self, rows: &[SheetRow]) {
        let current: HashSet<String> = rows.iter().map(|r| r.symbol.clone()).collect();

        if let Some(previous) = &self.state.known_symbols {
            let mut added: Vec<String> = current.difference(previous).cloned().collect();
            let mut removed: Vec<String> = previous.difference(&current).cloned().collect();
            added.sort();
            removed.sort();

            if !added.is_empty() {
                info!("New symbols detected: {}", added.join(", "));
                self.state.newly_added.extend(added.iter().cloned());
                self.notifier.send(&messages::new_coins(&added), false);
            }
            if !removed.is_empty() {
                info!("Symbols removed from tracking: {}", removed.join(", "));
                for symbol in &removed {
                    self.state.newly_added.remove(symbol);
                    self.state.last_actions.remove(symbol);
                    self.analyzer.forget(symbol);
                }
                self.notifier.send(&messages::removed_coins(&removed), false);
            }
        }

        self.state.known_symbols = Some(current);
    }

    /// Symbols waiting for their first successful analysis after being added to the sheet.
    pub fn newly_added(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.state.newly_added.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    fn maybe_send_daily_summary(&mut self) {
        let today = Local::now().date_naive();
        if self.state.last_summary == Some(today) {
            return;
        }
        let results = self.analyzer.all_results();
        if results.is_empty() {
            return;
        }
        self.state.last_summary = Some(today);
        self.notifier.send(&messages::daily_summary(&results, today), false);
    }

    fn maybe_clean_cache(&mut self) {
        let every = Duration::from_secs(self.config.bot.cache_cleanup_interval_secs);
        if self.state.last_cleanup.is_some_and(|t| t.elapsed() < every) {
            return;
        }
        self.state.last_cleanup = Some(Instant::now());
        let removed = self
            .analyzer
            .clean_cache(Duration::from_secs(self.config.bot.cache_max_age_secs));
        if removed > 0 {
            info!("Cleaned {} old entries from analysis cache", removed);
        }
    }

    fn log_statistics(&mut self, rows: usize) {
        if !self.stats_gate.should_log() {
            return;
        }
        let suppressed = self.stats_gate.take_suppressed();

        info!("Working with {} active rows ({} stats reports held back)", rows, suppressed);

        let discovery = self.symbol_manager.format_discovery_symbols();
        if !discovery.is_empty() {
            let mut listed = discovery.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
            if discovery.len() > 5 {
                listed.push_str(&format!("... and {} more", discovery.len() - 5));
            }
            info!("Symbols in format discovery: {}", listed);
        }

        let problems = self.symbol_manager.problem_symbols();
        if !problems.is_empty() {
            warn!("Symbols with persistent issues: {}", problems.join(", "));
        }

        let counts = self.analyzer.action_counts();
        info!(
            "Action counts: BUY: {}, SELL: {}, WAIT: {}",
            counts.buy, counts.sell, counts.wait
        );

        let stats = self.stats.take();
        info!(
            "Statistics over {} cycles: {} API calls, {} skipped, {} pending, {} failed, {} saved ({:.1}% of writes avoided)",
            stats.cycles,
            stats.api_calls,
            stats.skipped,
            stats.pending,
            stats.failed,
            stats.saved,
            stats.efficiency()
        );

        let symbols = self.symbol_manager.statistics();
        debug!(
            "Symbol manager: {} problem symbols, {} with recent failures, last reset {}s ago",
            symbols.problem_symbols_count,
            symbols.failed_updates_count,
            symbols.time_since_reset.as_secs()
        );
    }
}

/// Poll an order until it reaches a terminal state, `max_checks` polls pass, or shutdown.
/// Returns the last status seen.
pub async fn monitor_order(
    executor: &dyn OrderExecutor,
    order_id: &str,
    check_interval: Duration,
    max_checks: u32,
    shutdown: &AtomicBool,
) -> Option<OrderStatus> {
    let mut last = None;
    for check in 1..=max_checks {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Some(status) = executor.get_order_status(order_id).await {
            debug!("Order {} check {}/{}: {}", order_id, check, max_checks, status);
            last = Some(status);
            if status.is_terminal() {
                break;
            }
        }
        if check < max_checks {
            tokio::time::sleep(check_interval).await;
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::future::Future;
    use std::pin::Pin;

    struct ScriptedExecutor {
        statuses: Mutex<Vec<Option<OrderStatus>>>,
        checks: Mutex<u32>,
    }

    impl ScriptedExecutor {
        fn new(mut statuses: Vec<Option<OrderStatus>>) -> Self {
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                checks: Mutex::new(0),
            }
        }
    }

    impl OrderExecutor for ScriptedExecutor {
        fn get_current_price<'a>(
            &'a self,
            _symbol: &'a str,
        ) -> Pin<Box<dyn Future<Output = Option<f64>> + Send + 'a>> {
            Box::pin(async { Some(1.0) })
        }

        fn place_market_order<'a>(
            &'a self,
            _symbol: &'a str,
            _side: OrderSide,
            _amount: f64,
        ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
            Box::pin(async { Some("order-1".to_string()) })
        }

        fn get_order_status<'a>(
            &'a self,
            _order_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Option<OrderStatus>> + Send + 'a>> {
            Box::pin(async move {
                *self.checks.lock() += 1;
                self.statuses.lock().pop().flatten()
            })
        }
    }

    #[tokio::test]
    async fn test_monitor_stops_at_terminal_status() {
        let executor = ScriptedExecutor::new(vec![
            Some(OrderStatus::Active),
            None,
            Some(OrderStatus::Filled),
            Some(OrderStatus::Active),
        ]);
        let shutdown = AtomicBool::new(false);

        let status = monitor_order(&executor, "order-1", Duration::ZERO, 10, &shutdown).await;

        assert_eq!(status, Some(OrderStatus::Filled));
        assert_eq!(*executor.checks.lock(), 3);
    }

    #[tokio::test]
    async fn test_monitor_gives_up_after_max_checks() {
        let executor = ScriptedExecutor::new(vec![Some(OrderStatus::Active); 10]);
        let shutdown = AtomicBool::new(false);

        let status = monitor_order(&executor, "order-1", Duration::ZERO, 4, &shutdown).await;

        assert_eq!(status, Some(OrderStatus::Active));
        assert_eq!(*executor.checks.lock(), 4);
    }

    #[tokio::test]
    async fn test_monitor_respects_shutdown() {
        let executor = ScriptedExecutor::new(vec![Some(OrderStatus::Active)]);
        let shutdown = AtomicBool::new(true);

        assert_eq!(monitor_order(&executor, "order-1", Duration::ZERO, 5, &shutdown).await, None);
        assert_eq!(*executor.checks.lock(), 0);
    }

    #[test]
    fn test_report_attempted() {
        let report = CycleReport {
            succeeded: 3,
            skipped: 1,
            pending: 2,
            failed: 4,
            ..CycleReport::default()
        };
        assert_eq!(report.attempted(), 10);
        assert_eq!(report.upstream_calls(), 9);
    }
}
