//! Poll loop tests against in-memory sheet, notifier, exchange and candle fakes

use parking_lot::Mutex;
use sheet_signal_bot::config::Config;
use sheet_signal_bot::error::AppError;
use sheet_signal_bot::integrations::{BoxFuture, Notifier, SheetStore};
use sheet_signal_bot::services::{
    MarketDataProvider, Orchestrator, PairAnalyzer, RetryPolicy, SymbolManager,
};
use sheet_signal_bot::sources::{CandleFuture, CandleSource, OrderExecutor};
use sheet_signal_bot::types::{
    Action, AnalysisResult, ChartInterval, OhlcPoint, OrderSide, OrderStatus, SheetRow,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn falling(count: usize) -> Vec<OhlcPoint> {
    (0..count)
        .map(|i| {
            let base = 200.0 - i as f64 * 1.5;
            OhlcPoint {
                time: 1_700_000_000 + i as i64 * 3600,
                open: base,
                high: base + 1.0,
                low: base - 2.0,
                close: base - 1.0,
                volume: Some(1000.0),
            }
        })
        .collect()
}

fn flat(count: usize) -> Vec<OhlcPoint> {
    (0..count)
        .map(|i| OhlcPoint {
            time: 1_700_000_000 + i as i64 * 3600,
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: Some(1000.0),
        })
        .collect()
}

#[derive(Default)]
struct FakeSource {
    candles: Mutex<HashMap<String, Vec<OhlcPoint>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    fn serve(&self, raw: &str, candles: Vec<OhlcPoint>) {
        self.candles.lock().insert(raw.to_string(), candles);
    }

    fn fail(&self, raw: &str) {
        self.failing.lock().insert(raw.to_string());
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl CandleSource for FakeSource {
    fn exchange(&self) -> &str {
        "BINANCE"
    }

    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        _interval: ChartInterval,
        _limit: u32,
    ) -> CandleFuture<'a> {
        Box::pin(async move {
            self.calls.lock().push(symbol.to_string());
            if self.failing.lock().contains(symbol) {
                return Err(AppError::ExternalApi("502 Bad Gateway".into()));
            }
            self.candles
                .lock()
                .get(symbol)
                .cloned()
                .ok_or_else(|| AppError::SymbolNotFound(symbol.to_string()))
        })
    }
}

#[derive(Default)]
struct FakeSheet {
    rows: Mutex<Vec<SheetRow>>,
    full_writes: Mutex<Vec<(String, Action, String)>>,
    timestamp_writes: Mutex<Vec<String>>,
    reject_writes: AtomicBool,
}

impl FakeSheet {
    fn with_rows(rows: Vec<SheetRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    fn set_rows(&self, rows: Vec<SheetRow>) {
        *self.rows.lock() = rows;
    }

    fn full_write_count(&self) -> usize {
        self.full_writes.lock().len()
    }
}

impl SheetStore for FakeSheet {
    fn list_active_rows(&self, _force_refresh: bool) -> BoxFuture<'_, Vec<SheetRow>> {
        Box::pin(async move { self.rows.lock().clone() })
    }

    fn write_analysis<'a>(&'a self, row: &'a SheetRow, result: &'a AnalysisResult) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if self.reject_writes.load(Ordering::SeqCst) {
                return false;
            }
            self.full_writes.lock().push((
                row.symbol.clone(),
                result.action,
                result.formatted_symbol.clone(),
            ));
            true
        })
    }

    fn write_timestamp_only<'a>(&'a self, row: &'a SheetRow, _timestamp: DateTime<Utc>) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.timestamp_writes.lock().push(row.symbol.clone());
            true
        })
    }
}

#[derive(Default)]
struct FakeNotifier {
    messages: Mutex<Vec<(String, bool)>>,
}

impl FakeNotifier {
    fn containing(&self, needle: &str) -> Vec<(String, bool)> {
        self.messages
            .lock()
            .iter()
            .filter(|(text, _)| text.contains(needle))
            .cloned()
            .collect()
    }
}

impl Notifier for FakeNotifier {
    fn send(&self, text: &str, urgent: bool) -> bool {
        self.messages.lock().push((text.to_string(), urgent));
        true
    }

    fn flush(&self, _timeout: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[derive(Default)]
struct FakeExecutor {
    orders: Mutex<Vec<(String, OrderSide, f64)>>,
}

impl OrderExecutor for FakeExecutor {
    fn get_current_price<'a>(
        &'a self,
        _symbol: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<f64>> + Send + 'a>> {
        Box::pin(async { Some(100.0) })
    }

    fn place_market_order<'a>(
        &'a self,
        symbol: &'a str,
        side: OrderSide,
        amount: f64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            self.orders.lock().push((symbol.to_string(), side, amount));
            Some(format!("order-{}", symbol))
        })
    }

    fn get_order_status<'a>(
        &'a self,
        _order_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<OrderStatus>> + Send + 'a>> {
        Box::pin(async { Some(OrderStatus::Filled) })
    }
}

struct Harness {
    orchestrator: Orchestrator,
    source: Arc<FakeSource>,
    sheet: Arc<FakeSheet>,
    notifier: Arc<FakeNotifier>,
    analyzer: Arc<PairAnalyzer>,
    symbol_manager: Arc<SymbolManager>,
    shutdown: Arc<AtomicBool>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.bot.batch_delay_ms = 0;
    config.market_data.exchanges = vec!["BINANCE".to_string()];
    config.market_data.retry_attempts = 1;
    config
}

fn harness(config: Config, rows: Vec<SheetRow>) -> Harness {
    let config = Arc::new(config);
    let shutdown = Arc::new(AtomicBool::new(false));
    let source = Arc::new(FakeSource::default());
    let sheet = Arc::new(FakeSheet::with_rows(rows));
    let notifier = Arc::new(FakeNotifier::default());
    let symbol_manager = Arc::new(SymbolManager::new(
        config.bot.failure_threshold,
        config.bot.max_problem_symbols,
        config.bot.problem_symbol_reset_hours,
    ));

    let sources: Vec<Arc<dyn CandleSource>> = vec![source.clone()];
    let provider = Arc::new(MarketDataProvider::new(
        sources,
        symbol_manager.clone(),
        shutdown.clone(),
        config.clone(),
    ));
    let analyzer = Arc::new(PairAnalyzer::new(
        provider,
        symbol_manager.clone(),
        RetryPolicy::none(),
        config.bot.retry_delay_secs,
    ));

    let orchestrator = Orchestrator::new(
        config,
        sheet.clone(),
        notifier.clone(),
        analyzer.clone(),
        symbol_manager.clone(),
        shutdown.clone(),
    );

    Harness {
        orchestrator,
        source,
        sheet,
        notifier,
        analyzer,
        symbol_manager,
        shutdown,
    }
}

fn row(symbol: &str, row_reference: u32) -> SheetRow {
    let label = symbol.split('_').next().unwrap_or(symbol).to_string();
    SheetRow::new(symbol, label, row_reference)
}

/// Symbols TA_USDT, TB_USDT, ... with consecutive row numbers starting at 2.
fn rows(count: usize) -> Vec<SheetRow> {
    (0..count)
        .map(|i| row(&format!("T{}_USDT", (b'A' + i as u8) as char), i as u32 + 2))
        .collect()
}

fn raw(symbol: &str) -> String {
    symbol.replace('_', "")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_twenty_five_symbols_in_five_batches() {
    let rows = rows(25);
    let mut h = harness(test_config(), rows.clone());
    for (i, r) in rows.iter().enumerate() {
        match i % 5 {
            0 => h.source.fail(&raw(&r.symbol)),
            1 | 2 => h.source.serve(&raw(&r.symbol), falling(30)),
            _ => h.source.serve(&raw(&r.symbol), flat(30)),
        }
    }

    let report = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(report.rows, 25);
    assert_eq!(report.batches, 5);
    assert_eq!(report.succeeded, 20);
    assert_eq!(report.failed, 5);
    assert_eq!(report.pending, 0);
    assert_eq!(report.failed + report.skipped + report.succeeded, 25);
    assert_eq!(report.written, 20);
    assert_eq!(h.sheet.full_write_count(), 20);

    assert_eq!(h.notifier.containing("*Initial Analysis Results*").len(), 1);
    assert_eq!(h.notifier.containing("*Initial analysis completed*").len(), 1);
    let alerts = h.notifier.containing("*BUY SIGNAL:");
    assert_eq!(alerts.len(), 10);
    assert!(alerts.iter().all(|(_, urgent)| *urgent));
}

#[tokio::test]
async fn test_unchanged_results_only_refresh_timestamps() {
    let rows = rows(10);
    let mut h = harness(test_config(), rows.clone());
    for (i, r) in rows.iter().enumerate() {
        if i < 2 {
            h.source.fail(&raw(&r.symbol));
        } else {
            h.source.serve(&raw(&r.symbol), flat(30));
        }
    }

    h.orchestrator.run_cycle().await.unwrap();
    let second = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(second.succeeded, 8);
    assert_eq!(second.written, 0);
    assert_eq!(second.saved, 8);
    // failed symbols wait out the retry delay
    assert_eq!(second.skipped, 2);
    assert_eq!(h.sheet.full_write_count(), 8);
    assert_eq!(h.sheet.timestamp_writes.lock().len(), 8);
    assert_eq!(h.notifier.containing("*Initial analysis completed*").len(), 1);
}

#[tokio::test]
async fn test_buy_alert_only_when_buy_appears() {
    let mut h = harness(test_config(), vec![row("TA_USDT", 2)]);
    h.source.serve("TAUSDT", falling(30));

    h.orchestrator.run_cycle().await.unwrap();
    h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(h.notifier.containing("*BUY SIGNAL: TA*").len(), 1);

    h.source.serve("TAUSDT", flat(30));
    let report = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(h.sheet.full_writes.lock().last().unwrap().1, Action::Wait);

    h.source.serve("TAUSDT", falling(30));
    h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(h.notifier.containing("*BUY SIGNAL: TA*").len(), 2);
    assert_eq!(h.sheet.full_write_count(), 3);
}

#[tokio::test]
async fn test_new_and_removed_symbols() {
    let mut h = harness(test_config(), vec![row("TA_USDT", 2)]);
    h.source.serve("TAUSDT", flat(30));
    h.source.serve("TBUSDT", falling(30));

    h.orchestrator.run_cycle().await.unwrap();
    assert!(h.notifier.containing("*NEW COINS ADDED*").is_empty());

    h.sheet.set_rows(vec![row("TA_USDT", 2), row("TB_USDT", 3)]);
    let report = h.orchestrator.run_cycle().await.unwrap();

    let added = h.notifier.containing("*NEW COINS ADDED*");
    assert_eq!(added.len(), 1);
    assert!(added[0].0.ends_with("TB_USDT"));
    // initial card for the new symbol even after the first cycle
    assert_eq!(h.notifier.containing("*TB*\nPrice:").len(), 1);
    assert!(h.orchestrator.newly_added().is_empty());
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.batches, 1);

    h.sheet.set_rows(vec![row("TB_USDT", 3)]);
    h.orchestrator.run_cycle().await.unwrap();
    let removed = h.notifier.containing("*COINS REMOVED*");
    assert_eq!(removed.len(), 1);
    assert!(removed[0].0.ends_with("TA_USDT"));
    assert_eq!(h.analyzer.cached_result("TA_USDT"), None);

    // Re-adding the row writes it again as a new symbol
    let writes_before = h.sheet.full_writes.lock().len();
    h.sheet.set_rows(vec![row("TA_USDT", 2), row("TB_USDT", 3)]);
    h.orchestrator.run_cycle().await.unwrap();
    let writes = h.sheet.full_writes.lock();
    assert_eq!(writes.len(), writes_before + 1);
    assert_eq!(writes.last().map(|w| w.0.as_str()), Some("TA_USDT"));
}

#[tokio::test]
async fn test_new_symbol_stays_queued_until_analyzed() {
    let mut h = harness(test_config(), vec![row("TA_USDT", 2)]);
    h.source.serve("TAUSDT", flat(30));
    h.source.fail("TBUSDT");

    h.orchestrator.run_cycle().await.unwrap();
    h.sheet.set_rows(vec![row("TA_USDT", 2), row("TB_USDT", 3)]);
    let report = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.orchestrator.newly_added(), vec!["TB_USDT".to_string()]);
}

#[tokio::test]
async fn test_discovered_format_is_picked_up_on_recheck() {
    let mut h = harness(test_config(), vec![row("PEPE_USDT", 2)]);
    h.source.serve("PEPE-USDT", flat(30));

    let first = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(first.pending, 1);
    assert_eq!(h.sheet.full_write_count(), 0);

    let manager = h.symbol_manager.clone();
    wait_until(|| manager.format_discovery_count() == 0).await;
    assert_eq!(manager.format_discovery_count(), 0);
    let calls_after_discovery = h.source.call_count();

    let second = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.succeeded, 1);
    assert_eq!(second.batches, 0);
    // the discovery result is handed over without another request
    assert_eq!(h.source.call_count(), calls_after_discovery);

    let writes = h.sheet.full_writes.lock().clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].2, "BINANCE:PEPE-USDT");
}

#[tokio::test]
async fn test_failed_sheet_write_is_retried_next_cycle() {
    let mut h = harness(test_config(), vec![row("TA_USDT", 2)]);
    h.source.serve("TAUSDT", flat(30));
    h.sheet.reject_writes.store(true, Ordering::SeqCst);

    let first = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(first.written, 0);

    h.sheet.reject_writes.store(false, Ordering::SeqCst);
    let second = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.written, 1);
    assert_eq!(second.saved, 0);
}

#[tokio::test]
async fn test_auto_trade_places_order_on_buy() {
    let mut config = test_config();
    config.exchange.auto_trade = true;
    config.exchange.trade_amount = 25.0;
    config.exchange.check_interval_secs = 0;
    config.exchange.max_checks = 3;

    let h = harness(config, vec![row("TA_USDT", 2), row("TB_USDT", 3)]);
    h.source.serve("TAUSDT", falling(30));
    h.source.serve("TBUSDT", flat(30));
    let executor = Arc::new(FakeExecutor::default());
    let notifier = h.notifier.clone();
    let mut orchestrator = h.orchestrator.with_executor(executor.clone());

    orchestrator.run_cycle().await.unwrap();
    orchestrator.run_cycle().await.unwrap();

    let orders = executor.orders.lock().clone();
    assert_eq!(orders, vec![("TA_USDT".to_string(), OrderSide::Buy, 25.0)]);
    assert_eq!(notifier.containing("Market BUY placed: TA_USDT").len(), 1);

    wait_until(|| !notifier.containing("Order update: TA_USDT").is_empty()).await;
    let finished = notifier.containing("Order update: TA_USDT");
    assert_eq!(finished.len(), 1);
    assert!(finished[0].0.contains("Status: FILLED"));
}

#[tokio::test]
async fn test_run_stops_on_shutdown_with_notice() {
    let mut h = harness(test_config(), vec![row("TA_USDT", 2)]);
    h.shutdown.store(true, Ordering::SeqCst);

    h.orchestrator.run().await.unwrap();

    let messages = h.notifier.messages.lock().clone();
    assert!(messages[0].0.contains("*Crypto Trading Bot Started*"));
    assert!(messages[0].0.contains("tracked coins: 1"));
    let (last, urgent) = messages.last().unwrap();
    assert!(last.contains("*Bot Stopped*"));
    assert!(*urgent);
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_empty_sheet_does_nothing() {
    let mut h = harness(test_config(), Vec::new());

    let report = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(report.rows, 0);
    assert_eq!(report.batches, 0);
    assert!(h.notifier.messages.lock().is_empty());
}

#[tokio::test]
async fn test_daily_summary_sent_once() {
    let mut h = harness(test_config(), vec![row("TA_USDT", 2)]);
    h.source.serve("TAUSDT", falling(30));

    h.orchestrator.run_cycle().await.unwrap();
    assert!(h.notifier.containing("*Daily Summary").is_empty());

    h.orchestrator.run_cycle().await.unwrap();
    h.orchestrator.run_cycle().await.unwrap();
    let summaries = h.notifier.containing("*Daily Summary");
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].0.contains("BUY Signals: 1"));
}
