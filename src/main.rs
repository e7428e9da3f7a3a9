use sheet_signal_bot::config::Config;
use sheet_signal_bot::integrations::{GoogleSheetsClient, LogNotifier, Notifier, SheetStore, TelegramNotifier};
use sheet_signal_bot::services::{MarketDataProvider, Orchestrator, PairAnalyzer, RetryPolicy, SymbolManager};
use sheet_signal_bot::sources::{build_candle_sources, CryptoComClient, OrderExecutor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let once = args.iter().any(|a| a == "--once");

    // Initialize tracing
    let default_filter = if debug {
        "sheet_signal_bot=debug"
    } else {
        "sheet_signal_bot=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    info!(
        "Starting Sheet Signal Bot: {} candles, exchanges {}",
        config.market_data.chart_interval,
        config.market_data.exchanges.join(", ")
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let symbol_manager = Arc::new(SymbolManager::new(
        config.bot.failure_threshold,
        config.bot.max_problem_symbols,
        config.bot.problem_symbol_reset_hours,
    ));

    let sources = build_candle_sources(&config.market_data);
    if sources.is_empty() {
        anyhow::bail!("no usable exchange alternatives configured");
    }
    let provider = Arc::new(MarketDataProvider::new(
        sources,
        symbol_manager.clone(),
        shutdown.clone(),
        config.clone(),
    ));

    let market = &config.market_data;
    let retry = RetryPolicy::new(
        market.retry_attempts,
        Duration::from_millis(market.retry_base_delay_ms),
        market.retry_backoff_factor,
    );
    let analyzer = Arc::new(PairAnalyzer::new(
        provider,
        symbol_manager.clone(),
        retry,
        config.bot.retry_delay_secs,
    ));

    let sheet: Arc<dyn SheetStore> = Arc::new(GoogleSheetsClient::new(&config.sheets)?);

    let notifier: Arc<dyn Notifier> = match TelegramNotifier::spawn(&config.telegram) {
        Some(telegram) => Arc::new(telegram),
        None => {
            warn!("Telegram is not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    let mut orchestrator = Orchestrator::new(
        config.clone(),
        sheet,
        notifier,
        analyzer,
        symbol_manager,
        shutdown.clone(),
    );

    if config.exchange.auto_trade {
        match CryptoComClient::from_config(&config.exchange) {
            Some(client) => {
                info!("Auto trading enabled: {} per BUY signal", config.exchange.trade_amount);
                let executor: Arc<dyn OrderExecutor> = Arc::new(client);
                orchestrator = orchestrator.with_executor(executor);
            }
            None => warn!("Auto trading requested but exchange credentials are missing"),
        }
    }

    // Stop on Ctrl-C
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current work");
            flag.store(true, Ordering::SeqCst);
        }
    });

    if once {
        let report = orchestrator.run_once().await?;
        info!(
            "Single cycle done: {} rows, {} analyzed, {} skipped, {} pending, {} failed, {} written, {} saved",
            report.rows,
            report.succeeded,
            report.skipped,
            report.pending,
            report.failed,
            report.written,
            report.saved
        );
        shutdown.store(true, Ordering::SeqCst);
        return Ok(());
    }

    orchestrator.run().await?;
    shutdown.store(true, Ordering::SeqCst);
    Ok(())
}
