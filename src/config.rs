use crate::error::{AppError, Result};
use crate::types::ChartInterval;
use std::env;
use std::time::Duration;
use tracing::warn;

/// Poll loop and symbol bookkeeping settings.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Seconds between poll cycles.
    pub update_interval_secs: u64,
    /// Seconds after which an unchanged symbol is rewritten anyway.
    pub price_update_interval_secs: u64,
    /// Seconds a failed symbol is left alone before the next attempt.
    pub retry_delay_secs: u64,
    /// Symbols per batch.
    pub batch_size: usize,
    /// Concurrent analysis workers.
    pub workers: usize,
    /// Concurrent format discovery tasks.
    pub discovery_workers: usize,
    /// Consecutive failures before a symbol becomes a problem symbol.
    pub failure_threshold: u32,
    /// Upper bound on the problem set.
    pub max_problem_symbols: usize,
    /// Hours between bulk resets of the problem set.
    pub problem_symbol_reset_hours: u64,
    /// Seconds between forced symbol list refreshes.
    pub symbol_refresh_interval_secs: u64,
    /// Seconds between analysis cache sweeps.
    pub cache_cleanup_interval_secs: u64,
    /// Maximum age of a cached analysis.
    pub cache_max_age_secs: u64,
    /// Seconds between statistics log lines.
    pub stats_log_interval_secs: u64,
    /// Pause between batches, in milliseconds.
    pub batch_delay_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 60,
            price_update_interval_secs: 300,
            retry_delay_secs: 120,
            batch_size: 5,
            workers: 5,
            discovery_workers: 5,
            failure_threshold: 3,
            max_problem_symbols: 50,
            problem_symbol_reset_hours: 6,
            symbol_refresh_interval_secs: 30,
            cache_cleanup_interval_secs: 3600,
            cache_max_age_secs: 2 * 3600,
            stats_log_interval_secs: 60,
            batch_delay_ms: 1000,
        }
    }
}

impl BotConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Upstream candle data settings.
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub chart_interval: ChartInterval,
    /// Candles requested per lookup.
    pub candle_limit: u32,
    /// Fewer candles than this means no usable data.
    pub min_candles: usize,
    /// Exchange identifiers tried in order, e.g. `BINANCE`.
    pub exchanges: Vec<String>,
    pub http_timeout_secs: u64,
    /// Attempts per analysis, including the first.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_factor: f64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            chart_interval: ChartInterval::OneHour,
            candle_limit: 250,
            min_candles: 20,
            exchanges: vec!["BINANCE".to_string(), "KUCOIN".to_string(), "OKX".to_string()],
            http_timeout_secs: 15,
            retry_attempts: 3,
            retry_base_delay_ms: 2000,
            retry_backoff_factor: 2.0,
        }
    }
}

impl MarketDataConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Indicator windows and BUY/SELL thresholds.
#[derive(Debug, Clone)]
pub struct SignalPolicy {
    pub rsi_period: usize,
    pub sma_long_window: usize,
    pub sma_medium_window: usize,
    pub ema_window: usize,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    /// BUY requires RSI strictly below this.
    pub buy_rsi_below: f64,
    /// BUY requires at least this many moving averages below the price.
    pub buy_min_ma_confirmations: usize,
    /// SELL requires RSI strictly above this.
    pub sell_rsi_above: f64,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            sma_long_window: 200,
            sma_medium_window: 50,
            ema_window: 10,
            atr_period: 14,
            atr_multiplier: 2.0,
            buy_rsi_below: 40.0,
            buy_min_ma_confirmations: 2,
            sell_rsi_above: 70.0,
        }
    }
}

/// Google Sheets settings.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub api_url: String,
    pub spreadsheet_id: Option<String>,
    pub worksheet_name: String,
    /// OAuth bearer token for the Sheets API.
    pub access_token: Option<String>,
    /// Seconds the active row list is served from cache.
    pub cache_ttl_secs: u64,
    /// Cap on the fetch error back-off.
    pub max_backoff_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://sheets.googleapis.com/v4/spreadsheets".to_string(),
            spreadsheet_id: None,
            worksheet_name: "Trading".to_string(),
            access_token: None,
            cache_ttl_secs: 10,
            max_backoff_secs: 60,
        }
    }
}

/// Telegram settings. Notifications are disabled unless both token and chat id are set.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: None,
            chat_id: None,
        }
    }
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.chat_id.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Crypto.com exchange settings for the optional order executor.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Place market orders on newly observed BUY signals.
    pub auto_trade: bool,
    /// Quote-currency notional per order.
    pub trade_amount: f64,
    /// Seconds between order status polls.
    pub check_interval_secs: u64,
    /// Status polls before the monitor gives up.
    pub max_checks: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.crypto.com/v2/".to_string(),
            api_key: None,
            api_secret: None,
            auto_trade: false,
            trade_amount: 10.0,
            check_interval_secs: 5,
            max_checks: 60,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bot: BotConfig,
    pub market_data: MarketDataConfig,
    pub signals: SignalPolicy,
    pub sheets: SheetsConfig,
    pub telegram: TelegramConfig,
    pub exchange: ExchangeConfig,
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_uppercase().as_str(), "TRUE" | "1" | "YES" | "Y")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults, then validate.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let interval_label = env::var("CHART_INTERVAL")
            .or_else(|_| env::var("TRADINGVIEW_INTERVAL"))
            .unwrap_or_else(|_| defaults.market_data.chart_interval.label().to_string());
        let chart_interval = ChartInterval::from_str(&interval_label).ok_or_else(|| {
            AppError::Config(format!(
                "Invalid chart interval: {}. Must be one of 1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w, 1M",
                interval_label
            ))
        })?;

        let config = Self {
            bot: BotConfig {
                update_interval_secs: env::var("UPDATE_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.update_interval_secs),
                price_update_interval_secs: env::var("PRICE_UPDATE_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.price_update_interval_secs),
                retry_delay_secs: env::var("RETRY_DELAY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.retry_delay_secs),
                batch_size: env::var("BATCH_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.batch_size),
                workers: env::var("WORKERS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.workers),
                discovery_workers: env::var("DISCOVERY_WORKERS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.discovery_workers),
                failure_threshold: env::var("FAILURE_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.failure_threshold),
                max_problem_symbols: env::var("MAX_PROBLEM_SYMBOLS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.max_problem_symbols),
                problem_symbol_reset_hours: env::var("PROBLEM_SYMBOL_RESET_HOURS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.problem_symbol_reset_hours),
                symbol_refresh_interval_secs: env::var("SYMBOL_REFRESH_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.symbol_refresh_interval_secs),
                cache_cleanup_interval_secs: env::var("CACHE_CLEANUP_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.cache_cleanup_interval_secs),
                cache_max_age_secs: env::var("CACHE_MAX_AGE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.cache_max_age_secs),
                stats_log_interval_secs: env::var("STATS_LOG_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.stats_log_interval_secs),
                batch_delay_ms: env::var("BATCH_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bot.batch_delay_ms),
            },
            market_data: MarketDataConfig {
                chart_interval,
                candle_limit: env::var("CANDLE_LIMIT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.market_data.candle_limit),
                min_candles: defaults.market_data.min_candles,
                exchanges: env::var("EXCHANGE_ALTERNATIVES")
                    .ok()
                    .map(|v| parse_list(&v))
                    .filter(|list| !list.is_empty())
                    .unwrap_or(defaults.market_data.exchanges),
                http_timeout_secs: env::var("HTTP_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.market_data.http_timeout_secs),
                retry_attempts: env::var("ANALYSIS_RETRY_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.market_data.retry_attempts),
                retry_base_delay_ms: env::var("ANALYSIS_RETRY_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.market_data.retry_base_delay_ms),
                retry_backoff_factor: env::var("ANALYSIS_RETRY_BACKOFF")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.market_data.retry_backoff_factor),
            },
            signals: SignalPolicy {
                rsi_period: env::var("RSI_PERIOD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.rsi_period),
                sma_long_window: env::var("SMA_LONG_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.sma_long_window),
                sma_medium_window: env::var("SMA_MEDIUM_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.sma_medium_window),
                ema_window: env::var("EMA_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.ema_window),
                atr_period: env::var("ATR_PERIOD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.atr_period),
                atr_multiplier: env::var("ATR_MULTIPLIER")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.atr_multiplier),
                buy_rsi_below: env::var("BUY_RSI_BELOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.buy_rsi_below),
                buy_min_ma_confirmations: env::var("BUY_MIN_MA_CONFIRMATIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.buy_min_ma_confirmations),
                sell_rsi_above: env::var("SELL_RSI_ABOVE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.signals.sell_rsi_above),
            },
            sheets: SheetsConfig {
                api_url: env::var("GOOGLE_SHEETS_API_URL").unwrap_or(defaults.sheets.api_url),
                spreadsheet_id: env::var("GOOGLE_SHEET_ID").ok().filter(|v| !v.is_empty()),
                worksheet_name: env::var("GOOGLE_WORKSHEET_NAME")
                    .unwrap_or(defaults.sheets.worksheet_name),
                access_token: env::var("GOOGLE_ACCESS_TOKEN").ok().filter(|v| !v.is_empty()),
                cache_ttl_secs: env::var("SHEETS_CACHE_TTL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.sheets.cache_ttl_secs),
                max_backoff_secs: defaults.sheets.max_backoff_secs,
            },
            telegram: TelegramConfig {
                api_url: env::var("TELEGRAM_API_URL").unwrap_or(defaults.telegram.api_url),
                bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
                chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
            },
            exchange: ExchangeConfig {
                api_url: env::var("CRYPTO_API_URL").unwrap_or(defaults.exchange.api_url),
                api_key: env::var("CRYPTO_API_KEY").ok().filter(|v| !v.is_empty()),
                api_secret: env::var("CRYPTO_API_SECRET").ok().filter(|v| !v.is_empty()),
                auto_trade: env::var("AUTO_TRADE")
                    .ok()
                    .map(|v| parse_bool(&v))
                    .unwrap_or(defaults.exchange.auto_trade),
                trade_amount: env::var("TRADE_AMOUNT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.exchange.trade_amount),
                check_interval_secs: env::var("TRADE_CHECK_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.exchange.check_interval_secs),
                max_checks: env::var("TRADE_MAX_CHECKS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.exchange.max_checks),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Suspicious but usable values only produce warnings.
    pub fn validate(&self) -> Result<()> {
        let bot = &self.bot;
        if bot.update_interval_secs == 0 {
            return Err(AppError::Config("update_interval must be greater than 0".into()));
        }
        if bot.price_update_interval_secs == 0 {
            return Err(AppError::Config("price_update_interval must be greater than 0".into()));
        }
        if bot.batch_size == 0 {
            return Err(AppError::Config("batch_size must be greater than 0".into()));
        }
        if bot.workers == 0 {
            return Err(AppError::Config("workers must be greater than 0".into()));
        }
        if bot.discovery_workers == 0 {
            return Err(AppError::Config("discovery_workers must be greater than 0".into()));
        }
        if bot.failure_threshold == 0 {
            return Err(AppError::Config("failure_threshold must be greater than 0".into()));
        }

        let market = &self.market_data;
        if market.exchanges.is_empty() {
            return Err(AppError::Config("at least one exchange alternative is required".into()));
        }
        if market.retry_attempts == 0 {
            return Err(AppError::Config("retry attempts must be at least 1".into()));
        }
        if market.retry_backoff_factor < 1.0 {
            return Err(AppError::Config("retry backoff factor must be >= 1.0".into()));
        }

        let signals = &self.signals;
        if signals.rsi_period == 0
            || signals.sma_long_window == 0
            || signals.sma_medium_window == 0
            || signals.ema_window == 0
            || signals.atr_period == 0
        {
            return Err(AppError::Config("indicator windows must be greater than 0".into()));
        }
        if signals.atr_multiplier <= 0.0 {
            return Err(AppError::Config("ATR multiplier must be greater than 0".into()));
        }
        if !(0.0..=100.0).contains(&signals.buy_rsi_below)
            || !(0.0..=100.0).contains(&signals.sell_rsi_above)
        {
            return Err(AppError::Config("RSI thresholds must be within 0..=100".into()));
        }
        if signals.buy_min_ma_confirmations > 3 {
            return Err(AppError::Config("BUY needs at most 3 moving average confirmations".into()));
        }

        if self.exchange.auto_trade {
            if self.exchange.api_key.is_none() || self.exchange.api_secret.is_none() {
                return Err(AppError::Config(
                    "AUTO_TRADE requires CRYPTO_API_KEY and CRYPTO_API_SECRET".into(),
                ));
            }
            if self.exchange.trade_amount <= 0.0 {
                return Err(AppError::Config("trade_amount must be greater than 0".into()));
            }
        }

        if bot.update_interval_secs < 30 {
            warn!(
                "update_interval is very low ({}s), this might cause API rate limit issues",
                bot.update_interval_secs
            );
        }
        if bot.batch_size > 10 {
            warn!("batch_size is high ({}), this might cause performance issues", bot.batch_size);
        }

        Ok(())
    }
}
