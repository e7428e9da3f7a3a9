//! Upstream exchanges: candle data for analysis and the optional order executor.

pub mod binance;
pub mod crypto_com;
pub mod kucoin;
pub mod okx;

pub use binance::BinanceClient;
pub use crypto_com::CryptoComClient;
pub use kucoin::KuCoinClient;
pub use okx::OkxClient;

use crate::config::MarketDataConfig;
use crate::error::AppError;
use crate::types::{ChartInterval, OhlcPoint, OrderSide, OrderStatus};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Future returned by [`CandleSource::fetch_candles`].
pub type CandleFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<OhlcPoint>, AppError>> + Send + 'a>>;

/// A market-data upstream that serves OHLC candles for a raw exchange symbol.
///
/// Implementations return [`AppError::SymbolNotFound`] when the upstream does not know the
/// symbol in the given format, and a transient error for anything else.
pub trait CandleSource: Send + Sync {
    /// Exchange identifier, e.g. `BINANCE`.
    fn exchange(&self) -> &str;

    /// Fetch up to `limit` candles, oldest first.
    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        interval: ChartInterval,
        limit: u32,
    ) -> CandleFuture<'a>;
}

/// Minimal order-placement contract. Failures are logged by the implementation and surface as None.
pub trait OrderExecutor: Send + Sync {
    fn get_current_price<'a>(
        &'a self,
        symbol: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<f64>> + Send + 'a>>;

    /// `amount` is the quote notional for buys and the base quantity for sells.
    fn place_market_order<'a>(
        &'a self,
        symbol: &'a str,
        side: OrderSide,
        amount: f64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

    fn get_order_status<'a>(
        &'a self,
        order_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<OrderStatus>> + Send + 'a>>;
}

/// Shared HTTP client construction for the upstream clients.
pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent("SheetSignalBot/1.0")
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Build candle sources in the configured exchange order. Unknown identifiers are skipped.
pub fn build_candle_sources(config: &MarketDataConfig) -> Vec<Arc<dyn CandleSource>> {
    let timeout = config.http_timeout();
    let mut sources: Vec<Arc<dyn CandleSource>> = Vec::new();

    for exchange in &config.exchanges {
        match exchange.to_uppercase().as_str() {
            "BINANCE" => sources.push(Arc::new(BinanceClient::new(timeout))),
            "KUCOIN" => sources.push(Arc::new(KuCoinClient::new(timeout))),
            "OKX" => sources.push(Arc::new(OkxClient::new(timeout))),
            other => warn!("Unknown exchange alternative {}, skipping", other),
        }
    }

    sources
}
