use super::{http_client, CandleFuture, CandleSource};
use crate::error::AppError;
use crate::types::{ChartInterval, OhlcPoint};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const KUCOIN_API_URL: &str = "https://api.kucoin.com/api/v1";

/// KuCoin candles response.
#[derive(Debug, Deserialize)]
struct KuCoinResponse {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Vec<Vec<String>>>,
}

/// KuCoin REST client for candle data.
#[derive(Clone)]
pub struct KuCoinClient {
    client: Client,
    base_url: String,
}

impl KuCoinClient {
    /// Create a new KuCoin client.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: KUCOIN_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch(
        &self,
        symbol: &str,
        interval: ChartInterval,
        limit: u32,
    ) -> Result<Vec<OhlcPoint>, AppError> {
        let url = format!("{}/market/candles", self.base_url);
        let start_at = (chrono::Utc::now().timestamp() - interval.seconds() * limit as i64).max(0);
        let start_at = start_at.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("type", interval.kucoin_code()),
                ("symbol", symbol),
                ("startAt", start_at.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            warn!("KuCoin API returned {}", status);
            return Err(AppError::ExternalApi(format!("KuCoin API error: {}", status)));
        }

        let body: KuCoinResponse = response.json().await?;
        let candles = candles_from_response(symbol, body)?;
        debug!("KuCoin returned {} candles for {}", candles.len(), symbol);

        let skip = candles.len().saturating_sub(limit as usize);
        Ok(candles.into_iter().skip(skip).collect())
    }
}

impl CandleSource for KuCoinClient {
    fn exchange(&self) -> &str {
        "KUCOIN"
    }

    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        interval: ChartInterval,
        limit: u32,
    ) -> CandleFuture<'a> {
        Box::pin(self.fetch(symbol, interval, limit))
    }
}

/// Validate the envelope and convert rows, oldest first.
///
/// Rows are `[time, open, close, high, low, volume, turnover]`, newest first.
fn candles_from_response(symbol: &str, body: KuCoinResponse) -> Result<Vec<OhlcPoint>, AppError> {
    if body.code != "200000" {
        let msg = body.msg.unwrap_or_default();
        // 400xxx codes reject the request itself, which for candles means the symbol
        if body.code.starts_with("400") {
            debug!("KuCoin rejected {}: {} ({})", symbol, msg, body.code);
            return Err(AppError::SymbolNotFound(format!("KUCOIN:{}", symbol)));
        }
        return Err(AppError::ExternalApi(format!("KuCoin API error {}: {}", body.code, msg)));
    }

    let mut candles: Vec<OhlcPoint> = body
        .data
        .unwrap_or_default()
        .iter()
        .filter_map(|row| {
            let number = |i: usize| row.get(i).and_then(|v| v.parse::<f64>().ok());
            Some(OhlcPoint {
                time: row.first()?.parse().ok()?,
                open: number(1)?,
                close: number(2)?,
                high: number(3)?,
                low: number(4)?,
                volume: number(5),
            })
        })
        .collect();

    if candles.is_empty() {
        return Err(AppError::SymbolNotFound(format!("KUCOIN:{}", symbol)));
    }

    candles.sort_by_key(|c| c.time);
    Ok(candles)
}
