use super::{http_client, CandleFuture, CandleSource};
use crate::error::{snippet, AppError};
use crate::types::{ChartInterval, OhlcPoint};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const BINANCE_API_URL: &str = "https://api.binance.com/api/v3";

/// Binance error body, e.g. `{"code":-1121,"msg":"Invalid symbol."}`.
#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i64,
    msg: String,
}

/// Binance REST client for kline data.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    /// Create a new Binance client.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: BINANCE_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: ChartInterval,
        limit: u32,
    ) -> Result<Vec<OhlcPoint>, AppError> {
        let url = format!("{}/klines", self.base_url);
        let limit = limit.min(1000).to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval.label()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_error(symbol, status, &text));
        }

        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        let candles = parse_klines(&rows);
        debug!("Binance returned {} candles for {}", candles.len(), symbol);

        if candles.is_empty() {
            return Err(AppError::SymbolNotFound(format!("BINANCE:{}", symbol)));
        }
        Ok(candles)
    }
}

impl CandleSource for BinanceClient {
    fn exchange(&self) -> &str {
        "BINANCE"
    }

    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        interval: ChartInterval,
        limit: u32,
    ) -> CandleFuture<'a> {
        Box::pin(self.fetch_klines(symbol, interval, limit))
    }
}

/// Binance error code for a symbol it does not list.
const INVALID_SYMBOL: i64 = -1121;

/// Only a rejected request (400, or an explicit invalid-symbol code) means the symbol is unknown.
/// 401/403 blocks, the 418 IP ban and rate limits stay transient.
fn classify_error(symbol: &str, status: StatusCode, body: &str) -> AppError {
    let parsed = serde_json::from_str::<BinanceError>(body).ok();
    let invalid_symbol = parsed.as_ref().is_some_and(|e| e.code == INVALID_SYMBOL);

    if status == StatusCode::BAD_REQUEST || invalid_symbol {
        if let Some(err) = &parsed {
            debug!("Binance rejected {}: {} ({})", symbol, err.msg, err.code);
        }
        return AppError::SymbolNotFound(format!("BINANCE:{}", symbol));
    }
    warn!("Binance API returned {}: {}", status, snippet(body));
    AppError::ExternalApi(format!("Binance API error: {}", status))
}

/// Parse kline rows `[openTime, "open", "high", "low", "close", "volume", ...]`.
/// Malformed rows are skipped.
fn parse_klines(rows: &[Vec<serde_json::Value>]) -> Vec<OhlcPoint> {
    rows.iter()
        .filter_map(|row| {
            let number = |i: usize| -> Option<f64> {
                match row.get(i)? {
                    serde_json::Value::String(s) => s.parse().ok(),
                    serde_json::Value::Number(n) => n.as_f64(),
                    _ => None,
                }
            };
            Some(OhlcPoint {
                time: row.first()?.as_i64()? / 1000,
                open: number(1)?,
                high: number(2)?,
                low: number(3)?,
                close: number(4)?,
                volume: number(5),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_klines() {
        let json = r#"[
            [1700000000000, "43500.50", "43800.00", "43200.10", "43650.00", "1250.5", 1700003599999, "54000000", 1000, "600", "26000000", "0"],
            [1700003600000, "43650.00", "43900.00", "43600.00", "43880.25", "980.1", 1700007199999, "43000000", 800, "500", "21000000", "0"]
        ]"#;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(json).unwrap();
        let candles = parse_klines(&rows);

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, 1700000000);
        assert_eq!(candles[0].open, 43500.50);
        assert_eq!(candles[1].close, 43880.25);
        assert_eq!(candles[1].volume, Some(980.1));
    }

    #[test]
    fn test_parse_klines_skips_malformed_rows() {
        let json = r#"[[1700000000000, "abc", "1", "1", "1", "1"], [1700000000000]]"#;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(json).unwrap();
        assert!(parse_klines(&rows).is_empty());
    }

    #[test]
    fn test_binance_error_deserialization() {
        let err: BinanceError =
            serde_json::from_str(r#"{"code":-1121,"msg":"Invalid symbol."}"#).unwrap();
        assert_eq!(err.code, -1121);
        assert_eq!(err.msg, "Invalid symbol.");
    }

    #[test]
    fn test_classify_error() {
        let not_found = classify_error(
            "FOOUSDT",
            StatusCode::BAD_REQUEST,
            r#"{"code":-1121,"msg":"Invalid symbol."}"#,
        );
        assert!(matches!(not_found, AppError::SymbolNotFound(_)));
        assert!(!not_found.is_transient());

        let rate_limited = classify_error("BTCUSDT", StatusCode::TOO_MANY_REQUESTS, "");
        assert!(rate_limited.is_transient());

        let outage = classify_error("BTCUSDT", StatusCode::BAD_GATEWAY, "<html>");
        assert!(matches!(outage, AppError::ExternalApi(_)));
    }

    #[test]
    fn test_bans_and_blocks_are_transient() {
        let banned = classify_error(
            "BTCUSDT",
            StatusCode::IM_A_TEAPOT,
            r#"{"code":-1003,"msg":"Way too many requests; IP banned until 1700000000000."}"#,
        );
        assert!(matches!(banned, AppError::ExternalApi(_)));
        assert!(banned.is_transient());

        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let blocked = classify_error("BTCUSDT", status, "<html>Forbidden</html>");
            assert!(blocked.is_transient(), "{} should be retried", status);
        }
    }

    #[test]
    fn test_invalid_symbol_code_is_not_found() {
        let err = classify_error(
            "FOOUSDT",
            StatusCode::NOT_FOUND,
            r#"{"code":-1121,"msg":"Invalid symbol."}"#,
        );
        assert!(matches!(err, AppError::SymbolNotFound(_)));
    }

    #[test]
    fn test_exchange_id() {
        let client = BinanceClient::new(Duration::from_secs(5));
        assert_eq!(client.exchange(), "BINANCE");
    }
}
