use super::{http_client, CandleFuture, CandleSource};
use crate::error::AppError;
use crate::types::{ChartInterval, OhlcPoint};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const OKX_API_URL: &str = "https://www.okx.com/api/v5";

/// OKX error codes meaning the instrument does not exist or the request is malformed.
const UNKNOWN_INSTRUMENT_CODES: [&str; 3] = ["51000", "51001", "51015"];

/// OKX candles response.
#[derive(Debug, Deserialize)]
struct OkxResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Vec<String>>,
}

/// OKX REST client for candle data.
#[derive(Clone)]
pub struct OkxClient {
    client: Client,
    base_url: String,
}

impl OkxClient {
    /// Create a new OKX client.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: OKX_API_URL.to_string(),
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
        let limit = limit.min(300).to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("instId", symbol),
                ("bar", interval.okx_code()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            warn!("OKX API returned {}", status);
            return Err(AppError::ExternalApi(format!("OKX API error: {}", status)));
        }

        let body: OkxResponse = response.json().await?;
        let candles = candles_from_response(symbol, body)?;
        debug!("OKX returned {} candles for {}", candles.len(), symbol);
        Ok(candles)
    }
}

impl CandleSource for OkxClient {
    fn exchange(&self) -> &str {
        "OKX"
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
/// Rows are `[ts(ms), o, h, l, c, vol, volCcy, volCcyQuote, confirm]`, newest first.
fn candles_from_response(symbol: &str, body: OkxResponse) -> Result<Vec<OhlcPoint>, AppError> {
    if body.code != "0" {
        if UNKNOWN_INSTRUMENT_CODES.contains(&body.code.as_str()) {
            debug!("OKX rejected {}: {} ({})", symbol, body.msg, body.code);
            return Err(AppError::SymbolNotFound(format!("OKX:{}", symbol)));
        }
        return Err(AppError::ExternalApi(format!("OKX API error {}: {}", body.code, body.msg)));
    }

    let mut candles: Vec<OhlcPoint> = body
        .data
        .iter()
        .filter_map(|row| {
            let number = |i: usize| row.get(i).and_then(|v| v.parse::<f64>().ok());
            Some(OhlcPoint {
                time: row.first()?.parse::<i64>().ok()? / 1000,
                open: number(1)?,
                high: number(2)?,
                low: number(3)?,
                close: number(4)?,
                volume: number(5),
            })
        })
        .collect();

    if candles.is_empty() {
        return Err(AppError::SymbolNotFound(format!("OKX:{}", symbol)));
    }

    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_okx_response_deserialization() {
        let json = r#"{
            "code": "0",
            "msg": "",
            "data": [
                ["1700003600000", "43650", "43900", "43600", "43880", "98.1", "4300000", "4300000", "1"],
                ["1700000000000", "43500", "43800", "43200", "43650", "125.5", "5400000", "5400000", "1"]
            ]
        }"#;
        let response: OkxResponse = serde_json::from_str(json).unwrap();
        let candles = candles_from_response("BTC-USDT", response).unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, 1700000000);
        assert_eq!(candles[0].high, 43800.0);
        assert_eq!(candles[1].close, 43880.0);
    }

    #[test]
    fn test_unknown_instrument() {
        let response: OkxResponse = serde_json::from_str(
            r#"{"code":"51001","msg":"Instrument ID does not exist","data":[]}"#,
        )
        .unwrap();
        let err = candles_from_response("FOO-USDT", response).unwrap_err();
        assert!(matches!(err, AppError::SymbolNotFound(_)));
    }

    #[test]
    fn test_other_codes_are_transient() {
        let response: OkxResponse =
            serde_json::from_str(r#"{"code":"50011","msg":"Too Many Requests","data":[]}"#).unwrap();
        assert!(candles_from_response("BTC-USDT", response)
            .unwrap_err()
            .is_transient());
    }
}
