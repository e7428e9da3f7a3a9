//! Google Sheets v4 values API client.
//!
//! The worksheet has a header row with at least `Coin` and `TRADE` columns. Analysis values
//! are written to fixed columns (price in C, action in E, indicators from R onwards).

use super::{BoxFuture, SheetStore};
use crate::config::SheetsConfig;
use crate::error::{snippet, AppError};
use crate::services::formats::canonical_symbol;
use crate::services::retry::RetryPolicy;
use crate::sources::http_client;
use crate::types::{Action, AnalysisResult, SheetRow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const TRADE_FLAGS: [&str; 4] = ["YES", "Y", "TRUE", "1"];

// 1-based column numbers
const COL_LAST_PRICE: u32 = 3;
const COL_BUY_TARGET: u32 = 4;
const COL_ACTION: u32 = 5;
const COL_TAKE_PROFIT: u32 = 6;
const COL_STOP_LOSS: u32 = 7;
const COL_RSI: u32 = 18;
const COL_MA200: u32 = 19;
const COL_MA200_VALID: u32 = 20;
const COL_RESISTANCE: u32 = 21;
const COL_SUPPORT: u32 = 22;
const COL_LAST_UPDATED: u32 = 23;
const COL_MA50: u32 = 26;
const COL_EMA10: u32 = 27;
const COL_MA50_VALID: u32 = 28;
const COL_EMA10_VALID: u32 = 29;
const COL_SOURCE: u32 = 31;
const COL_MARGIN: u32 = 32;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest {
    value_input_option: &'static str,
    data: Vec<CellUpdate>,
}

#[derive(Debug, Serialize)]
struct CellUpdate {
    range: String,
    values: Vec<Vec<Value>>,
}

/// Values last written to a row, used to skip writes that would change nothing meaningful.
#[derive(Debug, Clone, PartialEq)]
struct WrittenValues {
    symbol: String,
    action: Action,
    last_price: f64,
    rsi: f64,
    ma50: f64,
    flags: (bool, bool, bool),
}

impl WrittenValues {
    fn from_result(result: &AnalysisResult) -> Self {
        Self {
            symbol: result.symbol.clone(),
            action: result.action,
            last_price: result.last_price,
            rsi: result.rsi,
            ma50: result.ma50,
            flags: (result.ma200_valid, result.ma50_valid, result.ema10_valid),
        }
    }

    /// Action change, price move over 0.1%, RSI move over 2 points, SMA50 move over 1%
    /// or any MA flag flip.
    fn differs_significantly(&self, result: &AnalysisResult) -> bool {
        let relative = |old: f64, new: f64| (old - new).abs() / old.max(1e-10);

        self.symbol != result.symbol
            || self.action != result.action
            || relative(self.last_price, result.last_price) > 0.001
            || (self.rsi - result.rsi).abs() > 2.0
            || relative(self.ma50, result.ma50) > 0.01
            || self.flags != (result.ma200_valid, result.ma50_valid, result.ema10_valid)
    }
}

#[derive(Debug, Default)]
struct RowCache {
    rows: Vec<SheetRow>,
    fetched_at: Option<Instant>,
    consecutive_errors: u32,
    retry_after: Option<Instant>,
}

/// Sheets client authenticated with an OAuth bearer token.
pub struct GoogleSheetsClient {
    client: Client,
    api_url: String,
    spreadsheet_id: String,
    worksheet: String,
    access_token: String,
    cache_ttl: Duration,
    max_backoff: Duration,
    retry: RetryPolicy,
    rows: Mutex<RowCache>,
    written: Mutex<HashMap<u32, WrittenValues>>,
}

impl GoogleSheetsClient {
    pub fn new(config: &SheetsConfig) -> Result<Self, AppError> {
        let spreadsheet_id = config
            .spreadsheet_id
            .clone()
            .ok_or_else(|| AppError::Config("GOOGLE_SHEET_ID is required".to_string()))?;
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| AppError::Config("GOOGLE_ACCESS_TOKEN is required".to_string()))?;

        Ok(Self {
            client: http_client(Duration::from_secs(30)),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            spreadsheet_id,
            worksheet: config.worksheet_name.clone(),
            access_token,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs.max(1)),
            retry: RetryPolicy::new(3, Duration::from_secs(2), 2.0),
            rows: Mutex::new(RowCache::default()),
            written: Mutex::new(HashMap::new()),
        })
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| AppError::Config(format!("Invalid Sheets API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("Sheets API URL cannot be a base".to_string()))?
            .push(&self.spreadsheet_id)
            .extend(tail);
        Ok(url)
    }

    async fn fetch_rows(&self) -> Result<Vec<SheetRow>, AppError> {
        let range = format!("{}!A:AF", self.worksheet);
        let url = self.endpoint(&["values", &range])?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Sheet(format!(
                "Reading {} returned {}: {}",
                range,
                status,
                snippet(&text)
            )));
        }

        let body: ValueRange = response.json().await?;
        Ok(parse_active_rows(&body.values))
    }

    async fn update_cells(&self, row: u32, cells: &[(u32, Value)]) -> Result<(), AppError> {
        let request = BatchUpdateRequest {
            value_input_option: "USER_ENTERED",
            data: cells
                .iter()
                .map(|(col, value)| CellUpdate {
                    range: format!("{}!{}{}", self.worksheet, column_letter(*col), row),
                    values: vec![vec![value.clone()]],
                })
                .collect(),
        };
        let url = self.endpoint(&["values:batchUpdate"])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(AppError::Sheet(format!(
            "Updating row {} returned {}: {}",
            row,
            status,
            snippet(&text)
        )))
    }

    async fn active_rows(&self, force_refresh: bool) -> Vec<SheetRow> {
        {
            let cache = self.rows.lock();
            let now = Instant::now();
            let fresh = cache
                .fetched_at
                .is_some_and(|t| now.duration_since(t) < self.cache_ttl);
            if fresh && !force_refresh {
                return cache.rows.clone();
            }
            if cache.retry_after.is_some_and(|t| now < t) {
                debug!("Sheet reads backing off, serving {} cached rows", cache.rows.len());
                return cache.rows.clone();
            }
        }

        let fetched = self.fetch_rows().await;

        let mut cache = self.rows.lock();
        match fetched {
            Ok(rows) => {
                debug!("Fetched {} active rows", rows.len());
                cache.rows = rows;
                cache.fetched_at = Some(Instant::now());
                cache.consecutive_errors = 0;
                cache.retry_after = None;
            }
            Err(e) => {
                cache.consecutive_errors += 1;
                let backoff = backoff_for(cache.consecutive_errors, self.max_backoff);
                cache.retry_after = Some(Instant::now() + backoff);
                warn!(
                    "Failed to read sheet ({} in a row), retrying in {:?}: {}",
                    cache.consecutive_errors, backoff, e
                );
            }
        }
        cache.rows.clone()
    }

    async fn write_full(&self, row: &SheetRow, result: &AnalysisResult) -> bool {
        let row_number = row.row_reference;
        let (full, cells) = planned_cells(self.written.lock().get(&row_number), result);
        if !full {
            info!("No significant changes for {}, refreshing timestamp only", result.symbol);
        }

        let label = format!("Sheet update for {}", result.symbol);
        match self
            .retry
            .run(&label, || self.update_cells(row_number, &cells), AppError::is_transient)
            .await
        {
            Ok(()) => {
                if full {
                    self.written
                        .lock()
                        .insert(row_number, WrittenValues::from_result(result));
                    info!("Updated analysis for row {}: {} - {}", row_number, result.symbol, result.action);
                }
                true
            }
            Err(e) => {
                error!("Failed to update row {} for {}: {}", row_number, result.symbol, e);
                false
            }
        }
    }

    async fn write_timestamp(&self, row: &SheetRow, timestamp: DateTime<Utc>) -> bool {
        let label = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let cells = [(COL_LAST_UPDATED, json!(label))];
        match self.update_cells(row.row_reference, &cells).await {
            Ok(()) => {
                debug!("Timestamp updated for row {}: {}", row.row_reference, label);
                true
            }
            Err(e) => {
                error!("Error updating timestamp for row {}: {}", row.row_reference, e);
                false
            }
        }
    }
}

impl SheetStore for GoogleSheetsClient {
    fn list_active_rows(&self, force_refresh: bool) -> BoxFuture<'_, Vec<SheetRow>> {
        Box::pin(self.active_rows(force_refresh))
    }

    fn write_analysis<'a>(&'a self, row: &'a SheetRow, result: &'a AnalysisResult) -> BoxFuture<'a, bool> {
        Box::pin(self.write_full(row, result))
    }

    fn write_timestamp_only<'a>(&'a self, row: &'a SheetRow, timestamp: DateTime<Utc>) -> BoxFuture<'a, bool> {
        Box::pin(self.write_timestamp(row, timestamp))
    }
}

/// 2^n seconds, capped.
fn backoff_for(consecutive_errors: u32, max: Duration) -> Duration {
    let secs = 2u64.saturating_pow(consecutive_errors.min(32));
    Duration::from_secs(secs).min(max)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rows whose `TRADE` cell is a yes-like flag and whose `Coin` cell is filled.
/// Row references are sheet row numbers: the header is row 1.
fn parse_active_rows(values: &[Vec<Value>]) -> Vec<SheetRow> {
    let Some(header) = values.first() else {
        return Vec::new();
    };
    let column = |name: &str| {
        header
            .iter()
            .position(|cell| cell_text(cell).eq_ignore_ascii_case(name))
    };
    let (Some(coin_col), Some(trade_col)) = (column("Coin"), column("TRADE")) else {
        warn!("Sheet header is missing the Coin or TRADE column");
        return Vec::new();
    };

    values
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(idx, row)| {
            let trade = row.get(trade_col).map(cell_text).unwrap_or_default();
            let coin = row.get(coin_col).map(cell_text).unwrap_or_default();
            let active = TRADE_FLAGS.contains(&trade.to_uppercase().as_str());
            if !active || coin.is_empty() {
                return None;
            }
            Some(SheetRow::new(canonical_symbol(&coin), coin, idx as u32 + 1))
        })
        .collect()
}

fn yes_no(flag: bool) -> Value {
    json!(if flag { "YES" } else { "NO" })
}

fn analysis_cells(result: &AnalysisResult) -> Vec<(u32, Value)> {
    let source = result
        .formatted_symbol
        .split_once(':')
        .map(|(exchange, _)| exchange)
        .unwrap_or("AUTO");

    let mut cells = vec![
        (COL_LAST_PRICE, json!(result.last_price)),
        (COL_BUY_TARGET, json!(result.last_price)),
        (COL_ACTION, json!(result.action.label())),
        (COL_RSI, json!(result.rsi)),
        (COL_MA200, json!(result.ma200)),
        (COL_MA200_VALID, yes_no(result.ma200_valid)),
        (COL_RESISTANCE, json!(result.resistance)),
        (COL_SUPPORT, json!(result.support)),
        (COL_LAST_UPDATED, json!(result.timestamp_label())),
        (COL_MA50, json!(result.ma50)),
        (COL_EMA10, json!(result.ema10)),
        (COL_MA50_VALID, yes_no(result.ma50_valid)),
        (COL_EMA10_VALID, yes_no(result.ema10_valid)),
        (COL_SOURCE, json!(source)),
        (COL_MARGIN, json!("NO")),
    ];
    if result.action == Action::Buy {
        cells.push((COL_TAKE_PROFIT, json!(result.take_profit)));
        cells.push((COL_STOP_LOSS, json!(result.stop_loss)));
    }
    cells
}

/// Cells an analysis write sends: every analysis cell when the row changed significantly
/// since the last write, otherwise only the last-updated stamp. The flag is true for a full write.
fn planned_cells(previous: Option<&WrittenValues>, result: &AnalysisResult) -> (bool, Vec<(u32, Value)>) {
    match previous {
        Some(prev) if !prev.differs_significantly(result) => {
            (false, vec![(COL_LAST_UPDATED, json!(result.timestamp_label()))])
        }
        _ => (true, analysis_cells(result)),
    }
}

/// A1 column letters for a 1-based column number.
fn column_letter(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(action: Action) -> AnalysisResult {
        AnalysisResult {
            symbol: "BTC_USDT".to_string(),
            original_label: None,
            formatted_symbol: "BINANCE:BTCUSDT".to_string(),
            last_price: 100.0,
            rsi: 35.0,
            ma200: 90.0,
            ma50: 95.0,
            ema10: 99.0,
            ma200_valid: true,
            ma50_valid: true,
            ema10_valid: true,
            atr: 2.0,
            resistance: 105.0,
            support: 95.0,
            take_profit: 105.0,
            stop_loss: 94.05,
            risk_reward_ratio: 0.84,
            action,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(23), "W");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(32), "AF");
    }

    #[test]
    fn test_parse_active_rows() {
        let json = r#"{"range":"Trading!A1:AF5","majorDimension":"ROWS","values":[
            ["Coin","TRADE","Last Price"],
            ["BTC","YES","43000"],
            ["ETH","no"],
            ["","Y"],
            ["sol/usdt","true"],
            ["DOGE"]
        ]}"#;
        let body: ValueRange = serde_json::from_str(json).unwrap();
        let rows = parse_active_rows(&body.values);

        assert_eq!(
            rows,
            vec![
                SheetRow::new("BTC_USDT", "BTC", 2),
                SheetRow::new("SOL_USDT", "sol/usdt", 5),
            ]
        );
    }

    #[test]
    fn test_parse_rows_without_header_columns() {
        let values = vec![vec![json!("Symbol"), json!("Enabled")], vec![json!("BTC"), json!("YES")]];
        assert!(parse_active_rows(&values).is_empty());
        assert!(parse_active_rows(&[]).is_empty());
    }

    #[test]
    fn test_backoff_for() {
        let max = Duration::from_secs(60);
        assert_eq!(backoff_for(1, max), Duration::from_secs(2));
        assert_eq!(backoff_for(3, max), Duration::from_secs(8));
        assert_eq!(backoff_for(6, max), max);
        assert_eq!(backoff_for(40, max), max);
    }

    #[test]
    fn test_take_profit_only_for_buy() {
        let buy_cols: Vec<u32> = analysis_cells(&result(Action::Buy)).iter().map(|c| c.0).collect();
        assert!(buy_cols.contains(&COL_TAKE_PROFIT));
        assert!(buy_cols.contains(&COL_STOP_LOSS));

        let wait_cells = analysis_cells(&result(Action::Wait));
        assert!(wait_cells.iter().all(|(col, _)| *col != COL_TAKE_PROFIT && *col != COL_STOP_LOSS));
        let source = wait_cells.iter().find(|(col, _)| *col == COL_SOURCE).unwrap();
        assert_eq!(source.1, json!("BINANCE"));
    }

    #[test]
    fn test_unchanged_row_still_gets_timestamp() {
        let first = result(Action::Wait);
        let (full, cells) = planned_cells(None, &first);
        assert!(full);
        assert_eq!(cells, analysis_cells(&first));

        let written = WrittenValues::from_result(&first);
        let mut later = first.clone();
        later.timestamp = first.timestamp + chrono::Duration::minutes(5);
        let (full, cells) = planned_cells(Some(&written), &later);
        assert!(!full);
        assert_eq!(cells, vec![(COL_LAST_UPDATED, json!(later.timestamp_label()))]);

        later.action = Action::Buy;
        let (full, cells) = planned_cells(Some(&written), &later);
        assert!(full);
        assert!(cells.iter().any(|(col, _)| *col == COL_TAKE_PROFIT));
    }

    #[test]
    fn test_significant_change_thresholds() {
        let base = result(Action::Wait);
        let written = WrittenValues::from_result(&base);
        assert!(!written.differs_significantly(&base));

        let mut small = base.clone();
        small.last_price = 100.05;
        small.rsi = 36.5;
        small.ma50 = 95.5;
        assert!(!written.differs_significantly(&small));

        let mut price = base.clone();
        price.last_price = 100.2;
        assert!(written.differs_significantly(&price));

        let mut rsi = base.clone();
        rsi.rsi = 37.5;
        assert!(written.differs_significantly(&rsi));

        let mut ma50 = base.clone();
        ma50.ma50 = 96.5;
        assert!(written.differs_significantly(&ma50));

        let mut flag = base.clone();
        flag.ema10_valid = false;
        assert!(written.differs_significantly(&flag));

        assert!(written.differs_significantly(&result(Action::Buy)));
    }

    #[test]
    fn test_new_requires_sheet_id_and_token() {
        assert!(GoogleSheetsClient::new(&SheetsConfig::default()).is_err());

        let config = SheetsConfig {
            spreadsheet_id: Some("sheet".to_string()),
            access_token: Some("token".to_string()),
            ..SheetsConfig::default()
        };
        let client = GoogleSheetsClient::new(&config).unwrap();
        let url = client.endpoint(&["values", "My Sheet!A:AF"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet/values/My%20Sheet!A:AF"
        );
    }
}
