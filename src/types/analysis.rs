use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recommended action for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Wait,
}

impl Action {
    /// Label as written to the sheet.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Wait => "WAIT",
        }
    }

    /// Parse a sheet label. Unknown labels (including the legacy `HOLD`) map to `Wait`.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Action::Buy,
            "SELL" => Action::Sell,
            _ => Action::Wait,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of one successful analysis of a symbol.
///
/// A new value is produced on every analysis; cached values are replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Canonical symbol (`BASE_QUOTE`).
    pub symbol: String,
    /// Label as typed in the sheet, when it differs from the canonical symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_label: Option<String>,
    /// Provider-specific format that produced this result, e.g. `BINANCE:BTCUSDT`.
    pub formatted_symbol: String,
    pub last_price: f64,
    pub rsi: f64,
    pub ma200: f64,
    pub ma50: f64,
    pub ema10: f64,
    pub ma200_valid: bool,
    pub ma50_valid: bool,
    pub ema10_valid: bool,
    pub atr: f64,
    pub resistance: f64,
    pub support: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub risk_reward_ratio: f64,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    /// Name to show humans: the sheet label if known, else the canonical symbol.
    pub fn display_symbol(&self) -> &str {
        self.original_label.as_deref().unwrap_or(&self.symbol)
    }

    /// Number of moving averages the price is trading above.
    pub fn valid_ma_count(&self) -> usize {
        [self.ma200_valid, self.ma50_valid, self.ema10_valid]
            .iter()
            .filter(|v| **v)
            .count()
    }

    /// Timestamp formatted for the sheet and messages.
    pub fn timestamp_label(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
