use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle interval used when requesting chart data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl ChartInterval {
    /// Parse the interval from its short label.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(ChartInterval::OneMinute),
            "5m" => Some(ChartInterval::FiveMinutes),
            "15m" => Some(ChartInterval::FifteenMinutes),
            "30m" => Some(ChartInterval::ThirtyMinutes),
            "1h" => Some(ChartInterval::OneHour),
            "4h" => Some(ChartInterval::FourHours),
            "1d" => Some(ChartInterval::OneDay),
            "1w" => Some(ChartInterval::OneWeek),
            "1M" => Some(ChartInterval::OneMonth),
            _ => None,
        }
    }

    /// Short label, as used in configuration and by Binance.
    pub fn label(&self) -> &'static str {
        match self {
            ChartInterval::OneMinute => "1m",
            ChartInterval::FiveMinutes => "5m",
            ChartInterval::FifteenMinutes => "15m",
            ChartInterval::ThirtyMinutes => "30m",
            ChartInterval::OneHour => "1h",
            ChartInterval::FourHours => "4h",
            ChartInterval::OneDay => "1d",
            ChartInterval::OneWeek => "1w",
            ChartInterval::OneMonth => "1M",
        }
    }

    /// KuCoin candle type.
    pub fn kucoin_code(&self) -> &'static str {
        match self {
            ChartInterval::OneMinute => "1min",
            ChartInterval::FiveMinutes => "5min",
            ChartInterval::FifteenMinutes => "15min",
            ChartInterval::ThirtyMinutes => "30min",
            ChartInterval::OneHour => "1hour",
            ChartInterval::FourHours => "4hour",
            ChartInterval::OneDay => "1day",
            ChartInterval::OneWeek => "1week",
            // KuCoin has no monthly candles
            ChartInterval::OneMonth => "1week",
        }
    }

    /// OKX bar size.
    pub fn okx_code(&self) -> &'static str {
        match self {
            ChartInterval::OneMinute => "1m",
            ChartInterval::FiveMinutes => "5m",
            ChartInterval::FifteenMinutes => "15m",
            ChartInterval::ThirtyMinutes => "30m",
            ChartInterval::OneHour => "1H",
            ChartInterval::FourHours => "4H",
            ChartInterval::OneDay => "1D",
            ChartInterval::OneWeek => "1W",
            ChartInterval::OneMonth => "1M",
        }
    }

    /// Interval length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            ChartInterval::OneMinute => 60,
            ChartInterval::FiveMinutes => 300,
            ChartInterval::FifteenMinutes => 900,
            ChartInterval::ThirtyMinutes => 1800,
            ChartInterval::OneHour => 3600,
            ChartInterval::FourHours => 14400,
            ChartInterval::OneDay => 86400,
            ChartInterval::OneWeek => 604800,
            ChartInterval::OneMonth => 2592000,
        }
    }
}

impl fmt::Display for ChartInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// OHLC (Open, High, Low, Close) data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcPoint {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}
