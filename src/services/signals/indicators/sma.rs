//! Simple Moving Average (SMA) indicator.

use super::Indicator;
use crate::types::OhlcPoint;

/// SMA (Simple Moving Average) of closing prices over the last `period` candles.
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self { period: period.max(1) }
    }
}

impl Indicator for Sma {
    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[OhlcPoint]) -> Option<f64> {
        if candles.len() < self.period {
            return None;
        }

        let sma = candles
            .iter()
            .rev()
            .take(self.period)
            .map(|c| c.close)
            .sum::<f64>()
            / self.period as f64;

        Some(sma)
    }
}
