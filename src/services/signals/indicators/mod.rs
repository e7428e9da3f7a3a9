//! Technical indicator implementations.

pub mod atr;
pub mod ema;
pub mod rsi;
pub mod sma;

pub use atr::Atr;
pub use ema::Ema;
pub use rsi::Rsi;
pub use sma::Sma;

use crate::types::OhlcPoint;

/// A single-valued technical indicator over a candle series.
pub trait Indicator: Send + Sync {
    /// Minimum number of candles required for calculation.
    fn min_periods(&self) -> usize;

    /// Calculate the indicator value. Returns None if there is not enough history.
    fn calculate(&self, candles: &[OhlcPoint]) -> Option<f64>;
}

#[cfg(test)]
pub(crate) mod test_candles {
    use crate::types::OhlcPoint;

    pub fn uptrend(count: usize) -> Vec<OhlcPoint> {
        (0..count)
            .map(|i| {
                let base = 100.0 + i as f64 * 1.5;
                OhlcPoint {
                    time: 1000000 + i as i64 * 60000,
                    open: base,
                    high: base + 2.0,
                    low: base - 1.0,
                    close: base + 1.0,
                    volume: Some(1000.0),
                }
            })
            .collect()
    }

    pub fn downtrend(count: usize) -> Vec<OhlcPoint> {
        (0..count)
            .map(|i| {
                let base = 200.0 - i as f64 * 1.5;
                OhlcPoint {
                    time: 1000000 + i as i64 * 60000,
                    open: base,
                    high: base + 1.0,
                    low: base - 2.0,
                    close: base - 1.0,
                    volume: Some(1000.0),
                }
            })
            .collect()
    }

    pub fn flat(count: usize, price: f64) -> Vec<OhlcPoint> {
        (0..count)
            .map(|i| OhlcPoint {
                time: 1000000 + i as i64 * 60000,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: None,
            })
            .collect()
    }
}
