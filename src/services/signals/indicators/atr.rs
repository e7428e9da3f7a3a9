//! Average True Range (ATR) indicator.

use super::Indicator;
use crate::types::OhlcPoint;

/// ATR (Average True Range) indicator.
///
/// Measures market volatility by calculating the average of true ranges:
/// TR = max(High-Low, |High-PrevClose|, |Low-PrevClose|)
pub struct Atr {
    period: usize,
}

impl Default for Atr {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self { period: period.max(1) }
    }

    /// Calculate True Range.
    fn true_range(current: &OhlcPoint, previous: &OhlcPoint) -> f64 {
        let hl = current.high - current.low;
        let hc = (current.high - previous.close).abs();
        let lc = (current.low - previous.close).abs();
        hl.max(hc).max(lc)
    }
}

impl Indicator for Atr {
    fn min_periods(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[OhlcPoint]) -> Option<f64> {
        if candles.len() < self.min_periods() {
            return None;
        }

        let true_ranges: Vec<f64> = candles
            .windows(2)
            .map(|w| Self::true_range(&w[1], &w[0]))
            .collect();

        // Wilder's smoothing
        let mut atr: f64 = true_ranges.iter().take(self.period).sum::<f64>() / self.period as f64;
        for tr in true_ranges.iter().skip(self.period) {
            atr = (atr * (self.period - 1) as f64 + tr) / self.period as f64;
        }

        Some(atr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::signals::indicators::test_candles::{flat, uptrend};

    #[test]
    fn test_atr_min_periods() {
        assert_eq!(Atr::default().min_periods(), 15);
    }

    #[test]
    fn test_atr_insufficient_data() {
        assert!(Atr::default().calculate(&uptrend(10)).is_none());
    }

    #[test]
    fn test_atr_positive_value() {
        let value = Atr::default().calculate(&uptrend(30)).unwrap();
        assert!(value > 0.0);
    }

    #[test]
    fn test_atr_constant_range() {
        // Every uptrend candle spans 3.0 and gaps stay inside that span
        let value = Atr::default().calculate(&uptrend(40)).unwrap();
        assert!((value - 3.0).abs() < 1e-9, "got {}", value);
    }

    #[test]
    fn test_atr_zero_for_flat_market() {
        let value = Atr::default().calculate(&flat(30, 10.0)).unwrap();
        assert_eq!(value, 0.0);
    }
}
