//! Turns a candle series into an [`AnalysisResult`].
//!
//! Indicators that lack history fall back to fixed offsets from the last close instead
//! of failing: SMA long to 85%, SMA medium to 90%, EMA to 95%, RSI to 50 and ATR to 0.

pub mod indicators;
pub mod levels;

pub use indicators::{Atr, Ema, Indicator, Rsi, Sma};
pub use levels::{calculate_levels, risk_reward, TradeLevels};

use crate::config::SignalPolicy;
use crate::types::{Action, AnalysisResult, OhlcPoint};
use chrono::Utc;

/// Raw indicator values for the latest candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub last_price: f64,
    pub rsi: f64,
    pub ma200: f64,
    pub ma50: f64,
    pub ema10: f64,
    pub atr: f64,
    pub resistance: f64,
    pub support: f64,
}

impl IndicatorSnapshot {
    pub fn ma_flags(&self) -> (bool, bool, bool) {
        (
            self.last_price > self.ma200,
            self.last_price > self.ma50,
            self.last_price > self.ema10,
        )
    }
}

/// Compute indicators. Returns None when fewer than `min_candles` candles are available.
pub fn compute_indicators(
    candles: &[OhlcPoint],
    policy: &SignalPolicy,
    min_candles: usize,
) -> Option<IndicatorSnapshot> {
    if candles.len() < min_candles.max(1) {
        return None;
    }
    let last = candles.last()?;
    let price = last.close;

    let value_or = |indicator: &dyn Indicator, fallback: f64| -> f64 {
        indicator.calculate(candles).unwrap_or(fallback)
    };

    Some(IndicatorSnapshot {
        last_price: price,
        rsi: value_or(&Rsi::new(policy.rsi_period), 50.0),
        ma200: value_or(&Sma::new(policy.sma_long_window), price * 0.85),
        ma50: value_or(&Sma::new(policy.sma_medium_window), price * 0.90),
        ema10: value_or(&Ema::new(policy.ema_window), price * 0.95),
        atr: value_or(&Atr::new(policy.atr_period), 0.0),
        resistance: last.high * 1.05,
        support: last.low * 0.95,
    })
}

/// BUY on oversold RSI with enough moving averages below the price, SELL on overbought RSI
/// above resistance, otherwise WAIT.
pub fn classify(snapshot: &IndicatorSnapshot, policy: &SignalPolicy) -> Action {
    let (ma200_valid, ma50_valid, ema10_valid) = snapshot.ma_flags();
    let confirmations = [ma200_valid, ma50_valid, ema10_valid]
        .iter()
        .filter(|v| **v)
        .count();

    if snapshot.rsi < policy.buy_rsi_below && confirmations >= policy.buy_min_ma_confirmations {
        Action::Buy
    } else if snapshot.rsi > policy.sell_rsi_above && snapshot.last_price > snapshot.resistance {
        Action::Sell
    } else {
        Action::Wait
    }
}

/// Build a full analysis for `symbol` from candles fetched with `formatted_symbol`.
pub fn analyze_candles(
    symbol: &str,
    formatted_symbol: &str,
    candles: &[OhlcPoint],
    policy: &SignalPolicy,
    min_candles: usize,
) -> Option<AnalysisResult> {
    let snapshot = compute_indicators(candles, policy, min_candles)?;
    Some(build_result(symbol, formatted_symbol, &snapshot, policy))
}

/// Assemble an [`AnalysisResult`] from already computed indicators.
pub fn build_result(
    symbol: &str,
    formatted_symbol: &str,
    snapshot: &IndicatorSnapshot,
    policy: &SignalPolicy,
) -> AnalysisResult {
    let (ma200_valid, ma50_valid, ema10_valid) = snapshot.ma_flags();
    let levels = calculate_levels(
        snapshot.last_price,
        snapshot.atr,
        snapshot.support,
        snapshot.resistance,
        policy.atr_multiplier,
    );

    AnalysisResult {
        symbol: symbol.to_string(),
        original_label: None,
        formatted_symbol: formatted_symbol.to_string(),
        last_price: snapshot.last_price,
        rsi: snapshot.rsi,
        ma200: snapshot.ma200,
        ma50: snapshot.ma50,
        ema10: snapshot.ema10,
        ma200_valid,
        ma50_valid,
        ema10_valid,
        atr: snapshot.atr,
        resistance: snapshot.resistance,
        support: snapshot.support,
        take_profit: levels.take_profit,
        stop_loss: levels.stop_loss,
        risk_reward_ratio: levels.risk_reward_ratio,
        action: classify(snapshot, policy),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicators::test_candles::{downtrend, flat, uptrend};

    fn snapshot(rsi: f64, price: f64, ma200: f64, ma50: f64, ema10: f64, resistance: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            last_price: price,
            rsi,
            ma200,
            ma50,
            ema10,
            atr: 1.0,
            resistance,
            support: price * 0.9,
        }
    }

    #[test]
    fn test_too_few_candles() {
        let policy = SignalPolicy::default();
        assert!(compute_indicators(&uptrend(19), &policy, 20).is_none());
        assert!(compute_indicators(&uptrend(20), &policy, 20).is_some());
    }

    #[test]
    fn test_fallbacks_with_short_history() {
        let policy = SignalPolicy::default();
        let candles = flat(20, 100.0);
        let snap = compute_indicators(&candles, &policy, 20).unwrap();

        assert!((snap.ma200 - 85.0).abs() < 1e-9);
        assert!((snap.ma50 - 90.0).abs() < 1e-9);
        // 20 candles cover the EMA window, so it is computed
        assert!((snap.ema10 - 100.0).abs() < 1e-9);
        assert_eq!(snap.atr, 0.0);
        assert!((snap.resistance - 105.0).abs() < 1e-9);
        assert!((snap.support - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_fallback() {
        let policy = SignalPolicy {
            rsi_period: 30,
            ..SignalPolicy::default()
        };
        let snap = compute_indicators(&uptrend(25), &policy, 20).unwrap();
        assert_eq!(snap.rsi, 50.0);
    }

    #[test]
    fn test_classify_buy() {
        let policy = SignalPolicy::default();
        let snap = snapshot(35.0, 100.0, 90.0, 95.0, 105.0, 110.0);
        assert_eq!(classify(&snap, &policy), Action::Buy);
    }

    #[test]
    fn test_classify_buy_needs_confirmations() {
        let policy = SignalPolicy::default();
        let snap = snapshot(35.0, 100.0, 90.0, 105.0, 105.0, 110.0);
        assert_eq!(classify(&snap, &policy), Action::Wait);
    }

    #[test]
    fn test_classify_sell() {
        let policy = SignalPolicy::default();
        let snap = snapshot(75.0, 100.0, 90.0, 95.0, 98.0, 99.0);
        assert_eq!(classify(&snap, &policy), Action::Sell);

        let below_resistance = snapshot(75.0, 100.0, 90.0, 95.0, 98.0, 101.0);
        assert_eq!(classify(&below_resistance, &policy), Action::Wait);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let policy = SignalPolicy {
            buy_rsi_below: 50.0,
            buy_min_ma_confirmations: 3,
            ..SignalPolicy::default()
        };
        let snap = snapshot(45.0, 100.0, 90.0, 95.0, 98.0, 110.0);
        assert_eq!(classify(&snap, &policy), Action::Buy);
    }

    #[test]
    fn test_analyze_flat_market_uses_fallback_levels() {
        let policy = SignalPolicy::default();
        let result = analyze_candles("BTC_USDT", "BINANCE:BTCUSDT", &flat(30, 100.0), &policy, 20).unwrap();

        assert_eq!(result.symbol, "BTC_USDT");
        assert_eq!(result.formatted_symbol, "BINANCE:BTCUSDT");
        assert!((result.stop_loss - 95.0).abs() < 1e-9);
        assert!((result.take_profit - 110.0).abs() < 1e-9);
        assert!((result.risk_reward_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_downtrend_is_not_buy_without_confirmations() {
        let policy = SignalPolicy::default();
        let result = analyze_candles("ETH_USDT", "ETHUSDT", &downtrend(60), &policy, 20).unwrap();
        assert!(result.rsi < 40.0);
        assert!(!result.ma50_valid);
        assert_ne!(result.action, Action::Buy);
    }
}
