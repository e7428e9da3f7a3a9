//! ATR based stop-loss and take-profit levels.

/// Exit levels for a long entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
}

/// Compute stop-loss, take-profit and risk/reward for an entry price.
///
/// Without a usable ATR the levels fall back to 95% and 110% of the entry.
/// With ATR the stop sits `atr * multiplier` below entry, pulled down to 99% of support
/// when support lies below the entry. The target is `atr * multiplier` above entry,
/// raised to resistance when resistance is higher.
pub fn calculate_levels(
    entry_price: f64,
    atr: f64,
    support: f64,
    resistance: f64,
    multiplier: f64,
) -> TradeLevels {
    let has_atr = atr.is_finite() && atr > 0.0;

    let stop_loss = if !has_atr {
        entry_price * 0.95
    } else {
        let atr_stop = entry_price - atr * multiplier;
        if support > 0.0 && support < entry_price {
            atr_stop.min(support) * 0.99
        } else {
            atr_stop
        }
    };

    let take_profit = if !has_atr {
        entry_price * 1.10
    } else {
        let floor = entry_price + atr * multiplier;
        if resistance > 0.0 && resistance > floor {
            resistance
        } else {
            floor
        }
    };

    TradeLevels {
        stop_loss,
        take_profit,
        risk_reward_ratio: risk_reward(entry_price, stop_loss, take_profit),
    }
}

/// Reward over risk, rounded to two decimals. Zero when there is no risk.
pub fn risk_reward(entry_price: f64, stop_loss: f64, take_profit: f64) -> f64 {
    let risk = entry_price - stop_loss;
    let reward = take_profit - entry_price;
    if risk > 0.0 {
        (reward / risk * 100.0).round() / 100.0
    } else {
        0.0
    }
}
