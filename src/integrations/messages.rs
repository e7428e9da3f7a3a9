//! Notification texts (Telegram Markdown).

use crate::types::{Action, AnalysisResult, ChartInterval};
use chrono::{DateTime, NaiveDate, TimeZone};
use std::fmt::Write;

/// RSI below this puts a symbol on the daily watch list.
const WATCH_LIST_RSI: f64 = 45.0;

pub fn startup<Tz: TimeZone>(coins: usize, interval: ChartInterval, update_secs: u64, now: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "*Crypto Trading Bot Started*\n\n\
         • Number of tracked coins: {}\n\
         • Analysis period: {}\n\
         • Update frequency: {} seconds\n\
         • Date/Time: {}\n\n\
         Bot is now actively running! Signals will be sent automatically.",
        coins,
        interval,
        update_secs,
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn initial_intro() -> &'static str {
    "📊 *Initial Analysis Results* 📊\n\nDetailed analyses of all coins below:"
}

pub fn initial_complete() -> &'static str {
    "✅ *Initial analysis completed* - Bot is now in normal operation mode."
}

pub fn rsi_status(rsi: f64) -> &'static str {
    if rsi < 30.0 {
        "📉 OVERSOLD"
    } else if rsi < 40.0 {
        "👀 WATCH (Buy Zone)"
    } else if rsi > 70.0 {
        "📈 OVERBOUGHT"
    } else if rsi > 60.0 {
        "👀 WATCH (Sell Zone)"
    } else {
        "➡️ NEUTRAL"
    }
}

fn mark(valid: bool) -> &'static str {
    if valid {
        "✅"
    } else {
        "❌"
    }
}

fn yes_no(valid: bool) -> &'static str {
    if valid {
        "YES"
    } else {
        "NO"
    }
}

/// Short per-symbol card sent the first time a symbol is analyzed.
pub fn initial_analysis(result: &AnalysisResult) -> String {
    let mut message = format!(
        "*{}*\nPrice: `{:.8}`\nRSI ({:.1}): {}\n",
        result.display_symbol(),
        result.last_price,
        result.rsi,
        rsi_status(result.rsi)
    );
    let _ = writeln!(
        message,
        "Techs: MA200 {} | MA50 {} | EMA10 {}",
        mark(result.ma200_valid),
        mark(result.ma50_valid),
        mark(result.ema10_valid)
    );

    match result.action {
        Action::Buy => {
            message.push_str("*ACTION: BUY* 🔥\n");
            let _ = writeln!(message, "Take Profit: `{:.8}`", result.take_profit);
            let _ = writeln!(message, "Stop Loss: `{:.8}`", result.stop_loss);
        }
        Action::Sell => message.push_str("*ACTION: SELL* 💰\n"),
        Action::Wait => message.push_str("Action: WAIT ⌛\n"),
    }
    message
}

/// BUY alert. None for any other action.
pub fn buy_signal(result: &AnalysisResult) -> Option<String> {
    if result.action != Action::Buy {
        return None;
    }

    let mut message = format!("*BUY SIGNAL: {}*\n\n", result.display_symbol());
    let _ = writeln!(message, "• Price: {:.8}", result.last_price);
    let _ = writeln!(message, "• RSI: {:.2}", result.rsi);
    let _ = writeln!(message, "• Take Profit: {:.8}", result.take_profit);
    let _ = writeln!(message, "• Stop Loss: {:.8}", result.stop_loss);
    if result.risk_reward_ratio > 0.0 {
        let _ = writeln!(message, "• Risk/Reward: {}:1", result.risk_reward_ratio);
    }
    if result.atr > 0.0 {
        let _ = writeln!(message, "• ATR: {:.8}", result.atr);
    }
    message.push_str("\nTechnical Indicators:\n");
    let _ = writeln!(message, "• MA200: {}", yes_no(result.ma200_valid));
    let _ = writeln!(message, "• MA50: {}", yes_no(result.ma50_valid));
    let _ = writeln!(message, "• EMA10: {}", yes_no(result.ema10_valid));
    let _ = write!(message, "\nTimestamp: {}", result.timestamp_label());
    Some(message)
}

pub fn daily_summary(results: &[AnalysisResult], date: NaiveDate) -> String {
    let buys: Vec<&AnalysisResult> = results.iter().filter(|r| r.action == Action::Buy).collect();
    let watch: Vec<&AnalysisResult> = results
        .iter()
        .filter(|r| r.action != Action::Buy && r.rsi < WATCH_LIST_RSI)
        .collect();
    let others = results.len() - buys.len() - watch.len();

    let mut message = format!("*Daily Summary - {}*\n\n", date.format("%Y-%m-%d"));

    let mut section = |title: &str, items: &[&AnalysisResult]| {
        if items.is_empty() {
            return;
        }
        let _ = writeln!(message, "{}", title);
        for r in items {
            let _ = writeln!(
                message,
                "• {} - RSI: {:.1}, Price: {:.8}",
                r.display_symbol(),
                r.rsi,
                r.last_price
            );
        }
        message.push('\n');
    };
    section("🔥 *BUY Signals:*", &buys);
    section("👀 *Watch List:*", &watch);

    let _ = write!(
        message,
        "Total Coins Tracked: {}\nBUY Signals: {}\nWATCH List: {}\nOthers: {}",
        results.len(),
        buys.len(),
        watch.len(),
        others
    );
    message
}

pub fn new_coins(symbols: &[String]) -> String {
    format!(
        "🔔 *NEW COINS ADDED*\n\nThe following coins were added to tracking:\n{}",
        symbols.join(", ")
    )
}

pub fn removed_coins(symbols: &[String]) -> String {
    format!(
        "🔕 *COINS REMOVED*\n\nThe following coins were removed from tracking:\n{}",
        symbols.join(", ")
    )
}

pub fn order_placed(symbol: &str, order_id: &str, amount: f64) -> String {
    format!(
        "🛒 *Market BUY placed: {}*\n\n• Amount: {}\n• Order ID: `{}`",
        symbol, amount, order_id
    )
}

pub fn order_finished(symbol: &str, order_id: &str, status: &str) -> String {
    format!("📦 *Order update: {}*\n\n• Order ID: `{}`\n• Status: {}", symbol, order_id, status)
}

pub fn stopped() -> &'static str {
    "⚠️ *Bot Stopped*\n\nCrypto trading bot was manually stopped."
}

pub fn fatal_error(error: &str) -> String {
    format!(
        "🚨 *Bot Error*\n\nA critical error occurred: {}\n\nThe bot will exit.",
        error
    )
}
