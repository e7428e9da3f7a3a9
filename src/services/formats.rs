//! Symbol normalisation and the provider-specific format candidates tried during discovery.

use std::collections::HashSet;
use std::fmt;

/// Quote currencies recognised at the end of a concatenated label such as `BTCUSDT`.
const KNOWN_QUOTES: [&str; 2] = ["USDT", "USD"];

/// A symbol as sent upstream, optionally pinned to one exchange (`BINANCE:BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolFormat {
    pub exchange: Option<String>,
    pub symbol: String,
}

impl SymbolFormat {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            exchange: None,
            symbol: symbol.into(),
        }
    }

    pub fn pinned(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: Some(exchange.into().to_uppercase()),
            symbol: symbol.into(),
        }
    }

}

impl fmt::Display for SymbolFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exchange {
            Some(exchange) => write!(f, "{}:{}", exchange, self.symbol),
            None => f.write_str(&self.symbol),
        }
    }
}

/// Normalise a sheet label to the canonical `BASE_QUOTE` form.
///
/// `BTC/USDT`, `BTC-USDT` and `btc_usdt` keep their quote; `BTCUSDT` and `BTCUSD` are
/// split on the known quote suffix; anything else is treated as a base quoted in USDT.
pub fn canonical_symbol(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '/' || c == '-' { '_' } else { c })
        .collect();

    if let Some((base, quote)) = cleaned.split_once('_') {
        if !base.is_empty() && !quote.is_empty() {
            return format!("{}_{}", base, quote.replace('_', ""));
        }
        let only = format!("{}{}", base, quote);
        return format!("{}_USDT", only);
    }

    for quote in KNOWN_QUOTES {
        if let Some(base) = cleaned.strip_suffix(quote) {
            if base.len() >= 2 {
                return format!("{}_{}", base, quote);
            }
        }
    }

    format!("{}_USDT", cleaned)
}

/// Split a canonical symbol into base and quote. Symbols without a quote default to USDT.
pub fn split_canonical(canonical: &str) -> (&str, &str) {
    canonical.split_once('_').unwrap_or((canonical, "USDT"))
}

/// The single format tried synchronously before discovery: base and quote concatenated.
pub fn quick_default(canonical: &str) -> SymbolFormat {
    let (base, quote) = split_canonical(canonical);
    SymbolFormat::new(format!("{}{}", base, quote))
}

/// Every format worth trying for a canonical symbol, in order, without duplicates.
///
/// Raw, concatenated, slash, dash and base-only forms come first, then the same forms
/// pinned to each exchange, then USD and perpetual variants for USDT pairs.
pub fn candidate_formats(canonical: &str, exchanges: &[String]) -> Vec<SymbolFormat> {
    let (base, quote) = split_canonical(canonical);

    let base_forms = vec![
        format!("{}_{}", base, quote),
        format!("{}{}", base, quote),
        format!("{}/{}", base, quote),
        format!("{}-{}", base, quote),
        base.to_string(),
    ];

    let mut candidates: Vec<SymbolFormat> =
        base_forms.iter().map(|form| SymbolFormat::new(form.as_str())).collect();

    for exchange in exchanges {
        for form in &base_forms {
            candidates.push(SymbolFormat::pinned(exchange.as_str(), form.as_str()));
        }
    }

    if quote == "USDT" {
        for variant in [
            format!("{}_USD", base),
            format!("{}USD", base),
            format!("{}/USD", base),
            format!("{}-USD", base),
            format!("{}_PERP", base),
            format!("{}PERP", base),
        ] {
            candidates.push(SymbolFormat::new(variant));
        }
    }

    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.to_string()));
    candidates
}
