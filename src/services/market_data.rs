//! Market data provider: finds a request format each upstream accepts for a symbol,
//! remembers it, and turns the candles into an analysis.
//!
//! A cached working format is tried first. Without one a single quick default guess is
//! made inline; if that is unknown everywhere, discovery over every candidate format runs
//! in the background and the caller is told to come back later.

use super::formats::{canonical_symbol, candidate_formats, quick_default, SymbolFormat};
use super::signals::analyze_candles;
use super::symbol_manager::SymbolManager;
use crate::config::Config;
use crate::error::AppError;
use crate::sources::CandleSource;
use crate::types::AnalysisResult;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Result of a single provider lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(AnalysisResult),
    /// Background discovery is running; ask again later.
    Discovering,
    NotFound,
}

/// Something that can produce an analysis for a canonical symbol.
pub trait AnalysisProvider: Send + Sync {
    /// Transient upstream failures are returned as `Err` so the caller can retry.
    fn lookup<'a>(
        &'a self,
        symbol: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Lookup, AppError>> + Send + 'a>>;

    /// Drop anything held for a symbol that is no longer tracked.
    fn forget(&self, _symbol: &str) {}

    /// Drop expired background results. Returns how many were removed.
    fn sweep(&self) -> usize {
        0
    }
}

struct ProviderState {
    sources: Vec<Arc<dyn CandleSource>>,
    /// Canonical symbol -> format that last returned data, always pinned to its exchange.
    working_formats: DashMap<String, SymbolFormat>,
    /// Results produced by background discovery, handed out once while younger than `discovered_ttl`.
    discovered: DashMap<String, (AnalysisResult, Instant)>,
    discovered_ttl: Duration,
    symbol_manager: Arc<SymbolManager>,
    discovery_slots: Arc<Semaphore>,
    shutdown: Arc<AtomicBool>,
    config: Arc<Config>,
}

/// Candle-backed [`AnalysisProvider`].
pub struct MarketDataProvider {
    state: Arc<ProviderState>,
}

impl MarketDataProvider {
    pub fn new(
        sources: Vec<Arc<dyn CandleSource>>,
        symbol_manager: Arc<SymbolManager>,
        shutdown: Arc<AtomicBool>,
        config: Arc<Config>,
    ) -> Self {
        let slots = config.bot.discovery_workers.max(1);
        Self {
            state: Arc::new(ProviderState {
                sources,
                working_formats: DashMap::new(),
                discovered: DashMap::new(),
                discovered_ttl: config.bot.update_interval(),
                symbol_manager,
                discovery_slots: Arc::new(Semaphore::new(slots)),
                shutdown,
                config,
            }),
        }
    }

    /// Convenience wrapper that folds every non-success into None.
    pub async fn get_analysis(&self, symbol: &str) -> Option<AnalysisResult> {
        match self.lookup(symbol).await {
            Ok(Lookup::Found(result)) => Some(result),
            Ok(_) => None,
            Err(e) => {
                error!("Error getting analysis for {}: {}", symbol, e);
                None
            }
        }
    }

    /// The cached working format for a symbol, as `EXCHANGE:SYMBOL`.
    pub fn working_format(&self, symbol: &str) -> Option<String> {
        self.state
            .working_formats
            .get(&canonical_symbol(symbol))
            .map(|f| f.value().to_string())
    }

    pub fn working_format_count(&self) -> usize {
        self.state.working_formats.len()
    }

    pub fn discovered_count(&self) -> usize {
        self.state.discovered.len()
    }

    async fn lookup_inner(&self, symbol: &str) -> Result<Lookup, AppError> {
        let state = &self.state;
        let canonical = canonical_symbol(symbol);

        if let Some((_, (result, found_at))) = state.discovered.remove(&canonical) {
            if found_at.elapsed() < state.discovered_ttl {
                debug!("Using discovered analysis for {}", canonical);
                return Ok(Lookup::Found(result));
            }
            debug!("Discovered analysis for {} expired, fetching fresh data", canonical);
        }

        let cached = state.working_formats.get(&canonical).map(|f| f.value().clone());
        if let Some(format) = cached {
            match state.try_format(&canonical, &format).await {
                Ok((_, result)) => return Ok(Lookup::Found(result)),
                Err(e) if e.is_transient() => return Err(e),
                Err(_) => {
                    warn!("Cached format {} for {} stopped working, rediscovering", format, canonical);
                    state.working_formats.remove(&canonical);
                }
            }
        }

        if state.symbol_manager.is_in_format_discovery(&canonical) {
            return Ok(Lookup::Discovering);
        }

        let guess = quick_default(&canonical);
        match state.try_format(&canonical, &guess).await {
            Ok((format, result)) => {
                debug!("Quick default {} works for {}", format, canonical);
                state.working_formats.insert(canonical, format);
                Ok(Lookup::Found(result))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(_) if self.start_discovery(&canonical) => Ok(Lookup::Discovering),
            Err(_) => Ok(Lookup::NotFound),
        }
    }

    /// Spawn background discovery. Returns false when shutting down.
    fn start_discovery(&self, canonical: &str) -> bool {
        let state = &self.state;
        if state.shutdown.load(Ordering::Relaxed) {
            return false;
        }
        if !state.symbol_manager.add_format_discovery(canonical) {
            return true;
        }

        let state = Arc::clone(state);
        let symbol = canonical.to_string();
        tokio::spawn(async move {
            state.discover(symbol).await;
        });
        true
    }
}

impl AnalysisProvider for MarketDataProvider {
    fn lookup<'a>(
        &'a self,
        symbol: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Lookup, AppError>> + Send + 'a>> {
        Box::pin(self.lookup_inner(symbol))
    }

    fn forget(&self, symbol: &str) {
        self.state.discovered.remove(&canonical_symbol(symbol));
    }

    fn sweep(&self) -> usize {
        let ttl = self.state.discovered_ttl;
        let before = self.state.discovered.len();
        self.state.discovered.retain(|_, (_, found_at)| found_at.elapsed() < ttl);
        before.saturating_sub(self.state.discovered.len())
    }
}

impl ProviderState {
    /// Try one format. Pinned formats go to their exchange only; bare ones go through the
    /// exchanges in order until one answers. Returns the winning format pinned to its exchange.
    async fn try_format(
        &self,
        canonical: &str,
        format: &SymbolFormat,
    ) -> Result<(SymbolFormat, AnalysisResult), AppError> {
        let market = &self.config.market_data;
        let mut last_transient: Option<AppError> = None;

        let sources = self.sources.iter().filter(|s| match &format.exchange {
            Some(exchange) => s.exchange().eq_ignore_ascii_case(exchange),
            None => true,
        });

        for source in sources {
            match source
                .fetch_candles(&format.symbol, market.chart_interval, market.candle_limit)
                .await
            {
                Ok(candles) => {
                    let pinned = SymbolFormat::pinned(source.exchange(), format.symbol.as_str());
                    let formatted = pinned.to_string();
                    match analyze_candles(canonical, &formatted, &candles, &self.config.signals, market.min_candles) {
                        Some(result) => return Ok((pinned, result)),
                        None => debug!(
                            "{} returned only {} candles for {}",
                            formatted,
                            candles.len(),
                            canonical
                        ),
                    }
                }
                Err(e) if e.is_transient() => {
                    debug!("{} failed for {} on {}: {}", format, canonical, source.exchange(), e);
                    last_transient = Some(e);
                }
                Err(_) => {}
            }
        }

        Err(last_transient.unwrap_or_else(|| AppError::SymbolNotFound(format!("{} as {}", canonical, format))))
    }

    async fn discover(self: Arc<Self>, symbol: String) {
        let _permit = match Arc::clone(&self.discovery_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Discovery pool closed, abandoning {}: {}", symbol, e);
                self.symbol_manager.remove_format_discovery(&symbol, false);
                return;
            }
        };

        let candidates = candidate_formats(&symbol, &self.config.market_data.exchanges);
        info!("Starting format discovery for {} ({} candidates)", symbol, candidates.len());

        for candidate in &candidates {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Shutdown requested, stopping discovery for {}", symbol);
                self.symbol_manager.remove_format_discovery(&symbol, false);
                return;
            }

            match self.try_format(&symbol, candidate).await {
                Ok((format, result)) => {
                    info!("Found working format for {}: {}", symbol, format);
                    self.working_formats.insert(symbol.clone(), format);
                    self.discovered.insert(symbol.clone(), (result, Instant::now()));
                    self.symbol_manager.remove_format_discovery(&symbol, true);
                    return;
                }
                Err(e) => debug!("Format {} failed for {}: {}", candidate, symbol, e),
            }
        }

        warn!("No working format found for {} after {} candidates", symbol, candidates.len());
        self.symbol_manager.remove_format_discovery(&symbol, false);
        let ticket = self.symbol_manager.begin_attempt();
        self.symbol_manager.track_failure_for(&symbol, ticket);
    }
}
