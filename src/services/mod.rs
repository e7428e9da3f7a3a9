pub mod formats;
pub mod market_data;
pub mod orchestrator;
pub mod pair_analyzer;
pub mod retry;
pub mod signals;
pub mod stats;
pub mod symbol_manager;

pub use market_data::{AnalysisProvider, Lookup, MarketDataProvider};
pub use orchestrator::{CycleReport, Orchestrator};
pub use pair_analyzer::{ActionCounts, AnalysisOutcome, PairAnalyzer};
pub use retry::RetryPolicy;
pub use stats::{CycleStats, LogGate, StatsTracker};
pub use symbol_manager::{SymbolManager, SymbolStatistics};
