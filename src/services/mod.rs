pub mod analytics;
pub mod backtester;
pub mod cache;
pub mod clustering;
pub mod filter;
pub mod jobs;
pub mod outcome_tracker;
pub mod price_lookup;
pub mod quality;
pub mod signal_store;
pub mod sqlite_store;

pub use analytics::SignalAnalytics;
pub use backtester::{BacktestEngine, BacktestError};
pub use cache::Cache;
pub use clustering::{ClusterError, PatternClusterer};
pub use filter::SignalFilter;
pub use jobs::CancelFlag;
pub use outcome_tracker::{OutcomeTracker, TrackingError};
pub use price_lookup::{
    PriceHistory, PriceLookup, PriceLookupError, SqlitePriceLookup, TradingCalendar,
};
pub use quality::QualityScorer;
pub use signal_store::SignalStore;
pub use sqlite_store::{HistoryQuery, SqliteStore};
