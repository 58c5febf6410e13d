//! Augur - signal outcome tracking, grading, backtesting and pattern clustering

pub mod config;
pub mod error;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
pub use services::{
    BacktestEngine, CancelFlag, OutcomeTracker, PatternClusterer, QualityScorer, SignalAnalytics,
    SignalFilter, SqliteStore,
};
pub use types::*;
