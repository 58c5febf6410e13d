use crate::services::backtester::BacktestError;
use crate::services::clustering::ClusterError;
use crate::services::outcome_tracker::TrackingError;
use crate::services::price_lookup::PriceLookupError;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    PriceLookup(#[from] PriceLookupError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
