//! Historical price lookups used to resolve outcome horizons.

use crate::services::sqlite_store::SqliteStore;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc, Weekday};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure to reach the price source. A missing bar is not an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriceLookupError {
    #[error("Price source unavailable: {0}")]
    Unavailable(String),

    #[error("Price lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of historical prices.
#[async_trait::async_trait]
pub trait PriceLookup: Send + Sync {
    /// Price of `symbol` at `at`, or `None` when no bar covers that time.
    async fn get_price(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, PriceLookupError>;
}

/// In-memory price bars per symbol.
///
/// A lookup returns the latest bar at or before the requested time, provided
/// it is no older than the staleness tolerance.
pub struct PriceHistory {
    bars: DashMap<String, BTreeMap<i64, f64>>,
    tolerance_ms: i64,
}

impl PriceHistory {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            bars: DashMap::new(),
            tolerance_ms: tolerance.as_millis() as i64,
        }
    }

    /// Record a price bar.
    pub fn record(&self, symbol: &str, at: DateTime<Utc>, price: f64) {
        self.bars
            .entry(symbol.to_lowercase())
            .or_default()
            .insert(at.timestamp_millis(), price);
    }

    pub fn lookup(&self, symbol: &str, at: DateTime<Utc>) -> Option<f64> {
        let bars = self.bars.get(&symbol.to_lowercase())?;
        let at_ms = at.timestamp_millis();
        let (time, price) = bars.range(..=at_ms).next_back()?;
        if at_ms - time <= self.tolerance_ms {
            Some(*price)
        } else {
            None
        }
    }

    /// Number of symbols with at least one bar.
    pub fn symbol_count(&self) -> usize {
        self.bars.len()
    }
}

#[async_trait::async_trait]
impl PriceLookup for PriceHistory {
    async fn get_price(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, PriceLookupError> {
        Ok(self.lookup(symbol, at))
    }
}

/// Price lookups served from the `price_bars` table.
pub struct SqlitePriceLookup {
    store: Arc<SqliteStore>,
    tolerance_ms: i64,
}

impl SqlitePriceLookup {
    pub fn new(store: Arc<SqliteStore>, tolerance: Duration) -> Self {
        Self {
            store,
            tolerance_ms: tolerance.as_millis() as i64,
        }
    }
}

#[async_trait::async_trait]
impl PriceLookup for SqlitePriceLookup {
    async fn get_price(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, PriceLookupError> {
        self.store
            .price_at(symbol, at, self.tolerance_ms)
            .map_err(|e| PriceLookupError::Unavailable(e.to_string()))
    }
}

/// Weekday session closes used when the exact horizon time has no bar.
#[derive(Debug, Clone, Copy)]
pub struct TradingCalendar {
    close_hour_utc: u32,
    lookback_days: u32,
}

impl TradingCalendar {
    pub fn new(close_hour_utc: u32, lookback_days: u32) -> Self {
        Self {
            close_hour_utc: close_hour_utc.min(23),
            lookback_days,
        }
    }

    pub fn is_trading_day(day: Weekday) -> bool {
        !matches!(day, Weekday::Sat | Weekday::Sun)
    }

    /// Session closes at or before `target`, nearest first.
    pub fn prior_closes(&self, target: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let date = target.date_naive();
        (0..=self.lookback_days as i64)
            .filter_map(|back| {
                let day = date - ChronoDuration::days(back);
                if !Self::is_trading_day(day.weekday()) {
                    return None;
                }
                let close = day.and_hms_opt(self.close_hour_utc, 0, 0)?;
                let close = Utc.from_utc_datetime(&close);
                (close <= target).then_some(close)
            })
            .collect()
    }
}
