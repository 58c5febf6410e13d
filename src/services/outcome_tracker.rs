//! Multi-horizon outcome tracking.
//!
//! Each tracked signal gets one outcome row. `update_pending` claims due rows,
//! looks up the price at the next unresolved horizon and writes the result
//! back while releasing the claim.

use crate::config::TrackerConfig;
use crate::services::jobs::CancelFlag;
use crate::services::price_lookup::{PriceLookup, TradingCalendar};
use crate::services::sqlite_store::SqliteStore;
use crate::types::{
    is_well_formed_signal_type, Horizon, Outcome, OutcomeStatus, Signal, TrackingSummary,
    UpdateReport,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Signal {0} is already tracked")]
    DuplicateTracking(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Outcome store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// What happened to one claimed row.
#[derive(Debug, Default, Clone, Copy)]
struct RowResult {
    resolved: bool,
    deferred: bool,
    staled: bool,
}

/// Tracks price outcomes of fired signals.
pub struct OutcomeTracker {
    store: Arc<SqliteStore>,
    prices: Arc<dyn PriceLookup>,
    config: TrackerConfig,
    worker_id: String,
    calendar: TradingCalendar,
    lookups: Semaphore,
}

fn chrono_duration(d: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::days(36_500))
}

impl OutcomeTracker {
    pub fn new(
        store: Arc<SqliteStore>,
        prices: Arc<dyn PriceLookup>,
        config: TrackerConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        let calendar =
            TradingCalendar::new(config.market_close_hour_utc, config.fallback_lookback_days);
        let lookups = Semaphore::new(config.max_concurrent_lookups.max(1));
        Self {
            store,
            prices,
            config,
            worker_id: worker_id.into(),
            calendar,
            lookups,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn horizons(&self) -> &[Horizon] {
        &self.config.horizons
    }

    /// Persist a signal and start tracking it with a PENDING outcome.
    pub fn initialize_tracking(
        &self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<Outcome, TrackingError> {
        if !is_well_formed_signal_type(&signal.signal_type) {
            return Err(TrackingError::InvalidSignal(format!(
                "malformed signal type {:?}",
                signal.signal_type
            )));
        }
        if !(signal.price_at_trigger.is_finite() && signal.price_at_trigger > 0.0) {
            return Err(TrackingError::InvalidSignal(format!(
                "price_at_trigger must be positive, got {}",
                signal.price_at_trigger
            )));
        }
        if !signal.indicator_value.is_finite() {
            return Err(TrackingError::InvalidSignal(format!(
                "indicator_value must be finite, got {}",
                signal.indicator_value
            )));
        }
        if !(0.0..=1.0).contains(&signal.strength) {
            return Err(TrackingError::InvalidSignal(format!(
                "strength must be within 0..1, got {}",
                signal.strength
            )));
        }

        self.store.insert_signal(signal)?;

        let outcome = Outcome::pending(signal, &self.config.horizons, now);
        if !self.store.insert_outcome(&outcome)? {
            return Err(TrackingError::DuplicateTracking(signal.id.clone()));
        }

        debug!(
            "Tracking {} {} ({}), first horizon due {:?}",
            signal.symbol, signal.signal_type, signal.id, outcome.next_due_at
        );
        Ok(outcome)
    }

    /// Resolve due horizons for up to `batch_size` outcomes.
    pub async fn update_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<UpdateReport, TrackingError> {
        self.update_pending_with_cancel(batch_size, now, &CancelFlag::new())
            .await
    }

    /// Like [`update_pending`](Self::update_pending), but stops claiming rows
    /// once `cancel` is set. Rows already claimed are finished and released.
    pub async fn update_pending_with_cancel(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<UpdateReport, TrackingError> {
        let mut report = UpdateReport::default();
        if batch_size == 0 {
            return Ok(report);
        }

        let candidates = self.store.due_outcomes(now, batch_size)?;
        let lease_until = now + chrono_duration(self.config.claim_timeout);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (signal, mut outcome) in candidates {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.store.claim_outcome(
                &outcome.signal_id,
                outcome.version,
                &self.worker_id,
                now,
                lease_until,
            )? {
                outcome.version += 1;
                claimed.push((signal, outcome));
            } else {
                report.skipped += 1;
            }
        }
        report.claimed = claimed.len();

        let results = join_all(
            claimed
                .into_iter()
                .map(|(signal, outcome)| self.process_claimed(signal, outcome, now)),
        )
        .await;

        for result in results {
            match result {
                Ok(row) => {
                    report.resolved += row.resolved as usize;
                    report.deferred += row.deferred as usize;
                    report.staled += row.staled as usize;
                }
                Err(e) => error!("Failed to write outcome: {}", e),
            }
        }

        if report.claimed > 0 {
            info!(
                "Outcome update: {} claimed, {} resolved, {} deferred, {} stale, {} skipped",
                report.claimed, report.resolved, report.deferred, report.staled, report.skipped
            );
        }
        Ok(report)
    }

    /// Resolve the next horizon of a claimed row and release the claim.
    async fn process_claimed(
        &self,
        signal: Signal,
        mut outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<RowResult, TrackingError> {
        let horizons = &self.config.horizons;
        let mut result = RowResult::default();

        let Some(horizon) = outcome.next_unresolved(horizons) else {
            // Nothing left to measure; normalize and release.
            outcome.status = OutcomeStatus::Complete;
            outcome.next_due_at = None;
            outcome.updated_at = now;
            self.save(&outcome)?;
            return Ok(result);
        };

        let target = signal.target_time(horizon);
        if target > now {
            outcome.next_due_at = Some(target);
            self.save(&outcome)?;
            return Ok(result);
        }

        match self.lookup(&signal.symbol, target).await {
            Some(price) => {
                self.apply_price(&signal, &mut outcome, horizon, price, now);
                result.resolved = true;
            }
            None => {
                let misses = outcome.record_miss(horizon, now);
                if misses > self.config.max_retries_per_horizon {
                    match self.fallback_price(&signal, target).await {
                        Some(price) => {
                            info!(
                                "Resolved {} {} for {} from prior session close",
                                signal.symbol, horizon, signal.id
                            );
                            self.apply_price(&signal, &mut outcome, horizon, price, now);
                            result.resolved = true;
                        }
                        None => {
                            warn!(
                                "Outcome {} stale at {} after {} misses",
                                signal.id, horizon, misses
                            );
                            outcome.mark_stale(horizon, now);
                            result.staled = true;
                        }
                    }
                } else {
                    outcome.next_due_at = Some(now + chrono_duration(self.config.retry_delay));
                    result.deferred = true;
                    debug!(
                        "No price for {} at {} ({}), retry {}",
                        signal.symbol, horizon, signal.id, misses
                    );
                }
            }
        }

        self.save(&outcome)?;
        Ok(result)
    }

    fn apply_price(
        &self,
        signal: &Signal,
        outcome: &mut Outcome,
        horizon: Horizon,
        price: f64,
        now: DateTime<Utc>,
    ) {
        let horizons = &self.config.horizons;
        outcome.resolve(horizon, price, signal.price_at_trigger, horizons, now);
        outcome.next_due_at = outcome
            .next_unresolved(horizons)
            .map(|next| signal.target_time(next));
    }

    fn save(&self, outcome: &Outcome) -> Result<(), TrackingError> {
        if !self.store.save_claimed_outcome(outcome, &self.worker_id)? {
            warn!(
                "Claim on outcome {} was lost before the write; result discarded",
                outcome.signal_id
            );
        }
        Ok(())
    }

    /// Price lookup with a concurrency bound, per-call timeout and bounded
    /// exponential backoff. Exhausted attempts count as no data.
    async fn lookup(&self, symbol: &str, at: DateTime<Utc>) -> Option<f64> {
        let attempts = self.config.lookup_attempts.max(1);
        let mut backoff = self.config.lookup_backoff;

        for attempt in 1..=attempts {
            let outcome = {
                let _permit = self.lookups.acquire().await.ok()?;
                tokio::time::timeout(self.config.lookup_timeout, self.prices.get_price(symbol, at))
                    .await
            };

            match outcome {
                Ok(Ok(price)) => return price,
                Ok(Err(e)) => warn!(
                    "Price lookup for {} at {} failed (attempt {}/{}): {}",
                    symbol, at, attempt, attempts, e
                ),
                Err(_) => warn!(
                    "Price lookup for {} at {} timed out (attempt {}/{})",
                    symbol, at, attempt, attempts
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        None
    }

    /// Nearest prior session close after the trigger that has a price.
    async fn fallback_price(&self, signal: &Signal, target: DateTime<Utc>) -> Option<f64> {
        for close in self.calendar.prior_closes(target) {
            if close <= signal.triggered_at {
                break;
            }
            if let Some(price) = self.lookup(&signal.symbol, close).await {
                return Some(price);
            }
        }
        None
    }

    pub fn get_tracking_summary(&self) -> Result<TrackingSummary, TrackingError> {
        Ok(self.store.tracking_summary()?)
    }

    /// Release leases that expired at or before `now`.
    pub fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, TrackingError> {
        Ok(self.store.release_expired_claims(now)?)
    }
}
