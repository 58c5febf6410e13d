//! Entry point for notification and reporting collaborators.

use crate::config::Config;
use crate::error::Result;
use crate::services::backtester::BacktestEngine;
use crate::services::clustering::PatternClusterer;
use crate::services::filter::SignalFilter;
use crate::services::outcome_tracker::{OutcomeTracker, TrackingError};
use crate::services::price_lookup::PriceLookup;
use crate::services::quality::QualityScorer;
use crate::services::signal_store::SignalStore;
use crate::services::sqlite_store::SqliteStore;
use crate::types::{
    AlertDecision, BacktestReport, ClusterAssignment, Horizon, Outcome, QualityGrade, Signal,
    TrackingSummary,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signal analytics over one outcome store.
pub struct SignalAnalytics {
    store: Arc<SqliteStore>,
    tracker: Arc<OutcomeTracker>,
    scorer: Arc<QualityScorer>,
    filter: SignalFilter,
    backtester: Arc<BacktestEngine>,
    clusterer: Arc<PatternClusterer>,
}

impl SignalAnalytics {
    pub fn new(store: Arc<SqliteStore>, prices: Arc<dyn PriceLookup>, config: &Config) -> Self {
        Self {
            tracker: Arc::new(OutcomeTracker::new(
                store.clone(),
                prices,
                config.tracker.clone(),
                config.worker_id.clone(),
            )),
            scorer: Arc::new(QualityScorer::new(store.clone(), config.quality.clone())),
            filter: SignalFilter::new(config.filter.clone()),
            backtester: Arc::new(BacktestEngine::new(store.clone(), config.backtest.clone())),
            clusterer: Arc::new(PatternClusterer::new(store.clone(), config.cluster.clone())),
            store,
        }
    }

    /// Share cached grades through Redis.
    pub async fn connect_redis(&self, redis_url: &str) {
        self.scorer.connect_redis(redis_url).await;
    }

    pub fn tracker(&self) -> &Arc<OutcomeTracker> {
        &self.tracker
    }

    pub fn scorer(&self) -> &Arc<QualityScorer> {
        &self.scorer
    }

    pub fn backtester(&self) -> &Arc<BacktestEngine> {
        &self.backtester
    }

    pub fn clusterer(&self) -> &Arc<PatternClusterer> {
        &self.clusterer
    }

    /// Start tracking a freshly fired signal.
    pub fn track_signal(&self, signal: &Signal) -> Result<Outcome> {
        Ok(self.tracker.initialize_tracking(signal, Utc::now())?)
    }

    /// Pull signals fired since `since` from `source` and track the new ones.
    ///
    /// Empty `signal_types` means every type the source knows. Returns the
    /// number of signals that started tracking.
    pub async fn ingest_since(
        &self,
        source: &dyn SignalStore,
        signal_types: &[String],
        since: DateTime<Utc>,
    ) -> Result<usize> {
        let types = if signal_types.is_empty() {
            source.signal_types().await?
        } else {
            signal_types.to_vec()
        };

        let now = Utc::now();
        let mut tracked = 0;
        for signal_type in &types {
            for signal in source.read_since(signal_type, since).await? {
                if self.store.has_outcome(&signal.id)? {
                    continue;
                }
                match self.tracker.initialize_tracking(&signal, now) {
                    Ok(_) => tracked += 1,
                    Err(TrackingError::DuplicateTracking(_)) => {}
                    Err(TrackingError::InvalidSignal(reason)) => {
                        warn!("Skipping signal {}: {}", signal.id, reason)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if tracked > 0 {
            info!("Started tracking {} signals", tracked);
        } else {
            debug!("No new signals since {}", since);
        }
        Ok(tracked)
    }

    pub fn get_tracking_summary(&self) -> Result<TrackingSummary> {
        Ok(self.tracker.get_tracking_summary()?)
    }

    pub async fn evaluate_quality(&self, signal_type: &str) -> QualityGrade {
        self.scorer.evaluate_cached(signal_type).await
    }

    /// Grade the signal's type and decide whether to alert on it.
    pub async fn should_alert(&self, signal: &Signal) -> AlertDecision {
        let grade = self.scorer.evaluate_cached(&signal.signal_type).await;
        self.filter.should_alert(signal, &grade)
    }

    /// Backtest on the configured default horizon unless one is given.
    pub fn run_backtest(
        &self,
        signal_types: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: Option<Horizon>,
    ) -> Result<BacktestReport> {
        let horizon = horizon.unwrap_or_else(|| self.backtester.default_horizon());
        Ok(self.backtester.simulate(signal_types, start, end, horizon)?)
    }

    pub fn get_clusters(&self) -> Result<Vec<ClusterAssignment>> {
        Ok(self.clusterer.get_clusters()?)
    }
}
