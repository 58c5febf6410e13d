//! Background batch jobs and cooperative cancellation.

use crate::config::JobConfig;
use crate::services::clustering::{ClusterError, PatternClusterer};
use crate::services::outcome_tracker::OutcomeTracker;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Shared cancellation signal for long-running work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration`. Returns false if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}

/// Periodically release expired leases and resolve due outcomes.
pub async fn run_tracker(tracker: Arc<OutcomeTracker>, jobs: JobConfig, cancel: CancelFlag) {
    info!(
        "Outcome tracker started (worker {}, every {:?})",
        tracker.worker_id(),
        jobs.tracker_interval
    );

    while !cancel.is_cancelled() {
        let now = Utc::now();
        if let Err(e) = tracker.reclaim_expired(now) {
            warn!("Failed to release expired claims: {}", e);
        }

        match tracker
            .update_pending_with_cancel(jobs.tracker_batch_size, now, &cancel)
            .await
        {
            Ok(report) if report.claimed == 0 => debug!("No outcomes due"),
            Ok(_) => {}
            Err(e) => error!("Outcome update failed: {}", e),
        }

        if !cancel.sleep(jobs.tracker_interval).await {
            break;
        }
    }

    info!("Outcome tracker stopped");
}

/// Periodically refit the pattern clusters over all resolved history.
pub async fn run_cluster_rebuild(
    clusterer: Arc<PatternClusterer>,
    interval: Duration,
    cancel: CancelFlag,
) {
    info!("Cluster rebuild job started (every {:?})", interval);

    while !cancel.is_cancelled() {
        let job_clusterer = Arc::clone(&clusterer);
        let job_cancel = cancel.clone();
        let result =
            tokio::task::spawn_blocking(move || job_clusterer.rebuild(&[], None, &job_cancel))
                .await;

        match result {
            Ok(Ok(clusters)) => debug!("Cluster rebuild produced {} clusters", clusters.len()),
            Ok(Err(ClusterError::Cancelled)) => break,
            Ok(Err(e)) => error!("Cluster rebuild failed: {}", e),
            Err(e) => error!("Cluster rebuild task panicked: {}", e),
        }

        if !cancel.sleep(interval).await {
            break;
        }
    }

    info!("Cluster rebuild job stopped");
}
