//! Outcome tracking tests

mod common;

use augur::config::{Config, TrackerConfig};
use augur::services::{OutcomeTracker, PriceHistory, SignalAnalytics, SignalStore, SqliteStore};
use augur::types::{Horizon, OutcomeStatus, Signal};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{monday, signal};
use std::sync::Arc;
use std::time::Duration;

fn tracker_config() -> TrackerConfig {
    TrackerConfig {
        retry_delay: Duration::ZERO,
        lookup_backoff: Duration::from_millis(1),
        ..TrackerConfig::default()
    }
}

#[tokio::test]
async fn test_complete_outcomes_hold_every_return() {
    let t0 = monday();
    let history = Arc::new(PriceHistory::new(Duration::from_secs(60)));
    let exits = [101.0, 98.0, 105.0, 110.0, 93.5];
    for (horizon, price) in Horizon::ALL.iter().zip(exits) {
        history.record("AAPL", t0 + horizon.offset(), price);
    }

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let tracker = OutcomeTracker::new(store.clone(), history, tracker_config(), "w1");
    tracker.initialize_tracking(&signal("s1", "RSI_oversold", t0), t0).unwrap();

    let now = t0 + ChronoDuration::days(31);
    for _ in 0..Horizon::ALL.len() {
        let report = tracker.update_pending(10, now).await.unwrap();
        assert_eq!(report.resolved, 1);
    }

    let outcome = store.get_outcome("s1").unwrap().unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Complete);
    assert_eq!(outcome.next_due_at, None);
    for (horizon, price) in Horizon::ALL.iter().zip(exits) {
        assert_eq!(outcome.price(*horizon), Some(price));
        let expected = (price - 100.0) / 100.0 * 100.0;
        assert!((outcome.return_pct(*horizon).unwrap() - expected).abs() < 1e-9);
    }
    assert!((outcome.return_pct(Horizon::OneDay).unwrap() - 5.0).abs() < 1e-9);

    // Nothing left to do for a complete outcome.
    let report = tracker.update_pending(10, now).await.unwrap();
    assert_eq!(report.claimed, 0);

    let summary = tracker.get_tracking_summary().unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.complete, 1);
}

#[tokio::test]
async fn test_four_misses_make_outcome_stale() {
    let t0 = monday();
    let history = Arc::new(PriceHistory::new(Duration::from_secs(60)));
    history.record("AAPL", t0 + ChronoDuration::hours(1), 101.0);

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let tracker = OutcomeTracker::new(store.clone(), history, tracker_config(), "w1");
    tracker.initialize_tracking(&signal("s1", "RSI_oversold", t0), t0).unwrap();

    let now = t0 + ChronoDuration::hours(5);
    let first = tracker.update_pending(10, now).await.unwrap();
    assert_eq!(first.resolved, 1);

    for miss in 1..=3u32 {
        let report = tracker.update_pending(10, now).await.unwrap();
        assert_eq!(report.deferred, 1);
        let outcome = store.get_outcome("s1").unwrap().unwrap();
        assert_eq!(outcome.retries(Horizon::FourHours), miss);
        assert_eq!(outcome.status, OutcomeStatus::Partial);
    }

    let report = tracker.update_pending(10, now).await.unwrap();
    assert_eq!(report.staled, 1);

    let outcome = store.get_outcome("s1").unwrap().unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Stale);
    assert_eq!(outcome.stale_horizon, Some(Horizon::FourHours));
    assert_eq!(outcome.price(Horizon::OneHour), Some(101.0));
    assert!((outcome.return_pct(Horizon::OneHour).unwrap() - 1.0).abs() < 1e-9);

    // Stale is terminal.
    let later = tracker
        .update_pending(10, now + ChronoDuration::days(60))
        .await
        .unwrap();
    assert_eq!(later.claimed, 0);
    assert_eq!(tracker.get_tracking_summary().unwrap().stale, 1);
}

#[tokio::test]
async fn test_concurrent_workers_never_share_a_row() {
    let t0 = monday();
    let history = Arc::new(PriceHistory::new(Duration::from_secs(60)));
    history.record("AAPL", t0 + ChronoDuration::hours(1), 102.0);

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let a = OutcomeTracker::new(store.clone(), history.clone(), tracker_config(), "a");
    let b = OutcomeTracker::new(store.clone(), history, tracker_config(), "b");

    for i in 0..20 {
        a.initialize_tracking(&signal(&format!("s{:02}", i), "RSI_oversold", t0), t0)
            .unwrap();
    }

    let now = t0 + ChronoDuration::hours(2);
    let (ra, rb) = tokio::join!(a.update_pending(20, now), b.update_pending(20, now));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.claimed + rb.claimed, 20);
    assert_eq!(ra.resolved + rb.resolved, 20);

    let summary = store.tracking_summary().unwrap();
    assert_eq!(summary.partial, 20);
}

#[tokio::test]
async fn test_leased_row_waits_for_expiry() {
    let t0 = monday();
    let history = Arc::new(PriceHistory::new(Duration::from_secs(60)));
    history.record("AAPL", t0 + ChronoDuration::hours(1), 102.0);

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let tracker = OutcomeTracker::new(store.clone(), history, tracker_config(), "w1");
    tracker.initialize_tracking(&signal("s1", "RSI_oversold", t0), t0).unwrap();

    let now = t0 + ChronoDuration::hours(2);
    assert!(store
        .claim_outcome("s1", 0, "crashed-worker", now, now + ChronoDuration::seconds(60))
        .unwrap());

    let blocked = tracker.update_pending(10, now).await.unwrap();
    assert_eq!(blocked.claimed, 0);

    let after = now + ChronoDuration::seconds(61);
    assert_eq!(tracker.reclaim_expired(after).unwrap(), 1);
    let report = tracker.update_pending(10, after).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.resolved, 1);
}

#[tokio::test]
async fn test_ingest_tracks_new_signals_once() {
    let t0 = monday();
    let source = SqliteStore::new_in_memory().unwrap();
    for i in 0..3 {
        source
            .insert_signal(&signal(&format!("r{}", i), "RSI_oversold", t0))
            .unwrap();
    }
    source
        .insert_signal(&signal("m0", "MACD_bullish_cross", t0))
        .unwrap();

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let prices = Arc::new(PriceHistory::new(Duration::from_secs(60)));
    let analytics = SignalAnalytics::new(store.clone(), prices, &Config::default());

    let since = t0 - ChronoDuration::days(1);
    let only_rsi = analytics
        .ingest_since(&source, &["RSI_oversold".to_string()], since)
        .await
        .unwrap();
    assert_eq!(only_rsi, 3);

    let everything = analytics.ingest_since(&source, &[], since).await.unwrap();
    assert_eq!(everything, 1);

    let again = analytics.ingest_since(&source, &[], since).await.unwrap();
    assert_eq!(again, 0);
    assert_eq!(analytics.get_tracking_summary().unwrap().pending, 4);
}

/// Signal source serving a fixed list, including rows a database would reject.
struct FixedSignals(Vec<Signal>);

#[async_trait::async_trait]
impl SignalStore for FixedSignals {
    async fn read_since(&self, signal_type: &str, since: DateTime<Utc>) -> anyhow::Result<Vec<Signal>> {
        Ok(self
            .0
            .iter()
            .filter(|s| s.signal_type == signal_type && s.triggered_at >= since)
            .cloned()
            .collect())
    }

    async fn signal_types(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["RSI_oversold".to_string()])
    }
}

#[tokio::test]
async fn test_ingest_skips_non_finite_signals() {
    let t0 = monday();
    let source = FixedSignals(vec![
        signal("good-1", "RSI_oversold", t0),
        signal("nan-indicator", "RSI_oversold", t0).with_indicator_value(f64::NAN),
        signal("nan-strength", "RSI_oversold", t0).with_strength(f64::NAN),
        signal("good-2", "RSI_oversold", t0 + ChronoDuration::minutes(5)),
    ]);

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let prices = Arc::new(PriceHistory::new(Duration::from_secs(60)));
    let analytics = SignalAnalytics::new(store.clone(), prices, &Config::default());

    let since = t0 - ChronoDuration::days(1);
    assert_eq!(analytics.ingest_since(&source, &[], since).await.unwrap(), 2);
    // Bad rows do not wedge later passes either.
    assert_eq!(analytics.ingest_since(&source, &[], since).await.unwrap(), 0);

    assert_eq!(analytics.get_tracking_summary().unwrap().total, 2);
    assert!(store.get_signal("nan-indicator").unwrap().is_none());

    let bad = signal("direct", "RSI_oversold", t0).with_indicator_value(f64::NAN);
    assert!(matches!(
        analytics.track_signal(&bad),
        Err(augur::AppError::Tracking(augur::services::TrackingError::InvalidSignal(_)))
    ));
}
