//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use augur::services::SqliteStore;
use augur::types::{Horizon, Outcome, Signal};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Monday 8 January 2024, 15:00 UTC.
pub fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 15, 0, 0).unwrap()
}

pub fn signal(id: &str, signal_type: &str, triggered_at: DateTime<Utc>) -> Signal {
    Signal::new("AAPL", signal_type, triggered_at, 100.0)
        .with_id(id)
        .with_strength(0.7)
}

/// Store a signal with an outcome whose listed horizons resolved at the given
/// percentage returns, optionally marked stale afterwards.
pub fn record(
    store: &SqliteStore,
    signal: &Signal,
    returns: &[(Horizon, f64)],
    stale_at: Option<Horizon>,
) -> Outcome {
    let now = signal.triggered_at;
    store.insert_signal(signal).unwrap();
    let mut outcome = Outcome::pending(signal, &Horizon::ALL, now);
    assert!(store.insert_outcome(&outcome).unwrap());
    assert!(store
        .claim_outcome(&signal.id, 0, "fixture", now, now + Duration::minutes(1))
        .unwrap());
    outcome.version = 1;

    for (horizon, ret) in returns {
        let price = signal.price_at_trigger * (1.0 + ret / 100.0);
        outcome.resolve(*horizon, price, signal.price_at_trigger, &Horizon::ALL, now);
    }
    outcome.next_due_at = outcome
        .next_unresolved(&Horizon::ALL)
        .map(|h| signal.target_time(h));
    if let Some(horizon) = stale_at {
        outcome.mark_stale(horizon, now);
    }

    assert!(store.save_claimed_outcome(&outcome, "fixture").unwrap());
    outcome
}

/// Every horizon resolved at the same return.
pub fn complete(ret: f64) -> Vec<(Horizon, f64)> {
    Horizon::ALL.iter().map(|h| (*h, ret)).collect()
}
