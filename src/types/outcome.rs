use super::signal::{Horizon, Signal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// No horizon resolved yet.
    Pending,
    /// Some, but not all, tracked horizons resolved.
    Partial,
    /// Every tracked horizon resolved. Terminal.
    Complete,
    /// A horizon exhausted its retries. Terminal; earlier horizons stay valid.
    Stale,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Complete => "complete",
            OutcomeStatus::Stale => "stale",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutcomeStatus::Complete | OutcomeStatus::Stale)
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutcomeStatus::Pending),
            "partial" => Ok(OutcomeStatus::Partial),
            "complete" => Ok(OutcomeStatus::Complete),
            "stale" => Ok(OutcomeStatus::Stale),
            _ => Err(format!("Unknown outcome status: {}", s)),
        }
    }
}

/// Measurement for a single horizon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizonSlot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Percentage return versus the trigger price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_pct: Option<f64>,
    /// Consecutive lookups that found no price.
    pub retries: u32,
}

/// Percentage return from `entry` to `exit`.
pub fn percent_return(entry: f64, exit: f64) -> f64 {
    (exit - entry) / entry * 100.0
}

/// What happened to price after a signal, horizon by horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub signal_id: String,
    /// Indexed by [`Horizon::index`].
    pub slots: [HorizonSlot; 5],
    pub status: OutcomeStatus,
    /// Horizon that exhausted its retries, when stale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_horizon: Option<Horizon>,
    /// When the next unresolved horizon becomes eligible for lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped on every claim.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Outcome {
    /// A fresh PENDING outcome, due at the first tracked horizon.
    pub fn pending(signal: &Signal, horizons: &[Horizon], now: DateTime<Utc>) -> Self {
        let next_due_at = horizons.first().map(|h| signal.target_time(*h));
        Self {
            signal_id: signal.id.clone(),
            slots: [HorizonSlot::default(); 5],
            status: OutcomeStatus::Pending,
            stale_horizon: None,
            next_due_at,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn slot(&self, horizon: Horizon) -> &HorizonSlot {
        &self.slots[horizon.index()]
    }

    pub fn price(&self, horizon: Horizon) -> Option<f64> {
        self.slot(horizon).price
    }

    pub fn return_pct(&self, horizon: Horizon) -> Option<f64> {
        self.slot(horizon).return_pct
    }

    pub fn retries(&self, horizon: Horizon) -> u32 {
        self.slot(horizon).retries
    }

    pub fn is_resolved(&self, horizon: Horizon) -> bool {
        self.slot(horizon).price.is_some()
    }

    /// First tracked horizon without a price.
    pub fn next_unresolved(&self, horizons: &[Horizon]) -> Option<Horizon> {
        horizons.iter().copied().find(|h| !self.is_resolved(*h))
    }

    /// Number of resolved horizons.
    pub fn resolved_count(&self) -> usize {
        self.slots.iter().filter(|s| s.price.is_some()).count()
    }

    /// Store a price for `horizon`, reset its retry count and advance status.
    ///
    /// Already-resolved horizons and terminal outcomes are left untouched.
    pub fn resolve(
        &mut self,
        horizon: Horizon,
        price: f64,
        price_at_trigger: f64,
        horizons: &[Horizon],
        now: DateTime<Utc>,
    ) {
        if self.status.is_terminal() || self.is_resolved(horizon) {
            return;
        }

        let slot = &mut self.slots[horizon.index()];
        slot.price = Some(price);
        slot.return_pct = Some(percent_return(price_at_trigger, price));
        slot.retries = 0;

        self.status = if horizons.iter().all(|h| self.is_resolved(*h)) {
            OutcomeStatus::Complete
        } else {
            OutcomeStatus::Partial
        };
        self.updated_at = now;
    }

    /// Count a lookup that returned no price. Returns the new retry count.
    pub fn record_miss(&mut self, horizon: Horizon, now: DateTime<Utc>) -> u32 {
        let slot = &mut self.slots[horizon.index()];
        slot.retries += 1;
        self.updated_at = now;
        slot.retries
    }

    /// Move to the terminal STALE state.
    pub fn mark_stale(&mut self, horizon: Horizon, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = OutcomeStatus::Stale;
        self.stale_horizon = Some(horizon);
        self.next_due_at = None;
        self.updated_at = now;
    }
}

/// Counts from one `update_pending` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    /// Rows this worker claimed.
    pub claimed: usize,
    /// Horizons resolved with a price.
    pub resolved: usize,
    /// Horizons re-queued after a miss.
    pub deferred: usize,
    /// Outcomes moved to STALE.
    pub staled: usize,
    /// Candidates another worker claimed first.
    pub skipped: usize,
    /// Whether the pass stopped early because of cancellation.
    pub cancelled: bool,
}

/// Outcome counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSummary {
    pub total: u64,
    pub pending: u64,
    pub partial: u64,
    pub complete: u64,
    pub stale: u64,
}
