//! SQLite persistence for signals, outcomes, price bars and clusters.
//!
//! Outcome rows carry a version and a time-boxed lease (`claimed_by`,
//! `claim_expires_at`). Updaters claim a row with a single conditional UPDATE
//! and write their result with another one guarded by the same claim, so a
//! worker whose lease expired can never overwrite a row someone else took over.

use crate::types::{
    ClusterAssignment, Horizon, HorizonSlot, Outcome, OutcomeStatus, Signal, TrackingSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Filter for reading resolved signal history.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Signal types to include; empty means all types.
    pub signal_types: Vec<String>,
    /// Inclusive lower bound on `triggered_at`.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `triggered_at`.
    pub end: Option<DateTime<Utc>>,
    /// Accept PARTIAL outcomes in addition to COMPLETE ones.
    pub include_partial: bool,
    /// Only rows where this horizon has a price.
    pub resolved_horizon: Option<Horizon>,
}

/// SQLite store for signal history and tracking state.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

pub(crate) fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied statement.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                triggered_at INTEGER NOT NULL,
                price_at_trigger REAL NOT NULL,
                indicator_value REAL NOT NULL,
                strength REAL NOT NULL,
                volume_confirmed INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_signals_type_time
             ON signals(signal_type, triggered_at)",
            [],
        )?;

        let horizon_columns: String = Horizon::ALL
            .iter()
            .map(|h| {
                format!(
                    "price_{l} REAL, return_{l} REAL, retries_{l} INTEGER NOT NULL DEFAULT 0,",
                    l = h.label()
                )
            })
            .collect::<Vec<_>>()
            .join("\n                ");

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS outcomes (
                signal_id TEXT PRIMARY KEY REFERENCES signals(id),
                {}
                status TEXT NOT NULL,
                stale_horizon TEXT,
                next_due_at INTEGER,
                version INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT,
                claim_expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
                horizon_columns
            ),
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_outcomes_due ON outcomes(status, next_due_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cluster_assignments (
                cluster_id INTEGER PRIMARY KEY,
                model_id TEXT NOT NULL,
                centroid_json TEXT NOT NULL,
                member_count INTEGER NOT NULL,
                success_count INTEGER NOT NULL,
                last_built_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS signal_clusters (
                signal_id TEXT PRIMARY KEY,
                cluster_id INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                assigned_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS price_bars (
                symbol TEXT NOT NULL,
                time INTEGER NOT NULL,
                price REAL NOT NULL,
                PRIMARY KEY (symbol, time)
            )",
            [],
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Signal Methods ==========

    /// Insert a signal. Signals are immutable, so an existing id is left as is.
    ///
    /// Returns whether a new row was written. Constraint failures other than a
    /// duplicate id are errors.
    pub fn insert_signal(&self, signal: &Signal) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO signals
             (id, symbol, signal_type, timeframe, triggered_at, price_at_trigger,
              indicator_value, strength, volume_confirmed, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO NOTHING",
            params![
                signal.id,
                signal.symbol,
                signal.signal_type,
                signal.timeframe,
                to_ms(signal.triggered_at),
                signal.price_at_trigger,
                signal.indicator_value,
                signal.strength,
                signal.volume_confirmed,
                to_ms(Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Get a signal by id.
    pub fn get_signal(&self, id: &str) -> Result<Option<Signal>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM signals WHERE id = ?1", params![id], signal_from_row)
            .optional()
    }

    /// Signals of one type triggered at or after `since`, oldest first.
    pub fn signals_since(
        &self,
        signal_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Signal>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM signals
             WHERE signal_type = ?1 AND triggered_at >= ?2
             ORDER BY triggered_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![signal_type, to_ms(since)], signal_from_row)?;
        rows.collect()
    }

    /// Distinct signal types seen so far.
    pub fn signal_types(&self) -> Result<Vec<String>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT signal_type FROM signals ORDER BY signal_type")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    // ========== Outcome Methods ==========

    /// Insert a new outcome. Returns false if one already exists for the signal.
    pub fn insert_outcome(&self, outcome: &Outcome) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO outcomes
             (signal_id, status, next_due_at, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(signal_id) DO NOTHING",
            params![
                outcome.signal_id,
                outcome.status.as_str(),
                outcome.next_due_at.map(to_ms),
                outcome.version,
                to_ms(outcome.created_at),
                to_ms(outcome.updated_at),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Check whether an outcome exists for the signal.
    pub fn has_outcome(&self, signal_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outcomes WHERE signal_id = ?1",
            params![signal_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get the outcome for a signal.
    pub fn get_outcome(&self, signal_id: &str) -> Result<Option<Outcome>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM outcomes WHERE signal_id = ?1",
            params![signal_id],
            outcome_from_row,
        )
        .optional()
    }

    /// Non-terminal outcomes due at `now` that no live lease holds.
    pub fn due_outcomes(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Signal, Outcome)>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.*, o.* FROM outcomes o
             JOIN signals s ON s.id = o.signal_id
             WHERE o.status IN ('pending', 'partial')
               AND o.next_due_at IS NOT NULL AND o.next_due_at <= ?1
               AND (o.claimed_by IS NULL OR o.claim_expires_at <= ?1)
             ORDER BY o.next_due_at ASC, o.signal_id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![to_ms(now), limit as i64], |row| {
            Ok((signal_from_row(row)?, outcome_from_row(row)?))
        })?;
        rows.collect()
    }

    /// Atomically claim an outcome row.
    ///
    /// Succeeds only if the row still has `expected_version` and holds no live
    /// lease. The version is bumped on success.
    pub fn claim_outcome(
        &self,
        signal_id: &str,
        expected_version: i64,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE outcomes
             SET claimed_by = ?1, claim_expires_at = ?2, version = version + 1
             WHERE signal_id = ?3 AND version = ?4
               AND status IN ('pending', 'partial')
               AND (claimed_by IS NULL OR claim_expires_at <= ?5)",
            params![
                worker_id,
                to_ms(lease_until),
                signal_id,
                expected_version,
                to_ms(now)
            ],
        )?;
        Ok(updated == 1)
    }

    /// Write a claimed outcome back and release the claim in the same statement.
    ///
    /// `outcome.version` must be the version returned by the claim. Returns false
    /// if the claim was lost to another worker in the meantime.
    pub fn save_claimed_outcome(
        &self,
        outcome: &Outcome,
        worker_id: &str,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();

        let horizon_sets: String = Horizon::ALL
            .iter()
            .map(|h| {
                let i = h.index();
                format!(
                    "price_{l} = ?{p}, return_{l} = ?{r}, retries_{l} = ?{c}",
                    l = h.label(),
                    p = 7 + i * 3,
                    r = 8 + i * 3,
                    c = 9 + i * 3
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "UPDATE outcomes
             SET status = ?1, stale_horizon = ?2, next_due_at = ?3, updated_at = ?4,
                 claimed_by = NULL, claim_expires_at = NULL, {}
             WHERE signal_id = ?5 AND claimed_by = ?6 AND version = ?22",
            horizon_sets
        );

        let s = &outcome.slots;
        let updated = conn.execute(
            &sql,
            params![
                outcome.status.as_str(),
                outcome.stale_horizon.map(|h| h.label()),
                outcome.next_due_at.map(to_ms),
                to_ms(outcome.updated_at),
                outcome.signal_id,
                worker_id,
                s[0].price,
                s[0].return_pct,
                s[0].retries,
                s[1].price,
                s[1].return_pct,
                s[1].retries,
                s[2].price,
                s[2].return_pct,
                s[2].retries,
                s[3].price,
                s[3].return_pct,
                s[3].retries,
                s[4].price,
                s[4].return_pct,
                s[4].retries,
                outcome.version,
            ],
        )?;
        Ok(updated == 1)
    }

    /// Clear every lease that expired at or before `now`.
    pub fn release_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        let count = conn.execute(
            "UPDATE outcomes SET claimed_by = NULL, claim_expires_at = NULL
             WHERE claimed_by IS NOT NULL AND claim_expires_at <= ?1",
            params![to_ms(now)],
        )?;
        if count > 0 {
            info!("Released {} expired outcome claims", count);
        }
        Ok(count)
    }

    /// Outcome counts by status.
    pub fn tracking_summary(&self) -> Result<TrackingSummary, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'partial' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'complete' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'stale' THEN 1 ELSE 0 END), 0)
             FROM outcomes",
            [],
            |row| {
                Ok(TrackingSummary {
                    total: row.get::<_, i64>(0)? as u64,
                    pending: row.get::<_, i64>(1)? as u64,
                    partial: row.get::<_, i64>(2)? as u64,
                    complete: row.get::<_, i64>(3)? as u64,
                    stale: row.get::<_, i64>(4)? as u64,
                })
            },
        )
    }

    /// Signals with their outcomes, ordered by trigger time then id.
    pub fn resolved_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<(Signal, Outcome)>, rusqlite::Error> {
        let mut sql = String::from(
            "SELECT s.*, o.* FROM outcomes o
             JOIN signals s ON s.id = o.signal_id
             WHERE ",
        );
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if query.include_partial {
            sql.push_str("o.status IN ('complete', 'partial')");
        } else {
            sql.push_str("o.status = 'complete'");
        }

        if !query.signal_types.is_empty() {
            let placeholders = vec!["?"; query.signal_types.len()].join(", ");
            sql.push_str(&format!(" AND s.signal_type IN ({})", placeholders));
            values.extend(
                query
                    .signal_types
                    .iter()
                    .map(|t| rusqlite::types::Value::Text(t.clone())),
            );
        }
        if let Some(start) = query.start {
            sql.push_str(" AND s.triggered_at >= ?");
            values.push(rusqlite::types::Value::Integer(to_ms(start)));
        }
        if let Some(end) = query.end {
            sql.push_str(" AND s.triggered_at < ?");
            values.push(rusqlite::types::Value::Integer(to_ms(end)));
        }
        if let Some(horizon) = query.resolved_horizon {
            sql.push_str(&format!(" AND o.price_{} IS NOT NULL", horizon.label()));
        }
        sql.push_str(" ORDER BY s.triggered_at ASC, s.id ASC");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok((signal_from_row(row)?, outcome_from_row(row)?))
        })?;
        rows.collect()
    }

    // ========== Cluster Methods ==========

    /// Replace every stored cluster and signal label in one transaction.
    ///
    /// `labels` pairs each fitted signal id with its cluster id.
    pub fn replace_clusters(
        &self,
        clusters: &[ClusterAssignment],
        labels: &[(String, u32)],
    ) -> Result<(), rusqlite::Error> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM cluster_assignments", [])?;
        tx.execute("DELETE FROM signal_clusters", [])?;
        for cluster in clusters {
            let centroid_json = serde_json::to_string(&cluster.centroid)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                "INSERT INTO cluster_assignments
                 (cluster_id, model_id, centroid_json, member_count, success_count, last_built_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    cluster.cluster_id,
                    cluster.model_id,
                    centroid_json,
                    cluster.member_count,
                    cluster.success_count,
                    to_ms(cluster.last_built_at),
                ],
            )?;
        }

        if let Some(first) = clusters.first() {
            let built_at = to_ms(first.last_built_at);
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO signal_clusters (signal_id, cluster_id, model_id, assigned_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (signal_id, cluster_id) in labels {
                stmt.execute(params![signal_id, cluster_id, first.model_id, built_at])?;
            }
        }

        tx.commit()?;
        debug!(
            "Replaced cluster table with {} clusters and {} labels",
            clusters.len(),
            labels.len()
        );
        Ok(())
    }

    /// All stored clusters, ordered by id.
    pub fn list_clusters(&self) -> Result<Vec<ClusterAssignment>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT cluster_id, model_id, centroid_json, member_count, success_count, last_built_at
             FROM cluster_assignments ORDER BY cluster_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let centroid_json: String = row.get(2)?;
            let centroid: Vec<f64> = serde_json::from_str(&centroid_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?;
            let member_count: u32 = row.get(3)?;
            let success_count: u32 = row.get(4)?;
            Ok(ClusterAssignment {
                cluster_id: row.get(0)?,
                model_id: row.get(1)?,
                centroid,
                member_count,
                success_count,
                success_rate: ClusterAssignment::rate(success_count, member_count),
                last_built_at: from_ms(row.get(5)?),
            })
        })?;
        rows.collect()
    }

    /// Label a signal with a cluster of the current model.
    ///
    /// The label is written once per signal and the cluster counts are bumped
    /// in the same transaction; centroids never move. Returns false if the
    /// signal was already labeled or `model_id` is no longer the stored model.
    pub fn record_cluster_label(
        &self,
        signal_id: &str,
        cluster_id: u32,
        model_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO signal_clusters (signal_id, cluster_id, model_id, assigned_at)
             SELECT ?1, ?2, ?3, ?4
             WHERE EXISTS (
                 SELECT 1 FROM cluster_assignments WHERE cluster_id = ?2 AND model_id = ?3
             )
             ON CONFLICT(signal_id) DO NOTHING",
            params![signal_id, cluster_id, model_id, to_ms(now)],
        )?;

        if inserted == 1 {
            tx.execute(
                "UPDATE cluster_assignments
                 SET member_count = member_count + 1,
                     success_count = success_count + ?1
                 WHERE cluster_id = ?2 AND model_id = ?3",
                params![success as i64, cluster_id, model_id],
            )?;
        }

        tx.commit()?;
        Ok(inserted == 1)
    }

    /// Cluster label of a signal, if any.
    pub fn cluster_label(&self, signal_id: &str) -> Result<Option<u32>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT cluster_id FROM signal_clusters WHERE signal_id = ?1",
            params![signal_id],
            |row| row.get(0),
        )
        .optional()
    }

    // ========== Price Bar Methods ==========

    /// Record a trade price for a symbol.
    pub fn record_price(
        &self,
        symbol: &str,
        time: DateTime<Utc>,
        price: f64,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO price_bars (symbol, time, price) VALUES (?1, ?2, ?3)
             ON CONFLICT(symbol, time) DO UPDATE SET price = excluded.price",
            params![symbol.to_lowercase(), to_ms(time), price],
        )?;
        Ok(())
    }

    /// Latest price at or before `at`, no older than `tolerance_ms`.
    pub fn price_at(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
        tolerance_ms: i64,
    ) -> Result<Option<f64>, rusqlite::Error> {
        let conn = self.conn();
        let at_ms = to_ms(at);
        conn.query_row(
            "SELECT price FROM price_bars
             WHERE symbol = ?1 AND time <= ?2 AND time >= ?3
             ORDER BY time DESC LIMIT 1",
            params![symbol.to_lowercase(), at_ms, at_ms - tolerance_ms],
            |row| row.get(0),
        )
        .optional()
    }
}

fn signal_from_row(row: &Row<'_>) -> Result<Signal, rusqlite::Error> {
    Ok(Signal {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        signal_type: row.get("signal_type")?,
        timeframe: row.get("timeframe")?,
        triggered_at: from_ms(row.get("triggered_at")?),
        price_at_trigger: row.get("price_at_trigger")?,
        indicator_value: row.get("indicator_value")?,
        strength: row.get("strength")?,
        volume_confirmed: row.get("volume_confirmed")?,
    })
}

fn outcome_from_row(row: &Row<'_>) -> Result<Outcome, rusqlite::Error> {
    let mut slots = [HorizonSlot::default(); 5];
    for horizon in Horizon::ALL {
        let label = horizon.label();
        slots[horizon.index()] = HorizonSlot {
            price: row.get(format!("price_{}", label).as_str())?,
            return_pct: row.get(format!("return_{}", label).as_str())?,
            retries: row.get(format!("retries_{}", label).as_str())?,
        };
    }

    let status: String = row.get("status")?;
    let stale_horizon: Option<String> = row.get("stale_horizon")?;
    let next_due_at: Option<i64> = row.get("next_due_at")?;

    Ok(Outcome {
        signal_id: row.get("signal_id")?,
        slots,
        status: status.parse().unwrap_or(OutcomeStatus::Pending),
        stale_horizon: stale_horizon.and_then(|h| h.parse().ok()),
        next_due_at: next_due_at.map(from_ms),
        version: row.get("version")?,
        created_at: from_ms(row.get("created_at")?),
        updated_at: from_ms(row.get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 15, 0, 0).unwrap()
    }

    fn tracked(store: &SqliteStore, id: &str, signal_type: &str, at: DateTime<Utc>) -> Signal {
        let signal = Signal::new("BTC", signal_type, at, 100.0).with_id(id);
        store.insert_signal(&signal).unwrap();
        store
            .insert_outcome(&Outcome::pending(&signal, &Horizon::ALL, at))
            .unwrap();
        signal
    }

    #[test]
    fn test_signal_round_trip() {
        let store = SqliteStore::new_in_memory().unwrap();
        let signal = Signal::new("ETH", "MACD_bullish_cross", t0(), 2500.0)
            .with_id("sig-1")
            .with_strength(0.8)
            .with_volume_confirmed(true)
            .with_indicator_value(1.25);

        assert!(store.insert_signal(&signal).unwrap());
        // Immutable: a second insert is ignored.
        assert!(!store.insert_signal(&signal.clone().with_strength(0.1)).unwrap());

        let loaded = store.get_signal("sig-1").unwrap().unwrap();
        assert_eq!(loaded, signal);
        assert!(store.get_signal("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_signal_reports_nan_columns() {
        let store = SqliteStore::new_in_memory().unwrap();
        let signal = Signal::new("ETH", "MACD_bullish_cross", t0(), 2500.0)
            .with_id("sig-nan")
            .with_indicator_value(f64::NAN);

        // NaN binds as NULL, which the NOT NULL column rejects.
        assert!(store.insert_signal(&signal).is_err());
        assert!(store.get_signal("sig-nan").unwrap().is_none());
    }

    #[test]
    fn test_signals_since_filters_and_orders() {
        let store = SqliteStore::new_in_memory().unwrap();
        tracked(&store, "b", "RSI_oversold", t0() + Duration::hours(2));
        tracked(&store, "a", "RSI_oversold", t0() + Duration::hours(1));
        tracked(&store, "c", "MACD_bullish_cross", t0() + Duration::hours(1));
        tracked(&store, "old", "RSI_oversold", t0() - Duration::days(1));

        let signals = store.signals_since("RSI_oversold", t0()).unwrap();
        let ids: Vec<&str> = signals.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let types = store.signal_types().unwrap();
        assert_eq!(types, vec!["MACD_bullish_cross", "RSI_oversold"]);
    }

    #[test]
    fn test_insert_outcome_is_unique() {
        let store = SqliteStore::new_in_memory().unwrap();
        let signal = tracked(&store, "sig-1", "RSI_oversold", t0());

        let again = Outcome::pending(&signal, &Horizon::ALL, t0());
        assert!(!store.insert_outcome(&again).unwrap());
        assert!(store.has_outcome("sig-1").unwrap());
    }

    #[test]
    fn test_claim_is_exclusive_until_lease_expires() {
        let store = SqliteStore::new_in_memory().unwrap();
        tracked(&store, "sig-1", "RSI_oversold", t0());
        let now = t0() + Duration::hours(1);
        let lease = now + Duration::seconds(120);

        assert!(store.claim_outcome("sig-1", 0, "w1", now, lease).unwrap());
        // Stale version and live lease both block a second claim.
        assert!(!store.claim_outcome("sig-1", 0, "w2", now, lease).unwrap());
        assert!(!store.claim_outcome("sig-1", 1, "w2", now, lease).unwrap());
        assert!(store.due_outcomes(now, 10).unwrap().is_empty());

        // After the lease expires the row is reclaimable.
        let later = lease + Duration::seconds(1);
        assert_eq!(store.due_outcomes(later, 10).unwrap().len(), 1);
        assert!(store
            .claim_outcome("sig-1", 1, "w2", later, later + Duration::seconds(120))
            .unwrap());
    }

    #[test]
    fn test_lost_claim_cannot_write() {
        let store = SqliteStore::new_in_memory().unwrap();
        tracked(&store, "sig-1", "RSI_oversold", t0());
        let now = t0() + Duration::hours(1);

        assert!(store
            .claim_outcome("sig-1", 0, "w1", now, now + Duration::seconds(1))
            .unwrap());
        let mut stale_copy = store.get_outcome("sig-1").unwrap().unwrap();

        let later = now + Duration::seconds(5);
        assert!(store
            .claim_outcome("sig-1", 1, "w2", later, later + Duration::seconds(60))
            .unwrap());

        stale_copy.resolve(Horizon::OneHour, 120.0, 100.0, &Horizon::ALL, later);
        assert!(!store.save_claimed_outcome(&stale_copy, "w1").unwrap());

        let stored = store.get_outcome("sig-1").unwrap().unwrap();
        assert!(stored.price(Horizon::OneHour).is_none());
    }

    #[test]
    fn test_save_claimed_outcome_persists_slots() {
        let store = SqliteStore::new_in_memory().unwrap();
        tracked(&store, "sig-1", "RSI_oversold", t0());
        let now = t0() + Duration::hours(1);

        assert!(store
            .claim_outcome("sig-1", 0, "w1", now, now + Duration::seconds(60))
            .unwrap());
        let mut outcome = store.get_outcome("sig-1").unwrap().unwrap();
        assert_eq!(outcome.version, 1);

        outcome.resolve(Horizon::OneHour, 103.0, 100.0, &Horizon::ALL, now);
        outcome.record_miss(Horizon::FourHours, now);
        assert!(store.save_claimed_outcome(&outcome, "w1").unwrap());

        let stored = store.get_outcome("sig-1").unwrap().unwrap();
        assert_eq!(stored.status, OutcomeStatus::Partial);
        assert_eq!(stored.price(Horizon::OneHour), Some(103.0));
        assert!((stored.return_pct(Horizon::OneHour).unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(stored.retries(Horizon::FourHours), 1);

        // Claim released by the write.
        assert!(store
            .claim_outcome("sig-1", 1, "w2", now, now + Duration::seconds(60))
            .unwrap());
    }

    #[test]
    fn test_release_expired_claims() {
        let store = SqliteStore::new_in_memory().unwrap();
        tracked(&store, "sig-1", "RSI_oversold", t0());
        let now = t0() + Duration::hours(1);
        store
            .claim_outcome("sig-1", 0, "w1", now, now + Duration::seconds(10))
            .unwrap();

        assert_eq!(store.release_expired_claims(now).unwrap(), 0);
        assert_eq!(
            store
                .release_expired_claims(now + Duration::seconds(10))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_tracking_summary() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert_eq!(store.tracking_summary().unwrap(), TrackingSummary::default());

        tracked(&store, "a", "RSI_oversold", t0());
        tracked(&store, "b", "RSI_oversold", t0());

        let summary = store.tracking_summary().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.pending, 2);
    }

    #[test]
    fn test_clusters_replace_and_label() {
        let store = SqliteStore::new_in_memory().unwrap();
        let built = t0();
        let clusters = vec![
            ClusterAssignment {
                cluster_id: 0,
                model_id: "m1".to_string(),
                centroid: vec![0.0; 11],
                member_count: 4,
                success_count: 3,
                success_rate: Some(0.75),
                last_built_at: built,
            },
            ClusterAssignment {
                cluster_id: 1,
                model_id: "m1".to_string(),
                centroid: vec![1.0; 11],
                member_count: 0,
                success_count: 0,
                success_rate: None,
                last_built_at: built,
            },
        ];
        store
            .replace_clusters(&clusters, &[("sig-1".to_string(), 0)])
            .unwrap();
        assert_eq!(store.list_clusters().unwrap(), clusters);
        assert_eq!(store.cluster_label("sig-1").unwrap(), Some(0));

        assert!(store
            .record_cluster_label("sig-9", 1, "m1", true, built)
            .unwrap());
        assert!(!store
            .record_cluster_label("sig-9", 1, "m1", true, built)
            .unwrap());
        assert_eq!(store.cluster_label("sig-9").unwrap(), Some(1));

        let updated = store.list_clusters().unwrap();
        assert_eq!(updated[1].member_count, 1);
        assert_eq!(updated[1].success_rate, Some(1.0));

        // A rebuild supersedes everything, labels included.
        store.replace_clusters(&clusters[..1], &[]).unwrap();
        assert_eq!(store.list_clusters().unwrap().len(), 1);
        assert_eq!(store.cluster_label("sig-9").unwrap(), None);
    }

    #[test]
    fn test_label_for_replaced_model_is_dropped() {
        let store = SqliteStore::new_in_memory().unwrap();
        let cluster = |model_id: &str| ClusterAssignment {
            cluster_id: 0,
            model_id: model_id.to_string(),
            centroid: vec![0.0; 11],
            member_count: 2,
            success_count: 1,
            success_rate: Some(0.5),
            last_built_at: t0(),
        };
        store.replace_clusters(&[cluster("old")], &[]).unwrap();
        // A rebuild lands between reading the model and writing the label.
        store.replace_clusters(&[cluster("new")], &[]).unwrap();

        assert!(!store
            .record_cluster_label("sig-1", 0, "old", true, t0())
            .unwrap());
        assert_eq!(store.cluster_label("sig-1").unwrap(), None);
        assert_eq!(store.list_clusters().unwrap()[0].member_count, 2);

        // The signal can still be labeled against the current model.
        assert!(store
            .record_cluster_label("sig-1", 0, "new", true, t0())
            .unwrap());
        assert_eq!(store.cluster_label("sig-1").unwrap(), Some(0));
        assert_eq!(store.list_clusters().unwrap()[0].member_count, 3);
    }

    #[test]
    fn test_price_at_respects_tolerance() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.record_price("AAPL", t0(), 190.0).unwrap();
        store
            .record_price("AAPL", t0() + Duration::minutes(10), 191.0)
            .unwrap();

        let five_min = 5 * 60 * 1000;
        assert_eq!(
            store
                .price_at("aapl", t0() + Duration::minutes(3), five_min)
                .unwrap(),
            Some(190.0)
        );
        assert_eq!(
            store
                .price_at("AAPL", t0() + Duration::minutes(7), five_min)
                .unwrap(),
            None
        );
        assert_eq!(
            store
                .price_at("AAPL", t0() + Duration::minutes(12), five_min)
                .unwrap(),
            Some(191.0)
        );
    }
}
