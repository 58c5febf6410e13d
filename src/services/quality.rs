//! Per signal-type quality grading.

use crate::config::QualityConfig;
use crate::services::cache::Cache;
use crate::services::sqlite_store::{HistoryQuery, SqliteStore};
use crate::types::{is_well_formed_signal_type, Grade, Horizon, QualityGrade};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Redis key prefix for cached grades.
const REDIS_QUALITY_PREFIX: &str = "augur:quality:";

/// Grades signal types by the realized returns of their past signals.
pub struct QualityScorer {
    store: Arc<SqliteStore>,
    config: QualityConfig,
    cache: Cache<String, QualityGrade>,
    redis: RwLock<Option<ConnectionManager>>,
}

/// Grade a set of returns (percent) for one signal type.
///
/// Statistics are attached even when the sample is too small to grade.
pub fn grade_outcomes(
    signal_type: &str,
    returns: &[f64],
    min_samples: u32,
    horizon: Horizon,
    now: DateTime<Utc>,
) -> QualityGrade {
    let mut grade = QualityGrade::unrated(signal_type, horizon, now);
    let n = returns.len();
    grade.sample_size = n as u32;
    if n == 0 {
        return grade;
    }

    let wins = returns.iter().filter(|r| **r > 0.0).count();
    let win_rate = wins as f64 / n as f64;
    let avg = returns.iter().sum::<f64>() / n as f64;

    grade.win_rate = Some(win_rate);
    grade.avg_return = Some(avg);
    grade.stdev_return = if n >= 2 {
        let var = returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / (n - 1) as f64;
        Some(var.sqrt())
    } else {
        None
    };

    if grade.sample_size >= min_samples {
        grade.grade = Grade::from_stats(win_rate, avg);
    }
    grade
}

impl QualityScorer {
    pub fn new(store: Arc<SqliteStore>, config: QualityConfig) -> Self {
        let cache = Cache::new(config.cache_ttl);
        Self {
            store,
            config,
            cache,
            redis: RwLock::new(None),
        }
    }

    /// Connect to Redis so cached grades are shared between processes.
    pub async fn connect_redis(&self, redis_url: &str) {
        match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!("QualityScorer connected to Redis");
                    *self.redis.write().await = Some(conn);
                }
                Err(e) => {
                    warn!("Failed to connect QualityScorer to Redis: {}", e);
                }
            },
            Err(e) => {
                warn!("Invalid Redis URL for QualityScorer: {}", e);
            }
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Grade a signal type from its resolved outcomes.
    ///
    /// Never fails: malformed types and storage errors yield UNRATED.
    pub fn evaluate(
        &self,
        signal_type: &str,
        min_samples: u32,
        lookback_days: Option<u32>,
    ) -> QualityGrade {
        self.evaluate_at(signal_type, min_samples, lookback_days, Utc::now())
    }

    /// [`evaluate`](Self::evaluate) against an explicit clock.
    pub fn evaluate_at(
        &self,
        signal_type: &str,
        min_samples: u32,
        lookback_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> QualityGrade {
        let horizon = self.config.evaluation_horizon;

        if !is_well_formed_signal_type(signal_type) {
            debug!("Malformed signal type {:?} graded UNRATED", signal_type);
            return QualityGrade::unrated(signal_type, horizon, now);
        }

        let query = HistoryQuery {
            signal_types: vec![signal_type.to_string()],
            start: lookback_days.map(|days| now - ChronoDuration::days(days as i64)),
            end: None,
            include_partial: self.config.include_partial,
            resolved_horizon: Some(horizon),
        };

        let history = match self.store.resolved_history(&query) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load outcomes for {}: {}", signal_type, e);
                return QualityGrade::unrated(signal_type, horizon, now);
            }
        };

        let returns: Vec<f64> = history
            .iter()
            .filter_map(|(_, outcome)| outcome.return_pct(horizon))
            .collect();

        let grade = grade_outcomes(signal_type, &returns, min_samples, horizon, now);
        debug!(
            "Graded {} {} over {} samples at {}",
            signal_type, grade.grade, grade.sample_size, horizon
        );
        grade
    }

    /// Grade with the configured sample floor, served from cache when fresh.
    pub async fn evaluate_cached(&self, signal_type: &str) -> QualityGrade {
        let key = format!("{}:{}", signal_type, self.config.evaluation_horizon);

        if let Some(grade) = self.cache.get(&key) {
            return grade;
        }
        if let Some(grade) = self.load_grade(&key).await {
            self.cache.insert(key, grade.clone());
            return grade;
        }

        let grade = self.evaluate(signal_type, self.config.min_samples_for_grade, None);
        self.cache.insert(key.clone(), grade.clone());
        self.save_grade(&key, &grade).await;
        grade
    }

    /// Drop a cached grade, e.g. after new outcomes resolved.
    pub async fn invalidate(&self, signal_type: &str) {
        let key = format!("{}:{}", signal_type, self.config.evaluation_horizon);
        self.cache.invalidate(&key);

        let conn_guard = self.redis.read().await;
        let Some(ref conn) = *conn_guard else {
            return;
        };
        let mut conn = conn.clone();
        let redis_key = format!("{}{}", REDIS_QUALITY_PREFIX, key);
        let _: Result<(), _> = conn.del(&redis_key).await;
    }

    async fn save_grade(&self, key: &str, grade: &QualityGrade) {
        let conn_guard = self.redis.read().await;
        let Some(ref conn) = *conn_guard else {
            return;
        };

        let json = match serde_json::to_string(grade) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize grade for {}: {}", key, e);
                return;
            }
        };

        let redis_key = format!("{}{}", REDIS_QUALITY_PREFIX, key);
        let mut conn = conn.clone();
        let ttl = self.config.cache_ttl.as_secs().max(1);
        if let Err(e) = conn.set_ex::<_, _, ()>(&redis_key, json, ttl as _).await {
            warn!("Failed to cache grade in Redis: {}", e);
        }
    }

    async fn load_grade(&self, key: &str) -> Option<QualityGrade> {
        let conn_guard = self.redis.read().await;
        let conn = conn_guard.as_ref()?;

        let redis_key = format!("{}{}", REDIS_QUALITY_PREFIX, key);
        let mut conn = conn.clone();

        let json = conn.get::<_, Option<String>>(&redis_key).await.ok()??;
        serde_json::from_str(&json).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_grade_outcomes_statistics() {
        let grade = grade_outcomes("RSI_oversold", &[2.0, -1.0, 4.0], 3, Horizon::OneDay, now());

        assert_eq!(grade.sample_size, 3);
        assert!((grade.win_rate.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((grade.avg_return.unwrap() - 5.0 / 3.0).abs() < 1e-12);
        // Sample variance of [2, -1, 4] is 19/3.
        assert!((grade.stdev_return.unwrap() - (19.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(grade.grade, Grade::B);
    }

    #[test]
    fn test_small_samples_are_unrated_with_stats() {
        let grade = grade_outcomes("RSI_oversold", &[5.0], 10, Horizon::OneDay, now());
        assert_eq!(grade.grade, Grade::Unrated);
        assert_eq!(grade.sample_size, 1);
        assert_eq!(grade.win_rate, Some(1.0));
        assert_eq!(grade.stdev_return, None);
    }

    #[test]
    fn test_no_samples() {
        let grade = grade_outcomes("RSI_oversold", &[], 0, Horizon::OneDay, now());
        assert_eq!(grade.grade, Grade::Unrated);
        assert_eq!(grade.win_rate, None);
    }

    #[test]
    fn test_zero_return_is_not_a_win() {
        let grade = grade_outcomes("x", &[0.0, 0.0, 1.0, -1.0], 1, Horizon::OneDay, now());
        assert_eq!(grade.win_rate, Some(0.25));
        assert_eq!(grade.grade, Grade::F);
    }

    #[test]
    fn test_malformed_type_is_unrated() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let scorer = QualityScorer::new(store, QualityConfig::default());
        let grade = scorer.evaluate_at("DROP TABLE signals;", 0, None, now());
        assert_eq!(grade.grade, Grade::Unrated);
        assert_eq!(grade.sample_size, 0);
    }

    #[tokio::test]
    async fn test_evaluate_cached_without_redis() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let scorer = QualityScorer::new(store, QualityConfig::default());

        let first = scorer.evaluate_cached("never_seen").await;
        let second = scorer.evaluate_cached("never_seen").await;
        assert_eq!(first.grade, Grade::Unrated);
        assert_eq!(first, second);

        scorer.invalidate("never_seen").await;
        assert_eq!(scorer.cache.len(), 0);
    }
}
