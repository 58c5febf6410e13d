use crate::error::AppError;
use crate::types::Horizon;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Outcome tracking configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Horizons to measure, in resolution order (default: 1h,4h,1d,1w,1m).
    pub horizons: Vec<Horizon>,
    /// Misses allowed per horizon before the fallback/stale path (default: 3).
    pub max_retries_per_horizon: u32,
    /// Delay before a deferred horizon is retried (default: 15 minutes).
    pub retry_delay: Duration,
    /// Lease length on a claimed outcome row (default: 120 seconds).
    pub claim_timeout: Duration,
    /// Maximum in-flight price lookups (default: 8).
    pub max_concurrent_lookups: usize,
    /// Timeout for a single price lookup (default: 5 seconds).
    pub lookup_timeout: Duration,
    /// Attempts per lookup on transport failure (default: 3).
    pub lookup_attempts: u32,
    /// Initial backoff between attempts, doubled each time (default: 200 ms).
    pub lookup_backoff: Duration,
    /// Hour (UTC) of the session close used by the trading-day fallback (default: 21).
    pub market_close_hour_utc: u32,
    /// How many calendar days the fallback walks back (default: 5).
    pub fallback_lookback_days: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            horizons: Horizon::ALL.to_vec(),
            max_retries_per_horizon: 3,
            retry_delay: Duration::from_secs(900),
            claim_timeout: Duration::from_secs(120),
            max_concurrent_lookups: 8,
            lookup_timeout: Duration::from_millis(5000),
            lookup_attempts: 3,
            lookup_backoff: Duration::from_millis(200),
            market_close_hour_utc: 21,
            fallback_lookback_days: 5,
        }
    }
}

/// Quality grading configuration.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Samples needed before a grade is trusted (default: 10).
    pub min_samples_for_grade: u32,
    /// Horizon whose return decides a win (default: 1d).
    pub evaluation_horizon: Horizon,
    /// Count PARTIAL outcomes whose evaluation horizon resolved (default: false).
    pub include_partial: bool,
    /// TTL of cached grades (default: 300 seconds).
    pub cache_ttl: Duration,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_samples_for_grade: 10,
            evaluation_horizon: Horizon::OneDay,
            include_partial: false,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Alert filter configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Minimum signal strength (default: 0.5).
    pub min_strength_for_alert: f64,
    /// Require volume confirmation (default: false).
    pub require_volume_confirmation: bool,
    /// Let UNRATED grades alert (default: false, fail-closed).
    pub unrated_passes: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_strength_for_alert: 0.5,
            require_volume_confirmation: false,
            unrated_passes: false,
        }
    }
}

/// Backtest configuration.
#[derive(Debug, Clone)]
pub struct BacktestSettings {
    /// Default evaluation horizon (default: 1d).
    pub evaluation_horizon_default: Horizon,
    /// Include PARTIAL outcomes with the horizon resolved (default: true).
    pub include_partial: bool,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            evaluation_horizon_default: Horizon::OneDay,
            include_partial: true,
        }
    }
}

/// Pattern clustering configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Requested cluster count (default: 6).
    pub kmeans_k: usize,
    /// RNG seed for k-means++ (default: 42).
    pub kmeans_seed: u64,
    /// Iteration cap (default: 300).
    pub max_iter: usize,
    /// Largest centroid shift that counts as converged (default: 1e-6).
    pub tolerance: f64,
    /// Horizon whose return decides success (default: 1d).
    pub reference_horizon: Horizon,
    /// Absolute return (percent) that counts as a move (default: 0.5).
    pub move_threshold_pct: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kmeans_k: 6,
            kmeans_seed: 42,
            max_iter: 300,
            tolerance: 1e-6,
            reference_horizon: Horizon::OneDay,
            move_threshold_pct: 0.5,
        }
    }
}

/// Batch job scheduling.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Interval between tracker passes (default: 60 seconds).
    pub tracker_interval: Duration,
    /// Rows per tracker pass (default: 200).
    pub tracker_batch_size: usize,
    /// Interval between cluster rebuilds (default: 6 hours).
    pub cluster_rebuild_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            tracker_interval: Duration::from_secs(60),
            tracker_batch_size: 200,
            cluster_rebuild_interval: Duration::from_secs(21_600),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path.
    pub database_path: String,
    /// Redis URL for the grade cache (optional).
    pub redis_url: Option<String>,
    /// Identifier this process uses when claiming rows.
    pub worker_id: String,
    /// Staleness tolerance for stored price bars (default: 300 seconds).
    pub price_tolerance: Duration,
    pub tracker: TrackerConfig,
    pub quality: QualityConfig,
    pub filter: FilterConfig,
    pub backtest: BacktestSettings,
    pub cluster: ClusterConfig,
    pub jobs: JobConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "augur.db".to_string(),
            redis_url: None,
            worker_id: uuid::Uuid::new_v4().to_string(),
            price_tolerance: Duration::from_secs(300),
            tracker: TrackerConfig::default(),
            quality: QualityConfig::default(),
            filter: FilterConfig::default(),
            backtest: BacktestSettings::default(),
            cluster: ClusterConfig::default(),
            jobs: JobConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_horizon(key: &str, default: Horizon) -> Horizon {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma separated horizon list such as "1h,1d,1w".
pub fn parse_horizons(s: &str) -> Option<Vec<Horizon>> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let horizons = env::var("HORIZONS")
            .ok()
            .and_then(|v| parse_horizons(&v))
            .unwrap_or(defaults.tracker.horizons);

        Self {
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            redis_url: env::var("REDIS_URL").ok(),
            worker_id: env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            price_tolerance: Duration::from_secs(env_or("PRICE_TOLERANCE_SECS", 300)),
            tracker: TrackerConfig {
                horizons,
                max_retries_per_horizon: env_or("MAX_RETRIES_PER_HORIZON", 3),
                retry_delay: Duration::from_secs(env_or("RETRY_DELAY_SECS", 900)),
                claim_timeout: Duration::from_secs(env_or("CLAIM_TIMEOUT_SECS", 120)),
                max_concurrent_lookups: env_or("MAX_CONCURRENT_LOOKUPS", 8),
                lookup_timeout: Duration::from_millis(env_or("LOOKUP_TIMEOUT_MS", 5000)),
                lookup_attempts: env_or("LOOKUP_ATTEMPTS", 3),
                lookup_backoff: Duration::from_millis(env_or("LOOKUP_BACKOFF_MS", 200)),
                market_close_hour_utc: env_or("MARKET_CLOSE_HOUR_UTC", 21),
                fallback_lookback_days: env_or("FALLBACK_LOOKBACK_DAYS", 5),
            },
            quality: QualityConfig {
                min_samples_for_grade: env_or("MIN_SAMPLES_FOR_GRADE", 10),
                evaluation_horizon: env_horizon("EVALUATION_HORIZON_DEFAULT", Horizon::OneDay),
                include_partial: env_flag("INCLUDE_PARTIAL_IN_GRADES", false),
                cache_ttl: Duration::from_secs(env_or("QUALITY_CACHE_TTL_SECS", 300)),
            },
            filter: FilterConfig {
                min_strength_for_alert: env_or("MIN_STRENGTH_FOR_ALERT", 0.5),
                require_volume_confirmation: env_flag("REQUIRE_VOLUME_CONFIRMATION", false),
                unrated_passes: env_flag("UNRATED_PASSES", false),
            },
            backtest: BacktestSettings {
                evaluation_horizon_default: env_horizon(
                    "EVALUATION_HORIZON_DEFAULT",
                    Horizon::OneDay,
                ),
                include_partial: env_flag("INCLUDE_PARTIAL_IN_BACKTEST", true),
            },
            cluster: ClusterConfig {
                kmeans_k: env_or("KMEANS_K", 6),
                kmeans_seed: env_or("KMEANS_SEED", 42),
                max_iter: env_or("KMEANS_MAX_ITER", 300),
                tolerance: defaults.cluster.tolerance,
                reference_horizon: env_horizon("EVALUATION_HORIZON_DEFAULT", Horizon::OneDay),
                move_threshold_pct: env_or("MOVE_THRESHOLD_PCT", 0.5),
            },
            jobs: JobConfig {
                tracker_interval: Duration::from_secs(env_or("TRACKER_INTERVAL_SECS", 60)),
                tracker_batch_size: env_or("TRACKER_BATCH_SIZE", 200),
                cluster_rebuild_interval: Duration::from_secs(env_or(
                    "CLUSTER_REBUILD_INTERVAL_SECS",
                    21_600,
                )),
            },
        }
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let horizons = &self.tracker.horizons;
        if horizons.is_empty() {
            return Err(AppError::Config("at least one horizon is required".to_string()));
        }
        if horizons.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AppError::Config(
                "horizons must be unique and in ascending order".to_string(),
            ));
        }
        if self.tracker.max_concurrent_lookups == 0 {
            return Err(AppError::Config("MAX_CONCURRENT_LOOKUPS must be positive".to_string()));
        }
        if self.tracker.lookup_attempts == 0 {
            return Err(AppError::Config("LOOKUP_ATTEMPTS must be positive".to_string()));
        }
        if self.tracker.market_close_hour_utc > 23 {
            return Err(AppError::Config("MARKET_CLOSE_HOUR_UTC must be 0-23".to_string()));
        }
        if !(0.0..=1.0).contains(&self.filter.min_strength_for_alert) {
            return Err(AppError::Config("MIN_STRENGTH_FOR_ALERT must be within 0..1".to_string()));
        }
        if self.cluster.kmeans_k == 0 {
            return Err(AppError::Config("KMEANS_K must be positive".to_string()));
        }
        Ok(())
    }
}
