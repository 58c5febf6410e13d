use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed offset after a signal fires at which price is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
}

/// Parses the short label ("1h", "4h", "1d", "1w", "1m").
impl std::str::FromStr for Horizon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Horizon::OneHour),
            "4h" => Ok(Horizon::FourHours),
            "1d" | "24h" => Ok(Horizon::OneDay),
            "1w" => Ok(Horizon::OneWeek),
            "1m" | "30d" => Ok(Horizon::OneMonth),
            _ => Err(format!("Unknown horizon: {}", s)),
        }
    }
}

impl Horizon {
    /// All horizons in resolution order.
    pub const ALL: [Horizon; 5] = [
        Horizon::OneHour,
        Horizon::FourHours,
        Horizon::OneDay,
        Horizon::OneWeek,
        Horizon::OneMonth,
    ];

    /// Short label, also used as the column suffix in storage.
    pub fn label(&self) -> &'static str {
        match self {
            Horizon::OneHour => "1h",
            Horizon::FourHours => "4h",
            Horizon::OneDay => "1d",
            Horizon::OneWeek => "1w",
            Horizon::OneMonth => "1m",
        }
    }

    /// Position in [`Horizon::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Horizon::OneHour => 0,
            Horizon::FourHours => 1,
            Horizon::OneDay => 2,
            Horizon::OneWeek => 3,
            Horizon::OneMonth => 4,
        }
    }

    /// Offset from the trigger time in seconds. A month is 30 days.
    pub fn duration_seconds(&self) -> i64 {
        match self {
            Horizon::OneHour => 3_600,
            Horizon::FourHours => 14_400,
            Horizon::OneDay => 86_400,
            Horizon::OneWeek => 604_800,
            Horizon::OneMonth => 2_592_000,
        }
    }

    pub fn offset(&self) -> Duration {
        Duration::seconds(self.duration_seconds())
    }

    /// Number of non-overlapping holding periods per year, used to annualize Sharpe.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            // 6.5 trading hours per session
            Horizon::OneHour => 252.0 * 6.5,
            Horizon::FourHours => 252.0 * 6.5 / 4.0,
            Horizon::OneDay => 252.0,
            Horizon::OneWeek => 52.0,
            Horizon::OneMonth => 12.0,
        }
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Category of the indicator behind a signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Trend,
    Momentum,
    Volatility,
    Volume,
    Other,
}

impl SignalCategory {
    /// Categories in feature-vector order.
    pub const ALL: [SignalCategory; 5] = [
        SignalCategory::Trend,
        SignalCategory::Momentum,
        SignalCategory::Volatility,
        SignalCategory::Volume,
        SignalCategory::Other,
    ];

    /// Classify a signal type string by its indicator prefix.
    pub fn of(signal_type: &str) -> Self {
        let lower = signal_type.to_lowercase();
        let prefix = lower.split(['_', '-']).next().unwrap_or("");

        match prefix {
            "rsi" | "stoch" | "stochastic" | "macd" | "cci" | "mfi" | "roc" | "momentum" => {
                SignalCategory::Momentum
            }
            "sma" | "ema" | "adx" | "golden" | "death" | "trend" | "supertrend" => {
                SignalCategory::Trend
            }
            "bb" | "bollinger" | "atr" | "keltner" | "squeeze" => SignalCategory::Volatility,
            "obv" | "vwap" | "volume" => SignalCategory::Volume,
            _ => SignalCategory::Other,
        }
    }

    /// Position in [`SignalCategory::ALL`].
    pub fn index(&self) -> usize {
        match self {
            SignalCategory::Trend => 0,
            SignalCategory::Momentum => 1,
            SignalCategory::Volatility => 2,
            SignalCategory::Volume => 3,
            SignalCategory::Other => 4,
        }
    }
}

/// Maximum accepted length of a signal type string.
pub const MAX_SIGNAL_TYPE_LEN: usize = 64;

/// Check that a signal type string is usable as a grouping key.
///
/// Signal types are an open set: new ones appear without a redeploy, so only
/// the shape is validated here.
pub fn is_well_formed_signal_type(signal_type: &str) -> bool {
    !signal_type.is_empty()
        && signal_type.len() <= MAX_SIGNAL_TYPE_LEN
        && signal_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A fired technical-indicator event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    /// Open string enum, e.g. `RSI_overbought`.
    pub signal_type: String,
    pub timeframe: String,
    pub triggered_at: DateTime<Utc>,
    pub price_at_trigger: f64,
    pub indicator_value: f64,
    /// Signal strength in 0..1.
    pub strength: f64,
    pub volume_confirmed: bool,
}

impl Signal {
    /// Create a signal with a fresh id.
    pub fn new(
        symbol: impl Into<String>,
        signal_type: impl Into<String>,
        triggered_at: DateTime<Utc>,
        price_at_trigger: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            signal_type: signal_type.into(),
            timeframe: "1h".to_string(),
            triggered_at,
            price_at_trigger,
            indicator_value: 0.0,
            strength: 0.5,
            volume_confirmed: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_volume_confirmed(mut self, confirmed: bool) -> Self {
        self.volume_confirmed = confirmed;
        self
    }

    pub fn with_indicator_value(mut self, value: f64) -> Self {
        self.indicator_value = value;
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }

    /// Time at which the given horizon should be sampled.
    pub fn target_time(&self, horizon: Horizon) -> DateTime<Utc> {
        self.triggered_at + horizon.offset()
    }

    pub fn category(&self) -> SignalCategory {
        SignalCategory::of(&self.signal_type)
    }
}
