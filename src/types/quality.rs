use super::signal::Horizon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trust grade for a signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
    /// Not enough samples to trust the statistics.
    Unrated,
}

impl Grade {
    /// Grade from win rate (0..1) and average return (percent).
    ///
    /// A and B need both thresholds; a strong win rate with a weak or negative
    /// average return stops at C.
    pub fn from_stats(win_rate: f64, avg_return: f64) -> Self {
        if win_rate >= 0.70 && avg_return >= 1.0 {
            Grade::A
        } else if win_rate >= 0.60 && avg_return >= 0.3 {
            Grade::B
        } else if win_rate >= 0.50 {
            Grade::C
        } else if win_rate >= 0.40 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
            Grade::Unrated => "UNRATED",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Historical reliability of a signal type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGrade {
    pub signal_type: String,
    /// Fraction of samples with a positive return, 0..1.
    pub win_rate: Option<f64>,
    /// Mean return in percent.
    pub avg_return: Option<f64>,
    /// Sample standard deviation of returns.
    pub stdev_return: Option<f64>,
    pub sample_size: u32,
    pub grade: Grade,
    pub horizon: Horizon,
    pub evaluated_at: DateTime<Utc>,
}

impl QualityGrade {
    /// An UNRATED grade with no statistics.
    pub fn unrated(signal_type: impl Into<String>, horizon: Horizon, now: DateTime<Utc>) -> Self {
        Self {
            signal_type: signal_type.into(),
            win_rate: None,
            avg_return: None,
            stdev_return: None,
            sample_size: 0,
            grade: Grade::Unrated,
            horizon,
            evaluated_at: now,
        }
    }
}

/// Result of the alert decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDecision {
    pub alert: bool,
    /// Which criteria failed, or why the alert passed.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_table() {
        assert_eq!(Grade::from_stats(0.75, 1.2), Grade::A);
        assert_eq!(Grade::from_stats(0.70, 1.0), Grade::A);
        assert_eq!(Grade::from_stats(0.75, 0.5), Grade::B);
        assert_eq!(Grade::from_stats(0.65, 0.3), Grade::B);
        assert_eq!(Grade::from_stats(0.55, 2.0), Grade::C);
        assert_eq!(Grade::from_stats(0.45, 2.0), Grade::D);
        assert_eq!(Grade::from_stats(0.39, 2.0), Grade::F);
    }

    #[test]
    fn test_high_win_rate_negative_return_caps_at_c() {
        assert_eq!(Grade::from_stats(0.95, -0.5), Grade::C);
        assert_eq!(Grade::from_stats(0.80, 0.1), Grade::C);
    }

    #[test]
    fn test_grade_serialization() {
        assert_eq!(serde_json::to_string(&Grade::Unrated).unwrap(), "\"UNRATED\"");
        assert_eq!(serde_json::to_string(&Grade::A).unwrap(), "\"A\"");
    }
}
