use crate::config::FilterConfig;
use crate::types::{AlertDecision, Grade, QualityGrade, Signal};

/// Decides whether a fired signal is worth an alert.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    config: FilterConfig,
}

impl SignalFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Alert only when the grade is trusted and the signal itself is strong
    /// enough. The reason names every failed criterion.
    pub fn should_alert(&self, signal: &Signal, grade: &QualityGrade) -> AlertDecision {
        let mut failures = Vec::new();

        if grade.signal_type != signal.signal_type {
            failures.push(format!(
                "grade is for {} not {}",
                grade.signal_type, signal.signal_type
            ));
        }

        match grade.grade {
            Grade::A | Grade::B => {}
            Grade::Unrated if self.config.unrated_passes => {}
            Grade::Unrated => failures.push(format!(
                "{} is unrated ({} samples)",
                signal.signal_type, grade.sample_size
            )),
            other => failures.push(format!("grade {} below B", other)),
        }

        if !signal.strength.is_finite() {
            failures.push(format!("strength {} is not finite", signal.strength));
        } else if signal.strength < self.config.min_strength_for_alert {
            failures.push(format!(
                "strength {:.2} below {:.2}",
                signal.strength, self.config.min_strength_for_alert
            ));
        }

        if self.config.require_volume_confirmation && !signal.volume_confirmed {
            failures.push("volume not confirmed".to_string());
        }

        if failures.is_empty() {
            let win_rate = grade
                .win_rate
                .map(|w| format!("{:.0}% win rate", w * 100.0))
                .unwrap_or_else(|| "no history".to_string());
            AlertDecision {
                alert: true,
                reason: format!(
                    "{} grade {} ({}, {} samples), strength {:.2}",
                    signal.signal_type, grade.grade, win_rate, grade.sample_size, signal.strength
                ),
            }
        } else {
            AlertDecision {
                alert: false,
                reason: failures.join("; "),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Horizon;
    use chrono::{TimeZone, Utc};

    fn signal(strength: f64, volume: bool) -> Signal {
        let t = Utc.with_ymd_and_hms(2024, 1, 8, 15, 0, 0).unwrap();
        Signal::new("BTC", "RSI_oversold", t, 100.0)
            .with_strength(strength)
            .with_volume_confirmed(volume)
    }

    fn graded(grade: Grade) -> QualityGrade {
        let mut g = QualityGrade::unrated("RSI_oversold", Horizon::OneDay, Utc::now());
        g.grade = grade;
        g.sample_size = 20;
        g.win_rate = Some(0.75);
        g
    }

    #[test]
    fn test_alerts_on_good_grade() {
        let filter = SignalFilter::default();
        let decision = filter.should_alert(&signal(0.8, false), &graded(Grade::A));
        assert!(decision.alert);
        assert!(decision.reason.contains("75% win rate"));
    }

    #[test]
    fn test_rejects_weak_grades() {
        let filter = SignalFilter::default();
        for grade in [Grade::C, Grade::D, Grade::F, Grade::Unrated] {
            assert!(!filter.should_alert(&signal(0.9, true), &graded(grade)).alert);
        }
    }

    #[test]
    fn test_unrated_passes_when_configured() {
        let filter = SignalFilter::new(FilterConfig {
            unrated_passes: true,
            ..FilterConfig::default()
        });
        assert!(filter.should_alert(&signal(0.9, false), &graded(Grade::Unrated)).alert);
    }

    #[test]
    fn test_reason_lists_every_failure() {
        let filter = SignalFilter::new(FilterConfig {
            require_volume_confirmation: true,
            ..FilterConfig::default()
        });
        let decision = filter.should_alert(&signal(0.2, false), &graded(Grade::D));

        assert!(!decision.alert);
        assert!(decision.reason.contains("grade D below B"));
        assert!(decision.reason.contains("strength 0.20 below 0.50"));
        assert!(decision.reason.contains("volume not confirmed"));
    }

    #[test]
    fn test_rejects_grade_of_another_type() {
        let filter = SignalFilter::default();
        let mut grade = graded(Grade::A);
        grade.signal_type = "MACD_bullish_cross".to_string();

        let decision = filter.should_alert(&signal(0.9, false), &grade);
        assert!(!decision.alert);
        assert!(decision.reason.contains("grade is for MACD_bullish_cross"));
    }

    #[test]
    fn test_non_finite_strength_never_alerts() {
        let filter = SignalFilter::default();
        for strength in [f64::NAN, f64::INFINITY] {
            let decision = filter.should_alert(&signal(strength, true), &graded(Grade::A));
            assert!(!decision.alert);
            assert!(decision.reason.contains("is not finite"));
        }
    }
}
