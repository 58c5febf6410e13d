//! Wire format tests for the public types

mod common;

use augur::types::{Grade, Horizon, Outcome, OutcomeStatus, QualityGrade, Signal};
use common::{monday, signal};
use serde_json::json;

#[test]
fn test_horizon_labels() {
    assert_eq!(serde_json::to_value(Horizon::OneDay).unwrap(), json!("1d"));
    assert_eq!(serde_json::to_value(Horizon::OneMonth).unwrap(), json!("1m"));
    let parsed: Horizon = serde_json::from_value(json!("4h")).unwrap();
    assert_eq!(parsed, Horizon::FourHours);
    for horizon in Horizon::ALL {
        assert_eq!(horizon.label().parse::<Horizon>(), Ok(horizon));
    }
}

#[test]
fn test_status_and_grade_names() {
    assert_eq!(serde_json::to_value(OutcomeStatus::Complete).unwrap(), json!("COMPLETE"));
    assert_eq!(serde_json::to_value(OutcomeStatus::Stale).unwrap(), json!("STALE"));
    assert_eq!(serde_json::to_value(Grade::Unrated).unwrap(), json!("UNRATED"));
    assert_eq!(Grade::Unrated.to_string(), "UNRATED");
}

#[test]
fn test_signal_uses_camel_case() {
    let s = signal("s1", "RSI_oversold", monday()).with_volume_confirmed(true);
    let value = serde_json::to_value(&s).unwrap();

    assert_eq!(value["signalType"], json!("RSI_oversold"));
    assert_eq!(value["priceAtTrigger"], json!(100.0));
    assert_eq!(value["volumeConfirmed"], json!(true));
    assert!(value["triggeredAt"].as_str().unwrap().starts_with("2024-01-08T15:00:00"));

    let back: Signal = serde_json::from_value(value).unwrap();
    assert_eq!(back, s);
}

#[test]
fn test_pending_outcome_shape() {
    let s = signal("s1", "RSI_oversold", monday());
    let outcome = Outcome::pending(&s, &Horizon::ALL, monday());
    let value = serde_json::to_value(&outcome).unwrap();

    assert_eq!(value["signalId"], json!("s1"));
    assert_eq!(value["status"], json!("PENDING"));
    assert_eq!(outcome.resolved_count(), 0);
}

#[test]
fn test_unrated_grade_has_null_statistics() {
    let grade = QualityGrade::unrated("RSI_oversold", Horizon::OneDay, monday());
    let value = serde_json::to_value(&grade).unwrap();

    assert_eq!(value["grade"], json!("UNRATED"));
    assert_eq!(value["horizon"], json!("1d"));
    assert!(value["winRate"].is_null());
    assert_eq!(value["sampleSize"], json!(0));
}
