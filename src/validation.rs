//! Field-level sanitisation applied to every record before it may be stored.
//!
//! Out-of-domain numbers become `None` and unrecognisable flags become `0`;
//! both are reported as [`FieldAnomaly`] values. The only whole-record
//! rejection is a timestamp that cannot be reconstructed.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use serde::Serialize;
use thiserror::Error;

use crate::models::{AggregatedRecord, CandidateRecord, FlagInput};

pub const BACK_ANGLE_MIN: f64 = 0.0;
pub const BACK_ANGLE_MAX: f64 = 360.0;

/// Formats accepted for timestamps without an explicit offset. Values are
/// taken as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 3] =
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("timestamp '{0}' is not a valid instant")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyKind {
    OutOfRange { value: f64 },
    NotFinite,
    NotBoolean { value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldAnomaly {
    pub field: &'static str,
    #[serde(flatten)]
    pub kind: AnomalyKind,
}

/// A sanitised record plus the coercions made on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub record: AggregatedRecord,
    pub anomalies: Vec<FieldAnomaly>,
}

pub fn validate(candidate: &CandidateRecord) -> Result<AggregatedRecord, RejectionReason> {
    validate_detailed(candidate).map(|validated| validated.record)
}

pub fn validate_detailed(candidate: &CandidateRecord) -> Result<Validated, RejectionReason> {
    let timestamp = parse_timestamp(&candidate.timestamp)
        .ok_or_else(|| RejectionReason::InvalidTimestamp(candidate.timestamp.clone()))?;

    let mut anomalies = Vec::new();

    let good_posture = coerce_flag("good_posture", &candidate.good_posture, &mut anomalies);
    let forward_lean_flag =
        coerce_flag("forward_lean_flag", &candidate.forward_lean_flag, &mut anomalies);
    let uneven_shoulders_flag = coerce_flag(
        "uneven_shoulders_flag",
        &candidate.uneven_shoulders_flag,
        &mut anomalies,
    );

    let back_angle = bounded(
        "back_angle",
        candidate.back_angle,
        BACK_ANGLE_MIN,
        BACK_ANGLE_MAX,
        &mut anomalies,
    );
    let forward_lean = bounded(
        "forward_lean",
        candidate.forward_lean,
        0.0,
        f64::INFINITY,
        &mut anomalies,
    );
    let shoulder_alignment = bounded(
        "shoulder_alignment",
        candidate.shoulder_alignment,
        0.0,
        f64::INFINITY,
        &mut anomalies,
    );

    for anomaly in &anomalies {
        warn!(
            "coerced {} in record at {}: {:?}",
            anomaly.field, candidate.timestamp, anomaly.kind
        );
    }

    Ok(Validated {
        record: AggregatedRecord {
            timestamp,
            good_posture,
            forward_lean_flag,
            uneven_shoulders_flag,
            back_angle,
            forward_lean,
            shoulder_alignment,
            session_status: candidate.session_status,
            game: candidate.game.clone(),
        },
        anomalies,
    })
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn coerce_flag(field: &'static str, input: &FlagInput, anomalies: &mut Vec<FieldAnomaly>) -> u8 {
    let parsed = match input {
        FlagInput::Bool(value) => Some(*value),
        FlagInput::Int(0) => Some(false),
        FlagInput::Int(1) => Some(true),
        FlagInput::Int(_) => None,
        FlagInput::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" => Some(true),
            "0" | "false" | "f" | "no" | "n" => Some(false),
            _ => None,
        },
    };

    match parsed {
        Some(value) => u8::from(value),
        None => {
            let value = match input {
                FlagInput::Bool(value) => value.to_string(),
                FlagInput::Int(value) => value.to_string(),
                FlagInput::Text(text) => text.clone(),
            };
            anomalies.push(FieldAnomaly {
                field,
                kind: AnomalyKind::NotBoolean { value },
            });
            0
        }
    }
}

fn bounded(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
    anomalies: &mut Vec<FieldAnomaly>,
) -> Option<f64> {
    let value = value?;
    if !value.is_finite() {
        anomalies.push(FieldAnomaly {
            field,
            kind: AnomalyKind::NotFinite,
        });
        return None;
    }
    if value < min || value > max {
        anomalies.push(FieldAnomaly {
            field,
            kind: AnomalyKind::OutOfRange { value },
        });
        return None;
    }
    Some(value)
}
