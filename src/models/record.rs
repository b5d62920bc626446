//! The aggregated log record: the unit of durable storage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column order of the persisted and exported record. Exported files rely on
/// this order staying fixed across schema versions.
pub const RECORD_FIELDS: [&str; 9] = [
    "timestamp",
    "good_posture",
    "forward_lean_flag",
    "uneven_shoulders_flag",
    "back_angle",
    "forward_lean",
    "shoulder_alignment",
    "session_status",
    "game",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    Started,
    Running,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Started => "Started",
            SessionStatus::Running => "Running",
            SessionStatus::Stopped => "Stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Started" => Some(SessionStatus::Started),
            "Running" => Some(SessionStatus::Running),
            "Stopped" => Some(SessionStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flag value as it arrives at the validation layer, before coercion to 0/1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagInput {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for FlagInput {
    fn from(value: bool) -> Self {
        FlagInput::Bool(value)
    }
}

/// A record that has not yet passed validation. Produced by the aggregator and
/// by CSV import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub timestamp: String,
    pub good_posture: FlagInput,
    pub forward_lean_flag: FlagInput,
    pub uneven_shoulders_flag: FlagInput,
    pub back_angle: Option<f64>,
    pub forward_lean: Option<f64>,
    pub shoulder_alignment: Option<f64>,
    pub session_status: SessionStatus,
    pub game: String,
}

/// A validated record. Every numeric field is either within its domain or
/// `None`; flags are 0 or 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub timestamp: DateTime<Utc>,
    pub good_posture: u8,
    pub forward_lean_flag: u8,
    pub uneven_shoulders_flag: u8,
    pub back_angle: Option<f64>,
    pub forward_lean: Option<f64>,
    pub shoulder_alignment: Option<f64>,
    pub session_status: SessionStatus,
    pub game: String,
}

impl AggregatedRecord {
    /// Formats the timestamp the way it is stored and exported.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}
