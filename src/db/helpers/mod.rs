use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::SessionPhase;
use crate::models::SessionStatus;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_phase(value: &str) -> Result<SessionPhase> {
    match value {
        "Running" => Ok(SessionPhase::Running),
        "Stopped" => Ok(SessionPhase::Stopped),
        "Interrupted" => Ok(SessionPhase::Interrupted),
        other => Err(anyhow!("unknown session phase {other}")),
    }
}

pub fn parse_session_status(value: &str) -> Result<SessionStatus> {
    SessionStatus::parse(value).ok_or_else(|| anyhow!("unknown session status {value}"))
}

pub fn flag_to_u8(value: Option<i64>, field: &str) -> Result<Option<u8>> {
    match value {
        None => Ok(None),
        Some(0) => Ok(Some(0)),
        Some(1) => Ok(Some(1)),
        Some(other) => Err(anyhow!("{field} contains non-flag value {other}")),
    }
}
