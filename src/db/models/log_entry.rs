//! Row model for the append-only `log_entries` table.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{AggregatedRecord, SessionBoundary, SessionStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogEntryBody {
    Record {
        record: AggregatedRecord,
        session_id: Option<String>,
    },
    Boundary(SessionBoundary),
}

/// One persisted row, in insertion order by `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub body: LogEntryBody,
}

impl LogEntry {
    pub fn session_status(&self) -> SessionStatus {
        match &self.body {
            LogEntryBody::Record { record, .. } => record.session_status,
            LogEntryBody::Boundary(boundary) => boundary.status,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match &self.body {
            LogEntryBody::Record { record, .. } => record.timestamp,
            LogEntryBody::Boundary(boundary) => boundary.occurred_at,
        }
    }

    /// One-line summary for the recent-activity view.
    pub fn summary(&self) -> String {
        match &self.body {
            LogEntryBody::Boundary(boundary) => {
                let app = if boundary.game.is_empty() {
                    "unknown app"
                } else {
                    boundary.game.as_str()
                };
                match boundary.duration_ms {
                    Some(ms) => format!(
                        "{} session {} ({app}, {}s)",
                        boundary.occurred_at.format("%H:%M"),
                        boundary.status.as_str().to_lowercase(),
                        ms / 1000
                    ),
                    None => format!(
                        "{} session {} ({app})",
                        boundary.occurred_at.format("%H:%M"),
                        boundary.status.as_str().to_lowercase()
                    ),
                }
            }
            LogEntryBody::Record { record, .. } => {
                let app = if record.game.is_empty() {
                    "unknown app"
                } else {
                    record.game.as_str()
                };
                let verdict = match (record.forward_lean_flag, record.uneven_shoulders_flag) {
                    (1, 1) => "forward lean & uneven shoulders",
                    (1, _) => "forward lean",
                    (_, 1) => "uneven shoulders",
                    _ if record.good_posture == 1 => "good posture",
                    _ => "posture unclear",
                };
                format!("{} {verdict} in {app}", record.timestamp.format("%H:%M"))
            }
        }
    }
}
