//! Tracking session and the boundary events that bracket it in the log.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::record::SessionStatus;

/// One continuous tracking period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Foreground application when the session started.
    pub game: String,
}

impl Session {
    pub fn new(id: String, started_at: DateTime<Utc>, game: String) -> Self {
        Self {
            id,
            started_at,
            stopped_at: None,
            game,
        }
    }

    /// Elapsed time up to `stopped_at`, or up to `now` for an open session.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.stopped_at.unwrap_or(now);
        (end - self.started_at).max(Duration::zero())
    }
}

/// A `Started` or `Stopped` marker written to the log around a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBoundary {
    pub session_id: String,
    pub status: SessionStatus,
    pub occurred_at: DateTime<Utc>,
    pub game: String,
    /// Only set on `Stopped` boundaries.
    pub duration_ms: Option<u64>,
}

impl SessionBoundary {
    pub fn started(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            status: SessionStatus::Started,
            occurred_at: session.started_at,
            game: session.game.clone(),
            duration_ms: None,
        }
    }

    pub fn stopped(session: &Session, stopped_at: DateTime<Utc>, game: String) -> Self {
        let duration_ms = (stopped_at - session.started_at)
            .num_milliseconds()
            .max(0) as u64;
        Self {
            session_id: session.id.clone(),
            status: SessionStatus::Stopped,
            occurred_at: stopped_at,
            game,
            duration_ms: Some(duration_ms),
        }
    }
}
