use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Session, SessionBoundary, SessionStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackerStatus {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// Idle -> Running -> Stopped -> Running ... lifecycle of tracking sessions.
///
/// Only one session is active at a time. `start` while running and `stop`
/// while not running are no-ops that return `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTracker {
    pub status: TrackerStatus,
    pub current: Option<Session>,
    /// Most recently closed session, kept for summaries after stop.
    pub last_closed: Option<Session>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: DateTime<Utc>, game: &str) -> Option<SessionBoundary> {
        if self.status == TrackerStatus::Running {
            return None;
        }

        let session = Session::new(Uuid::new_v4().to_string(), now, game.to_string());
        let boundary = SessionBoundary::started(&session);
        self.current = Some(session);
        self.status = TrackerStatus::Running;
        Some(boundary)
    }

    /// Closes the active session. The returned session has `stopped_at` set.
    pub fn stop(&mut self, now: DateTime<Utc>, game: &str) -> Option<(Session, SessionBoundary)> {
        if self.status != TrackerStatus::Running {
            return None;
        }

        let mut session = self.current.take()?;
        let stopped_at = now.max(session.started_at);
        session.stopped_at = Some(stopped_at);
        let boundary = SessionBoundary::stopped(&session, stopped_at, game.to_string());

        self.status = TrackerStatus::Stopped;
        self.last_closed = Some(session.clone());
        Some((session, boundary))
    }

    pub fn is_running(&self) -> bool {
        self.status == TrackerStatus::Running
    }

    /// The `session_status` stamped on records aggregated right now, or
    /// `None` when aggregation must be skipped.
    pub fn record_status(&self) -> Option<SessionStatus> {
        self.is_running().then_some(SessionStatus::Running)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.current.as_ref().map(|session| session.id.as_str())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.current.as_ref().map(|session| session.started_at)
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match (&self.current, &self.last_closed) {
            (Some(session), _) => session.duration(now),
            (None, Some(closed)) => closed.duration(now),
            (None, None) => Duration::zero(),
        }
    }
}
