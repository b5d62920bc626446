use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_phase},
    models::{SessionPhase, SessionRow},
};
use crate::models::Session;

fn row_to_session(row: &Row) -> Result<SessionRow> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;

    Ok(SessionRow {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_phase(&status)?,
        game: row.get("game")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, started_at, stopped_at, status, game, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    SessionPhase::Running.as_str(),
                    record.game,
                    record.started_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_phase(
        &self,
        session_id: &str,
        phase: SessionPhase,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    phase.as_str(),
                    stopped_at.to_rfc3339(),
                    stopped_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Removes a session row that never got its `Started` boundary.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }

    pub async fn get_incomplete_sessions(&self) -> Result<Vec<SessionRow>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, stopped_at, status, game, updated_at
                 FROM sessions
                 WHERE status = 'Running'
                 ORDER BY started_at ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, stopped_at, status, game, updated_at
                 FROM sessions
                 WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }
}
