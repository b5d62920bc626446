use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{flag_to_u8, parse_datetime, parse_session_status, to_i64, to_u64},
    models::{LogEntry, LogEntryBody},
};
use crate::models::{AggregatedRecord, SessionBoundary};

const SELECT_COLUMNS: &str = "SELECT id, entry_kind, timestamp, good_posture, forward_lean_flag,
        uneven_shoulders_flag, back_angle, forward_lean, shoulder_alignment,
        session_status, game, session_id, duration_ms
     FROM log_entries";

fn row_to_entry(row: &Row) -> Result<LogEntry> {
    let id: i64 = row.get("id")?;
    let kind: String = row.get("entry_kind")?;
    let timestamp: String = row.get("timestamp")?;
    let status: String = row.get("session_status")?;
    let game: String = row.get("game")?;
    let session_id: Option<String> = row.get("session_id")?;

    let timestamp = parse_datetime(&timestamp, "timestamp")?;
    let session_status = parse_session_status(&status)?;

    let body = match kind.as_str() {
        "record" => {
            let flag = |name: &str| -> Result<u8> {
                flag_to_u8(row.get::<_, Option<i64>>(name)?, name)?
                    .ok_or_else(|| anyhow!("record {id} has NULL {name}"))
            };
            LogEntryBody::Record {
                record: AggregatedRecord {
                    timestamp,
                    good_posture: flag("good_posture")?,
                    forward_lean_flag: flag("forward_lean_flag")?,
                    uneven_shoulders_flag: flag("uneven_shoulders_flag")?,
                    back_angle: row.get("back_angle")?,
                    forward_lean: row.get("forward_lean")?,
                    shoulder_alignment: row.get("shoulder_alignment")?,
                    session_status,
                    game,
                },
                session_id,
            }
        }
        "boundary" => {
            let duration_ms: Option<i64> = row.get("duration_ms")?;
            LogEntryBody::Boundary(SessionBoundary {
                session_id: session_id.unwrap_or_default(),
                status: session_status,
                occurred_at: timestamp,
                game,
                duration_ms: duration_ms
                    .map(|ms| to_u64(ms, "duration_ms"))
                    .transpose()?,
            })
        }
        other => return Err(anyhow!("unknown entry kind {other} on row {id}")),
    };

    Ok(LogEntry { id, body })
}

/// Reads entries in insertion order. Runs on the database thread so callers
/// such as export see a snapshot that no append can interleave with.
pub(crate) fn load_entries(conn: &Connection) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
    let mut rows = stmt.query([])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(row_to_entry(row)?);
    }
    Ok(entries)
}

pub(crate) fn insert_record_sync(
    conn: &Connection,
    record: &AggregatedRecord,
    session_id: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO log_entries (
            entry_kind, timestamp, good_posture, forward_lean_flag, uneven_shoulders_flag,
            back_angle, forward_lean, shoulder_alignment, session_status, game, session_id
        ) VALUES ('record', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.timestamp_string(),
            record.good_posture,
            record.forward_lean_flag,
            record.uneven_shoulders_flag,
            record.back_angle,
            record.forward_lean,
            record.shoulder_alignment,
            record.session_status.as_str(),
            record.game,
            session_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_boundary_sync(conn: &Connection, boundary: &SessionBoundary) -> Result<i64> {
    conn.execute(
        "INSERT INTO log_entries (
            entry_kind, timestamp, session_status, game, session_id, duration_ms
        ) VALUES ('boundary', ?1, ?2, ?3, ?4, ?5)",
        params![
            boundary.occurred_at.to_rfc3339(),
            boundary.status.as_str(),
            boundary.game,
            boundary.session_id,
            boundary.duration_ms.map(to_i64).transpose()?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    pub async fn insert_record(
        &self,
        record: &AggregatedRecord,
        session_id: Option<&str>,
    ) -> Result<i64> {
        let record = record.clone();
        let session_id = session_id.map(str::to_string);
        self.execute(move |conn| insert_record_sync(conn, &record, session_id.as_deref()))
            .await
    }

    pub async fn insert_boundary(&self, boundary: &SessionBoundary) -> Result<i64> {
        let boundary = boundary.clone();
        self.execute(move |conn| insert_boundary_sync(conn, &boundary))
            .await
    }

    pub async fn get_log_entries(&self) -> Result<Vec<LogEntry>> {
        self.execute(|conn| load_entries(conn)).await
    }

    /// Newest entries first.
    pub async fn get_recent_log_entries(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
            let mut rows = stmt.query(params![limit])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    /// Newest entry written for `session_id`, if any.
    pub async fn latest_entry_for_session(&self, session_id: &str) -> Result<Option<LogEntry>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS}
                 WHERE session_id = ?1
                 ORDER BY id DESC
                 LIMIT 1"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_entry(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn count_log_entries(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM log_entries", [], |row| row.get(0))?;
            to_u64(count, "count")
        })
        .await
    }
}
