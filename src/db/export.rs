//! Portable CSV export and import of the full log history.
//!
//! Layout: the record fields in their fixed order, followed by
//! `session_duration_ms` and `session_id`. Data rows always carry 0/1 flags;
//! session boundary rows leave the three flag cells and the measurements
//! empty and carry `Started`/`Stopped` in `session_status`.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use rusqlite::Connection;
use tempfile::NamedTempFile;

use crate::db::{
    models::{LogEntry, LogEntryBody},
    repositories::log_entries::load_entries,
};
use crate::models::{
    AggregatedRecord, CandidateRecord, FlagInput, SessionBoundary, SessionStatus, RECORD_FIELDS,
};
use crate::validation::{parse_timestamp, validate_detailed, RejectionReason};

pub const EXTRA_FIELDS: [&str; 2] = ["session_duration_ms", "session_id"];

pub fn export_header() -> Vec<&'static str> {
    RECORD_FIELDS.iter().chain(EXTRA_FIELDS.iter()).copied().collect()
}

fn format_measure(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn entry_to_row(entry: &LogEntry) -> Vec<String> {
    match &entry.body {
        LogEntryBody::Record { record, session_id } => vec![
            record.timestamp_string(),
            record.good_posture.to_string(),
            record.forward_lean_flag.to_string(),
            record.uneven_shoulders_flag.to_string(),
            format_measure(record.back_angle),
            format_measure(record.forward_lean),
            format_measure(record.shoulder_alignment),
            record.session_status.as_str().to_string(),
            record.game.clone(),
            String::new(),
            session_id.clone().unwrap_or_default(),
        ],
        LogEntryBody::Boundary(boundary) => vec![
            boundary.occurred_at.to_rfc3339(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            boundary.status.as_str().to_string(),
            boundary.game.clone(),
            boundary
                .duration_ms
                .map(|ms| ms.to_string())
                .unwrap_or_default(),
            boundary.session_id.clone(),
        ],
    }
}

/// Writes every entry to `destination`, replacing it atomically. Runs on the
/// database thread, so no append can land between the read and the write.
///
/// On any failure the temporary file is removed and an existing destination
/// is left untouched.
pub(crate) fn export_all_sync(conn: &Connection, destination: &Path) -> Result<u64> {
    let entries = load_entries(conn).context("failed to read log history for export")?;

    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;

    let mut temp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create temporary export file in {}", dir.display()))?;

    {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        writer.write_record(export_header())?;
        for entry in &entries {
            writer.write_record(entry_to_row(entry))?;
        }
        writer.flush().context("failed to flush export")?;
    }
    temp.as_file_mut().flush()?;
    temp.as_file()
        .sync_all()
        .context("failed to sync export file")?;

    temp.persist(destination)
        .map_err(|err| anyhow!("failed to move export into place: {}", err.error))?;

    info!(
        "Exported {} log rows to {}",
        entries.len(),
        destination.display()
    );
    Ok(entries.len() as u64)
}

/// A row read back from an exported file.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportedRow {
    Record {
        record: AggregatedRecord,
        session_id: Option<String>,
    },
    Boundary(SessionBoundary),
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub rows: Vec<ImportedRow>,
    /// 1-based data line numbers of rows that failed validation.
    pub rejected: Vec<(usize, RejectionReason)>,
}

fn optional_cell(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Unparseable numbers become NaN so validation records them as anomalies.
fn parse_measure(value: &str) -> Option<f64> {
    optional_cell(value).map(|raw| raw.parse::<f64>().unwrap_or(f64::NAN))
}

/// Reads an exported CSV back. Data rows pass through the validation layer
/// exactly like freshly aggregated records.
pub fn import_csv(path: &Path) -> Result<ImportReport> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let expected = export_header();
    if headers.iter().collect::<Vec<_>>() != expected {
        bail!(
            "unexpected header in {}: {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>()
        );
    }

    let mut report = ImportReport::default();
    for (index, result) in reader.records().enumerate() {
        let line = index + 1;
        let row = result.with_context(|| format!("malformed CSV row {line}"))?;
        let cell = |i: usize| row.get(i).unwrap_or("");

        let status = SessionStatus::parse(cell(7))
            .ok_or_else(|| anyhow!("row {line}: unknown session_status '{}'", cell(7)))?;
        let flags_empty = (1..=3).all(|i| cell(i).trim().is_empty());

        if flags_empty && status != SessionStatus::Running {
            let Some(occurred_at) = parse_timestamp(cell(0)) else {
                warn!("skipping boundary row {line} with bad timestamp '{}'", cell(0));
                report
                    .rejected
                    .push((line, RejectionReason::InvalidTimestamp(cell(0).to_string())));
                continue;
            };
            let duration_ms = optional_cell(cell(9))
                .map(|raw| raw.parse::<u64>())
                .transpose()
                .with_context(|| format!("row {line}: bad session_duration_ms"))?;
            report.rows.push(ImportedRow::Boundary(SessionBoundary {
                session_id: cell(10).to_string(),
                status,
                occurred_at,
                game: cell(8).to_string(),
                duration_ms,
            }));
            continue;
        }

        let candidate = CandidateRecord {
            timestamp: cell(0).to_string(),
            good_posture: FlagInput::Text(cell(1).to_string()),
            forward_lean_flag: FlagInput::Text(cell(2).to_string()),
            uneven_shoulders_flag: FlagInput::Text(cell(3).to_string()),
            back_angle: parse_measure(cell(4)),
            forward_lean: parse_measure(cell(5)),
            shoulder_alignment: parse_measure(cell(6)),
            session_status: status,
            game: cell(8).to_string(),
        };

        match validate_detailed(&candidate) {
            Ok(validated) => report.rows.push(ImportedRow::Record {
                record: validated.record,
                session_id: optional_cell(cell(10)),
            }),
            Err(reason) => {
                warn!("skipping row {line}: {reason}");
                report.rejected.push((line, reason));
            }
        }
    }

    Ok(report)
}
