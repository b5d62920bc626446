//! Integration tests for CSV export and import of the log history.

use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use healthtrack::{
    db::{export::export_header, import_csv, Database, ImportedRow, LogStore, RetryPolicy},
    diagnostics::Diagnostics,
    models::{AggregatedRecord, Session, SessionBoundary, SessionStatus},
};
use tempfile::TempDir;

fn setup_store(dir: &TempDir) -> LogStore {
    let db = Database::new(dir.path().join("healthtrack.sqlite3")).expect("Should open database");
    LogStore::new(db, Diagnostics::new(), RetryPolicy::default())
}

fn record(at: DateTime<Utc>, good: u8, lean: u8, angle: Option<f64>) -> AggregatedRecord {
    AggregatedRecord {
        timestamp: at,
        good_posture: good,
        forward_lean_flag: lean,
        uneven_shoulders_flag: 0,
        back_angle: angle,
        forward_lean: Some(0.125),
        shoulder_alignment: None,
        session_status: SessionStatus::Running,
        game: "valorant.exe".into(),
    }
}

/// Test helper: one session with a Started boundary, two records and a
/// Stopped boundary.
async fn seed_history(store: &LogStore) -> (SessionBoundary, Vec<AggregatedRecord>, SessionBoundary) {
    let started_at = Utc.with_ymd_and_hms(2025, 11, 20, 18, 42, 0).unwrap();
    let session = Session::new("s-1".into(), started_at, "valorant.exe".into());

    let started = SessionBoundary::started(&session);
    store.append_session_boundary(&started).await.unwrap();

    let records = vec![
        record(started_at + Duration::seconds(30), 1, 0, Some(92.5)),
        record(started_at + Duration::seconds(60), 0, 1, None),
    ];
    for r in &records {
        store.append(r, Some("s-1")).await.unwrap();
    }

    let stopped = SessionBoundary::stopped(
        &session,
        started_at + Duration::seconds(75),
        "valorant.exe".into(),
    );
    store.append_session_boundary(&stopped).await.unwrap();

    (started, records, stopped)
}

#[tokio::test]
async fn export_then_import_preserves_rows_in_order() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir);
    let (started, records, stopped) = seed_history(&store).await;

    let destination = dir.path().join("out").join("history.csv");
    let rows = store.export_all(&destination).await.unwrap();
    assert_eq!(rows, 4);

    let contents = fs::read_to_string(&destination).unwrap();
    let header = contents.lines().next().unwrap();
    assert_eq!(header, export_header().join(","));

    let report = import_csv(&destination).unwrap();
    assert!(report.rejected.is_empty());
    assert_eq!(
        report.rows,
        vec![
            ImportedRow::Boundary(started),
            ImportedRow::Record {
                record: records[0].clone(),
                session_id: Some("s-1".into()),
            },
            ImportedRow::Record {
                record: records[1].clone(),
                session_id: Some("s-1".into()),
            },
            ImportedRow::Boundary(stopped),
        ]
    );
}

#[tokio::test]
async fn export_replaces_existing_file_completely() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir);
    seed_history(&store).await;

    let destination = dir.path().join("history.csv");
    fs::write(&destination, "stale contents that are much longer than a header line\n".repeat(50))
        .unwrap();

    store.export_all(&destination).await.unwrap();

    let contents = fs::read_to_string(&destination).unwrap();
    assert!(!contents.contains("stale"));
    assert_eq!(contents.lines().count(), 5);
}

#[tokio::test]
async fn failed_export_leaves_no_partial_file() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir);
    seed_history(&store).await;

    let export_dir = dir.path().join("exports");
    fs::create_dir_all(&export_dir).unwrap();
    // A directory at the destination makes the final rename fail.
    let destination = export_dir.join("history.csv");
    fs::create_dir(&destination).unwrap();

    assert!(store.export_all(&destination).await.is_err());

    assert!(destination.is_dir());
    let leftovers: Vec<_> = fs::read_dir(&export_dir).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
}

#[tokio::test]
async fn export_of_empty_history_has_only_header() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir);

    let destination = dir.path().join("empty.csv");
    assert_eq!(store.export_all(&destination).await.unwrap(), 0);

    let report = import_csv(&destination).unwrap();
    assert!(report.rows.is_empty());
}

#[tokio::test]
async fn recent_returns_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(&dir);
    seed_history(&store).await;

    let recent = store.recent(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].session_status(), SessionStatus::Stopped);
    assert_eq!(recent[1].session_status(), SessionStatus::Running);
    assert!(recent[0].summary().contains("session stopped"));
}
