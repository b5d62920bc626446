//! Integration tests for the session lifecycle and aggregation cycle against
//! an on-disk database.

use std::{path::Path, sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use healthtrack::{
    db::{Database, LogEntryBody, LogStore, RetryPolicy, SessionPhase},
    diagnostics::Diagnostics,
    models::{AggregatedRecord, RawSample, Session, SessionBoundary, SessionStatus},
    sensing::{run_cycle, CycleOutcome, ForegroundAppSource, PendingWrites, SampleBuffer},
    session::{recover_interrupted_sessions, TrackerController, TrackerStatus},
    settings::TrackerSettings,
};
use tempfile::TempDir;

/// Test helper: fresh store in a temporary directory
fn setup_store(dir: &Path) -> LogStore {
    let db = Database::new(dir.join("healthtrack.sqlite3")).expect("Should open database");
    LogStore::new(db, Diagnostics::new(), RetryPolicy::default())
}

fn foreground(name: &'static str) -> Arc<dyn ForegroundAppSource> {
    Arc::new(move || name.to_string())
}

/// Test helper: controller whose background aggregation never fires on its
/// own, so cycles are driven explicitly with `run_cycle`.
fn setup_controller(dir: &TempDir) -> TrackerController {
    let settings = TrackerSettings {
        aggregation_interval_secs: 3600,
        ..TrackerSettings::default()
    };
    TrackerController::new(
        setup_store(dir.path()),
        Arc::new(SampleBuffer::new(100)),
        foreground("valorant.exe"),
        &settings,
    )
}

/// Test helper: renames `log_entries` away so every append fails, or back.
async fn set_log_table_offline(store: &LogStore, offline: bool) {
    let sql = if offline {
        "ALTER TABLE log_entries RENAME TO log_entries_offline"
    } else {
        "ALTER TABLE log_entries_offline RENAME TO log_entries"
    };
    store
        .database()
        .execute(move |conn| {
            conn.execute_batch(sql)?;
            Ok(())
        })
        .await
        .expect("Should rename log table");
}

fn statuses(entries: &[healthtrack::db::LogEntry]) -> Vec<SessionStatus> {
    entries.iter().map(|entry| entry.session_status()).collect()
}

#[tokio::test]
async fn session_log_is_bracketed_by_boundaries() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);

    let started = controller
        .start_session()
        .await
        .unwrap()
        .expect("Should start a session");
    assert_eq!(started.status, SessionStatus::Started);
    assert_eq!(started.game, "valorant.exe");

    let now = Utc::now();
    for _ in 0..10 {
        controller.buffer().push(
            RawSample::with_flags(now, true, false, false).with_measurements(
                Some(92.0),
                Some(0.04),
                Some(0.01),
            ),
        );
    }
    for _ in 0..2 {
        controller.buffer().push(
            RawSample::with_flags(now, false, true, false).with_measurements(
                Some(170.0),
                Some(0.2),
                Some(0.01),
            ),
        );
    }

    let ctx = controller.aggregation_context();
    let mut pending = PendingWrites::new(4);
    let mut evicted_seen = 0;
    let outcome = run_cycle(&ctx, &mut pending, &mut evicted_seen).await;
    assert!(matches!(outcome, CycleOutcome::Stored { .. }));
    assert!(controller.buffer().is_empty());

    let stopped = controller
        .stop_session()
        .await
        .unwrap()
        .expect("Should stop the running session");
    assert_eq!(stopped.session_id, started.session_id);
    assert!(stopped.duration_ms.is_some());

    let entries = controller.store().entries().await.unwrap();
    assert_eq!(
        statuses(&entries),
        vec![
            SessionStatus::Started,
            SessionStatus::Running,
            SessionStatus::Stopped
        ]
    );
    match &entries[1].body {
        LogEntryBody::Record { record, session_id } => {
            assert_eq!(record.good_posture, 1);
            assert_eq!(record.forward_lean_flag, 0);
            assert_eq!(record.back_angle, Some(92.0));
            assert_eq!(record.game, "valorant.exe");
            assert_eq!(session_id.as_deref(), Some(started.session_id.as_str()));
        }
        other => panic!("expected record, got {other:?}"),
    }

    let row = controller
        .store()
        .database()
        .get_session(&started.session_id)
        .await
        .unwrap()
        .expect("Session row should exist");
    assert_eq!(row.status, SessionPhase::Stopped);
    assert!(row.stopped_at.is_some());
}

#[tokio::test]
async fn stop_without_session_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);

    assert!(controller.stop_session().await.unwrap().is_none());
    assert_eq!(controller.store().database().count_log_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn second_start_is_ignored() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);

    let first = controller.start_session().await.unwrap().unwrap();
    assert!(controller.start_session().await.unwrap().is_none());

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.status, TrackerStatus::Running);
    assert_eq!(snapshot.session_id.as_deref(), Some(first.session_id.as_str()));

    controller.stop_session().await.unwrap();
    let entries = controller.store().entries().await.unwrap();
    assert_eq!(
        statuses(&entries),
        vec![SessionStatus::Started, SessionStatus::Stopped]
    );
}

#[tokio::test]
async fn cycles_outside_a_session_discard_samples() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);

    let now = Utc::now();
    for _ in 0..5 {
        controller
            .buffer()
            .push(RawSample::with_flags(now, true, false, false));
    }

    let ctx = controller.aggregation_context();
    let mut pending = PendingWrites::new(4);
    let mut evicted_seen = 0;
    let outcome = run_cycle(&ctx, &mut pending, &mut evicted_seen).await;

    assert_eq!(outcome, CycleOutcome::Skipped { discarded: 5 });
    assert!(controller.buffer().is_empty());
    assert_eq!(controller.store().database().count_log_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn empty_window_writes_no_record() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);
    controller.start_session().await.unwrap();

    let ctx = controller.aggregation_context();
    let mut pending = PendingWrites::new(4);
    let mut evicted_seen = 0;
    let outcome = run_cycle(&ctx, &mut pending, &mut evicted_seen).await;

    assert_eq!(outcome, CycleOutcome::EmptyWindow);
    assert_eq!(controller.store().database().count_log_entries().await.unwrap(), 1);
    controller.stop_session().await.unwrap();
}

#[tokio::test]
async fn samples_buffered_before_start_are_dropped() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);

    controller
        .buffer()
        .push(RawSample::with_flags(Utc::now(), false, true, true));
    controller.start_session().await.unwrap();

    assert!(controller.buffer().is_empty());
    controller.stop_session().await.unwrap();
}

#[tokio::test]
async fn background_aggregation_stops_before_the_stopped_boundary() {
    let dir = TempDir::new().unwrap();
    let settings = TrackerSettings {
        aggregation_interval_secs: 1,
        ..TrackerSettings::default()
    };
    let controller = TrackerController::new(
        setup_store(dir.path()),
        Arc::new(SampleBuffer::new(100)),
        foreground("csgo.exe"),
        &settings,
    );

    controller.start_session().await.unwrap();
    for _ in 0..6 {
        controller
            .buffer()
            .push(RawSample::with_flags(Utc::now(), false, true, false));
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;
    controller.stop_session().await.unwrap();

    let entries = controller.store().entries().await.unwrap();
    assert_eq!(entries.first().unwrap().session_status(), SessionStatus::Started);
    assert_eq!(entries.last().unwrap().session_status(), SessionStatus::Stopped);
    let records: Vec<_> = entries[1..entries.len() - 1].iter().collect();
    assert_eq!(records.len(), 1);
    match &records[0].body {
        LogEntryBody::Record { record, .. } => {
            assert_eq!(record.forward_lean_flag, 1);
            assert_eq!(record.good_posture, 0);
            assert_eq!(record.game, "csgo.exe");
        }
        other => panic!("expected record, got {other:?}"),
    }
}

#[tokio::test]
async fn interrupted_session_is_closed_on_startup() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(dir.path());
    let db = store.database();

    let started_at = Utc.with_ymd_and_hms(2025, 11, 20, 18, 0, 0).unwrap();
    let session = Session::new("crashed".into(), started_at, "valorant.exe".into());
    db.insert_session(&session).await.unwrap();

    let record = AggregatedRecord {
        timestamp: started_at + ChronoDuration::seconds(60),
        good_posture: 1,
        forward_lean_flag: 0,
        uneven_shoulders_flag: 0,
        back_angle: Some(95.0),
        forward_lean: None,
        shoulder_alignment: None,
        session_status: SessionStatus::Running,
        game: "valorant.exe".into(),
    };
    store.append(&record, Some("crashed")).await.unwrap();

    assert_eq!(recover_interrupted_sessions(&store).await.unwrap(), 1);
    assert_eq!(recover_interrupted_sessions(&store).await.unwrap(), 0);

    let entries = store.entries().await.unwrap();
    match &entries.last().unwrap().body {
        LogEntryBody::Boundary(boundary) => {
            assert_eq!(boundary.status, SessionStatus::Stopped);
            assert_eq!(boundary.session_id, "crashed");
            assert_eq!(boundary.duration_ms, Some(60_000));
        }
        other => panic!("expected boundary, got {other:?}"),
    }

    let row = db.get_session("crashed").await.unwrap().unwrap();
    assert_eq!(row.status, SessionPhase::Interrupted);
}

#[tokio::test]
async fn failed_stop_keeps_the_session_running_until_retried() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);
    let started = controller.start_session().await.unwrap().unwrap();

    set_log_table_offline(controller.store(), true).await;
    assert!(controller.stop_session().await.is_err());

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.status, TrackerStatus::Running);
    assert_eq!(snapshot.session_id.as_deref(), Some(started.session_id.as_str()));

    set_log_table_offline(controller.store(), false).await;
    let stopped = controller
        .stop_session()
        .await
        .unwrap()
        .expect("Retried stop should close the session");
    assert_eq!(stopped.session_id, started.session_id);

    let entries = controller.store().entries().await.unwrap();
    assert_eq!(
        statuses(&entries),
        vec![SessionStatus::Started, SessionStatus::Stopped]
    );
    let row = controller
        .store()
        .database()
        .get_session(&started.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, SessionPhase::Stopped);
}

#[tokio::test]
async fn failed_start_leaves_no_session_behind() {
    let dir = TempDir::new().unwrap();
    let controller = setup_controller(&dir);

    set_log_table_offline(controller.store(), true).await;
    assert!(controller.start_session().await.is_err());

    assert_eq!(controller.snapshot().await.status, TrackerStatus::Idle);
    let db = controller.store().database();
    assert!(db.get_incomplete_sessions().await.unwrap().is_empty());

    set_log_table_offline(controller.store(), false).await;
    assert!(controller.start_session().await.unwrap().is_some());
    controller.stop_session().await.unwrap();
    assert_eq!(db.count_log_entries().await.unwrap(), 2);
}

#[tokio::test]
async fn closed_session_with_stale_row_is_marked_stopped() {
    let dir = TempDir::new().unwrap();
    let store = setup_store(dir.path());
    let db = store.database();

    let started_at = Utc.with_ymd_and_hms(2025, 11, 20, 18, 0, 0).unwrap();
    let stopped_at = started_at + ChronoDuration::seconds(90);
    let session = Session::new("closed".into(), started_at, "valorant.exe".into());
    db.insert_session(&session).await.unwrap();
    store
        .append_session_boundary(&SessionBoundary::started(&session))
        .await
        .unwrap();
    store
        .append_session_boundary(&SessionBoundary::stopped(
            &session,
            stopped_at,
            "valorant.exe".into(),
        ))
        .await
        .unwrap();

    assert_eq!(recover_interrupted_sessions(&store).await.unwrap(), 0);

    assert_eq!(db.count_log_entries().await.unwrap(), 2);
    let row = db.get_session("closed").await.unwrap().unwrap();
    assert_eq!(row.status, SessionPhase::Stopped);
    assert_eq!(row.stopped_at, Some(stopped_at));
    assert!(db.get_incomplete_sessions().await.unwrap().is_empty());
}
