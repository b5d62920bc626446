use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::{sync::Mutex, time::Duration};

use crate::{
    db::{LogEntry, LogEntryBody, LogStore, SessionPhase},
    diagnostics::DiagnosticsSnapshot,
    models::{SessionBoundary, SessionStatus},
    sensing::{
        AggregationContext, ForegroundAppSource, SampleBuffer, SensingController, SharedDetector,
    },
    settings::TrackerSettings,
};

use super::{SessionTracker, TrackerStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub status: TrackerStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
    pub buffered_samples: usize,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Drives session start/stop and owns the sensing tasks behind them.
#[derive(Clone)]
pub struct TrackerController {
    tracker: Arc<Mutex<SessionTracker>>,
    store: LogStore,
    buffer: Arc<SampleBuffer>,
    foreground: Arc<dyn ForegroundAppSource>,
    sensing: Arc<Mutex<SensingController>>,
    /// Serialises start and stop end to end.
    lifecycle: Arc<Mutex<()>>,
    aggregation_interval: Duration,
    pending_capacity: usize,
}

impl TrackerController {
    pub fn new(
        store: LogStore,
        buffer: Arc<SampleBuffer>,
        foreground: Arc<dyn ForegroundAppSource>,
        settings: &TrackerSettings,
    ) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(SessionTracker::new())),
            store,
            buffer,
            foreground,
            sensing: Arc::new(Mutex::new(SensingController::new())),
            lifecycle: Arc::new(Mutex::new(())),
            aggregation_interval: settings.aggregation_interval(),
            pending_capacity: settings.pending_capacity,
        }
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Context for driving aggregation cycles by hand.
    pub fn aggregation_context(&self) -> AggregationContext {
        AggregationContext {
            buffer: Arc::clone(&self.buffer),
            tracker: Arc::clone(&self.tracker),
            foreground: Arc::clone(&self.foreground),
            store: self.store.clone(),
            pending_capacity: self.pending_capacity,
        }
    }

    /// Starts feeding the buffer from `detector`. Independent of sessions.
    pub async fn attach_detector(
        &self,
        detector: SharedDetector,
        sample_interval: Duration,
    ) -> Result<()> {
        self.sensing.lock().await.start_producer(
            detector,
            Arc::clone(&self.buffer),
            self.store.diagnostics().clone(),
            sample_interval,
        )
    }

    /// Begins a session. Returns `None` if one is already running.
    ///
    /// The `Started` boundary is durable before the first aggregation cycle
    /// can fire, and samples buffered before the start are discarded. If the
    /// boundary cannot be written the session row is removed again and the
    /// tracker is left as it was.
    pub async fn start_session(&self) -> Result<Option<SessionBoundary>> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut guard = self.tracker.lock().await;
        if guard.is_running() {
            return Ok(None);
        }

        let game = self.foreground.foreground_application_name();
        let mut next = guard.clone();
        let Some(boundary) = next.start(Utc::now(), &game) else {
            return Ok(None);
        };
        let session = next
            .current
            .clone()
            .context("session missing right after start")?;

        self.buffer.clear();
        let db = self.store.database();
        db.insert_session(&session)
            .await
            .context("failed to record session")?;

        let appended = self.store.append_session_boundary(&boundary).await;
        if appended.is_err() {
            if let Err(err) = db.delete_session(&session.id).await {
                error!("Session {} left without a Started boundary: {err:#}", session.id);
            }
        }
        appended.context("failed to append Started boundary")?;

        *guard = next;
        drop(guard);

        self.sensing
            .lock()
            .await
            .start_aggregation(self.aggregation_context(), self.aggregation_interval)?;

        info!("Session {} started (game='{}')", session.id, session.game);
        Ok(Some(boundary))
    }

    /// Ends the running session. Returns `None` when nothing was running.
    ///
    /// Aggregation is stopped and joined before the `Stopped` boundary is
    /// written, so no record of this session can follow it. When the boundary
    /// cannot be written the session keeps running and aggregation resumes,
    /// so the stop can be retried.
    pub async fn stop_session(&self) -> Result<Option<SessionBoundary>> {
        let _lifecycle = self.lifecycle.lock().await;
        let (previous, session, boundary) = {
            let mut guard = self.tracker.lock().await;
            let previous = guard.clone();
            let game = self.foreground.foreground_application_name();
            match guard.stop(Utc::now(), &game) {
                Some((session, boundary)) => (previous, session, boundary),
                None => return Ok(None),
            }
        };

        // The tracker lock must be released here: an in-flight cycle takes it.
        if let Err(err) = self.sensing.lock().await.stop_aggregation().await {
            error!("Aggregation did not shut down cleanly: {err:#}");
        }
        let discarded = self.buffer.clear();
        if discarded > 0 {
            info!("Discarded {discarded} samples buffered after the last cycle");
        }

        let appended = self.store.append_session_boundary(&boundary).await;
        if appended.is_err() {
            *self.tracker.lock().await = previous;
            if let Err(err) = self
                .sensing
                .lock()
                .await
                .start_aggregation(self.aggregation_context(), self.aggregation_interval)
            {
                error!("Aggregation could not resume for session {}: {err:#}", session.id);
            }
        }
        appended.context("failed to append Stopped boundary")?;

        // The boundary is the source of truth; recovery reconciles the row.
        if let Err(err) = self
            .store
            .database()
            .mark_session_phase(&session.id, SessionPhase::Stopped, boundary.occurred_at)
            .await
        {
            error!("Session {} stopped but its row is stale: {err:#}", session.id);
        }

        info!(
            "Session {} stopped after {} ms",
            session.id,
            boundary.duration_ms.unwrap_or_default()
        );
        Ok(Some(boundary))
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let guard = self.tracker.lock().await;
        TrackerSnapshot {
            status: guard.status,
            session_id: guard.session_id().map(str::to_string),
            started_at: guard.started_at(),
            elapsed_ms: guard.elapsed(Utc::now()).num_milliseconds(),
            buffered_samples: self.buffer.len(),
            diagnostics: self.store.diagnostics().snapshot(),
        }
    }

    /// Stops any running session, then the detector.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_session().await?;
        self.sensing.lock().await.stop_producer().await
    }
}

/// Closes sessions left `Running` by a previous process.
///
/// A session whose last entry is already its `Stopped` boundary only had
/// its row update lost, and is marked `Stopped`. Any other session gets a
/// `Stopped` boundary whose duration runs to its last logged entry, and is
/// marked `Interrupted`. Returns the number of interrupted sessions.
pub async fn recover_interrupted_sessions(store: &LogStore) -> Result<usize> {
    let db = store.database();
    let sessions = db.get_incomplete_sessions().await?;
    let now = Utc::now();
    let mut interrupted = 0;

    for session in &sessions {
        let latest = db.latest_entry_for_session(&session.id).await?;

        if let Some(LogEntry {
            body: LogEntryBody::Boundary(closing),
            ..
        }) = &latest
        {
            if closing.status == SessionStatus::Stopped {
                info!("Session {} was already closed; updating its row", session.id);
                db.mark_session_phase(&session.id, SessionPhase::Stopped, closing.occurred_at)
                    .await?;
                continue;
            }
        }

        let last_seen = latest
            .map(|entry| entry.occurred_at())
            .unwrap_or(session.started_at)
            .max(session.started_at);
        let duration_ms = (last_seen - session.started_at).num_milliseconds().max(0) as u64;

        warn!(
            "Recovered incomplete session {}; marking as Interrupted",
            session.id
        );

        let boundary = SessionBoundary {
            session_id: session.id.clone(),
            status: SessionStatus::Stopped,
            occurred_at: now,
            game: session.game.clone(),
            duration_ms: Some(duration_ms),
        };
        store
            .append_session_boundary(&boundary)
            .await
            .with_context(|| format!("failed to close session {}", session.id))?;
        db.mark_session_phase(&session.id, SessionPhase::Interrupted, now)
            .await?;
        interrupted += 1;
    }

    Ok(interrupted)
}
