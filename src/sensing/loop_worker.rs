use std::{
    collections::VecDeque,
    sync::{Arc, Mutex as StdMutex, TryLockError},
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregation::aggregate,
    db::LogStore,
    diagnostics::Diagnostics,
    models::{AggregatedRecord, CandidateRecord, RawSample},
    session::SessionTracker,
    validation::validate_detailed,
};

use super::{
    buffer::SampleBuffer,
    detector::{ForegroundAppSource, PostureDetector},
};

// Set to false to silence per-cycle logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const DETECTOR_TIMEOUT: Duration = Duration::from_millis(500);

pub type SharedDetector = Arc<StdMutex<Box<dyn PostureDetector>>>;

type PollResult = (bool, anyhow::Result<RawSample>);

/// One detector poll on the blocking pool. A detector still held by an
/// earlier, stalled poll counts as unavailable for this frame.
fn poll_detector(detector: &SharedDetector, now: DateTime<Utc>) -> PollResult {
    let mut guard = match detector.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return (false, Ok(RawSample::absent(now))),
    };
    if !guard.is_available() {
        return (false, Ok(RawSample::absent(now)));
    }
    (true, guard.current_sample(now))
}

/// Producer side: polls the detector at frame cadence and feeds the buffer.
/// Runs independently of sessions; an unavailable, failing or hung detector
/// yields absent samples instead of stopping the loop.
///
/// At most one poll is outstanding. A poll that outlives its timeout is kept
/// aside and no new one starts until it returns, so a hung detector pins one
/// blocking thread rather than one per frame.
pub async fn producer_loop(
    detector: SharedDetector,
    buffer: Arc<SampleBuffer>,
    diagnostics: Diagnostics,
    sample_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut was_available = true;
    let mut stalled: Option<JoinHandle<PollResult>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();

                let (available, sample) = if stalled.as_ref().is_some_and(|poll| !poll.is_finished()) {
                    (false, RawSample::absent(now))
                } else {
                    stalled = None;
                    let shared = Arc::clone(&detector);
                    let mut poll = tokio::task::spawn_blocking(move || poll_detector(&shared, now));

                    match tokio::time::timeout(DETECTOR_TIMEOUT, &mut poll).await {
                        Ok(Ok((available, Ok(sample)))) => (available, sample),
                        Ok(Ok((available, Err(err)))) => {
                            log_warn!("detector failed on frame: {err:#}");
                            (available, RawSample::absent(now))
                        }
                        Ok(Err(join_err)) => {
                            log_error!("detector worker join failed: {join_err}");
                            (false, RawSample::absent(now))
                        }
                        Err(_) => {
                            log_warn!(
                                "detector poll exceeded {}ms; waiting for it before polling again",
                                DETECTOR_TIMEOUT.as_millis()
                            );
                            stalled = Some(poll);
                            (false, RawSample::absent(now))
                        }
                    }
                };

                if available != was_available {
                    if available {
                        log_info!("detector available again");
                    } else {
                        log_warn!("detector unavailable; recording absent samples");
                    }
                    diagnostics.detector_availability_changed(available);
                    was_available = available;
                }

                buffer.push(sample);
            }
            _ = cancel_token.cancelled() => {
                log_info!("producer loop shutting down");
                break;
            }
        }
    }
}

/// Everything one aggregation cycle reads or writes.
#[derive(Clone)]
pub struct AggregationContext {
    pub buffer: Arc<SampleBuffer>,
    pub tracker: Arc<Mutex<SessionTracker>>,
    pub foreground: Arc<dyn ForegroundAppSource>,
    pub store: LogStore,
    pub pending_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No running session; buffered samples were discarded.
    Skipped { discarded: usize },
    EmptyWindow,
    Rejected,
    Stored { id: i64 },
    /// Storage failed; the record waits in the pending queue.
    Deferred,
}

/// Validated records whose append failed, retried at the start of each
/// cycle. Oldest records are dropped once `capacity` is reached.
pub struct PendingWrites {
    queue: VecDeque<(AggregatedRecord, Option<String>)>,
    capacity: usize,
}

impl PendingWrites {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(
        &mut self,
        record: AggregatedRecord,
        session_id: Option<String>,
        diagnostics: &Diagnostics,
    ) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            diagnostics.pending_dropped(1);
        }
        self.queue.push_back((record, session_id));
    }

    /// Appends queued records in order, stopping at the first failure.
    async fn flush(&mut self, store: &LogStore) -> usize {
        let mut written = 0;
        while let Some((record, session_id)) = self.queue.front().cloned() {
            match store.append(&record, session_id.as_deref()).await {
                Ok(_) => {
                    self.queue.pop_front();
                    written += 1;
                }
                Err(err) => {
                    log_warn!("pending flush stopped with {} queued: {err}", self.queue.len());
                    break;
                }
            }
        }
        written
    }
}

/// Runs one aggregation cycle: drain, vote, validate, store.
pub async fn run_cycle(
    ctx: &AggregationContext,
    pending: &mut PendingWrites,
    evicted_seen: &mut u64,
) -> CycleOutcome {
    let evicted_total = ctx.buffer.evicted_total();
    if evicted_total > *evicted_seen {
        let delta = evicted_total - *evicted_seen;
        log_warn!("sample buffer overflowed; {delta} oldest samples evicted");
        ctx.store.diagnostics().samples_evicted(delta);
        *evicted_seen = evicted_total;
    }

    if !pending.is_empty() {
        let written = pending.flush(&ctx.store).await;
        if written > 0 {
            log_info!("flushed {written} pending records");
        }
    }

    let (status, session_id) = {
        let guard = ctx.tracker.lock().await;
        (guard.record_status(), guard.session_id().map(str::to_string))
    };

    let Some(status) = status else {
        let discarded = ctx.buffer.clear();
        return CycleOutcome::Skipped { discarded };
    };

    let samples = ctx.buffer.drain();
    let game = ctx.foreground.foreground_application_name();
    let now = Utc::now();

    let Some(candidate) = aggregate(&samples, status, &game, now) else {
        log_info!("empty aggregation window; nothing written");
        return CycleOutcome::EmptyWindow;
    };

    log_info!("aggregated {} samples", samples.len());
    commit_candidate(ctx, pending, candidate, session_id).await
}

/// Validates a candidate and appends it, queueing it in `pending` when
/// storage fails.
async fn commit_candidate(
    ctx: &AggregationContext,
    pending: &mut PendingWrites,
    candidate: CandidateRecord,
    session_id: Option<String>,
) -> CycleOutcome {
    let validated = match validate_detailed(&candidate) {
        Ok(validated) => validated,
        Err(reason) => {
            log_error!("aggregated record rejected: {reason}");
            ctx.store.diagnostics().record_rejected(reason.to_string());
            return CycleOutcome::Rejected;
        }
    };
    ctx.store
        .diagnostics()
        .fields_coerced(candidate.timestamp, validated.anomalies);

    let record = validated.record;
    match ctx.store.append(&record, session_id.as_deref()).await {
        Ok(id) => {
            log_info!(
                "stored record {id} (good={}, lean={}, uneven={}, game='{}')",
                record.good_posture,
                record.forward_lean_flag,
                record.uneven_shoulders_flag,
                record.game
            );
            CycleOutcome::Stored { id }
        }
        Err(err) => {
            log_error!("record append failed, queueing for next cycle: {err}");
            pending.push(record, session_id, ctx.store.diagnostics());
            CycleOutcome::Deferred
        }
    }
}

/// Timer side: runs `run_cycle` every `period` until cancelled. The first
/// cycle fires one full period after start.
pub async fn aggregation_loop(
    ctx: AggregationContext,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending = PendingWrites::new(ctx.pending_capacity);
    let mut evicted_seen = ctx.buffer.evicted_total();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = run_cycle(&ctx, &mut pending, &mut evicted_seen).await;
                if let CycleOutcome::Skipped { discarded } = outcome {
                    log_info!("no running session; discarded {discarded} samples");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("aggregation loop shutting down");
                break;
            }
        }
    }

    if !pending.is_empty() {
        pending.flush(&ctx.store).await;
        let lost = pending.len() as u64;
        if lost > 0 {
            log_error!("{lost} records still unwritten at shutdown");
            ctx.store.diagnostics().pending_dropped(lost);
        }
    }
}

/// Wraps a detector in the handle shared with the producer loop.
pub fn share_detector<D>(detector: D) -> SharedDetector
where
    D: PostureDetector + 'static,
{
    Arc::new(StdMutex::new(Box::new(detector)))
}
