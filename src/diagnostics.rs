//! Operator channel: counters and structured events for the surrounding
//! application to turn into user feedback. The core never presents UI.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::validation::FieldAnomaly;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DiagnosticEvent {
    SamplesEvicted {
        count: u64,
        total: u64,
    },
    FieldsCoerced {
        timestamp: String,
        anomalies: Vec<FieldAnomaly>,
    },
    RecordRejected {
        reason: String,
    },
    StorageRetryExhausted {
        operation: String,
        attempts: u32,
        error: String,
    },
    StorageFatal {
        operation: String,
        error: String,
    },
    PendingDropped {
        count: u64,
    },
    DetectorUnavailable,
    DetectorRecovered,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_evicted: u64,
    pub records_rejected: u64,
    pub field_anomalies: u64,
    pub storage_retries: u64,
    pub storage_retry_exhausted: u64,
    pub storage_fatal: u64,
    pub pending_dropped: u64,
}

#[derive(Default)]
struct Counters {
    samples_evicted: AtomicU64,
    records_rejected: AtomicU64,
    field_anomalies: AtomicU64,
    storage_retries: AtomicU64,
    storage_retry_exhausted: AtomicU64,
    storage_fatal: AtomicU64,
    pending_dropped: AtomicU64,
}

/// Cheap to clone; all clones share counters and the event channel.
#[derive(Clone)]
pub struct Diagnostics {
    counters: Arc<Counters>,
    events: broadcast::Sender<DiagnosticEvent>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            counters: Arc::new(Counters::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let c = &self.counters;
        DiagnosticsSnapshot {
            samples_evicted: c.samples_evicted.load(Ordering::Relaxed),
            records_rejected: c.records_rejected.load(Ordering::Relaxed),
            field_anomalies: c.field_anomalies.load(Ordering::Relaxed),
            storage_retries: c.storage_retries.load(Ordering::Relaxed),
            storage_retry_exhausted: c.storage_retry_exhausted.load(Ordering::Relaxed),
            storage_fatal: c.storage_fatal.load(Ordering::Relaxed),
            pending_dropped: c.pending_dropped.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: DiagnosticEvent) {
        // No subscribers is normal for headless runs.
        if self.events.send(event).is_err() {
            debug!("diagnostic event dropped: no subscribers");
        }
    }

    pub fn samples_evicted(&self, count: u64) {
        if count == 0 {
            return;
        }
        let total = self.counters.samples_evicted.fetch_add(count, Ordering::Relaxed) + count;
        self.emit(DiagnosticEvent::SamplesEvicted { count, total });
    }

    pub fn fields_coerced(&self, timestamp: String, anomalies: Vec<FieldAnomaly>) {
        if anomalies.is_empty() {
            return;
        }
        self.counters
            .field_anomalies
            .fetch_add(anomalies.len() as u64, Ordering::Relaxed);
        self.emit(DiagnosticEvent::FieldsCoerced {
            timestamp,
            anomalies,
        });
    }

    pub fn record_rejected(&self, reason: String) {
        self.counters.records_rejected.fetch_add(1, Ordering::Relaxed);
        self.emit(DiagnosticEvent::RecordRejected { reason });
    }

    pub fn storage_retry(&self) {
        self.counters.storage_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn storage_retry_exhausted(&self, operation: &str, attempts: u32, error: String) {
        self.counters
            .storage_retry_exhausted
            .fetch_add(1, Ordering::Relaxed);
        self.emit(DiagnosticEvent::StorageRetryExhausted {
            operation: operation.to_string(),
            attempts,
            error,
        });
    }

    pub fn storage_fatal(&self, operation: &str, error: String) {
        self.counters.storage_fatal.fetch_add(1, Ordering::Relaxed);
        self.emit(DiagnosticEvent::StorageFatal {
            operation: operation.to_string(),
            error,
        });
    }

    pub fn pending_dropped(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.counters.pending_dropped.fetch_add(count, Ordering::Relaxed);
        self.emit(DiagnosticEvent::PendingDropped { count });
    }

    pub fn detector_availability_changed(&self, available: bool) {
        self.emit(if available {
            DiagnosticEvent::DetectorRecovered
        } else {
            DiagnosticEvent::DetectorUnavailable
        });
    }
}
