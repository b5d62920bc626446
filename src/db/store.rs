//! `LogStore`: append-only persistence of validated records and session
//! boundaries, with bounded retries and failure classification.

use std::{future::Future, path::Path, time::Duration};

use anyhow::Result;
use log::{error, warn};
use thiserror::Error;

use super::{connection::Database, export::export_all_sync, models::LogEntry};
use crate::diagnostics::Diagnostics;
use crate::models::{AggregatedRecord, SessionBoundary};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Busy or locked database; worth retrying.
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// Medium unavailable, corrupt or read-only; retrying will not help.
    #[error("storage unavailable: {0}")]
    Fatal(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Classifies an error from the database layer by looking for the root
/// `rusqlite` or I/O cause.
pub fn classify(err: &anyhow::Error) -> StorageError {
    let message = format!("{err:#}");

    for cause in err.chain() {
        if let Some(sqlite) = cause.downcast_ref::<rusqlite::Error>() {
            return match sqlite.sqlite_error_code() {
                Some(rusqlite::ErrorCode::DatabaseBusy)
                | Some(rusqlite::ErrorCode::DatabaseLocked) => StorageError::Transient(message),
                _ => StorageError::Fatal(message),
            };
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut => StorageError::Transient(message),
                _ => StorageError::Fatal(message),
            };
        }
    }

    StorageError::Fatal(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Runs `op` until it succeeds, fails fatally, or runs out of attempts.
/// Backoff grows linearly with the attempt number.
pub async fn retry_storage<F, Fut, T>(
    policy: RetryPolicy,
    diagnostics: &Diagnostics,
    operation: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => classify(&err),
        };

        match err {
            StorageError::Fatal(ref message) => {
                error!("{operation} failed fatally: {message}");
                diagnostics.storage_fatal(operation, message.clone());
                return Err(err);
            }
            StorageError::Transient(ref message) if attempt >= attempts => {
                error!("{operation} failed after {attempts} attempts: {message}");
                diagnostics.storage_retry_exhausted(operation, attempts, message.clone());
                return Err(err);
            }
            StorageError::Transient(ref message) => {
                warn!("{operation} attempt {attempt}/{attempts} failed: {message}");
                diagnostics.storage_retry();
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Clone)]
pub struct LogStore {
    db: Database,
    diagnostics: Diagnostics,
    retry: RetryPolicy,
}

impl LogStore {
    pub fn new(db: Database, diagnostics: Diagnostics, retry: RetryPolicy) -> Self {
        Self {
            db,
            diagnostics,
            retry,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Appends a validated record and returns its row id.
    pub async fn append(
        &self,
        record: &AggregatedRecord,
        session_id: Option<&str>,
    ) -> Result<i64, StorageError> {
        let db = &self.db;
        retry_storage(self.retry, &self.diagnostics, "append record", || {
            db.insert_record(record, session_id)
        })
        .await
    }

    pub async fn append_session_boundary(
        &self,
        boundary: &SessionBoundary,
    ) -> Result<i64, StorageError> {
        let db = &self.db;
        retry_storage(self.retry, &self.diagnostics, "append session boundary", || {
            db.insert_boundary(boundary)
        })
        .await
    }

    /// Exports the full ordered history to `destination` as CSV. Either the
    /// complete file replaces the destination or nothing changes.
    pub async fn export_all(&self, destination: &Path) -> Result<u64> {
        let destination = destination.to_path_buf();
        self.db
            .execute(move |conn| export_all_sync(conn, &destination))
            .await
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.db.get_recent_log_entries(limit).await
    }

    pub async fn entries(&self) -> Result<Vec<LogEntry>> {
        self.db.get_log_entries().await
    }
}
