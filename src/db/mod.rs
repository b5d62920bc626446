mod connection;
pub mod export;
mod helpers;
mod migrations;
pub mod models;
mod repositories;
pub mod store;

pub use connection::Database;
pub use export::{import_csv, ImportReport, ImportedRow};
pub use models::{LogEntry, LogEntryBody, SessionPhase, SessionRow};
pub use store::{LogStore, RetryPolicy, StorageError};
