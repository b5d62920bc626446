pub mod log_entry;
pub mod session;

pub use log_entry::{LogEntry, LogEntryBody};
pub use session::{SessionPhase, SessionRow};
