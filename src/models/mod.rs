pub mod record;
pub mod sample;
pub mod session;

pub use record::{AggregatedRecord, CandidateRecord, FlagInput, SessionStatus, RECORD_FIELDS};
pub use sample::RawSample;
pub use session::{Session, SessionBoundary};
