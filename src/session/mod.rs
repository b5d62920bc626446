pub mod controller;
pub mod state;

pub use controller::{recover_interrupted_sessions, TrackerController, TrackerSnapshot};
pub use state::{SessionTracker, TrackerStatus};
