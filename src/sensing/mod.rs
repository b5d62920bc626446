pub mod buffer;
pub mod controller;
pub mod detector;
pub mod loop_worker;

pub use buffer::SampleBuffer;
pub use controller::SensingController;
pub use detector::{
    FeedbackFlags, ForegroundAppSource, ForegroundWindow, PostureDetector, SimulatedDetector,
};
pub use loop_worker::{
    run_cycle, share_detector, AggregationContext, CycleOutcome, PendingWrites, SharedDetector,
};
