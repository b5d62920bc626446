//! Windowed majority-vote reduction of raw samples into one candidate record.
//!
//! Each flag is voted independently. Numeric fields are taken from the most
//! recent sample belonging to the winning class so a single misclassified
//! frame never lands in the log:
//!
//! 1. samples whose three flags all match the voted flags,
//! 2. otherwise samples whose `good_posture` matches the voted value,
//! 3. otherwise any sample in the window that reported the measurement.
//!
//! A measurement nobody reported stays `None`.

pub mod vote;

use chrono::{DateTime, Utc};

use crate::models::{CandidateRecord, FlagInput, RawSample, SessionStatus};

pub use vote::{majority, Tally};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VotedFlags {
    good_posture: bool,
    forward_lean_flag: bool,
    uneven_shoulders_flag: bool,
}

impl VotedFlags {
    fn from_window(samples: &[RawSample]) -> Self {
        Self {
            good_posture: majority(samples.iter().map(|s| s.good_posture)),
            forward_lean_flag: majority(samples.iter().map(|s| s.forward_lean_flag)),
            uneven_shoulders_flag: majority(samples.iter().map(|s| s.uneven_shoulders_flag)),
        }
    }

    fn matches(&self, sample: &RawSample) -> bool {
        sample.good_posture == Some(self.good_posture)
            && sample.forward_lean_flag == Some(self.forward_lean_flag)
            && sample.uneven_shoulders_flag == Some(self.uneven_shoulders_flag)
    }
}

/// Reduces one window of samples. Returns `None` for an empty window.
pub fn aggregate(
    samples: &[RawSample],
    session_status: SessionStatus,
    foreground_app: &str,
    now: DateTime<Utc>,
) -> Option<CandidateRecord> {
    if samples.is_empty() {
        return None;
    }

    let voted = VotedFlags::from_window(samples);

    let full_class: Vec<&RawSample> = samples.iter().filter(|s| voted.matches(s)).collect();
    let good_class: Vec<&RawSample> = samples
        .iter()
        .filter(|s| s.good_posture == Some(voted.good_posture))
        .collect();
    let everyone: Vec<&RawSample> = samples.iter().collect();

    let pick = |field: fn(&RawSample) -> Option<f64>| -> Option<f64> {
        [&full_class, &good_class, &everyone]
            .into_iter()
            .find_map(|class| latest_reported(class, field))
    };

    Some(CandidateRecord {
        timestamp: now.to_rfc3339(),
        good_posture: FlagInput::from(voted.good_posture),
        forward_lean_flag: FlagInput::from(voted.forward_lean_flag),
        uneven_shoulders_flag: FlagInput::from(voted.uneven_shoulders_flag),
        back_angle: pick(|s| s.back_angle),
        forward_lean: pick(|s| s.forward_lean),
        shoulder_alignment: pick(|s| s.shoulder_alignment),
        session_status,
        game: foreground_app.to_string(),
    })
}

fn latest_reported(class: &[&RawSample], field: fn(&RawSample) -> Option<f64>) -> Option<f64> {
    class.iter().rev().find_map(|sample| field(sample))
}
