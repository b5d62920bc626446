//! Raw posture observation reported by a detector.
//!
//! Samples are transient: they live in the `SampleBuffer` until the next
//! aggregation cycle drains them and are never persisted individually.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One detector-reported posture observation.
///
/// A flag or measurement the detector could not produce is `None`. Absent
/// values are never coerced to zero or `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub good_posture: Option<bool>,
    pub forward_lean_flag: Option<bool>,
    pub uneven_shoulders_flag: Option<bool>,
    pub back_angle: Option<f64>,
    pub forward_lean: Option<f64>,
    pub shoulder_alignment: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl RawSample {
    /// Sample emitted when the detector is unavailable or failed on a frame.
    pub fn absent(captured_at: DateTime<Utc>) -> Self {
        Self {
            good_posture: None,
            forward_lean_flag: None,
            uneven_shoulders_flag: None,
            back_angle: None,
            forward_lean: None,
            shoulder_alignment: None,
            captured_at,
        }
    }

    pub fn with_flags(
        captured_at: DateTime<Utc>,
        good_posture: bool,
        forward_lean_flag: bool,
        uneven_shoulders_flag: bool,
    ) -> Self {
        Self {
            good_posture: Some(good_posture),
            forward_lean_flag: Some(forward_lean_flag),
            uneven_shoulders_flag: Some(uneven_shoulders_flag),
            ..Self::absent(captured_at)
        }
    }

    pub fn with_measurements(
        mut self,
        back_angle: Option<f64>,
        forward_lean: Option<f64>,
        shoulder_alignment: Option<f64>,
    ) -> Self {
        self.back_angle = back_angle;
        self.forward_lean = forward_lean;
        self.shoulder_alignment = shoulder_alignment;
        self
    }
}
