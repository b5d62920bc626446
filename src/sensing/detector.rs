//! Seams to the external producers: the posture detector and the
//! foreground-application query.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::models::RawSample;

/// Supplies posture classifications at frame cadence.
pub trait PostureDetector: Send {
    fn is_available(&self) -> bool;

    /// Classifies the current frame. An error is treated as an absent
    /// measurement for that frame, never as a pipeline failure.
    fn current_sample(&mut self, now: DateTime<Utc>) -> Result<RawSample>;
}

/// Name of the application holding input focus. Queried once per
/// aggregation cycle.
pub trait ForegroundAppSource: Send + Sync {
    fn foreground_application_name(&self) -> String;
}

impl<F> ForegroundAppSource for F
where
    F: Fn() -> String + Send + Sync,
{
    fn foreground_application_name(&self) -> String {
        self()
    }
}

/// What a platform window query can tell us about the focused window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundWindow {
    pub executable: Option<String>,
    pub title: Option<String>,
}

impl ForegroundWindow {
    /// Executable name, else window title, else empty.
    pub fn display_name(&self) -> String {
        [&self.executable, &self.title]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

/// Flags derived from a textual detector verdict such as
/// `"Bad posture: Uneven shoulders, Forward lean"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedbackFlags {
    pub good_posture: bool,
    pub forward_lean_flag: bool,
    pub uneven_shoulders_flag: bool,
}

impl FeedbackFlags {
    /// A "good" verdict clears the other two flags.
    pub fn from_feedback(feedback: &str) -> Self {
        let lower = feedback.to_lowercase();
        let good_posture = lower.contains("good");
        if good_posture {
            return Self {
                good_posture,
                ..Self::default()
            };
        }
        Self {
            good_posture,
            forward_lean_flag: lower.contains("forward"),
            uneven_shoulders_flag: lower.contains("uneven") || lower.contains("shoulder"),
        }
    }

    pub fn into_sample(self, captured_at: DateTime<Utc>) -> RawSample {
        RawSample::with_flags(
            captured_at,
            self.good_posture,
            self.forward_lean_flag,
            self.uneven_shoulders_flag,
        )
    }
}

const SIMULATED_LABELS: [&str; 4] = [
    "Good posture",
    "Bad posture: Forward lean",
    "Bad posture: Uneven shoulders",
    "Bad posture: Uneven shoulders, Forward lean",
];

/// Camera-free detector for headless runs. Holds one "true" posture for a
/// while, misclassifies the odd frame, drops measurements now and then and
/// goes dark for short stretches.
pub struct SimulatedDetector {
    rng: StdRng,
    current_label: usize,
    frames_left_in_label: u32,
    dark_frames_left: u32,
}

impl SimulatedDetector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            current_label: 0,
            frames_left_in_label: 0,
            dark_frames_left: 0,
        }
    }

    fn advance(&mut self) {
        if self.dark_frames_left > 0 {
            self.dark_frames_left -= 1;
        } else if self.rng.gen_bool(0.001) {
            self.dark_frames_left = self.rng.gen_range(30..150);
        }

        if self.frames_left_in_label == 0 {
            self.current_label = self.rng.gen_range(0..SIMULATED_LABELS.len());
            self.frames_left_in_label = self.rng.gen_range(300..1800);
        } else {
            self.frames_left_in_label -= 1;
        }
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PostureDetector for SimulatedDetector {
    fn is_available(&self) -> bool {
        self.dark_frames_left == 0
    }

    fn current_sample(&mut self, now: DateTime<Utc>) -> Result<RawSample> {
        self.advance();

        let label = if self.rng.gen_bool(0.05) {
            SIMULATED_LABELS[self.rng.gen_range(0..SIMULATED_LABELS.len())]
        } else {
            SIMULATED_LABELS[self.current_label]
        };
        let flags = FeedbackFlags::from_feedback(label);

        if self.rng.gen_bool(0.02) {
            return Ok(flags.into_sample(now));
        }

        let lean_base = if flags.forward_lean_flag { 0.15 } else { 0.04 };
        let shoulder_base = if flags.uneven_shoulders_flag { 0.08 } else { 0.01 };
        let back_angle = self.rng.gen_range(70.0..110.0);
        let forward_lean = lean_base + self.rng.gen_range(0.0..0.03);
        let shoulder_alignment = shoulder_base + self.rng.gen_range(0.0..0.02);

        Ok(flags.into_sample(now).with_measurements(
            Some(back_angle),
            Some(forward_lean),
            Some(shoulder_alignment),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_feedback_overrides_other_flags() {
        let flags = FeedbackFlags::from_feedback("Good posture (shoulders level)");
        assert_eq!(
            flags,
            FeedbackFlags {
                good_posture: true,
                forward_lean_flag: false,
                uneven_shoulders_flag: false,
            }
        );
    }

    #[test]
    fn bad_feedback_sets_each_issue() {
        let flags = FeedbackFlags::from_feedback("Bad posture: Uneven shoulders, Forward lean");
        assert!(!flags.good_posture);
        assert!(flags.forward_lean_flag);
        assert!(flags.uneven_shoulders_flag);

        let none = FeedbackFlags::from_feedback("No pose detected");
        assert_eq!(none, FeedbackFlags::default());
    }

    #[test]
    fn foreground_name_prefers_executable_then_title() {
        let both = ForegroundWindow {
            executable: Some("valorant.exe".into()),
            title: Some("VALORANT".into()),
        };
        assert_eq!(both.display_name(), "valorant.exe");

        let title_only = ForegroundWindow {
            executable: Some("  ".into()),
            title: Some("Solitaire".into()),
        };
        assert_eq!(title_only.display_name(), "Solitaire");

        assert_eq!(ForegroundWindow::default().display_name(), "");
    }

    #[test]
    fn closures_serve_as_foreground_sources() {
        let source = || "csgo.exe".to_string();
        assert_eq!(source.foreground_application_name(), "csgo.exe");
    }

    #[test]
    fn simulated_detector_stays_in_domain() {
        let mut detector = SimulatedDetector::seeded(7);
        let now = Utc::now();
        for _ in 0..5_000 {
            let sample = detector.current_sample(now).unwrap();
            if let Some(angle) = sample.back_angle {
                assert!((0.0..=360.0).contains(&angle));
            }
            if let Some(lean) = sample.forward_lean {
                assert!(lean >= 0.0);
            }
            assert!(sample.good_posture.is_some());
        }
    }
}
