//! Drift correction between the raw video's duration and wall-clock time.

use serde::{Deserialize, Serialize};

use capturer_common::clock::DriftMeasurement;
use capturer_common::error::{CapturerError, CapturerResult};

/// Retiming parameters that stretch the raw video to the measured duration.
///
/// Playing every frame of a `video_secs` file at `fps_actual` takes
/// `actual_secs`; equivalently every presentation timestamp is scaled by
/// `duration_ratio`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftCorrection {
    pub video_secs: f64,
    pub actual_secs: f64,
    pub target_fps: f64,
    pub fps_actual: f64,
    pub duration_ratio: f64,
}

impl DriftCorrection {
    pub fn compute(video_secs: f64, target_fps: f64, actual_secs: f64) -> CapturerResult<Self> {
        for (name, value) in [
            ("video duration", video_secs),
            ("target frame rate", target_fps),
            ("elapsed time", actual_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CapturerError::mux(format!(
                    "Cannot correct drift with {name} {value}"
                )));
            }
        }

        Ok(Self {
            video_secs,
            actual_secs,
            target_fps,
            fps_actual: target_fps * (video_secs / actual_secs),
            duration_ratio: actual_secs / video_secs,
        })
    }

    /// Video filter chain applying the correction.
    pub fn video_filter(&self) -> String {
        format!(
            "setpts={:.9}*PTS,fps={:.6}",
            self.duration_ratio, self.fps_actual
        )
    }

    /// Difference between the raw video and the wall clock.
    pub fn drift(&self) -> DriftMeasurement {
        DriftMeasurement::from_secs(self.actual_secs, self.video_secs)
    }

    /// Whether the raw video already matches the wall clock.
    pub fn is_identity(&self) -> bool {
        (self.duration_ratio - 1.0).abs() < 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_slow_encode_is_stretched() {
        // 120 frames at 30 fps is 4 s of video for 5 s of wall time.
        let c = DriftCorrection::compute(4.0, 30.0, 5.0).unwrap();
        assert!((c.fps_actual - 24.0).abs() < 1e-9);
        assert!((c.duration_ratio - 1.25).abs() < 1e-9);
        assert_eq!(c.video_filter(), "setpts=1.250000000*PTS,fps=24.000000");
        assert!((c.drift().drift_ms() + 1000.0).abs() < 1e-6);
        assert!(c.drift().exceeds_threshold_ms(crate::ffmpeg::DRIFT_WARN_MS));
    }

    #[test]
    fn test_matching_durations_are_identity() {
        let c = DriftCorrection::compute(5.0, 30.0, 5.0).unwrap();
        assert!(c.is_identity());
        assert_eq!(c.fps_actual, 30.0);
        assert!(!c.drift().exceeds_threshold_ms(crate::ffmpeg::DRIFT_WARN_MS));
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        assert!(DriftCorrection::compute(0.0, 30.0, 5.0).is_err());
        assert!(DriftCorrection::compute(5.0, 0.0, 5.0).is_err());
        assert!(DriftCorrection::compute(5.0, 30.0, f64::NAN).is_err());
        assert!(DriftCorrection::compute(5.0, 30.0, -1.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_corrected_playback_matches_wall_time(
            frames in 1u64..100_000,
            fps in 1u32..=120,
            actual in 0.05f64..3600.0,
        ) {
            let video = frames as f64 / fps as f64;
            let c = DriftCorrection::compute(video, fps as f64, actual).unwrap();
            let playback = frames as f64 / c.fps_actual;
            prop_assert!((playback - actual).abs() <= actual * 1e-9);
            prop_assert!((video * c.duration_ratio - actual).abs() <= actual * 1e-9);
        }
    }
}
