//! Clock and timing utilities for recording sessions.
//!
//! A recording is anchored to a monotonic clock epoch recorded when the
//! orchestrator enters the recording state. This module provides utilities for:
//! - Capturing the epoch and measuring true elapsed wall time
//! - Calculating drift between a media stream and the wall clock
//! - Pacing frame sampling toward a target frame rate

use std::time::Instant;

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment recording started).
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get nanoseconds elapsed since recording start.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Get seconds elapsed since recording start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Convert seconds to nanoseconds.
    pub fn secs_to_ns(secs: f64) -> u64 {
        (secs * 1_000_000_000.0) as u64
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (ns).
    pub reference_ns: u64,
    /// Timestamp in the measured stream (ns).
    pub measured_ns: u64,
}

impl DriftMeasurement {
    /// Build a measurement from two durations in seconds.
    pub fn from_secs(reference_secs: f64, measured_secs: f64) -> Self {
        Self {
            reference_ns: RecordingClock::secs_to_ns(reference_secs.max(0.0)),
            measured_ns: RecordingClock::secs_to_ns(measured_secs.max(0.0)),
        }
    }

    /// Drift in nanoseconds (positive = measured is ahead).
    pub fn drift_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

/// Smallest sampling interval the controller will use.
pub const MIN_SAMPLE_INTERVAL_MS: u32 = 1;

/// Largest sampling interval the controller will use.
pub const MAX_SAMPLE_INTERVAL_MS: u32 = 1000;

/// Sampling interval tuned by observed frame rate.
///
/// Starts at `1000 / fps` milliseconds. Every accepted sample reports the
/// instantaneous frame rate it achieved; the interval shrinks by one
/// millisecond when the rate is below target and grows by one when above,
/// bounded to `[MIN_SAMPLE_INTERVAL_MS, MAX_SAMPLE_INTERVAL_MS]`.
#[derive(Debug, Clone)]
pub struct AdaptiveInterval {
    target_fps: f64,
    interval_ms: u32,
}

impl AdaptiveInterval {
    /// Create a controller targeting the given frame rate.
    pub fn new(target_fps: u32) -> Self {
        let fps = target_fps.max(1);
        Self {
            target_fps: fps as f64,
            interval_ms: (1000 / fps).clamp(MIN_SAMPLE_INTERVAL_MS, MAX_SAMPLE_INTERVAL_MS),
        }
    }

    /// Current interval in milliseconds.
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Whether `elapsed_ms` since the last accepted sample reaches the interval.
    pub fn is_due(&self, elapsed_ms: f64) -> bool {
        elapsed_ms >= self.interval_ms as f64
    }

    /// Instantaneous frame rate for a gap of `elapsed_ms` between samples.
    pub fn achieved_fps(elapsed_ms: f64) -> f64 {
        if elapsed_ms <= 0.0 {
            return f64::INFINITY;
        }
        1000.0 / elapsed_ms
    }

    /// Feed back the frame rate achieved by the last accepted sample.
    pub fn record(&mut self, achieved_fps: f64) {
        if achieved_fps < self.target_fps && self.interval_ms > MIN_SAMPLE_INTERVAL_MS {
            self.interval_ms -= 1;
        } else if achieved_fps > self.target_fps && self.interval_ms < MAX_SAMPLE_INTERVAL_MS {
            self.interval_ms += 1;
        }
    }
}

/// Format elapsed seconds as `MM:SS` for the recording indicator.
pub fn format_elapsed(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RecordingClock::start();
        // Should be very small but non-negative
        assert!(clock.elapsed_ns() < 1_000_000_000); // less than 1 second
    }

    #[test]
    fn test_secs_to_ns_conversion() {
        assert_eq!(RecordingClock::secs_to_ns(2.0), 2_000_000_000);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            reference_ns: 1_000_000_000,
            measured_ns: 1_050_000_000,
        };
        assert_eq!(drift.drift_ns(), 50_000_000);
        assert!((drift.drift_ms() - 50.0).abs() < 1e-9);
        assert!(drift.exceeds_threshold_ms(10.0));
        assert!(!drift.exceeds_threshold_ms(100.0));
    }

    #[test]
    fn test_drift_from_secs_behind() {
        let drift = DriftMeasurement::from_secs(5.0, 4.5);
        assert!((drift.drift_ms() + 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_interval_starts_at_frame_period() {
        assert_eq!(AdaptiveInterval::new(30).interval_ms(), 33);
        assert_eq!(AdaptiveInterval::new(60).interval_ms(), 16);
        assert_eq!(AdaptiveInterval::new(1).interval_ms(), 1000);
        assert_eq!(AdaptiveInterval::new(5000).interval_ms(), 1);
        assert_eq!(AdaptiveInterval::new(0).interval_ms(), 1000);
    }

    #[test]
    fn test_interval_steps_toward_target() {
        let mut interval = AdaptiveInterval::new(30);
        interval.record(25.0);
        assert_eq!(interval.interval_ms(), 32);
        interval.record(40.0);
        interval.record(40.0);
        assert_eq!(interval.interval_ms(), 34);
        interval.record(30.0);
        assert_eq!(interval.interval_ms(), 34);
    }

    #[test]
    fn test_interval_due() {
        let interval = AdaptiveInterval::new(30);
        assert!(!interval.is_due(32.9));
        assert!(interval.is_due(33.0));
        assert!((AdaptiveInterval::achieved_fps(40.0) - 25.0).abs() < 1e-9);
    }

    /// Average frame rate when every sample lands `overhead_ms` after the
    /// interval expires, measured after the controller settles.
    fn simulated_average_fps(target: u32, overhead_ms: f64) -> f64 {
        let mut interval = AdaptiveInterval::new(target);
        let mut gaps = Vec::new();
        for _ in 0..800 {
            let gap = interval.interval_ms() as f64 + overhead_ms;
            interval.record(AdaptiveInterval::achieved_fps(gap));
            gaps.push(gap);
        }
        let settled = &gaps[200..];
        let total_ms: f64 = settled.iter().sum();
        settled.len() as f64 * 1000.0 / total_ms
    }

    #[test]
    fn test_interval_converges_under_load() {
        for target in [10u32, 15, 24, 30, 60] {
            for overhead in [0.0, 0.7, 1.5, 4.2] {
                let fps = simulated_average_fps(target, overhead);
                let error = (fps - target as f64).abs() / target as f64;
                assert!(
                    error < 0.05,
                    "target {target} overhead {overhead}: average {fps:.2} fps"
                );
            }
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0.0), "00:00");
        assert_eq!(format_elapsed(65.9), "01:05");
        assert_eq!(format_elapsed(-3.0), "00:00");
        assert_eq!(format_elapsed(3600.0), "60:00");
    }

    proptest! {
        #[test]
        fn prop_interval_stays_bounded(
            target in 1u32..240,
            observations in proptest::collection::vec(0.0f64..2000.0, 0..3000),
        ) {
            let mut interval = AdaptiveInterval::new(target);
            for fps in observations {
                interval.record(fps);
                prop_assert!(interval.interval_ms() >= MIN_SAMPLE_INTERVAL_MS);
                prop_assert!(interval.interval_ms() <= MAX_SAMPLE_INTERVAL_MS);
            }
        }
    }
}
