//! Paced sampling of the latest-frame mailbox.
//!
//! The sampler runs on a thread in the orchestrating process. It picks up
//! whatever frame is newest at each sampling point and hands it to the
//! encode side, so capture speed and encode speed never couple.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, info};

use capturer_common::clock::AdaptiveInterval;

use crate::frame::Frame;
use crate::mailbox::{LatestFrameSlot, SharedRecordingState};

/// Sleep between polls while the next sample is not yet due.
const POLL_PAUSE: Duration = Duration::from_micros(250);

/// Rate controller deciding when the newest frame is accepted.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    interval: AdaptiveInterval,
    last_accept: Option<Instant>,
    accepted: u64,
}

impl FrameSampler {
    pub fn new(target_fps: u32) -> Self {
        Self {
            interval: AdaptiveInterval::new(target_fps),
            last_accept: None,
            accepted: 0,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval.interval_ms()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// One iteration of the control loop at time `now`.
    ///
    /// Returns the frame to enqueue when a sample is due and the mailbox
    /// holds a frame. The first accepted frame is taken immediately and does
    /// not feed the controller; every later one adjusts the interval by the
    /// rate it achieved.
    pub fn poll(&mut self, now: Instant, slot: &LatestFrameSlot) -> Option<Frame> {
        if let Some(last) = self.last_accept {
            let elapsed_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            if !self.interval.is_due(elapsed_ms) {
                return None;
            }
            let frame = slot.latest()?;
            self.interval
                .record(AdaptiveInterval::achieved_fps(elapsed_ms));
            self.accept(now);
            Some(frame)
        } else {
            let frame = slot.latest()?;
            self.accept(now);
            Some(frame)
        }
    }

    fn accept(&mut self, now: Instant) {
        self.last_accept = Some(now);
        self.accepted += 1;
    }
}

/// Totals reported when the sampling loop exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerReport {
    pub accepted: u64,
    pub final_interval_ms: u32,
}

/// Run the sampling loop until the recording is deactivated.
///
/// Accepted frames go to `queue` in acceptance order. The loop also ends
/// if the receiving side of the queue is gone.
pub fn run_sampler(
    state: Arc<SharedRecordingState>,
    target_fps: u32,
    queue: Sender<Frame>,
) -> SamplerReport {
    let mut sampler = FrameSampler::new(target_fps);
    info!(
        target_fps,
        interval_ms = sampler.interval_ms(),
        "Frame sampler started"
    );

    while state.is_active() {
        match sampler.poll(Instant::now(), state.mailbox()) {
            Some(frame) => {
                if queue.send(frame).is_err() {
                    debug!("Frame queue closed; sampler exiting");
                    break;
                }
                state.record_enqueued();
            }
            None => std::thread::sleep(POLL_PAUSE),
        }
    }

    let report = SamplerReport {
        accepted: sampler.accepted(),
        final_interval_ms: sampler.interval_ms(),
    };
    info!(
        accepted = report.accepted,
        interval_ms = report.final_interval_ms,
        "Frame sampler stopped"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn store(slot: &LatestFrameSlot, sequence: u64) {
        slot.store(Frame::new(Bytes::from(vec![0u8; 16]), 2, 2, sequence, 0));
    }

    #[test]
    fn test_empty_mailbox_yields_nothing() {
        let slot = LatestFrameSlot::new();
        let mut sampler = FrameSampler::new(30);
        assert!(sampler.poll(Instant::now(), &slot).is_none());
        assert_eq!(sampler.accepted(), 0);
    }

    #[test]
    fn test_first_frame_is_accepted_immediately() {
        let slot = LatestFrameSlot::new();
        store(&slot, 7);
        let mut sampler = FrameSampler::new(30);
        let frame = sampler.poll(Instant::now(), &slot).unwrap();
        assert_eq!(frame.sequence, 7);
        assert_eq!(sampler.interval_ms(), 33);
    }

    #[test]
    fn test_sample_waits_for_interval() {
        let slot = LatestFrameSlot::new();
        store(&slot, 0);
        let mut sampler = FrameSampler::new(10);
        let t0 = Instant::now();
        assert!(sampler.poll(t0, &slot).is_some());
        assert!(sampler.poll(t0 + Duration::from_millis(50), &slot).is_none());
        assert!(sampler.poll(t0 + Duration::from_millis(100), &slot).is_some());
    }

    #[test]
    fn test_stale_frame_is_resampled() {
        let slot = LatestFrameSlot::new();
        store(&slot, 3);
        let mut sampler = FrameSampler::new(100);
        let t0 = Instant::now();
        let a = sampler.poll(t0, &slot).unwrap();
        let b = sampler.poll(t0 + Duration::from_millis(20), &slot).unwrap();
        assert_eq!(a.sequence, b.sequence);
    }

    #[test]
    fn test_simulated_rate_converges_to_target() {
        for fps in [10u32, 24, 30, 60] {
            let slot = LatestFrameSlot::new();
            let mut sampler = FrameSampler::new(fps);
            let t0 = Instant::now();
            // Poll every millisecond for ten simulated seconds; capture runs
            // faster than the sampler so the mailbox is always fresh.
            for ms in 0..10_000u64 {
                store(&slot, ms);
                sampler.poll(t0 + Duration::from_millis(ms), &slot);
            }
            let expected = fps as f64 * 10.0;
            let achieved = sampler.accepted() as f64;
            assert!(
                (achieved - expected).abs() / expected < 0.05,
                "fps {fps}: accepted {achieved}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_thirty_fps_for_five_seconds_is_within_one_percent() {
        let slot = LatestFrameSlot::new();
        let mut sampler = FrameSampler::new(30);
        let t0 = Instant::now();
        for ms in 0..5_000u64 {
            store(&slot, ms);
            sampler.poll(t0 + Duration::from_millis(ms), &slot);
        }
        let achieved = sampler.accepted() as f64;
        assert!(
            (achieved - 150.0).abs() / 150.0 <= 0.01,
            "accepted {achieved} frames, expected 150"
        );
    }

    #[test]
    fn test_run_sampler_stops_on_deactivate() {
        let state = Arc::new(SharedRecordingState::new());
        store(state.mailbox(), 1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || run_sampler(state, 50, tx))
        };
        std::thread::sleep(Duration::from_millis(200));
        state.deactivate();
        let report = handle.join().unwrap();
        let received = rx.try_iter().count() as u64;
        assert_eq!(received, report.accepted);
        assert_eq!(state.frames_enqueued(), report.accepted);
        assert!(report.accepted >= 1);
    }
}
