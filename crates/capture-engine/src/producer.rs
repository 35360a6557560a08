//! Capture producer: grab the region as fast as possible and publish it.

use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use capturer_common::clock::RecordingClock;
use capturer_common::error::{CapturerError, CapturerResult};

use crate::frame::Frame;
use crate::ipc::{write_message, Message};
use crate::region::{CaptureRegion, RegionSampler};

/// Minimum gap between two transient-failure warnings.
const WARN_EVERY: Duration = Duration::from_secs(2);

/// Pause after a failed capture so a dead display does not spin a core.
const RETRY_PAUSE: Duration = Duration::from_millis(5);

/// Totals of one producer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub captured: u64,
    pub failed: u64,
}

/// Capture `region` repeatedly and write each frame to `out` until `stop`
/// is set or the reader goes away.
///
/// A failed capture is skipped and retried; it never ends the loop. Frames
/// are flushed one at a time so the reader always sees the newest one.
pub fn run_capture_loop<W: Write>(
    sampler: &mut dyn RegionSampler,
    region: &CaptureRegion,
    stop: &AtomicBool,
    out: &mut W,
) -> CapturerResult<ProducerStats> {
    let clock = RecordingClock::start();
    let mut stats = ProducerStats::default();
    let mut last_warn: Option<Instant> = None;
    let mut suppressed = 0u64;

    info!(sampler = sampler.name(), %region, "Capture producer started");

    while !stop.load(Ordering::SeqCst) {
        let data = match sampler.sample(region) {
            Ok(data) => data,
            Err(e) => {
                stats.failed += 1;
                if last_warn.map_or(true, |at| at.elapsed() >= WARN_EVERY) {
                    warn!(error = %e, suppressed, "Capture failed; retrying");
                    last_warn = Some(Instant::now());
                    suppressed = 0;
                } else {
                    suppressed += 1;
                }
                std::thread::sleep(RETRY_PAUSE);
                continue;
            }
        };

        let frame = Frame::new(
            data,
            region.width,
            region.height,
            stats.captured,
            clock.elapsed_ns(),
        );
        let sent = write_message(out, &Message::Frame(frame)).and_then(|()| {
            out.flush()?;
            Ok(())
        });
        match sent {
            Ok(()) => stats.captured += 1,
            Err(CapturerError::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
                info!("Frame reader closed; capture producer exiting");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        captured = stats.captured,
        failed = stats.failed,
        "Capture producer stopped"
    );
    Ok(stats)
}
