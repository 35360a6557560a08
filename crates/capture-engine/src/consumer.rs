//! Encode consumer: append every handed-off frame to the video file.

use tracing::{debug, info, warn};

use capturer_common::error::{CapturerError, CapturerResult};

use crate::frame::Frame;

/// Destination of encoded frames.
pub trait FrameSink {
    /// Append one frame. Frames arrive in hand-off order.
    fn write_frame(&mut self, frame: &Frame) -> CapturerResult<()>;

    /// Flush and close the container. Called once, after the last frame.
    fn finish(&mut self) -> CapturerResult<()>;

    fn name(&self) -> &str;
}

/// Totals of one encode run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub written: u64,
    pub rejected: u64,
    pub last_sequence: Option<u64>,
    /// The frame stream broke off instead of ending cleanly.
    pub truncated: bool,
}

/// Drain `frames` into `sink` until the stream ends, then close the sink.
///
/// `on_written` receives the running total after every appended frame.
/// Frames whose size does not match `width`x`height` are skipped. A broken
/// input stream ends the loop early but still closes the container, so
/// everything written so far stays playable.
pub fn run_encode_loop<I, F>(
    frames: I,
    sink: &mut dyn FrameSink,
    width: u32,
    height: u32,
    mut on_written: F,
) -> CapturerResult<EncodeStats>
where
    I: IntoIterator<Item = CapturerResult<Frame>>,
    F: FnMut(u64),
{
    let mut stats = EncodeStats::default();
    info!(sink = sink.name(), width, height, "Encode consumer started");

    for item in frames {
        let frame = match item {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, written = stats.written, "Frame stream broke off; closing video");
                stats.truncated = true;
                break;
            }
        };

        if !frame.has_dimensions(width, height) || !frame.is_valid() {
            stats.rejected += 1;
            debug!(
                sequence = frame.sequence,
                frame_width = frame.width,
                frame_height = frame.height,
                "Skipping frame with unexpected size"
            );
            continue;
        }

        if let Err(e) = sink.write_frame(&frame) {
            if let Err(close) = sink.finish() {
                warn!(error = %close, "Failed to close video after write error");
            }
            return Err(CapturerError::encode(format!(
                "Failed to write frame {}: {e}",
                frame.sequence
            )));
        }
        stats.written += 1;
        stats.last_sequence = Some(frame.sequence);
        on_written(stats.written);
    }

    sink.finish()?;
    info!(
        written = stats.written,
        rejected = stats.rejected,
        truncated = stats.truncated,
        "Encode consumer finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[derive(Default)]
    struct RecordingSink {
        sequences: Vec<u64>,
        finished: bool,
        fail_at: Option<u64>,
    }

    impl FrameSink for RecordingSink {
        fn write_frame(&mut self, frame: &Frame) -> CapturerResult<()> {
            if self.fail_at == Some(frame.sequence) {
                return Err(CapturerError::encode("disk full"));
            }
            self.sequences.push(frame.sequence);
            Ok(())
        }

        fn finish(&mut self) -> CapturerResult<()> {
            self.finished = true;
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn frame(sequence: u64, width: u32, height: u32) -> CapturerResult<Frame> {
        Ok(Frame::new(
            Bytes::from(vec![0u8; Frame::rgba_buffer_size(width, height)]),
            width,
            height,
            sequence,
            sequence,
        ))
    }

    #[test]
    fn test_frames_are_written_in_order() {
        let mut sink = RecordingSink::default();
        let mut totals = Vec::new();
        let input: Vec<_> = (0..100).map(|s| frame(s, 4, 4)).collect();
        let stats = run_encode_loop(input, &mut sink, 4, 4, |t| totals.push(t)).unwrap();
        assert_eq!(stats.written, 100);
        assert_eq!(sink.sequences, (0..100).collect::<Vec<_>>());
        assert_eq!(totals.last(), Some(&100));
        assert!(sink.finished);
    }

    #[test]
    fn test_mismatched_frames_are_skipped() {
        let mut sink = RecordingSink::default();
        let input = vec![frame(0, 4, 4), frame(1, 8, 8), frame(2, 4, 4)];
        let stats = run_encode_loop(input, &mut sink, 4, 4, |_| {}).unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(sink.sequences, vec![0, 2]);
    }

    #[test]
    fn test_broken_stream_still_closes_video() {
        let mut sink = RecordingSink::default();
        let input = vec![
            frame(0, 4, 4),
            frame(1, 4, 4),
            Err(CapturerError::ipc("Stream ended in the middle of a message")),
            frame(2, 4, 4),
        ];
        let stats = run_encode_loop(input, &mut sink, 4, 4, |_| {}).unwrap();
        assert!(stats.truncated);
        assert_eq!(stats.written, 2);
        assert!(sink.finished);
    }

    #[test]
    fn test_write_failure_is_an_encode_error() {
        let mut sink = RecordingSink {
            fail_at: Some(3),
            ..Default::default()
        };
        let input: Vec<_> = (0..10).map(|s| frame(s, 4, 4)).collect();
        let err = run_encode_loop(input, &mut sink, 4, 4, |_| {}).unwrap_err();
        assert!(matches!(err, CapturerError::Encode { .. }));
        assert!(sink.finished);
        assert_eq!(sink.sequences, vec![0, 1, 2]);
    }
}
