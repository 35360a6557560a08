//! GStreamer H.264/Matroska frame sink.

use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use tracing::{debug, warn};

use capturer_common::error::{CapturerError, CapturerResult};

use crate::consumer::FrameSink;
use crate::frame::Frame;

/// Upper bound on waiting for the encoder to flush after end of stream.
const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Encodes RGBA frames pushed through an `appsrc` into a Matroska file.
///
/// Buffers are timestamped from their index, so the file's own duration is
/// always `frames / fps` regardless of how fast frames arrived.
pub struct GstFrameSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    fps: u32,
    pushed: u64,
    finished: bool,
}

impl GstFrameSink {
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> CapturerResult<Self> {
        init_gstreamer()?;
        let fps = fps.max(1);

        let launch = format!(
            "appsrc name=src ! videoconvert ! video/x-raw,format=I420 \
             ! x264enc speed-preset=ultrafast key-int-max={} \
             ! h264parse ! matroskamux ! filesink location=\"{}\"",
            fps * 2,
            escape_path(path)
        );
        debug!(%launch, "Building encode pipeline");

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| CapturerError::encode(format!("Failed to build encode pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CapturerError::encode("Launch string did not produce a pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| CapturerError::encode("Encode pipeline has no appsrc"))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gst::Fraction::new(fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_block(true);

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            CapturerError::encode(format!("Failed to start encode pipeline: {e:?}"))
        })?;

        let sink = Self {
            pipeline,
            appsrc,
            fps,
            pushed: 0,
            finished: false,
        };
        sink.check_bus()?;
        Ok(sink)
    }

    /// Surface an error the pipeline already posted, without waiting.
    fn check_bus(&self) -> CapturerResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) = bus.pop() {
            if let gst::MessageView::Error(e) = msg.view() {
                return Err(CapturerError::encode(format!(
                    "Encode pipeline error: {} ({:?})",
                    e.error(),
                    e.debug()
                )));
            }
        }
        Ok(())
    }

    fn frame_time(&self, index: u64) -> gst::ClockTime {
        gst::ClockTime::from_nseconds(index * 1_000_000_000 / self.fps as u64)
    }

    fn drain(&self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= EOS_DRAIN_TIMEOUT {
                warn!("Encoder drain timed out; video may be truncated");
                break;
            }
            let remaining = EOS_DRAIN_TIMEOUT - elapsed;
            match bus.timed_pop(gst::ClockTime::from_nseconds(remaining.as_nanos() as u64)) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        debug!(frames = self.pushed, "EOS received; encoder drained");
                        break;
                    }
                    gst::MessageView::Error(e) => {
                        warn!(error = %e.error(), "Encode pipeline error during drain");
                        break;
                    }
                    _ => {}
                },
                None => {
                    warn!("Encoder drain timed out; video may be truncated");
                    break;
                }
            }
        }
    }
}

impl FrameSink for GstFrameSink {
    fn write_frame(&mut self, frame: &Frame) -> CapturerResult<()> {
        if self.finished {
            return Err(CapturerError::encode("Encode pipeline already finished"));
        }
        let pts = self.frame_time(self.pushed);
        let duration = self.frame_time(self.pushed + 1) - pts;

        let mut buffer = gst::Buffer::from_slice(frame.data.clone());
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| CapturerError::encode("Frame buffer is shared"))?;
            buffer.set_pts(pts);
            buffer.set_duration(duration);
        }

        self.appsrc.push_buffer(buffer).map_err(|e| {
            let detail = self.check_bus().err();
            CapturerError::encode(match detail {
                Some(err) => err.to_string(),
                None => format!("Encoder refused frame: {e:?}"),
            })
        })?;
        self.pushed += 1;
        Ok(())
    }

    fn finish(&mut self) -> CapturerResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if self.appsrc.end_of_stream().is_err() {
            warn!("Failed to signal end of stream; video may be truncated");
        } else {
            self.drain();
        }

        self.pipeline.set_state(gst::State::Null).map_err(|e| {
            CapturerError::encode(format!("Failed to stop encode pipeline: {e:?}"))
        })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "gstreamer-x264"
    }
}

impl Drop for GstFrameSink {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}

/// Initialize GStreamer once per process.
pub fn init_gstreamer() -> CapturerResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(CapturerError::encode(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Whether the elements of the encode pipeline are installed.
pub fn gstreamer_encoder_available() -> bool {
    init_gstreamer().is_ok()
        && ["appsrc", "videoconvert", "x264enc", "h264parse", "matroskamux"]
            .iter()
            .all(|name| gst::ElementFactory::find(name).is_some())
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_path_quotes() {
        assert_eq!(
            escape_path(Path::new("/tmp/a \"b\".mkv")),
            "/tmp/a \\\"b\\\".mkv"
        );
    }
}
