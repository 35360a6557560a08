//! Capturer Render Engine
//!
//! Merges the raw video and audio of a recording into the final file,
//! retiming the video so its playback length equals the measured
//! wall-clock duration.
//!
//! ```text
//! screen.mkv ──┐   ffprobe: D_video
//!              ├── setpts=(D_actual/D_video)*PTS, fps=fps*(D_video/D_actual)
//! audio.wav ───┘         │
//!                        ▼
//!                 libx264 + aac, -shortest
//!                        │
//!                        ▼
//!               output_with_audio.mp4
//! ```

pub mod drift;
pub mod ffmpeg;

pub use drift::DriftCorrection;
pub use ffmpeg::*;
