//! Capturer Capture Engine
//!
//! Records a screen region and an audio input into raw files and merges
//! them into one drift-corrected video. Capture, encoding and audio each run
//! in their own worker process; the orchestrating process only samples
//! frames and moves them between pipes.
//!
//! # Architecture
//!
//! ```text
//!  capture worker          orchestrator                      encode worker
//! ┌──────────────┐  pipe  ┌─────────────────────────────┐ pipe ┌────────────┐
//! │ RegionSampler├───────►│ reader ─► LatestFrameSlot   │      │ FrameSink  │
//! │ (unthrottled)│        │              │              │      │ x264 / y4m │
//! └──────────────┘        │              ▼              │      │            │
//!                         │ FrameSampler ─► FIFO queue ─┼─────►│ screen.mkv │
//!  audio worker           │ (adaptive interval)         │      └────────────┘
//! ┌──────────────┐        │                             │
//! │ cpal ─► wav  ├───────►│ ScreenRecorder + registry   │
//! └──────────────┘        └──────────────┬──────────────┘
//!                                        ▼
//!                           Muxer (ffmpeg drift correction)
//!                                        ▼
//!                               output_with_audio.mp4
//! ```

pub mod audio;
pub mod consumer;
pub mod encoder;
pub mod frame;
pub mod ipc;
pub mod mailbox;
pub mod manifest;
pub mod producer;
pub mod region;
pub mod sampler;
pub mod session;
pub mod supervisor;
pub mod worker;
pub mod y4m;

pub use frame::Frame;
pub use ipc::{WorkerEvent, WorkerRole};
pub use mailbox::{LatestFrameSlot, SharedRecordingState};
pub use manifest::SessionManifest;
pub use region::{CaptureRegion, MonitorInfo, SamplerSource};
pub use session::*;
pub use supervisor::{ProcessRegistry, WorkerCommand, WorkerExit};
pub use worker::{run_worker, WorkerSpec};
