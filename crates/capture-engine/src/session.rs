//! Recording orchestration.
//!
//! [`ScreenRecorder`] owns the `Idle -> Recording -> Stopping -> Idle`
//! lifecycle. Starting spawns the capture, encode and audio workers and the
//! in-process sampling threads; stopping winds them down in dependency order,
//! drains every accepted frame into the video file and hands the raw files
//! to the [`Muxer`].

use std::collections::HashSet;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, ChildStdout};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use capturer_common::clock::RecordingClock;
use capturer_common::config::{
    validate_recording, AppConfig, IntermediateFormat, OutputContainer,
};
use capturer_common::error::{CapturerError, CapturerResult};
use capturer_render_engine::{MuxReport, Muxer};

use crate::audio::AudioInput;
use crate::frame::Frame;
use crate::ipc::{read_message, write_message, ControlMessage, Message, WorkerEvent, WorkerRole};
use crate::mailbox::SharedRecordingState;
use crate::manifest::SessionManifest;
use crate::region::{CaptureRegion, SamplerSource};
use crate::sampler::{run_sampler, SamplerReport};
use crate::supervisor::{ProcessRegistry, WorkerCommand, WorkerExit, WorkerProcess};
use crate::worker::WorkerSpec;

/// Time a worker gets to exit after being asked to terminate.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Polling step while waiting for workers to report ready.
const READY_POLL: Duration = Duration::from_millis(50);

/// Which audio input a recording uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    Disabled,
    /// The default input device.
    Device,
    /// A generated tone.
    Synthetic,
    /// An audio worker that finds no input device.
    NoDevice,
}

impl AudioMode {
    /// Input the audio worker opens, or `None` when no worker runs.
    pub fn input(self) -> Option<AudioInput> {
        match self {
            Self::Disabled => None,
            Self::Device => Some(AudioInput::Device),
            Self::Synthetic => Some(AudioInput::Tone),
            Self::NoDevice => Some(AudioInput::Absent),
        }
    }
}

/// Settings of a [`ScreenRecorder`].
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Target FPS.
    pub fps: u32,

    pub container: OutputContainer,

    pub intermediate: IntermediateFormat,

    /// Where frames come from.
    pub source: SamplerSource,

    pub audio: AudioMode,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_chunk_frames: u32,

    /// Directory of the merged recording.
    pub output_dir: PathBuf,

    /// Explicit merged output path; overrides `output_dir`.
    pub output: Option<PathBuf>,

    /// Parent of the per-session directories holding raw files.
    pub temp_dir: PathBuf,

    pub keep_intermediates: bool,

    /// How long workers get to report ready.
    pub startup_timeout: Duration,

    /// How long capture and audio workers get to exit after stop.
    pub shutdown_timeout: Duration,

    /// How long the encoder gets to flush the queue and close the file.
    pub drain_timeout: Duration,

    /// How to launch worker processes.
    pub worker: WorkerCommand,
}

impl RecorderConfig {
    pub fn from_app_config(config: &AppConfig, worker: WorkerCommand) -> Self {
        let rec = &config.recording;
        Self {
            fps: rec.fps,
            container: rec.container,
            intermediate: rec.intermediate,
            source: SamplerSource::Screen,
            audio: if rec.audio_enabled {
                AudioMode::Device
            } else {
                AudioMode::Disabled
            },
            audio_sample_rate: rec.audio_sample_rate,
            audio_channels: rec.audio_channels,
            audio_chunk_frames: rec.audio_chunk_frames,
            output_dir: config.output_dir.clone(),
            output: None,
            temp_dir: rec.temp_dir.clone(),
            keep_intermediates: rec.keep_intermediates,
            startup_timeout: rec.startup_timeout(),
            shutdown_timeout: rec.shutdown_timeout(),
            drain_timeout: rec.drain_timeout(),
            worker,
        }
    }

    pub fn validate(&self) -> CapturerResult<()> {
        validate_recording(
            self.fps,
            self.audio_sample_rate,
            self.audio_channels,
            self.audio_chunk_frames,
        )
    }

    /// Merged output path: the explicit one, or
    /// `<output_dir>/output_with_audio.<ext>`.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            self.output_dir
                .join(format!("output_with_audio.{}", self.container.extension()))
        })
    }
}

/// Lifecycle state of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Recording,
    Stopping,
}

/// How one worker ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub role: WorkerRole,
    pub pid: u32,
    pub exit: Option<WorkerExit>,
    /// Message of the last `Failed` event the worker sent.
    pub failure: Option<String>,
}

impl WorkerReport {
    /// The worker died or was killed instead of finishing normally.
    pub fn crashed(&self) -> bool {
        self.failure.is_some() || !self.exit.map_or(false, |exit| exit.success())
    }
}

/// Result of a finished recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingOutcome {
    /// The merged recording, when the merge succeeded.
    pub output: Option<PathBuf>,
    pub raw_video: PathBuf,
    pub raw_audio: Option<PathBuf>,
    /// Session directory holding the raw files and `session.json`.
    pub session_dir: PathBuf,
    pub frames_enqueued: u64,
    pub frames_written: u64,
    pub elapsed_secs: f64,
    pub workers: Vec<WorkerReport>,
    pub mux: Option<MuxReport>,
    pub mux_error: Option<String>,
}

impl RecordingOutcome {
    pub fn worker(&self, role: WorkerRole) -> Option<&WorkerReport> {
        self.workers.iter().find(|w| w.role == role)
    }

    /// The recording is complete but a worker failed or no audio was saved.
    pub fn is_degraded(&self) -> bool {
        self.raw_audio.is_none() || self.workers.iter().any(WorkerReport::crashed)
    }
}

type RoleEvent = (WorkerRole, WorkerEvent);

/// A running worker together with its pipes.
struct WorkerSlot {
    process: WorkerProcess,
    control: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    /// Send `Stop` and close stdin.
    fn request_stop(&mut self) {
        if let Some(mut control) = self.control.take() {
            let sent = write_message(&mut control, &Message::Control(ControlMessage::Stop))
                .and_then(|()| {
                    control.flush()?;
                    Ok(())
                });
            if let Err(e) = sent {
                debug!(role = self.process.role().as_str(), error = %e, "Stop not delivered");
            }
        }
    }

    fn join(&mut self, timeout: Duration) -> Option<WorkerExit> {
        let exit = match self.process.wait_or_terminate(timeout, TERMINATE_GRACE) {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(role = self.process.role().as_str(), error = %e, "Failed to reap worker");
                None
            }
        };
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!(role = self.process.role().as_str(), "Worker reader thread panicked");
            }
        }
        exit
    }
}

struct ActiveSession {
    dir: PathBuf,
    clock: RecordingClock,
    shared: Arc<SharedRecordingState>,
    manifest: SessionManifest,
    events: Receiver<RoleEvent>,
    early_events: Vec<RoleEvent>,
    capture: WorkerSlot,
    encode: WorkerSlot,
    audio: Option<WorkerSlot>,
    sampler: Option<JoinHandle<SamplerReport>>,
    writer: Option<JoinHandle<WriterSummary>>,
}

#[derive(Debug, Default)]
struct WriterSummary {
    sent: u64,
    error: Option<String>,
}

/// Screen + audio recorder.
pub struct ScreenRecorder {
    config: RecorderConfig,
    muxer: Box<dyn Muxer>,
    registry: Arc<ProcessRegistry>,
    state: RecorderState,
    session: Option<ActiveSession>,
}

impl ScreenRecorder {
    pub fn new(config: RecorderConfig, muxer: Box<dyn Muxer>) -> Self {
        Self::with_registry(config, muxer, Arc::new(ProcessRegistry::new()))
    }

    /// Create a recorder that registers its workers in `registry`.
    pub fn with_registry(
        config: RecorderConfig,
        muxer: Box<dyn Muxer>,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            config,
            muxer,
            registry,
            state: RecorderState::Idle,
            session: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Seconds since recording started; zero when idle.
    pub fn elapsed_secs(&self) -> f64 {
        self.session
            .as_ref()
            .map_or(0.0, |s| s.clock.elapsed_secs())
    }

    pub fn frames_enqueued(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |s| s.shared.frames_enqueued())
    }

    pub fn frames_written(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |s| s.shared.frames_written())
    }

    pub fn session_dir(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.dir.as_path())
    }

    /// Pids of the running workers.
    pub fn worker_pids(&self) -> Vec<(WorkerRole, u32)> {
        let Some(session) = &self.session else {
            return Vec::new();
        };
        let mut pids = vec![
            (WorkerRole::Capture, session.capture.process.pid()),
            (WorkerRole::Encode, session.encode.process.pid()),
        ];
        if let Some(audio) = &session.audio {
            pids.push((WorkerRole::Audio, audio.process.pid()));
        }
        pids
    }

    /// Required workers (capture, encode) that have died while recording.
    pub fn dead_workers(&mut self) -> Vec<WorkerRole> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let mut dead = Vec::new();
        for slot in [&mut session.capture, &mut session.encode] {
            if slot.process.has_exited().unwrap_or(false) {
                dead.push(slot.process.role());
            }
        }
        dead
    }

    /// Start recording `region`.
    ///
    /// Fails without leaving any worker behind if a recording is already
    /// running, or if the capture or encode worker cannot start.
    pub fn start(&mut self, region: CaptureRegion) -> CapturerResult<()> {
        if self.state != RecorderState::Idle {
            return Err(CapturerError::session(format!(
                "Cannot start: recorder is {:?}",
                self.state
            )));
        }
        self.config.validate()?;

        let region = region.aligned_for_encoding()?;
        let dir = self.config.temp_dir.join(format!(
            "session-{}-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S%3f"),
            std::process::id()
        ));
        let session = match self.launch(region, dir.clone()) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Recording failed to start");
                std::fs::remove_dir_all(&dir).ok();
                return Err(e);
            }
        };
        info!(
            %region,
            fps = self.config.fps,
            dir = %session.dir.display(),
            "Recording started"
        );
        self.session = Some(session);
        self.state = RecorderState::Recording;
        Ok(())
    }

    fn launch(&mut self, region: CaptureRegion, dir: PathBuf) -> CapturerResult<ActiveSession> {
        let cfg = &self.config;
        std::fs::create_dir_all(&dir)?;
        let raw_video = dir.join(format!("screen.{}", cfg.intermediate.extension()));
        let raw_audio = dir.join("audio.wav");

        let shared = Arc::new(SharedRecordingState::new());
        let (events_tx, events) = crossbeam_channel::unbounded();

        // Encoder first: it must be listening before frames exist.
        let encode = self.spawn_worker(
            &WorkerSpec::Encode {
                width: region.width,
                height: region.height,
                fps: cfg.fps,
                output: raw_video.clone(),
                intermediate: cfg.intermediate,
            },
            &shared,
            &events_tx,
        )?;
        let capture = self.spawn_worker(
            &WorkerSpec::Capture {
                region,
                source: cfg.source,
            },
            &shared,
            &events_tx,
        )?;
        let audio = match cfg.audio.input() {
            None => None,
            Some(input) => Some(self.spawn_worker(
                &WorkerSpec::Audio {
                    output: raw_audio.clone(),
                    sample_rate: cfg.audio_sample_rate,
                    channels: cfg.audio_channels,
                    chunk_frames: cfg.audio_chunk_frames,
                    input,
                },
                &shared,
                &events_tx,
            )?),
        };
        drop(events_tx);

        let mut session = ActiveSession {
            dir,
            clock: RecordingClock::start(),
            shared,
            manifest: SessionManifest::new(
                String::new(),
                region,
                cfg.fps,
                cfg.container,
                cfg.intermediate,
                raw_video,
                None,
                cfg.output_path(),
            ),
            events,
            early_events: Vec::new(),
            capture,
            encode,
            audio,
            sampler: None,
            writer: None,
        };

        // On error the session is dropped here, which kills its workers.
        wait_until_ready(&mut session, self.config.startup_timeout)?;

        session.clock = RecordingClock::start();
        session.manifest.started_at = session.clock.epoch_wall().to_string();

        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let stdin = session
            .encode
            .control
            .take()
            .ok_or_else(|| CapturerError::worker("Encode worker has no stdin"))?;
        session.writer = Some(spawn_thread("encode-writer", move || {
            write_frames(stdin, frame_rx)
        })?);

        let fps = self.config.fps;
        let shared = Arc::clone(&session.shared);
        session.sampler = Some(spawn_thread("frame-sampler", move || {
            run_sampler(shared, fps, frame_tx)
        })?);

        Ok(session)
    }

    fn spawn_worker(
        &self,
        spec: &WorkerSpec,
        shared: &Arc<SharedRecordingState>,
        events: &Sender<RoleEvent>,
    ) -> CapturerResult<WorkerSlot> {
        let mut process = WorkerProcess::spawn(&self.config.worker, spec, &self.registry)?;
        let control = process.take_stdin();
        let stdout = process
            .take_stdout()
            .ok_or_else(|| CapturerError::worker("Worker has no stdout"))?;

        let role = spec.role();
        let shared = Arc::clone(shared);
        let events = events.clone();
        let reader = spawn_thread(&format!("{}-reader", role.as_str()), move || {
            read_worker_output(role, stdout, &shared, &events)
        })?;

        Ok(WorkerSlot {
            process,
            control,
            reader: Some(reader),
        })
    }

    /// Stop recording and merge.
    ///
    /// Returns `Ok(None)` when no recording is running. Worker crashes and
    /// merge failures are reported in the outcome rather than as errors;
    /// the raw files stay on disk whenever the merge did not succeed.
    pub fn stop(&mut self) -> CapturerResult<Option<RecordingOutcome>> {
        let Some(mut session) = self.session.take() else {
            debug!("Stop requested while idle");
            return Ok(None);
        };
        self.state = RecorderState::Stopping;

        session.shared.deactivate();
        let elapsed_secs = session.clock.elapsed_secs();
        info!(elapsed_secs, "Stopping recording");

        session.capture.request_stop();
        if let Some(audio) = session.audio.as_mut() {
            audio.request_stop();
        }

        let sampler = session
            .sampler
            .take()
            .and_then(|handle| handle.join().ok());
        if sampler.is_none() {
            warn!("Frame sampler did not report");
        }

        let capture_exit = session.capture.join(self.config.shutdown_timeout);
        // The audio worker writes its whole file after stopping.
        let audio_exit = session
            .audio
            .as_mut()
            .map(|audio| audio.join(self.config.drain_timeout));

        // The writer ends once the queue is drained, closing the encoder's
        // stdin; the encoder then finishes the file and exits.
        let writer = session
            .writer
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if let Some(err) = &writer.error {
            warn!(error = %err, sent = writer.sent, "Frame hand-off to encoder failed");
        }
        let encode_exit = session.encode.join(self.config.drain_timeout);

        let outcome = self.finish(session, elapsed_secs, capture_exit, encode_exit, audio_exit);
        self.state = RecorderState::Idle;
        Ok(Some(outcome))
    }

    fn finish(
        &mut self,
        mut session: ActiveSession,
        elapsed_secs: f64,
        capture_exit: Option<WorkerExit>,
        encode_exit: Option<WorkerExit>,
        audio_exit: Option<Option<WorkerExit>>,
    ) -> RecordingOutcome {
        let mut failures: Vec<(WorkerRole, String)> = Vec::new();
        let mut saved_audio: Option<PathBuf> = None;
        let events: Vec<RoleEvent> = session
            .early_events
            .drain(..)
            .chain(session.events.try_iter())
            .collect();
        for (role, event) in events {
            match event {
                WorkerEvent::Failed { message } => {
                    warn!(role = role.as_str(), %message, "Worker reported failure");
                    failures.push((role, message));
                }
                WorkerEvent::AudioSaved { path, seconds } => {
                    debug!(seconds, "Audio file saved");
                    saved_audio = Some(path);
                }
                WorkerEvent::NoAudioDevice => info!("Recorded without audio: no input device"),
                WorkerEvent::Finished { frames } => debug!(frames, "Encoder closed video"),
                _ => {}
            }
        }
        let failure_of = |role: WorkerRole| {
            failures
                .iter()
                .rev()
                .find(|(r, _)| *r == role)
                .map(|(_, m)| m.clone())
        };

        let mut workers = vec![
            WorkerReport {
                role: WorkerRole::Capture,
                pid: session.capture.process.pid(),
                exit: capture_exit,
                failure: failure_of(WorkerRole::Capture),
            },
            WorkerReport {
                role: WorkerRole::Encode,
                pid: session.encode.process.pid(),
                exit: encode_exit,
                failure: failure_of(WorkerRole::Encode),
            },
        ];
        if let (Some(audio), Some(exit)) = (&session.audio, audio_exit) {
            workers.push(WorkerReport {
                role: WorkerRole::Audio,
                pid: audio.process.pid(),
                exit,
                failure: failure_of(WorkerRole::Audio),
            });
        }
        for report in workers.iter().filter(|w| w.crashed()) {
            warn!(
                role = report.role.as_str(),
                code = ?report.exit.and_then(|e| e.code),
                forced = report.exit.map_or(false, |e| e.forced),
                "Worker did not finish cleanly"
            );
        }

        let raw_audio = saved_audio.filter(|path| path.is_file());
        let frames_enqueued = session.shared.frames_enqueued();
        let frames_written = session.shared.frames_written();

        let manifest = &mut session.manifest;
        manifest.raw_audio = raw_audio.clone();
        manifest.frames_enqueued = frames_enqueued;
        manifest.frames_written = frames_written;
        manifest.elapsed_secs = elapsed_secs;
        if let Err(e) = manifest.save(&session.dir) {
            warn!(error = %e, "Failed to write session manifest");
        }

        info!(
            frames_enqueued,
            frames_written,
            elapsed_secs,
            with_audio = raw_audio.is_some(),
            "Recording stopped; merging"
        );

        let (mux, mux_error) = if frames_written == 0 || !manifest.raw_video.is_file() {
            (None, Some("No video frames were written".to_string()))
        } else {
            let job = manifest.mux_job(None, self.config.keep_intermediates);
            match self.muxer.mux(&job) {
                Ok(report) => (Some(report), None),
                Err(e) => {
                    error!(error = %e, dir = %session.dir.display(), "Merge failed; raw files kept");
                    (None, Some(e.to_string()))
                }
            }
        };

        if let Some(report) = &mux {
            manifest.merged = true;
            if report.intermediates_removed {
                if let Err(e) = std::fs::remove_dir_all(&session.dir) {
                    debug!(error = %e, "Failed to remove session directory");
                }
            } else if let Err(e) = manifest.save(&session.dir) {
                warn!(error = %e, "Failed to update session manifest");
            }
        }

        RecordingOutcome {
            output: mux.as_ref().map(|report| report.output.clone()),
            raw_video: manifest.raw_video.clone(),
            raw_audio,
            session_dir: session.dir.clone(),
            frames_enqueued,
            frames_written,
            elapsed_secs,
            workers,
            mux,
            mux_error,
        }
    }

    /// Kill every worker of this recorder without merging.
    pub fn abort(&mut self) -> usize {
        if let Some(session) = self.session.take() {
            session.shared.deactivate();
            warn!(dir = %session.dir.display(), "Recording aborted; raw files kept");
        }
        self.state = RecorderState::Idle;
        self.registry.terminate_all()
    }
}

impl Drop for ScreenRecorder {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.abort();
        }
    }
}

fn spawn_thread<T, F>(name: &str, f: F) -> CapturerResult<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| CapturerError::worker(format!("Failed to start {name} thread: {e}")))
}

/// Route a worker's stdout: frames into the mailbox, events to the
/// orchestrator. Runs until the worker closes stdout.
fn read_worker_output(
    role: WorkerRole,
    stdout: ChildStdout,
    shared: &SharedRecordingState,
    events: &Sender<RoleEvent>,
) {
    let mut reader = BufReader::with_capacity(1 << 20, stdout);
    loop {
        match read_message(&mut reader) {
            Ok(Some(Message::Frame(frame))) => shared.mailbox().store(frame),
            Ok(Some(Message::Event(WorkerEvent::FramesWritten { total }))) => {
                shared.set_frames_written(total)
            }
            Ok(Some(Message::Event(event))) => {
                let _ = events.send((role, event));
            }
            Ok(Some(Message::Control(_))) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(role = role.as_str(), error = %e, "Worker output unreadable");
                break;
            }
        }
    }
    debug!(role = role.as_str(), "Worker output closed");
}

/// Forward queued frames to the encode worker in order until the queue
/// closes, then close the pipe.
fn write_frames(stdin: ChildStdin, queue: Receiver<Frame>) -> WriterSummary {
    let mut out = BufWriter::with_capacity(1 << 20, stdin);
    let mut summary = WriterSummary::default();
    for frame in queue.iter() {
        let sent = write_message(&mut out, &Message::Frame(frame)).and_then(|()| {
            if queue.is_empty() {
                out.flush()?;
            }
            Ok(())
        });
        if let Err(e) = sent {
            summary.error = Some(e.to_string());
            return summary;
        }
        summary.sent += 1;
    }
    if let Err(e) = out.flush() {
        summary.error = Some(e.to_string());
    }
    summary
}

/// Block until the capture and encode workers report ready.
fn wait_until_ready(session: &mut ActiveSession, timeout: Duration) -> CapturerResult<()> {
    let deadline = Instant::now() + timeout;
    let mut pending: HashSet<WorkerRole> = [WorkerRole::Capture, WorkerRole::Encode].into();

    while !pending.is_empty() {
        let now = Instant::now();
        if now >= deadline {
            let mut waiting: Vec<&str> = pending.iter().map(WorkerRole::as_str).collect();
            waiting.sort_unstable();
            return Err(CapturerError::worker(format!(
                "Workers not ready within {} ms: {}",
                timeout.as_millis(),
                waiting.join(", ")
            )));
        }

        match session.events.recv_timeout(READY_POLL.min(deadline - now)) {
            Ok((role, WorkerEvent::Ready { detail, .. })) => {
                info!(role = role.as_str(), %detail, "Worker ready");
                pending.remove(&role);
            }
            Ok((WorkerRole::Capture, WorkerEvent::Failed { message })) => {
                return Err(CapturerError::capture(message));
            }
            Ok((WorkerRole::Encode, WorkerEvent::Failed { message })) => {
                return Err(CapturerError::encode(message));
            }
            Ok((WorkerRole::Audio, WorkerEvent::Failed { message })) => {
                warn!(%message, "Audio worker failed; recording video only");
                session
                    .early_events
                    .push((WorkerRole::Audio, WorkerEvent::Failed { message }));
            }
            Ok(other) => session.early_events.push(other),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CapturerError::worker("All workers exited during startup"));
            }
        }

        for slot in [&mut session.capture, &mut session.encode] {
            let role = slot.process.role();
            if pending.contains(&role) && slot.process.has_exited()? {
                return Err(match role {
                    WorkerRole::Capture => {
                        CapturerError::capture("Capture worker exited during startup")
                    }
                    _ => CapturerError::encode("Encode worker exited during startup"),
                });
            }
        }
    }
    Ok(())
}
