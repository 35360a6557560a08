//! End-to-end recordings driven through the `capturer` binary's workers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use capturer_capture_engine::y4m::probe_y4m;
use capturer_capture_engine::{
    AudioMode, CaptureRegion, RecorderConfig, RecorderState, SamplerSource, ScreenRecorder,
    SessionManifest, WorkerCommand, WorkerRole,
};
use capturer_common::config::{AppConfig, IntermediateFormat};
use capturer_common::error::{CapturerError, CapturerResult};
use capturer_render_engine::{
    command_exists, DriftCorrection, DurationSource, FfmpegMuxer, MuxJob, MuxReport, Muxer,
};

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "capturer-e2e-{name}-{}-{}",
        std::process::id(),
        NEXT_DIR.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(dir: &Path) -> RecorderConfig {
    let mut cfg = RecorderConfig::from_app_config(
        &AppConfig::default(),
        WorkerCommand::new(env!("CARGO_BIN_EXE_capturer")),
    );
    cfg.fps = 30;
    cfg.source = SamplerSource::Pattern;
    cfg.intermediate = IntermediateFormat::Y4m;
    cfg.audio = AudioMode::Disabled;
    cfg.audio_sample_rate = 8000;
    cfg.audio_channels = 1;
    cfg.audio_chunk_frames = 256;
    cfg.output_dir = dir.join("out");
    cfg.temp_dir = dir.join("sessions");
    cfg.keep_intermediates = true;
    cfg.shutdown_timeout = Duration::from_secs(5);
    cfg.drain_timeout = Duration::from_secs(20);
    cfg
}

fn region() -> CaptureRegion {
    CaptureRegion::new(0, 0, 64, 48).unwrap()
}

/// Records every job and pretends the merge succeeded.
#[derive(Clone, Default)]
struct RecordingMuxer {
    jobs: Arc<Mutex<Vec<MuxJob>>>,
}

impl RecordingMuxer {
    fn jobs(&self) -> Vec<MuxJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl Muxer for RecordingMuxer {
    fn mux(&mut self, job: &MuxJob) -> CapturerResult<MuxReport> {
        self.jobs.lock().unwrap().push(job.clone());
        let video_secs = job
            .frame_count_secs()
            .ok_or_else(|| CapturerError::mux("empty video"))?;
        Ok(MuxReport {
            output: job.output.clone(),
            correction: DriftCorrection::compute(
                video_secs,
                job.target_fps as f64,
                job.actual_secs,
            )?,
            video_duration_source: DurationSource::FrameCount,
            with_audio: job.existing_audio().is_some(),
            intermediates_removed: false,
        })
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[test]
fn records_every_sampled_frame_into_the_raw_video() {
    let dir = scratch_dir("frames");
    let muxer = RecordingMuxer::default();
    let mut recorder = ScreenRecorder::new(config(&dir), Box::new(muxer.clone()));

    recorder.start(region()).unwrap();
    assert_eq!(recorder.state(), RecorderState::Recording);
    assert_eq!(recorder.worker_pids().len(), 2);
    std::thread::sleep(Duration::from_secs(2));
    let outcome = recorder.stop().unwrap().expect("recording was running");

    assert_eq!(recorder.state(), RecorderState::Idle);
    assert!(recorder.registry().is_empty());
    assert!(outcome.elapsed_secs >= 2.0 && outcome.elapsed_secs < 4.0);
    assert!(outcome.frames_written > 0);
    assert_eq!(outcome.frames_written, outcome.frames_enqueued);

    let expected = outcome.elapsed_secs * 30.0;
    let enqueued = outcome.frames_enqueued as f64;
    assert!(
        enqueued > expected * 0.5 && enqueued < expected * 1.5,
        "{enqueued} frames for {:.2}s",
        outcome.elapsed_secs
    );

    let info = probe_y4m(&outcome.raw_video).unwrap();
    assert_eq!((info.width, info.height, info.fps), (64, 48, 30));
    assert_eq!(info.frames, outcome.frames_written);

    let jobs = muxer.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].frames, outcome.frames_written);
    assert_eq!(jobs[0].actual_secs, outcome.elapsed_secs);
    assert_eq!(jobs[0].audio, None);
    assert_eq!(outcome.output, Some(dir.join("out").join("output_with_audio.mp4")));

    for role in [WorkerRole::Capture, WorkerRole::Encode] {
        let report = outcome.worker(role).unwrap();
        assert!(!report.crashed(), "{role:?} worker: {report:?}");
    }

    let manifest = SessionManifest::load(&outcome.session_dir).unwrap();
    assert!(manifest.merged);
    assert_eq!(manifest.frames_written, outcome.frames_written);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn stop_while_idle_does_nothing() {
    let dir = scratch_dir("idle");
    let muxer = RecordingMuxer::default();
    let mut recorder = ScreenRecorder::new(config(&dir), Box::new(muxer.clone()));

    assert_eq!(recorder.stop().unwrap(), None);
    recorder.start(region()).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert!(recorder.stop().unwrap().is_some());
    assert_eq!(recorder.stop().unwrap(), None);
    assert_eq!(muxer.jobs().len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn start_while_recording_is_rejected() {
    let dir = scratch_dir("twice");
    let mut recorder = ScreenRecorder::new(config(&dir), Box::new(RecordingMuxer::default()));

    recorder.start(region()).unwrap();
    let pids = recorder.worker_pids();
    let err = recorder.start(region()).unwrap_err();
    assert!(matches!(err, CapturerError::Session { .. }));
    assert_eq!(recorder.state(), RecorderState::Recording);
    assert_eq!(recorder.worker_pids(), pids);

    recorder.stop().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[cfg(unix)]
#[test]
fn killed_encoder_still_produces_an_outcome() {
    let dir = scratch_dir("crash");
    let muxer = RecordingMuxer::default();
    let mut recorder = ScreenRecorder::new(config(&dir), Box::new(muxer.clone()));

    recorder.start(region()).unwrap();
    std::thread::sleep(Duration::from_secs(1));
    let (_, encode_pid) = recorder
        .worker_pids()
        .into_iter()
        .find(|(role, _)| *role == WorkerRole::Encode)
        .unwrap();
    unsafe {
        libc::kill(encode_pid as libc::pid_t, libc::SIGKILL);
    }
    std::thread::sleep(Duration::from_millis(500));
    assert!(recorder.dead_workers().contains(&WorkerRole::Encode));

    let outcome = recorder.stop().unwrap().expect("recording was running");
    assert!(outcome.worker(WorkerRole::Encode).unwrap().crashed());
    assert!(outcome.is_degraded());
    assert!(outcome.raw_video.is_file());
    assert!(outcome.frames_written > 0);
    assert!(outcome.frames_written <= outcome.frames_enqueued);
    assert!(recorder.registry().is_empty());

    let jobs = muxer.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].frames, outcome.frames_written);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn synthetic_audio_is_saved_next_to_the_video() {
    let dir = scratch_dir("audio");
    let mut cfg = config(&dir);
    cfg.audio = AudioMode::Synthetic;
    let muxer = RecordingMuxer::default();
    let mut recorder = ScreenRecorder::new(cfg, Box::new(muxer.clone()));

    recorder.start(region()).unwrap();
    assert_eq!(recorder.worker_pids().len(), 3);
    std::thread::sleep(Duration::from_millis(1500));
    let outcome = recorder.stop().unwrap().expect("recording was running");

    let audio = outcome.raw_audio.clone().expect("audio was saved");
    let reader = hound::WavReader::open(&audio).unwrap();
    let spec = reader.spec();
    assert_eq!((spec.sample_rate, spec.channels), (8000, 1));
    let seconds = reader.duration() as f64 / spec.sample_rate as f64;
    assert!(
        (seconds - outcome.elapsed_secs).abs() < 0.75,
        "{seconds:.2}s of audio for {:.2}s",
        outcome.elapsed_secs
    );
    assert!(!outcome.worker(WorkerRole::Audio).unwrap().crashed());
    assert_eq!(muxer.jobs()[0].audio.as_deref(), Some(audio.as_path()));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_audio_device_still_merges_the_video() {
    let dir = scratch_dir("no-device");
    let mut cfg = config(&dir);
    cfg.audio = AudioMode::NoDevice;
    let muxer = RecordingMuxer::default();
    let mut recorder = ScreenRecorder::new(cfg, Box::new(muxer.clone()));

    recorder.start(region()).unwrap();
    std::thread::sleep(Duration::from_secs(1));
    assert!(recorder.dead_workers().is_empty());
    let outcome = recorder.stop().unwrap().expect("recording was running");

    assert_eq!(outcome.raw_audio, None);
    assert!(!outcome.session_dir.join("audio.wav").exists());
    let audio = outcome.worker(WorkerRole::Audio).expect("audio worker ran");
    assert!(!audio.crashed(), "audio worker: {audio:?}");
    assert!(outcome.frames_written > 0);
    assert!(outcome.is_degraded());

    let jobs = muxer.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].audio, None);
    let report = outcome.mux.as_ref().expect("video merged");
    assert!(!report.with_audio);
    assert_eq!(outcome.output, Some(dir.join("out").join("output_with_audio.mp4")));
    assert!(SessionManifest::load(&outcome.session_dir).unwrap().merged);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn ffmpeg_merge_matches_wall_clock_duration() {
    if !command_exists(Path::new("ffmpeg")) || !command_exists(Path::new("ffprobe")) {
        eprintln!("ffmpeg not installed; skipping");
        return;
    }

    let dir = scratch_dir("ffmpeg");
    let mut cfg = config(&dir);
    cfg.audio = AudioMode::Synthetic;
    cfg.keep_intermediates = false;
    let mut recorder = ScreenRecorder::new(cfg, Box::new(FfmpegMuxer::new()));

    recorder.start(region()).unwrap();
    std::thread::sleep(Duration::from_secs(2));
    let outcome = recorder.stop().unwrap().expect("recording was running");

    let output = outcome.output.clone().unwrap_or_else(|| {
        panic!("merge failed: {:?}", outcome.mux_error);
    });
    let duration = FfmpegMuxer::new().probe_duration(&output).unwrap();
    assert!(
        (duration - outcome.elapsed_secs).abs() < 0.5,
        "{duration:.2}s output for {:.2}s of recording",
        outcome.elapsed_secs
    );
    assert!(outcome.mux.unwrap().intermediates_removed);
    assert!(!outcome.session_dir.exists());

    std::fs::remove_dir_all(&dir).ok();
}
