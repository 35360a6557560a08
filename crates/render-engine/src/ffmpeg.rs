//! Drift-correcting merge of the raw recording through ffmpeg.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use capturer_common::config::OutputContainer;
use capturer_common::error::{CapturerError, CapturerResult};

use crate::drift::DriftCorrection;

/// Drift above which a merge is logged as a warning.
pub const DRIFT_WARN_MS: f64 = 500.0;

/// Inputs of one merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxJob {
    /// Raw video written while recording.
    pub video: PathBuf,

    /// Raw audio, when an audio file was produced.
    pub audio: Option<PathBuf>,

    /// Merged output path.
    pub output: PathBuf,

    /// Frame rate the recording targeted.
    pub target_fps: u32,

    /// Frames in the raw video, used when its duration cannot be probed.
    pub frames: u64,

    /// Wall-clock duration of the recording.
    pub actual_secs: f64,

    pub container: OutputContainer,

    /// Leave the raw files on disk after a successful merge.
    pub keep_intermediates: bool,
}

impl MuxJob {
    /// Audio path, if it was given and exists on disk.
    pub fn existing_audio(&self) -> Option<&Path> {
        self.audio.as_deref().filter(|path| path.is_file())
    }

    /// Raw video duration derived from the frame count.
    pub fn frame_count_secs(&self) -> Option<f64> {
        (self.frames > 0 && self.target_fps > 0).then(|| self.frames as f64 / self.target_fps as f64)
    }
}

/// Where the raw video duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSource {
    Probed,
    FrameCount,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxReport {
    pub output: PathBuf,
    pub correction: DriftCorrection,
    pub video_duration_source: DurationSource,
    pub with_audio: bool,
    pub intermediates_removed: bool,
}

/// A tool that merges raw video and audio into the final recording.
pub trait Muxer: Send {
    fn mux(&mut self, job: &MuxJob) -> CapturerResult<MuxReport>;

    /// Check if this muxer can run on this system.
    fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

/// Muxer backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Container duration of `path` in seconds as reported by ffprobe.
    pub fn probe_duration(&self, path: &Path) -> CapturerResult<f64> {
        probe_duration_with(&self.ffprobe, path)
    }

    fn video_duration(&self, job: &MuxJob) -> CapturerResult<(f64, DurationSource)> {
        match self.probe_duration(&job.video) {
            Ok(secs) if secs > 0.0 => return Ok((secs, DurationSource::Probed)),
            Ok(secs) => tracing::warn!(secs, "ffprobe reported an empty duration"),
            Err(e) => tracing::warn!(error = %e, "ffprobe failed; using frame count"),
        }
        job.frame_count_secs()
            .map(|secs| (secs, DurationSource::FrameCount))
            .ok_or_else(|| CapturerError::mux("Raw video has no measurable duration"))
    }

    fn run_ffmpeg(&self, args: &[String], expected_secs: f64) -> CapturerResult<()> {
        tracing::debug!(?args, "Running ffmpeg");
        let mut child = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CapturerError::mux(format!("Failed to start ffmpeg: {e}")))?;

        let started = Instant::now();
        tracing::info!(pid = child.id(), expected_secs, "ffmpeg process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CapturerError::mux("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CapturerError::mux("Failed to capture ffmpeg stderr"))?;

        // ffmpeg blocks once its stderr pipe is full.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut output = String::new();
            match BufReader::new(stderr).read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut progress = ProgressState::default();
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader
                .read_line(&mut line)
                .map_err(|e| CapturerError::mux(format!("Failed reading ffmpeg progress: {e}")))?;
            if bytes == 0 {
                break;
            }
            if let Some((key, value)) = line.trim().split_once('=') {
                progress.update(key, value);
                if key == "progress" {
                    tracing::debug!(
                        out_secs = progress.out_time_secs,
                        fraction = progress.fraction(expected_secs),
                        "ffmpeg progress"
                    );
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| CapturerError::mux(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(CapturerError::mux(format!(
                "ffmpeg failed (status {status}): {}",
                tail(stderr_output.trim(), 2000)
            )));
        }
        tracing::info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            complete = progress.complete,
            "ffmpeg finished"
        );
        Ok(())
    }
}

impl Muxer for FfmpegMuxer {
    fn mux(&mut self, job: &MuxJob) -> CapturerResult<MuxReport> {
        if !job.video.is_file() {
            return Err(CapturerError::FileNotFound {
                path: job.video.clone(),
            });
        }

        let (video_secs, source) = self.video_duration(job)?;
        let correction =
            DriftCorrection::compute(video_secs, job.target_fps as f64, job.actual_secs)?;
        let audio = job.existing_audio();
        if job.audio.is_some() && audio.is_none() {
            tracing::warn!("Audio file missing; merging video only");
        }

        let drift = correction.drift();
        tracing::info!(
            video_secs,
            actual_secs = job.actual_secs,
            drift_ms = drift.drift_ms(),
            fps_actual = correction.fps_actual,
            ratio = correction.duration_ratio,
            with_audio = audio.is_some(),
            "Merging recording"
        );
        if drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
            tracing::warn!(
                drift_ms = drift.drift_ms(),
                "Raw video drifted from the wall clock; retiming"
            );
        }

        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let args = build_ffmpeg_args(&job.video, audio, &job.output, &correction, job.container);
        self.run_ffmpeg(&args, job.actual_secs)?;

        let intermediates_removed = if job.keep_intermediates {
            false
        } else {
            remove_intermediates(&job.video, audio)
        };

        Ok(MuxReport {
            output: job.output.clone(),
            correction,
            video_duration_source: source,
            with_audio: audio.is_some(),
            intermediates_removed,
        })
    }

    fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg) && command_exists(&self.ffprobe)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Arguments for the drift-correcting merge.
pub fn build_ffmpeg_args(
    video: &Path,
    audio: Option<&Path>,
    output: &Path,
    correction: &DriftCorrection,
    container: OutputContainer,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        video.display().to_string(),
    ];
    if let Some(audio) = audio {
        args.push("-i".into());
        args.push(audio.display().to_string());
    }

    args.extend([
        "-filter:v".to_string(),
        correction.video_filter(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);

    if audio.is_some() {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
        ]);
    }

    if container == OutputContainer::Mp4 {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args.extend([
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        output.display().to_string(),
    ]);
    args
}

/// Container duration in seconds, from `ffprobe -show_entries format=duration`.
pub fn probe_duration_with(ffprobe: &Path, path: &Path) -> CapturerResult<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| CapturerError::mux(format!("Failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(CapturerError::mux(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_probe_duration(&output.stdout)
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_duration(stdout: &[u8]) -> CapturerResult<f64> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)?;
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .ok_or_else(|| CapturerError::mux("ffprobe reported no duration"))
}

fn remove_intermediates(video: &Path, audio: Option<&Path>) -> bool {
    let mut removed = true;
    for path in std::iter::once(video).chain(audio) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove intermediate");
            removed = false;
        }
    }
    removed
}

/// Whether `binary` can be executed.
pub fn command_exists(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => self.complete = value == "end",
            _ => {}
        }
    }

    fn fraction(&self, expected_secs: f64) -> f64 {
        if expected_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_secs).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correction() -> DriftCorrection {
        DriftCorrection::compute(4.0, 30.0, 5.0).unwrap()
    }

    #[test]
    fn test_args_with_audio_for_mp4() {
        let args = build_ffmpeg_args(
            Path::new("/tmp/s/screen.mkv"),
            Some(Path::new("/tmp/s/audio.wav")),
            Path::new("/out/output_with_audio.mp4"),
            &correction(),
            OutputContainer::Mp4,
        );
        assert_eq!(
            args,
            vec![
                "-y",
                "-i",
                "/tmp/s/screen.mkv",
                "-i",
                "/tmp/s/audio.wav",
                "-filter:v",
                "setpts=1.250000000*PTS,fps=24.000000",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-shortest",
                "-movflags",
                "+faststart",
                "-progress",
                "pipe:1",
                "-nostats",
                "/out/output_with_audio.mp4",
            ]
        );
    }

    #[test]
    fn test_args_video_only_avi() {
        let args = build_ffmpeg_args(
            Path::new("screen.y4m"),
            None,
            Path::new("out.avi"),
            &correction(),
            OutputContainer::Avi,
        );
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert!(!args.contains(&"-shortest".to_string()));
        assert!(!args.contains(&"-movflags".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.avi"));
    }

    #[test]
    fn test_parse_probe_duration() {
        let json = br#"{"format": {"duration": "5.033333"}}"#;
        assert!((parse_probe_duration(json).unwrap() - 5.033333).abs() < 1e-9);
        assert!(parse_probe_duration(br#"{"format": {}}"#).is_err());
        assert!(parse_probe_duration(b"not json").is_err());
    }

    #[test]
    fn test_progress_state() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "2500000");
        state.update("progress", "continue");
        assert!((state.fraction(5.0) - 0.5).abs() < 1e-9);
        assert!(!state.complete);
        state.update("progress", "end");
        assert!(state.complete);
    }

    #[test]
    fn test_frame_count_fallback() {
        let job = MuxJob {
            video: PathBuf::from("missing.mkv"),
            audio: None,
            output: PathBuf::from("out.mp4"),
            target_fps: 30,
            frames: 150,
            actual_secs: 5.0,
            container: OutputContainer::Mp4,
            keep_intermediates: false,
        };
        assert_eq!(job.frame_count_secs(), Some(5.0));
        let muxer = FfmpegMuxer::with_binaries("ffmpeg", "/nonexistent/ffprobe");
        let (secs, source) = muxer.video_duration(&job).unwrap();
        assert_eq!(source, DurationSource::FrameCount);
        assert_eq!(secs, 5.0);
    }

    #[test]
    fn test_missing_video_is_reported() {
        let job = MuxJob {
            video: PathBuf::from("/nonexistent/screen.mkv"),
            audio: None,
            output: PathBuf::from("/tmp/out.mp4"),
            target_fps: 30,
            frames: 0,
            actual_secs: 1.0,
            container: OutputContainer::Mp4,
            keep_intermediates: false,
        };
        let err = FfmpegMuxer::new().mux(&job).unwrap_err();
        assert!(matches!(err, CapturerError::FileNotFound { .. }));
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
    }
}
