//! Session manifest: what a recording left on disk, so it can be merged again.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use capturer_common::config::{IntermediateFormat, OutputContainer};
use capturer_common::error::{CapturerError, CapturerResult};
use capturer_render_engine::MuxJob;

use crate::region::CaptureRegion;

/// File name of the manifest inside a session directory.
pub const MANIFEST_FILE: &str = "session.json";

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub version: u32,
    /// RFC 3339 wall-clock time the recording started.
    pub started_at: String,
    pub region: CaptureRegion,
    pub fps: u32,
    pub container: OutputContainer,
    pub intermediate: IntermediateFormat,
    pub raw_video: PathBuf,
    pub raw_audio: Option<PathBuf>,
    pub frames_enqueued: u64,
    pub frames_written: u64,
    pub elapsed_secs: f64,
    /// Where the merged recording was (or would have been) written.
    pub output: PathBuf,
    /// Whether the merge succeeded.
    pub merged: bool,
}

impl SessionManifest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        started_at: String,
        region: CaptureRegion,
        fps: u32,
        container: OutputContainer,
        intermediate: IntermediateFormat,
        raw_video: PathBuf,
        raw_audio: Option<PathBuf>,
        output: PathBuf,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            started_at,
            region,
            fps,
            container,
            intermediate,
            raw_video,
            raw_audio,
            frames_enqueued: 0,
            frames_written: 0,
            elapsed_secs: 0.0,
            output,
            merged: false,
        }
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Write `session.json` into `dir`.
    pub fn save(&self, dir: &Path) -> CapturerResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_in(dir);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Read `session.json` from `dir`.
    pub fn load(dir: &Path) -> CapturerResult<Self> {
        let path = Self::path_in(dir);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| CapturerError::FileNotFound { path: path.clone() })?;
        let manifest: Self = serde_json::from_str(&content)?;
        if manifest.version > MANIFEST_VERSION {
            return Err(CapturerError::session(format!(
                "Session manifest version {} is newer than supported {}",
                manifest.version, MANIFEST_VERSION
            )));
        }
        Ok(manifest)
    }

    /// The merge this session needs, optionally to a different output.
    pub fn mux_job(&self, output: Option<PathBuf>, keep_intermediates: bool) -> MuxJob {
        MuxJob {
            video: self.raw_video.clone(),
            audio: self.raw_audio.clone(),
            output: output.unwrap_or_else(|| self.output.clone()),
            target_fps: self.fps,
            frames: self.frames_written,
            actual_secs: self.elapsed_secs,
            container: self.container,
            keep_intermediates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionManifest {
        let mut m = SessionManifest::new(
            "2026-01-01T00:00:00Z".into(),
            CaptureRegion::new(0, 0, 800, 600).unwrap(),
            30,
            OutputContainer::Mp4,
            IntermediateFormat::Matroska,
            PathBuf::from("/tmp/s/screen.mkv"),
            Some(PathBuf::from("/tmp/s/audio.wav")),
            PathBuf::from("/videos/output_with_audio.mp4"),
        );
        m.frames_written = 150;
        m.elapsed_secs = 5.02;
        m
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("capturer-manifest-{}", std::process::id()));
        let manifest = sample();
        manifest.save(&dir).unwrap();
        assert_eq!(SessionManifest::load(&dir).unwrap(), manifest);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mux_job_uses_written_frames_and_elapsed_time() {
        let job = sample().mux_job(Some(PathBuf::from("/tmp/again.mp4")), true);
        assert_eq!(job.frames, 150);
        assert_eq!(job.actual_secs, 5.02);
        assert_eq!(job.output, PathBuf::from("/tmp/again.mp4"));
        assert!(job.keep_intermediates);
    }

    #[test]
    fn test_missing_manifest() {
        let err = SessionManifest::load(Path::new("/nonexistent/session")).unwrap_err();
        assert!(matches!(err, CapturerError::FileNotFound { .. }));
    }
}
