//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CapturerError, CapturerResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where merged recordings are written.
    pub output_dir: PathBuf,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Output container of the merged recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputContainer {
    #[default]
    Mp4,
    Avi,
}

impl OutputContainer {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            _ => None,
        }
    }
}

/// Format of the raw video file written while recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntermediateFormat {
    /// H.264 in Matroska, encoded by GStreamer.
    #[default]
    Matroska,
    /// Uncompressed YUV4MPEG2 (4:4:4).
    Y4m,
}

impl IntermediateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Matroska => "mkv",
            Self::Y4m => "y4m",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "matroska" | "mkv" => Some(Self::Matroska),
            "y4m" => Some(Self::Y4m),
            _ => None,
        }
    }
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Target FPS.
    pub fps: u32,

    /// Container of the merged output file.
    pub container: OutputContainer,

    /// Format of the raw video written during capture.
    pub intermediate: IntermediateFormat,

    /// Whether to record audio alongside the screen.
    pub audio_enabled: bool,

    /// Audio sample rate (Hz).
    pub audio_sample_rate: u32,

    /// Audio channel count.
    pub audio_channels: u16,

    /// Frames per audio read.
    pub audio_chunk_frames: u32,

    /// Keep the raw video/audio files after a successful merge.
    pub keep_intermediates: bool,

    /// Directory for raw per-session files.
    pub temp_dir: PathBuf,

    /// How long a worker may take to report readiness.
    pub startup_timeout_ms: u64,

    /// How long capture and audio workers get to exit after stop.
    pub shutdown_timeout_ms: u64,

    /// How long the encode worker gets to drain its backlog after stop.
    pub drain_timeout_ms: u64,
}

impl RecordingDefaults {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Reject settings no recording can run with.
    pub fn validate(&self) -> CapturerResult<()> {
        validate_recording(
            self.fps,
            self.audio_sample_rate,
            self.audio_channels,
            self.audio_chunk_frames,
        )
    }
}

/// Check the frame rate and audio layout of a recording.
pub fn validate_recording(
    fps: u32,
    sample_rate: u32,
    channels: u16,
    chunk_frames: u32,
) -> CapturerResult<()> {
    if fps == 0 {
        return Err(CapturerError::config("fps must be at least 1"));
    }
    if sample_rate == 0 || channels == 0 || chunk_frames == 0 {
        return Err(CapturerError::config(format!(
            "Invalid audio layout: {sample_rate} Hz, {channels} channels, {chunk_frames} frames per chunk"
        )));
    }
    Ok(())
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "capturer=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_output(),
            recording: RecordingDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            container: OutputContainer::Mp4,
            intermediate: IntermediateFormat::Matroska,
            audio_enabled: true,
            audio_sample_rate: 44100,
            audio_channels: 2,
            audio_chunk_frames: 1024,
            keep_intermediates: false,
            temp_dir: std::env::temp_dir().join("capturer"),
            startup_timeout_ms: 5_000,
            shutdown_timeout_ms: 3_000,
            drain_timeout_ms: 60_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str::<Self>(&content) {
                    Ok(config) => match config.recording.validate() {
                        Ok(()) => return config,
                        Err(e) => {
                            tracing::warn!("Ignoring config at {:?}: {}", config_path, e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("capturer").join("config.json")
}

/// Default output directory.
fn dirs_default_output() -> PathBuf {
    let base = std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join("Videos")
        });
    base.join("capturer")
}
