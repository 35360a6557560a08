//! Error types shared across Capturer crates.

use std::path::PathBuf;

/// Top-level error type for Capturer operations.
///
/// The variants follow the failure classes of a recording session: screen
/// capture failures are fatal, audio failures degrade the session to
/// video-only, encode failures abort it, worker crashes are recovered at
/// join time and mux failures leave the raw files on disk.
#[derive(Debug, thiserror::Error)]
pub enum CapturerError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    #[error("IPC error: {message}")]
    Ipc { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CapturerError.
pub type CapturerResult<T> = Result<T, CapturerError>;

impl CapturerError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::Ipc {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_class() {
        let err = CapturerError::audio("no input device");
        assert_eq!(err.to_string(), "Audio error: no input device");
    }
}
