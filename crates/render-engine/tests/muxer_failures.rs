use std::path::PathBuf;

use capturer_common::config::OutputContainer;
use capturer_common::error::CapturerError;
use capturer_render_engine::{FfmpegMuxer, MuxJob, Muxer};

fn job(dir: &std::path::Path) -> MuxJob {
    MuxJob {
        video: dir.join("screen.mkv"),
        audio: Some(dir.join("audio.wav")),
        output: dir.join("out").join("output_with_audio.mp4"),
        target_fps: 30,
        frames: 60,
        actual_secs: 3.0,
        container: OutputContainer::Mp4,
        keep_intermediates: false,
    }
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("capturer-mux-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn missing_tools() -> FfmpegMuxer {
    FfmpegMuxer::with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe")
}

#[test]
fn missing_binaries_are_reported_unavailable() {
    assert!(!missing_tools().is_available());
    assert_eq!(missing_tools().name(), "ffmpeg");
}

#[test]
fn missing_video_is_file_not_found() {
    let dir = scratch("novideo");
    let err = missing_tools().mux(&job(&dir)).unwrap_err();
    assert!(matches!(err, CapturerError::FileNotFound { path } if path == dir.join("screen.mkv")));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn failed_merge_keeps_raw_files() {
    let dir = scratch("failed");
    let job = job(&dir);
    std::fs::write(&job.video, b"not really a video").unwrap();
    std::fs::write(job.audio.as_ref().unwrap(), b"not really audio").unwrap();

    assert!(missing_tools().mux(&job).is_err());
    assert!(job.video.is_file());
    assert!(job.audio.as_ref().unwrap().is_file());
    assert!(!job.output.exists());

    std::fs::remove_dir_all(&dir).ok();
}
