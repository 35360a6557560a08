//! Merge a kept session again.

use std::path::PathBuf;

use capturer_capture_engine::SessionManifest;
use capturer_render_engine::{FfmpegMuxer, Muxer};

pub async fn run(
    session: PathBuf,
    output: Option<PathBuf>,
    keep_intermediates: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut manifest = SessionManifest::load(&session)
        .map_err(|e| anyhow::anyhow!("Failed to load session: {e}"))?;

    let job = manifest.mux_job(output, keep_intermediates);
    println!("Merging session at: {}", session.display());
    println!("  Video: {}", job.video.display());
    match job.existing_audio() {
        Some(audio) => println!("  Audio: {}", audio.display()),
        None => println!("  Audio: none"),
    }
    println!("  Output: {}", job.output.display());

    let report = tokio::task::spawn_blocking(move || {
        let mut muxer = FfmpegMuxer::new();
        if !muxer.is_available() {
            anyhow::bail!("ffmpeg is not installed; run `capturer check`");
        }
        Ok(muxer.mux(&job)?)
    })
    .await??;

    manifest.merged = true;
    manifest.output = report.output.clone();
    if let Err(e) = manifest.save(&session) {
        tracing::warn!(error = %e, "Failed to update session manifest");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Merged to {} ({:.2}s of video stretched to {:.2}s, {:.3} fps)",
            report.output.display(),
            report.correction.video_secs,
            report.correction.actual_secs,
            report.correction.fps_actual
        );
    }
    Ok(())
}
