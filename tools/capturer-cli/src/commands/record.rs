//! Start a recording session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use capturer_capture_engine::region::{detect_monitors, virtual_desktop_bounds};
use capturer_capture_engine::{
    AudioMode, CaptureRegion, ProcessRegistry, RecorderConfig, RecordingOutcome, SamplerSource,
    ScreenRecorder, WorkerCommand, WorkerRole,
};
use capturer_common::clock::format_elapsed;
use capturer_common::config::{AppConfig, IntermediateFormat, OutputContainer};
use capturer_render_engine::{FfmpegMuxer, Muxer};

/// Region recorded by `--synthetic` when none is given.
const SYNTHETIC_REGION: (u32, u32) = (800, 600);

const TICK: Duration = Duration::from_millis(250);

pub struct RecordArgs {
    pub region: Option<CaptureRegion>,
    pub fps: Option<u32>,
    pub format: Option<OutputContainer>,
    pub output: Option<PathBuf>,
    pub duration: Option<f64>,
    pub audio: bool,
    pub synthetic: bool,
    pub intermediate: Option<IntermediateFormat>,
    pub keep_intermediates: bool,
    pub json: bool,
}

pub async fn run(config: AppConfig, args: RecordArgs) -> anyhow::Result<()> {
    let registry = Arc::new(ProcessRegistry::new());
    registry.install_panic_hook();

    let result = record(config, args, Arc::clone(&registry)).await;
    if result.is_err() {
        let killed = registry.terminate_all();
        if killed > 0 {
            warn!(killed, "Terminated workers after error");
        }
    }
    result
}

async fn record(
    config: AppConfig,
    args: RecordArgs,
    registry: Arc<ProcessRegistry>,
) -> anyhow::Result<()> {
    let recorder_config = recorder_config(&config, &args, WorkerCommand::current_exe()?);
    let region = match args.region {
        Some(region) => region,
        None => default_region(args.synthetic)?,
    };
    if let Some(duration) = args.duration {
        if !duration.is_finite() || duration <= 0.0 {
            anyhow::bail!("--duration must be a positive number of seconds");
        }
    }

    let muxer = FfmpegMuxer::new();
    if !muxer.is_available() {
        warn!("ffmpeg not found; raw files will be kept for `capturer mux`");
    }

    println!("Recording {}x{} at ({},{})", region.width, region.height, region.x, region.y);
    println!("  FPS: {}", recorder_config.fps);
    println!("  Audio: {:?}", recorder_config.audio);
    println!("  Output: {}", recorder_config.output_path().display());

    let mut recorder = ScreenRecorder::with_registry(recorder_config, Box::new(muxer), registry);
    let mut recorder = tokio::task::spawn_blocking(move || {
        recorder.start(region).map(|()| recorder)
    })
    .await??;

    match args.duration {
        Some(secs) => println!("Recording for {secs}s (Ctrl+C stops early)..."),
        None => println!("Press Ctrl+C to stop recording..."),
    }
    println!();

    wait_for_stop(&mut recorder, args.duration).await;
    println!();

    let outcome = tokio::task::spawn_blocking(move || recorder.stop()).await??;
    match outcome {
        Some(outcome) if args.json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        Some(outcome) => print_outcome(&outcome),
        None => println!("Recording was not running"),
    }
    Ok(())
}

/// Print the `● MM:SS` indicator until Ctrl+C, the duration elapses or a
/// required worker dies.
async fn wait_for_stop(recorder: &mut ScreenRecorder, duration: Option<f64>) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Stop requested");
                return;
            }
            _ = ticker.tick() => {
                let elapsed = recorder.elapsed_secs();
                print!("\r● {}", format_elapsed(elapsed));
                std::io::stdout().flush().ok();

                if duration.is_some_and(|limit| elapsed >= limit) {
                    return;
                }
                let dead = recorder.dead_workers();
                if !dead.is_empty() {
                    let roles: Vec<&str> = dead.iter().map(WorkerRole::as_str).collect();
                    warn!(workers = ?roles, "Worker exited while recording; stopping");
                    return;
                }
            }
        }
    }
}

fn recorder_config(config: &AppConfig, args: &RecordArgs, worker: WorkerCommand) -> RecorderConfig {
    let mut rc = RecorderConfig::from_app_config(config, worker);
    if let Some(fps) = args.fps {
        rc.fps = fps;
    }
    if let Some(format) = args.format {
        rc.container = format;
    }
    if let Some(intermediate) = args.intermediate {
        rc.intermediate = intermediate;
    }
    rc.output = args.output.clone();
    rc.keep_intermediates |= args.keep_intermediates;
    if args.synthetic {
        rc.source = SamplerSource::Pattern;
    }
    rc.audio = match (args.audio, args.synthetic) {
        (false, _) => AudioMode::Disabled,
        (true, true) => AudioMode::Synthetic,
        (true, false) => rc.audio,
    };
    rc
}

fn default_region(synthetic: bool) -> anyhow::Result<CaptureRegion> {
    if synthetic {
        let (width, height) = SYNTHETIC_REGION;
        return Ok(CaptureRegion::new(0, 0, width, height)?);
    }
    let monitors = detect_monitors()?;
    virtual_desktop_bounds(&monitors)
        .ok_or_else(|| anyhow::anyhow!("No monitors detected; pass --region x,y,width,height"))
}

fn print_outcome(outcome: &RecordingOutcome) {
    match &outcome.output {
        Some(path) => println!("Recording saved to: {}", path.display()),
        None => {
            println!("Merge did not complete; raw files kept in {}", outcome.session_dir.display());
            if let Some(reason) = &outcome.mux_error {
                println!("  Reason: {reason}");
            }
            println!(
                "  Retry with: capturer mux --session {}",
                outcome.session_dir.display()
            );
        }
    }
    println!(
        "  Duration: {} ({:.2}s), frames: {} written / {} sampled",
        format_elapsed(outcome.elapsed_secs),
        outcome.elapsed_secs,
        outcome.frames_written,
        outcome.frames_enqueued
    );
    if let Some(report) = &outcome.mux {
        println!(
            "  Drift correction: {:.2}s of video played at {:.3} fps",
            report.correction.video_secs, report.correction.fps_actual
        );
    }
    if outcome.raw_audio.is_none() {
        println!("  Audio: none");
    }
    for worker in outcome.workers.iter().filter(|w| w.crashed()) {
        println!(
            "  [WARN] {} worker (pid {}) did not finish cleanly{}",
            worker.role.as_str(),
            worker.pid,
            worker
                .failure
                .as_deref()
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RecordArgs {
        RecordArgs {
            region: None,
            fps: None,
            format: None,
            output: None,
            duration: None,
            audio: true,
            synthetic: false,
            intermediate: None,
            keep_intermediates: false,
            json: false,
        }
    }

    fn build(args: &RecordArgs) -> RecorderConfig {
        recorder_config(&AppConfig::default(), args, WorkerCommand::new("capturer"))
    }

    #[test]
    fn test_defaults_come_from_app_config() {
        let rc = build(&args());
        assert_eq!(rc.fps, 30);
        assert_eq!(rc.audio, AudioMode::Device);
        assert_eq!(rc.source, SamplerSource::Screen);
    }

    #[test]
    fn test_synthetic_uses_pattern_and_tone() {
        let rc = build(&RecordArgs {
            synthetic: true,
            fps: Some(24),
            ..args()
        });
        assert_eq!(rc.source, SamplerSource::Pattern);
        assert_eq!(rc.audio, AudioMode::Synthetic);
        assert_eq!(rc.fps, 24);
    }

    #[test]
    fn test_no_audio_wins() {
        let rc = build(&RecordArgs {
            audio: false,
            synthetic: true,
            ..args()
        });
        assert_eq!(rc.audio, AudioMode::Disabled);
    }

    #[test]
    fn test_synthetic_default_region() {
        let region = default_region(true).unwrap();
        assert_eq!((region.width, region.height), SYNTHETIC_REGION);
    }
}
