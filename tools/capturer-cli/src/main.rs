//! Capturer CLI: record a screen region with audio and merge the result.
//!
//! Usage:
//!   capturer record [OPTIONS]        Record until Ctrl+C or --duration
//!   capturer mux --session <DIR>     Merge the raw files of a kept session
//!   capturer check                   Check encoders, monitors and audio devices
//!
//! The same binary runs the capture, encode and audio workers through the
//! hidden `worker` subcommand.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use capturer_capture_engine::CaptureRegion;
use capturer_common::config::{AppConfig, IntermediateFormat, OutputContainer};

mod commands;

#[derive(Parser)]
#[command(
    name = "capturer",
    about = "Screen and audio recording with drift-corrected merging",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a screen region and the default audio input
    Record {
        /// Region as x,y,width,height (default: the whole desktop)
        #[arg(long, value_parser = parse_region)]
        region: Option<CaptureRegion>,

        /// Target FPS
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        fps: Option<u32>,

        /// Container of the merged recording: mp4 or avi
        #[arg(long, value_parser = parse_container)]
        format: Option<OutputContainer>,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration: Option<f64>,

        /// Record video only
        #[arg(long)]
        no_audio: bool,

        /// Record a test pattern and a generated tone instead of real devices
        #[arg(long)]
        synthetic: bool,

        /// Raw video format while recording: matroska or y4m
        #[arg(long, value_parser = parse_intermediate)]
        intermediate: Option<IntermediateFormat>,

        /// Keep the raw video and audio after merging
        #[arg(long)]
        keep_intermediates: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge the raw files of a previous session again
    Mux {
        /// Session directory containing session.json
        #[arg(long)]
        session: PathBuf,

        /// Output file path (default: the session's original output)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the raw files after merging
        #[arg(long)]
        keep_intermediates: bool,

        /// Print the merge report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check system capabilities
    Check,

    /// Run a worker process (used internally by `record`)
    #[command(hide = true)]
    Worker {
        /// JSON worker description
        #[arg(long)]
        spec: String,
    },
}

fn parse_region(value: &str) -> Result<CaptureRegion, String> {
    value.parse::<CaptureRegion>().map_err(|e| e.to_string())
}

fn parse_container(value: &str) -> Result<OutputContainer, String> {
    OutputContainer::parse(value).ok_or_else(|| format!("unknown format '{value}', use mp4 or avi"))
}

fn parse_intermediate(value: &str) -> Result<IntermediateFormat, String> {
    IntermediateFormat::parse(value)
        .ok_or_else(|| format!("unknown intermediate '{value}', use matroska or y4m"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load();

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.log_json {
        config.logging.json = true;
    }
    capturer_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Worker { spec } => commands::worker::run(&spec),
        Commands::Check => commands::check::run(&config),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_async(command, config))
        }
    }
}

async fn run_async(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::Record {
            region,
            fps,
            format,
            output,
            duration,
            no_audio,
            synthetic,
            intermediate,
            keep_intermediates,
            json,
        } => {
            commands::record::run(
                config,
                commands::record::RecordArgs {
                    region,
                    fps,
                    format,
                    output,
                    duration,
                    audio: !no_audio,
                    synthetic,
                    intermediate,
                    keep_intermediates,
                    json,
                },
            )
            .await
        }
        Commands::Mux {
            session,
            output,
            keep_intermediates,
            json,
        } => commands::mux::run(session, output, keep_intermediates, json).await,
        Commands::Check | Commands::Worker { .. } => Ok(()),
    }
}
