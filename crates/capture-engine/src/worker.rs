//! Worker process entry points.
//!
//! The orchestrator spawns its own executable with a JSON [`WorkerSpec`].
//! Each worker owns one device or file, reports through [`WorkerEvent`]s on
//! stdout, and turns every error into an event plus an exit code instead of
//! letting it cross the process boundary.

use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use capturer_common::config::IntermediateFormat;
use capturer_common::error::{CapturerError, CapturerResult};

use crate::audio::{open_audio_source, run_audio_loop, write_wav, AudioFormat, AudioInput};
use crate::consumer::{run_encode_loop, FrameSink};
use crate::encoder::GstFrameSink;
use crate::ipc::{self, read_message, write_message, ControlMessage, Message, WorkerEvent, WorkerRole};
use crate::producer::run_capture_loop;
use crate::region::{build_sampler, CaptureRegion, SamplerSource};
use crate::y4m::Y4mFrameSink;

/// Process exit codes reported by workers.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const OTHER: i32 = 1;
    pub const CAPTURE_FAILED: i32 = 2;
    pub const ENCODE_FAILED: i32 = 3;
    pub const AUDIO_FAILED: i32 = 4;

    /// Human-readable meaning of an exit code.
    pub fn describe(code: i32) -> &'static str {
        match code {
            OK => "ok",
            CAPTURE_FAILED => "capture failed",
            ENCODE_FAILED => "encode failed",
            AUDIO_FAILED => "audio failed",
            _ => "failed",
        }
    }
}

/// What a worker process should do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum WorkerSpec {
    Capture {
        region: CaptureRegion,
        source: SamplerSource,
    },
    Encode {
        width: u32,
        height: u32,
        fps: u32,
        output: PathBuf,
        intermediate: IntermediateFormat,
    },
    Audio {
        output: PathBuf,
        sample_rate: u32,
        channels: u16,
        chunk_frames: u32,
        #[serde(default)]
        input: AudioInput,
    },
}

impl WorkerSpec {
    pub fn role(&self) -> WorkerRole {
        match self {
            Self::Capture { .. } => WorkerRole::Capture,
            Self::Encode { .. } => WorkerRole::Encode,
            Self::Audio { .. } => WorkerRole::Audio,
        }
    }

    /// Encode as the single command-line argument of a worker process.
    pub fn to_arg(&self) -> CapturerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_arg(arg: &str) -> CapturerResult<Self> {
        serde_json::from_str(arg)
            .map_err(|e| CapturerError::config(format!("Invalid worker spec: {e}")))
    }
}

/// Exit code for an error raised inside a worker of the given role.
pub fn exit_code_for(role: WorkerRole, err: &CapturerError) -> i32 {
    match (role, err) {
        (_, CapturerError::Capture { .. }) => exit_code::CAPTURE_FAILED,
        (_, CapturerError::Encode { .. }) => exit_code::ENCODE_FAILED,
        (_, CapturerError::Audio { .. }) => exit_code::AUDIO_FAILED,
        (WorkerRole::Capture, _) => exit_code::CAPTURE_FAILED,
        (WorkerRole::Encode, _) => exit_code::ENCODE_FAILED,
        (WorkerRole::Audio, _) => exit_code::AUDIO_FAILED,
    }
}

/// Writes events to the orchestrator, ignoring a closed pipe.
struct EventWriter<W: Write> {
    out: W,
}

impl<W: Write> EventWriter<W> {
    fn emit(&mut self, event: WorkerEvent) {
        let sent = write_message(&mut self.out, &Message::Event(event)).and_then(|()| {
            self.out.flush()?;
            Ok(())
        });
        if let Err(e) = sent {
            debug!(error = %e, "Failed to send worker event");
        }
    }
}

/// Run the worker described by `spec` on this process's stdio and return
/// its exit code.
pub fn run_worker(spec: WorkerSpec) -> i32 {
    ignore_terminal_interrupt();
    let role = spec.role();
    info!(role = role.as_str(), pid = std::process::id(), "Worker starting");

    let code = match spec {
        WorkerSpec::Capture { region, source } => run_capture_worker(region, source),
        WorkerSpec::Encode {
            width,
            height,
            fps,
            output,
            intermediate,
        } => run_encode_worker(width, height, fps, output, intermediate),
        WorkerSpec::Audio {
            output,
            sample_rate,
            channels,
            chunk_frames,
            input,
        } => run_audio_worker(
            output,
            AudioFormat {
                sample_rate,
                channels,
            },
            chunk_frames,
            input,
        ),
    };

    info!(
        role = role.as_str(),
        code,
        status = exit_code::describe(code),
        "Worker exiting"
    );
    code
}

/// Ctrl+C in the terminal reaches the whole process group. Workers stop
/// when the orchestrator tells them to, so they must survive it.
fn ignore_terminal_interrupt() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

/// Set the returned flag once stdin carries `Stop` or reaches end of stream.
pub fn spawn_stop_watcher() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let spawned = std::thread::Builder::new()
        .name("stop-watcher".into())
        .spawn(move || {
            let mut stdin = BufReader::new(std::io::stdin().lock());
            loop {
                match read_message(&mut stdin) {
                    Ok(Some(Message::Control(ControlMessage::Stop))) => {
                        debug!("Stop received");
                        break;
                    }
                    Ok(Some(other)) => debug!(?other, "Ignoring unexpected message"),
                    Ok(None) => {
                        debug!("Control pipe closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Control pipe failed");
                        break;
                    }
                }
            }
            flag.store(true, Ordering::SeqCst);
        });
    if let Err(e) = spawned {
        error!(error = %e, "Failed to start stop watcher; stopping immediately");
        stop.store(true, Ordering::SeqCst);
    }
    stop
}

fn run_capture_worker(region: CaptureRegion, source: SamplerSource) -> i32 {
    let mut out = BufWriter::with_capacity(1 << 20, std::io::stdout().lock());

    let probe = build_sampler(source).and_then(|mut sampler| {
        sampler.sample(&region)?;
        Ok(sampler)
    });
    let mut sampler = match probe {
        Ok(sampler) => sampler,
        Err(e) => {
            error!(error = %e, %region, "Capture probe failed");
            EventWriter { out: &mut out }.emit(WorkerEvent::Failed {
                message: e.to_string(),
            });
            return exit_code::CAPTURE_FAILED;
        }
    };

    EventWriter { out: &mut out }.emit(WorkerEvent::Ready {
        role: WorkerRole::Capture,
        detail: sampler.name().to_string(),
    });

    let stop = spawn_stop_watcher();
    match run_capture_loop(sampler.as_mut(), &region, &stop, &mut out) {
        Ok(_) => exit_code::OK,
        Err(e) => {
            error!(error = %e, "Capture producer failed");
            EventWriter { out: &mut out }.emit(WorkerEvent::Failed {
                message: e.to_string(),
            });
            exit_code_for(WorkerRole::Capture, &e)
        }
    }
}

fn open_sink(
    width: u32,
    height: u32,
    fps: u32,
    output: &std::path::Path,
    intermediate: IntermediateFormat,
) -> CapturerResult<Box<dyn FrameSink>> {
    Ok(match intermediate {
        IntermediateFormat::Matroska => Box::new(GstFrameSink::create(output, width, height, fps)?),
        IntermediateFormat::Y4m => Box::new(Y4mFrameSink::create(output, width, height, fps)?),
    })
}

fn run_encode_worker(
    width: u32,
    height: u32,
    fps: u32,
    output: PathBuf,
    intermediate: IntermediateFormat,
) -> i32 {
    let mut events = EventWriter {
        out: BufWriter::new(std::io::stdout().lock()),
    };

    let mut sink = match open_sink(width, height, fps, &output, intermediate) {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, output = %output.display(), "Failed to open video file");
            events.emit(WorkerEvent::Failed {
                message: e.to_string(),
            });
            return exit_code::ENCODE_FAILED;
        }
    };
    events.emit(WorkerEvent::Ready {
        role: WorkerRole::Encode,
        detail: sink.name().to_string(),
    });

    let stdin = BufReader::with_capacity(1 << 20, std::io::stdin().lock());
    let result = run_encode_loop(ipc::frames(stdin), sink.as_mut(), width, height, |total| {
        events.emit(WorkerEvent::FramesWritten { total })
    });

    match result {
        Ok(stats) => {
            events.emit(WorkerEvent::Finished {
                frames: stats.written,
            });
            exit_code::OK
        }
        Err(e) => {
            error!(error = %e, "Encode consumer failed");
            events.emit(WorkerEvent::Failed {
                message: e.to_string(),
            });
            exit_code_for(WorkerRole::Encode, &e)
        }
    }
}

fn run_audio_worker(
    output: PathBuf,
    requested: AudioFormat,
    chunk_frames: u32,
    input: AudioInput,
) -> i32 {
    let mut events = EventWriter {
        out: BufWriter::new(std::io::stdout().lock()),
    };

    let mut source = match open_audio_source(input, requested) {
        Ok(Some(source)) => source,
        Ok(None) => {
            warn!("No audio input device found; recording video only");
            events.emit(WorkerEvent::NoAudioDevice);
            return exit_code::OK;
        }
        Err(e) => {
            error!(error = %e, "Failed to open audio input");
            events.emit(WorkerEvent::Failed {
                message: e.to_string(),
            });
            return exit_code_for(WorkerRole::Audio, &e);
        }
    };
    events.emit(WorkerEvent::Ready {
        role: WorkerRole::Audio,
        detail: source.name().to_string(),
    });

    let stop = spawn_stop_watcher();
    let format = source.format();
    let saved = run_audio_loop(source.as_mut(), &stop, chunk_frames)
        .and_then(|acc| write_wav(&output, format, &acc));

    match saved {
        Ok(seconds) => {
            info!(path = %output.display(), seconds, "Audio saved");
            events.emit(WorkerEvent::AudioSaved {
                path: output,
                seconds,
            });
            exit_code::OK
        }
        Err(e) => {
            error!(error = %e, "Audio capture failed");
            events.emit(WorkerEvent::Failed {
                message: e.to_string(),
            });
            exit_code_for(WorkerRole::Audio, &e)
        }
    }
}
