//! Hidden entry point of the worker processes.

use capturer_capture_engine::{run_worker, WorkerSpec};

pub fn run(spec: &str) -> anyhow::Result<()> {
    let spec = WorkerSpec::from_arg(spec)?;
    std::process::exit(run_worker(spec));
}
