//! Worker process handles and the registry of live workers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use capturer_common::error::{CapturerError, CapturerResult};

use crate::ipc::WorkerRole;
use crate::worker::WorkerSpec;

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Every worker process that is currently alive.
///
/// Entries are added at spawn and removed once the process has been reaped.
/// Anything left when the orchestrator fails is force-killed by
/// [`ProcessRegistry::terminate_all`].
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<BTreeMap<u32, WorkerRole>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: u32, role: WorkerRole) {
        debug!(pid, role = role.as_str(), "Registered worker");
        self.entries.lock().insert(pid, role);
    }

    /// Returns whether the pid was registered.
    pub fn unregister(&self, pid: u32) -> bool {
        self.entries.lock().remove(&pid).is_some()
    }

    /// Snapshot of registered workers, ordered by pid.
    pub fn live(&self) -> Vec<(u32, WorkerRole)> {
        self.entries
            .lock()
            .iter()
            .map(|(pid, role)| (*pid, *role))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Force-kill every registered worker and clear the registry.
    ///
    /// Returns how many processes were signalled.
    pub fn terminate_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.entries.lock());
        Self::kill_entries(drained)
    }

    fn kill_entries(entries: BTreeMap<u32, WorkerRole>) -> usize {
        let mut killed = 0;
        for (pid, role) in entries {
            match force_kill(pid) {
                Ok(()) => {
                    warn!(pid, role = role.as_str(), "Force-killed worker");
                    killed += 1;
                }
                Err(e) => debug!(pid, error = %e, "Worker already gone"),
            }
        }
        killed
    }

    /// Kill all registered workers when any thread panics.
    ///
    /// The hook holds a weak reference, so it does nothing once the registry
    /// is dropped. The previously installed hook still runs.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(registry) = registry.upgrade() {
                // The panicking thread may hold the lock.
                if let Some(mut entries) = registry.entries.try_lock_for(Duration::from_millis(100))
                {
                    let drained = std::mem::take(&mut *entries);
                    drop(entries);
                    Self::kill_entries(drained);
                }
            }
            previous(info);
        }));
    }
}

/// Kill a process and, on Windows, its children.
pub fn force_kill(pid: u32) -> CapturerResult<()> {
    #[cfg(unix)]
    {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| CapturerError::worker(format!("Invalid pid {pid}")))?;
        let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
    #[cfg(windows)]
    {
        let status = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(CapturerError::worker(format!("taskkill failed for {pid}")));
        }
        Ok(())
    }
    #[cfg(not(any(unix, windows)))]
    {
        Err(CapturerError::unsupported(format!(
            "Cannot terminate process {pid} on this platform"
        )))
    }
}

/// Ask a process to terminate. Falls back to a forced kill where the
/// platform has no polite signal.
pub fn request_terminate(pid: u32) -> CapturerResult<()> {
    #[cfg(unix)]
    {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| CapturerError::worker(format!("Invalid pid {pid}")))?;
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        force_kill(pid)
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerExit {
    /// Exit code, absent when the process died from a signal.
    pub code: Option<i32>,
    /// The supervisor had to terminate the process.
    pub forced: bool,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.forced
    }

    fn from_status(status: ExitStatus, forced: bool) -> Self {
        Self {
            code: status.code(),
            forced,
        }
    }
}

/// Command used to launch workers: `<program> [args..] worker --spec <json>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-run the current executable.
    pub fn current_exe() -> CapturerResult<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

/// A spawned worker with piped stdin/stdout and inherited stderr.
pub struct WorkerProcess {
    role: WorkerRole,
    child: Child,
    registry: Arc<ProcessRegistry>,
    exit: Option<WorkerExit>,
}

impl WorkerProcess {
    pub fn spawn(
        command: &WorkerCommand,
        spec: &WorkerSpec,
        registry: &Arc<ProcessRegistry>,
    ) -> CapturerResult<Self> {
        let role = spec.role();
        let child = Command::new(&command.program)
            .args(&command.args)
            .arg("worker")
            .arg("--spec")
            .arg(spec.to_arg()?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                CapturerError::worker(format!(
                    "Failed to spawn {} worker from {}: {e}",
                    role.as_str(),
                    command.program.display()
                ))
            })?;

        registry.register(child.id(), role);
        info!(pid = child.id(), role = role.as_str(), "Spawned worker");
        Ok(Self {
            role,
            child,
            registry: Arc::clone(registry),
            exit: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Whether the process has exited, without blocking.
    pub fn has_exited(&mut self) -> CapturerResult<bool> {
        if self.exit.is_some() {
            return Ok(true);
        }
        Ok(self.poll()?.is_some())
    }

    fn poll(&mut self) -> CapturerResult<Option<WorkerExit>> {
        if let Some(status) = self.child.try_wait()? {
            self.reaped(status, false);
        }
        Ok(self.exit)
    }

    fn reaped(&mut self, status: ExitStatus, forced: bool) {
        let exit = WorkerExit::from_status(status, forced);
        self.exit = Some(exit);
        self.registry.unregister(self.child.id());
        debug!(
            pid = self.child.id(),
            role = self.role.as_str(),
            code = ?exit.code,
            forced,
            "Worker reaped"
        );
    }

    /// Wait up to `timeout` for the process to exit on its own.
    pub fn wait_timeout(&mut self, timeout: Duration) -> CapturerResult<Option<WorkerExit>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit) = self.poll()? {
                return Ok(Some(exit));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    /// Wait for a clean exit; past `timeout`, ask the process to terminate,
    /// then kill it after `grace`.
    pub fn wait_or_terminate(
        &mut self,
        timeout: Duration,
        grace: Duration,
    ) -> CapturerResult<WorkerExit> {
        if let Some(exit) = self.wait_timeout(timeout)? {
            return Ok(exit);
        }

        warn!(
            pid = self.pid(),
            role = self.role.as_str(),
            timeout_ms = timeout.as_millis() as u64,
            "Worker did not exit in time; terminating"
        );
        if let Err(e) = request_terminate(self.pid()) {
            debug!(error = %e, "Terminate request failed");
        }
        if let Some(exit) = self.wait_timeout(grace)? {
            // Exited during the grace period, but only because we asked.
            let exit = WorkerExit {
                forced: true,
                ..exit
            };
            self.exit = Some(exit);
            return Ok(exit);
        }

        if let Err(e) = self.child.kill() {
            error!(pid = self.pid(), error = %e, "Failed to kill worker");
        }
        let status = self.child.wait()?;
        self.reaped(status, true);
        Ok(WorkerExit::from_status(status, true))
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            if let Ok(Some(_)) = self.child.try_wait() {
                self.registry.unregister(self.child.id());
                return;
            }
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.registry.unregister(self.child.id());
        }
    }
}
