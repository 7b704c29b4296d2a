//! Child process supervision.
//!
//! Owns spawn, graceful stop, force kill, and exit wait for at most one
//! child instance per session. The child command runs its own build step;
//! the supervisor only reacts to the outcome.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Environment variable set to `1` on every launched child.
pub const ENV_MARKER: &str = "DEVLOOP";

/// Environment variable carrying the iteration counter (starts at 1,
/// incremented on every restart).
pub const ENV_ITERATION: &str = "DEVLOOP_ITERATION";

/// Environment variable carrying the refresh endpoint address, so the
/// child's own client-side script can connect back.
pub const ENV_REFRESH_URL: &str = "DEVLOOP_REFRESH_URL";

/// What to launch. Immutable within a watch iteration.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    /// Build a spec from a command line, resolving the executable on PATH.
    pub fn from_command(
        command: &[String],
        working_dir: &Path,
        env: BTreeMap<String, String>,
    ) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("child command is empty; set [run].command or pass one after --")?;

        let executable = which::which(program)
            .with_context(|| format!("executable `{program}` not found on PATH"))?;

        Ok(Self {
            executable,
            working_dir: working_dir.to_path_buf(),
            args: args.to_vec(),
            env,
        })
    }
}

/// How a supervised wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Process exited on its own; `None` means killed by a signal.
    Exited(Option<i32>),
    /// The session token fired; the process was killed before returning.
    Cancelled,
}

/// Supervises the single live child of a watch session.
///
/// Invariant: at most one live child at a time; `launch` while a child is
/// running is a caller bug (the loop always stops before relaunching).
#[derive(Default)]
pub struct ProcessSupervisor {
    current: Option<Child>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_child(&self) -> bool {
        self.current.is_some()
    }

    /// Spawn the child described by `spec`, injecting the iteration counter
    /// and (when the broker runs) the refresh endpoint into its environment.
    pub fn launch(
        &mut self,
        spec: &ProcessSpec,
        iteration: u32,
        refresh_endpoint: Option<&str>,
    ) -> Result<()> {
        debug_assert!(self.current.is_none(), "previous child still live");

        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .env(ENV_MARKER, "1")
            .env(ENV_ITERATION, iteration.to_string())
            .kill_on_drop(true);

        if let Some(endpoint) = refresh_endpoint {
            command.env(ENV_REFRESH_URL, endpoint);
        }

        let child = command.spawn().with_context(|| {
            format!("failed to launch `{}`", spec.executable.display())
        })?;

        crate::log!("run"; "started {} (pid {}, iteration {})",
            spec.executable.display(),
            child.id().map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
            iteration);

        self.current = Some(child);
        Ok(())
    }

    /// Suspend until the child exits or `cancel` fires. On cancellation the
    /// child is killed and `Cancelled` is returned instead of an exit code.
    ///
    /// Callers must only select this arm while a child is live.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<ExitOutcome> {
        let child = self.current.as_mut().context("no child process to wait on")?;

        tokio::select! {
            status = child.wait() => {
                let status = status.context("waiting for child process")?;
                self.current = None;
                Ok(ExitOutcome::Exited(status.code()))
            }
            _ = cancel.cancelled() => {
                child.start_kill().ok();
                child.wait().await.context("waiting for killed child")?;
                self.current = None;
                Ok(ExitOutcome::Cancelled)
            }
        }
    }

    /// Ask the child to stop: interrupt first, wait out the grace window,
    /// then force kill. No-op when no child is live.
    pub async fn shutdown_graceful(&mut self, grace: Duration) {
        let Some(mut child) = self.current.take() else {
            return;
        };

        interrupt(&mut child);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                crate::debug!("run"; "child stopped ({status})");
            }
            Ok(Err(e)) => {
                crate::warn!("run"; "wait after interrupt failed: {}", e);
            }
            Err(_) => {
                crate::warn!("run"; "child ignored interrupt for {} ms, killing", grace.as_millis());
                child.start_kill().ok();
                let _ = child.wait().await;
            }
        }
    }
}

/// Deliver the platform interrupt: SIGINT on unix, hard kill elsewhere.
fn interrupt(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
        return;
    }

    #[cfg(not(unix))]
    {
        // No interrupt equivalent; TerminateProcess via the handle
        let _ = child.start_kill();
    }
}
