//! Per-session mutable state.

use std::time::Duration;

use anyhow::Result;

use crate::config::ToolConfig;
use crate::process::ProcessSpec;
use crate::project::Project;

/// The mutable per-session aggregate, owned by the watch loop for the
/// session's lifetime. Other components receive read-only views or explicit
/// operation calls, never the aggregate itself.
pub struct WatchContext {
    pub project: Project,
    /// Immutable within an iteration; the iteration counter is injected
    /// into the environment at each launch.
    pub spec: ProcessSpec,
    /// Starts at 1, incremented on every restart.
    pub iteration: u32,
    pub hot_reload: bool,
    /// Graceful shutdown window before force kill.
    pub grace: Duration,
}

impl WatchContext {
    /// Assemble the session context. The child command comes from trailing
    /// CLI arguments when given, the `[run]` section otherwise.
    pub fn new(
        project: Project,
        config: &ToolConfig,
        cli_command: &[String],
        hot_flag: Option<bool>,
        grace_override: Option<u64>,
    ) -> Result<Self> {
        let command: &[String] = if cli_command.is_empty() {
            &config.run.command
        } else {
            cli_command
        };

        let spec = ProcessSpec::from_command(
            command,
            config.run.working_dir_or(&project.root),
            config.run.env.clone(),
        )?;

        Ok(Self {
            project,
            spec,
            iteration: 1,
            hot_reload: hot_flag.unwrap_or(config.run.hot_reload),
            grace: Duration::from_millis(grace_override.unwrap_or(config.run.grace_ms)),
        })
    }
}
