//! `[run]` section configuration.
//!
//! Describes the child command and how it is restarted.
//!
//! # Example
//!
//! ```toml
//! [run]
//! command = ["cargo", "run"]      # build step included
//! grace_ms = 5000                 # graceful shutdown window
//! hot_reload = false
//! hot_apply = ["my-patcher"]      # external delta-apply command
//! env = { RUST_LOG = "debug" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Child process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Child command line; first element is the executable.
    /// May be overridden by trailing CLI arguments.
    pub command: Vec<String>,

    /// Working directory for the child (default: project root).
    pub working_dir: Option<PathBuf>,

    /// Graceful shutdown window in milliseconds before force kill.
    pub grace_ms: u64,

    /// Attempt in-place code delta apply instead of restarting.
    pub hot_reload: bool,

    /// External delta-apply command; changed paths are appended as arguments.
    pub hot_apply: Vec<String>,

    /// Extra environment variables for the child.
    pub env: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            grace_ms: 5000,
            hot_reload: false,
            hot_apply: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Expand tilde and absolutize working_dir against the project root.
    pub(super) fn normalize(&mut self, root: &Path) {
        if let Some(dir) = &self.working_dir {
            let expanded = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
            let expanded = PathBuf::from(expanded);
            self.working_dir = Some(if expanded.is_absolute() {
                expanded
            } else {
                root.join(expanded)
            });
        }
    }

    /// Effective working directory for launches.
    pub fn working_dir_or<'a>(&'a self, root: &'a Path) -> &'a Path {
        self.working_dir.as_deref().unwrap_or(root)
    }
}
