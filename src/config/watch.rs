//! `[watch]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [watch]
//! paths = ["src", "assets"]   # roots relative to project root
//! debounce_ms = 300
//! poll = false                # stat-based polling instead of OS notifications
//! poll_interval_ms = 500
//! ```
//!
//! Set `poll = true` (or `DEVLOOP_POLLER=1`) on network shares, container
//! mounts, and other filesystems where change notifications are unreliable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File watching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Watch roots, relative to the project root. Empty means the whole
    /// project directory.
    pub paths: Vec<PathBuf>,

    /// Debounce window in milliseconds; same-path bursts collapse to one event.
    pub debounce_ms: u64,

    /// Use stat-based polling instead of OS notifications.
    pub poll: bool,

    /// Polling interval in milliseconds (polling strategy only).
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce_ms: 300,
            poll: false,
            poll_interval_ms: 500,
        }
    }
}

impl WatchConfig {
    /// Expand tildes and absolutize watch roots against the project root.
    pub(super) fn normalize(&mut self, root: &Path) {
        for path in &mut self.paths {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            let expanded = PathBuf::from(expanded);
            *path = if expanded.is_absolute() {
                expanded
            } else {
                root.join(expanded)
            };
        }
    }

    /// Effective watch roots: configured paths, or the project root itself.
    pub fn roots(&self, root: &Path) -> Vec<PathBuf> {
        if self.paths.is_empty() {
            vec![root.to_path_buf()]
        } else {
            self.paths.clone()
        }
    }

    /// Polling requested by config or by the environment
    /// (`DEVLOOP_POLLER=1` or `true`).
    pub fn polling_enabled(&self) -> bool {
        if self.poll {
            return true;
        }
        matches!(
            std::env::var("DEVLOOP_POLLER").as_deref(),
            Ok("1") | Ok("true")
        )
    }
}
