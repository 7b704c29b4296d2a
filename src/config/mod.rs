//! Tool configuration management for `devloop.toml`.
//!
//! The manifest doubles as the project marker: discovery walks up from the
//! working directory until it finds one (see `crate::project`).
//!
//! # Sections
//!
//! | Section     | Purpose                                            |
//! |-------------|----------------------------------------------------|
//! | `[run]`     | Child command, graceful window, hot reload         |
//! | `[watch]`   | Watch roots, debounce, polling strategy            |
//! | `[refresh]` | Browser refresh endpoint                           |

mod refresh;
mod run;
mod watch;

pub use refresh::RefreshConfig;
pub use run::RunConfig;
pub use watch::WatchConfig;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Root configuration structure representing devloop.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    pub run: RunConfig,
    pub watch: WatchConfig,
    pub refresh: RefreshConfig,
}

impl ToolConfig {
    /// Load configuration from a manifest path, warning on unknown fields.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;

        let (mut config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            print_unknown_fields_warning(&ignored, path);
        }

        config.config_path = path.to_path_buf();
        config.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.normalize();
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    /// Expand tildes and make configured paths absolute against the root.
    fn normalize(&mut self) {
        let root = self.root.clone();
        self.watch.normalize(&root);
        self.run.normalize(&root);
    }
}

/// Print warning about unknown fields.
fn print_unknown_fields_warning(fields: &[String], path: &Path) {
    let display_path = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| path.to_string_lossy());
    crate::warn!("config"; "unknown fields in {}, ignoring:", display_path);
    for field in fields {
        eprintln!("- {field}");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) fn test_parse_config(content: &str) -> ToolConfig {
    let mut config = ToolConfig::from_str(content).expect("config should parse");
    config.root = PathBuf::from("/project");
    config.normalize();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_defaults() {
        let config = test_parse_config("");
        assert!(config.run.command.is_empty());
        assert!(config.refresh.enabled);
        assert!(!config.watch.poll);
    }

    #[test]
    fn test_unknown_fields_collected() {
        let (_, ignored) =
            ToolConfig::parse_with_ignored("[run]\ncommand = [\"make\"]\ntypo_field = 1")
                .expect("should parse");
        assert_eq!(ignored, vec!["run.typo_field".to_string()]);
    }

    #[test]
    fn test_full_round_trip() {
        let config = test_parse_config(
            r#"
            [run]
            command = ["cargo", "run"]
            grace_ms = 2000
            hot_reload = true

            [watch]
            paths = ["src", "assets"]
            debounce_ms = 150

            [refresh]
            hostname = "devbox.local"
            "#,
        );

        assert_eq!(config.run.command, vec!["cargo", "run"]);
        assert_eq!(config.run.grace_ms, 2000);
        assert!(config.run.hot_reload);
        assert_eq!(config.watch.debounce_ms, 150);
        assert_eq!(config.refresh.hostname, "devbox.local");
        // paths are absolutized against the root
        assert_eq!(config.watch.paths[0], PathBuf::from("/project/src"));
    }
}
