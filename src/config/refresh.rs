//! `[refresh]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [refresh]
//! enabled = true
//! hostname = "localhost"    # advertised host, DEVLOOP_WS_HOSTNAME overrides
//! ```

use serde::{Deserialize, Serialize};

/// Browser refresh endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Run the refresh endpoint at all.
    pub enabled: bool,

    /// Hostname advertised in the endpoint address. The listener always
    /// binds loopback; this only affects the URL handed to the child.
    pub hostname: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hostname: "localhost".to_string(),
        }
    }
}

impl RefreshConfig {
    /// Effective hostname: environment override wins over config.
    pub fn effective_hostname(&self) -> String {
        std::env::var("DEVLOOP_WS_HOSTNAME").unwrap_or_else(|_| self.hostname.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_refresh_defaults() {
        let config = test_parse_config("");
        assert!(config.refresh.enabled);
        assert_eq!(config.refresh.hostname, "localhost");
    }

    #[test]
    fn test_refresh_disabled() {
        let config = test_parse_config("[refresh]\nenabled = false");
        assert!(!config.refresh.enabled);
    }
}
