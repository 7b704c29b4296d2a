//! Browser refresh wire protocol.
//!
//! Server → client messages over the WebSocket channel:
//! - literal text `"Reload"`: full page reload
//! - literal text `"Wait"`: show a building/reconnecting state
//! - JSON with a `type` discriminator for richer events
//!
//! Client → server messages are JSON diagnostics pushed by the page script
//! (e.g. a runtime error report), consumed via `RefreshBroker::receive`.

use serde::{Deserialize, Serialize};

/// Literal reload signal.
pub const RELOAD_SIGNAL: &str = "Reload";

/// Literal wait/building signal.
pub const WAIT_SIGNAL: &str = "Wait";

/// Structured server → client event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RefreshMessage {
    /// A code delta was applied in place; no reload needed.
    Applied {
        /// Source paths covered by the delta
        paths: Vec<String>,
    },
}

impl RefreshMessage {
    pub fn applied(paths: Vec<String>) -> Self {
        Self::Applied { paths }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"applied"}"#.to_string())
    }
}

/// Structured client → server payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientReport {
    /// Runtime error reported by the page
    Diagnostic {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl ClientReport {
    /// Parse from JSON string
    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applied_serialization() {
        let msg = RefreshMessage::applied(vec!["src/main.rs".into()]);
        let json = msg.to_json();
        assert!(json.contains(r#""type":"applied""#));
        assert!(json.contains(r#""paths":["src/main.rs"]"#));
    }

    #[test]
    fn test_diagnostic_parse() {
        let report = ClientReport::from_json(
            r#"{"type":"diagnostic","message":"boom","stack":"at main.js:1"}"#,
        )
        .unwrap();
        match report {
            ClientReport::Diagnostic { message, stack } => {
                assert_eq!(message, "boom");
                assert_eq!(stack.as_deref(), Some("at main.js:1"));
            }
        }
    }

    #[test]
    fn test_diagnostic_parse_garbage() {
        assert!(ClientReport::from_json("not json").is_none());
        assert!(ClientReport::from_json(r#"{"type":"unknown"}"#).is_none());
    }
}
