use std::fmt;

use serde::{Deserialize, Serialize};

/// One parsed tool request extracted from model output text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToolInvocation {
    pub(crate) name: String,
    /// Attributes in document order. Duplicate keys keep all occurrences;
    /// `attr` returns the first.
    pub(crate) attributes: Vec<(String, String)>,
    /// Present only for the block tag form (edit payloads).
    pub(crate) body: Option<String>,
}

impl ToolInvocation {
    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Interaction style for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DispatchMode {
    Plain,
    Native,
    Relay,
}

impl DispatchMode {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plain" => Some(DispatchMode::Plain),
            "native" => Some(DispatchMode::Native),
            "relay" => Some(DispatchMode::Relay),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Plain => "plain",
            DispatchMode::Native => "native",
            DispatchMode::Relay => "relay",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the mode resolver. Decided once, before any network traffic.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModeDecision {
    pub(crate) requested: DispatchMode,
    pub(crate) effective: DispatchMode,
    pub(crate) was_fallback: bool,
    pub(crate) note: Option<String>,
}

/// Final result of one relay session.
#[derive(Debug, Serialize)]
pub(crate) struct RelayReport {
    pub(crate) final_text: String,
    pub(crate) turns: usize,
    pub(crate) tool_calls: usize,
}

/// Final result of one dispatch (any mode), rendered by the CLI.
#[derive(Debug, Serialize)]
pub(crate) struct DispatchReport {
    pub(crate) target: String,
    pub(crate) final_text: String,
    pub(crate) effective_mode: DispatchMode,
    pub(crate) fallback_note: Option<String>,
    pub(crate) turns: usize,
    pub(crate) tool_calls: usize,
}

/// One model target declared in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TargetConfig {
    pub(crate) name: String,
    pub(crate) model: String,
    #[serde(default)]
    pub(crate) base_url: Option<String>,
    #[serde(default)]
    pub(crate) api_key_env: Option<String>,
    #[serde(default)]
    pub(crate) supports_native_tools: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KnowledgeConfig {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RelayLogEntry {
    #[serde(default)]
    pub(crate) session: Option<String>,
    pub(crate) role: String,
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) meta: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) ts_utc: Option<i64>,
}

/// Transport-level failure for one round-trip. Timeouts are distinguished so
/// callers can decide whether a bigger budget is worth a retry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportError {
    Timeout { timeout_ms: u64 },
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout { timeout_ms } => {
                write!(f, "transport timed out after {timeout_ms}ms")
            }
            TransportError::Other(msg) => write!(f, "transport error: {msg}"),
        }
    }
}
