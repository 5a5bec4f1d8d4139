//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP server communication and the adapter facade.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        source: std::io::Error,
    },

    #[error("Handshake with '{server}' failed after {attempts} attempts: {last}")]
    HandshakeFailure {
        server: String,
        attempts: usize,
        last: String,
    },

    #[error("Tool discovery on '{server}' found nothing after {attempts} attempts")]
    DiscoveryFailure { server: String, attempts: usize },

    #[error("Unknown tool {name}")]
    UnknownTool { name: String },

    #[error("Server {server} not ready")]
    ServerNotReady { server: String },

    #[error("Tool '{tool}' on '{server}' timed out after {timeout_ms}ms")]
    CallTimeout {
        server: String,
        tool: String,
        timeout_ms: u64,
    },

    #[error("Tool '{tool}' on '{server}' failed: {message}")]
    CallError {
        server: String,
        tool: String,
        message: String,
        /// The raw error payload as sent by the server, when there was one.
        payload: Option<serde_json::Value>,
    },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Request '{method}' to '{server}' timed out after {timeout_ms}ms")]
    RequestTimeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("Connection to '{server}' closed")]
    ConnectionClosed { server: String },

    #[error("Event loop did not answer within {timeout_ms}ms")]
    BridgeTimeout { timeout_ms: u64 },

    #[error("Event loop is not running")]
    BridgeStopped,

    #[error("Adapter already shut down")]
    AdapterClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Render as the `{"error": ...}` value handed to the calling LLM layer.
    ///
    /// Call errors keep the server's raw payload when it was not a plain string.
    pub fn to_error_value(&self) -> serde_json::Value {
        match self {
            McpError::CallError {
                payload: Some(payload),
                ..
            } if !payload.is_string() => serde_json::json!({ "error": payload }),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}
