//! JSON-RPC 2.0 message shapes used on the stdio wire.

use serde::{Deserialize, Serialize};

/// A JSON-RPC 2.0 request.
///
/// `params` is always present on the wire; "no parameters" is sent as `null`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub id: u64,
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            id,
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
///
/// Servers disagree on the shape of `error`, so it is kept as a raw value and
/// read through [`JsonRpcResponse::rpc_error`].
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 error object, read leniently.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: Option<i64>,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Numeric request id this response answers, if any.
    ///
    /// Numeric strings are accepted too; some servers echo ids back as text.
    pub fn request_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The error carried by this response, if the error field is set.
    pub fn rpc_error(&self) -> Option<JsonRpcError> {
        let raw = self.error.as_ref()?;
        let err = match raw {
            serde_json::Value::Object(map) => JsonRpcError {
                code: map.get("code").and_then(serde_json::Value::as_i64),
                message: map
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.to_string()),
                data: map.get("data").cloned(),
            },
            serde_json::Value::String(s) => JsonRpcError {
                code: None,
                message: s.clone(),
                data: None,
            },
            other => JsonRpcError {
                code: None,
                message: other.to_string(),
                data: None,
            },
        };
        Some(err)
    }
}

/// Classification of one decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A reply to one of our requests.
    Response(JsonRpcResponse),
    /// A request or notification initiated by the server.
    ServerMessage { method: String },
    /// Valid JSON that is neither of the above.
    Unrecognized(serde_json::Value),
}

impl Inbound {
    /// Classify a decoded JSON value.
    pub fn classify(value: serde_json::Value) -> Self {
        if let Some(method) = value.get("method").and_then(serde_json::Value::as_str) {
            return Inbound::ServerMessage {
                method: method.to_string(),
            };
        }
        let looks_like_reply = value.get("id").is_some()
            && (value.get("result").is_some() || value.get("error").is_some());
        if looks_like_reply {
            match serde_json::from_value::<JsonRpcResponse>(value.clone()) {
                Ok(resp) => return Inbound::Response(resp),
                Err(_) => return Inbound::Unrecognized(value),
            }
        }
        Inbound::Unrecognized(value)
    }
}
