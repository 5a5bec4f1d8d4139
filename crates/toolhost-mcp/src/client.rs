//! Protocol client: request/response exchange with one MCP server.
//!
//! Assigns request ids, correlates replies from the inbound queue, and runs
//! the `initialize` and `tools/list` negotiation sequences followed by
//! `tools/call` dispatch.

use crate::error::McpError;
use crate::jsonrpc::{Inbound, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::normalize::{is_error_result, normalize_call_result};
use crate::process::{InboundQueue, ServerProcess};
use crate::registry::ToolMeta;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on `nextCursor` pages followed during discovery.
const MAX_TOOL_PAGES: usize = 32;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Client for a single MCP server.
pub struct ProtocolClient {
    server: String,
    process: ServerProcess,
    next_id: AtomicU64,
    pending: Pending,
    closed: CancellationToken,
    dispatcher: JoinHandle<()>,
    request_timeout: Duration,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<serde_json::Value>,
    #[serde(default, rename = "inputSchema")]
    input_schema: Option<serde_json::Value>,
    #[serde(default)]
    schema: Option<serde_json::Value>,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ProtocolClient {
    /// Wrap a spawned process and start correlating its replies.
    ///
    /// `request_timeout` bounds each negotiation attempt. Must be called from
    /// within a tokio runtime.
    pub fn new(process: ServerProcess, inbound: InboundQueue, request_timeout: Duration) -> Self {
        let server = process.name().to_string();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch(
            server.clone(),
            inbound,
            Arc::clone(&pending),
            closed.clone(),
        ));

        Self {
            server,
            process,
            next_id: AtomicU64::new(1),
            pending,
            closed,
            dispatcher,
            request_timeout,
        }
    }

    /// Get the server name.
    pub fn server_name(&self) -> &str {
        &self.server
    }

    /// Whether the server's output stream has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the server's output stream has ended.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Send a request and wait up to `timeout` for the correlated reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.is_cancelled() {
                return Err(self.connection_closed());
            }
            pending.insert(id, tx);
        }

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.process.send(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(self.connection_closed()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::RequestTimeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout_ms: millis(timeout),
                })
            }
        }
    }

    /// Send a notification (fire-and-forget, no id, no reply).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.process
            .send(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Run the `initialize` handshake, trying each variant in order.
    ///
    /// The first reply without an error field is accepted and followed by a
    /// single `notifications/initialized`. Returns the server's result.
    pub async fn initialize(
        &self,
        variants: &[serde_json::Value],
    ) -> Result<serde_json::Value, McpError> {
        let mut last = String::from("no variants configured");

        for (attempt, params) in variants.iter().enumerate() {
            let attempt = attempt + 1;
            tracing::debug!("Attempt {attempt} initialize for '{}'", self.server);
            match self
                .request("initialize", Some(params.clone()), self.request_timeout)
                .await
            {
                Ok(resp) => match resp.rpc_error() {
                    None => {
                        tracing::debug!(
                            "Initialize succeeded for '{}' with variant {attempt}",
                            self.server
                        );
                        if let Err(e) = self.notify("notifications/initialized", None).await {
                            tracing::debug!(
                                "Failed to send 'initialized' notification to '{}': {e}",
                                self.server
                            );
                        }
                        return Ok(resp.result.unwrap_or(serde_json::Value::Null));
                    }
                    Some(err) => {
                        tracing::debug!(
                            "Initialize variant {attempt} rejected by '{}': {}",
                            self.server,
                            err.message
                        );
                        last = err.message;
                    }
                },
                Err(e @ McpError::ConnectionClosed { .. }) => {
                    return Err(McpError::HandshakeFailure {
                        server: self.server.clone(),
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::debug!("Initialize variant {attempt} failed: {e}");
                    last = e.to_string();
                }
            }
        }

        Err(McpError::HandshakeFailure {
            server: self.server.clone(),
            attempts: variants.len(),
            last,
        })
    }

    /// Discover tools, trying each `tools/list` variant in order.
    ///
    /// The first variant whose reply holds a non-empty tool array wins; any
    /// `nextCursor` pages are then followed.
    pub async fn list_tools(
        &self,
        variants: &[Option<serde_json::Value>],
    ) -> Result<Vec<ToolMeta>, McpError> {
        for (attempt, params) in variants.iter().enumerate() {
            let attempt = attempt + 1;
            tracing::debug!(
                "Attempt {attempt} tools/list for '{}' params={params:?}",
                self.server
            );
            let resp = match self
                .request("tools/list", params.clone(), self.request_timeout)
                .await
            {
                Ok(resp) => resp,
                Err(e @ McpError::ConnectionClosed { .. }) => {
                    tracing::debug!("tools/list aborted: {e}");
                    break;
                }
                Err(e) => {
                    tracing::debug!("tools/list variant {attempt} failed: {e}");
                    continue;
                }
            };
            if let Some(err) = resp.rpc_error() {
                tracing::debug!("tools/list variant {attempt} rejected: {}", err.message);
                continue;
            }

            let result = resp.result.unwrap_or(serde_json::Value::Null);
            let mut tools = Vec::new();
            parse_tools(&self.server, &result, &mut tools);
            if tools.is_empty() {
                tracing::debug!("tools/list variant {attempt} returned no tools");
                continue;
            }

            self.follow_pages(next_cursor(&result), &mut tools).await;
            tracing::debug!(
                "tools/list succeeded for '{}' with variant {attempt} ({} tools)",
                self.server,
                tools.len()
            );
            return Ok(tools);
        }

        Err(McpError::DiscoveryFailure {
            server: self.server.clone(),
            attempts: variants.len(),
        })
    }

    async fn follow_pages(&self, mut cursor: Option<String>, tools: &mut Vec<ToolMeta>) {
        let mut pages = 1;
        while let Some(next) = cursor.take() {
            if pages >= MAX_TOOL_PAGES {
                tracing::warn!(
                    "Stopping tools/list pagination for '{}' after {pages} pages",
                    self.server
                );
                break;
            }
            let params = serde_json::json!({ "cursor": next });
            match self
                .request("tools/list", Some(params), self.request_timeout)
                .await
            {
                Ok(resp) if resp.rpc_error().is_none() => {
                    let result = resp.result.unwrap_or(serde_json::Value::Null);
                    parse_tools(&self.server, &result, tools);
                    cursor = next_cursor(&result);
                    pages += 1;
                }
                Ok(resp) => {
                    tracing::debug!("tools/list page rejected: {:?}", resp.rpc_error());
                }
                Err(e) => tracing::debug!("tools/list page failed: {e}"),
            }
        }
    }

    /// Call a tool and normalize its result.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });

        let resp = self
            .request("tools/call", Some(params), timeout)
            .await
            .map_err(|e| match e {
                McpError::RequestTimeout { timeout_ms, .. } => McpError::CallTimeout {
                    server: self.server.clone(),
                    tool: tool.to_string(),
                    timeout_ms,
                },
                other => other,
            })?;

        if let Some(err) = resp.rpc_error() {
            return Err(McpError::CallError {
                server: self.server.clone(),
                tool: tool.to_string(),
                message: err.message,
                payload: resp.error,
            });
        }

        let result = resp.result.unwrap_or(serde_json::Value::Null);
        let normalized = normalize_call_result(&result);
        if is_error_result(&result) {
            let message = match &normalized {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            return Err(McpError::CallError {
                server: self.server.clone(),
                tool: tool.to_string(),
                message,
                payload: Some(normalized),
            });
        }
        Ok(normalized)
    }

    /// Stop correlating replies and shut the process down.
    pub async fn shutdown(&self, grace: Duration) {
        self.process.shutdown(grace).await;
        self.dispatcher.abort();
        let mut pending = self.pending.lock().await;
        self.closed.cancel();
        pending.clear();
    }

    fn connection_closed(&self) -> McpError {
        McpError::ConnectionClosed {
            server: self.server.clone(),
        }
    }
}

/// Route replies from the inbound queue to their waiting requests.
///
/// When the queue ends every pending request fails with `ConnectionClosed`.
async fn dispatch(
    server: String,
    mut inbound: InboundQueue,
    pending: Pending,
    closed: CancellationToken,
) {
    while let Some(message) = inbound.recv().await {
        match Inbound::classify(message) {
            Inbound::Response(resp) => {
                let Some(id) = resp.request_id() else {
                    tracing::debug!("Reply from '{server}' without a usable id: {:?}", resp.id);
                    continue;
                };
                let waiter = pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => tracing::debug!("Dropping reply to unknown request {id} from '{server}'"),
                }
            }
            Inbound::ServerMessage { method } => {
                tracing::debug!("Ignoring server-initiated '{method}' from '{server}'");
            }
            Inbound::Unrecognized(value) => {
                tracing::debug!("Ignoring unrecognized message from '{server}': {value}");
            }
        }
    }

    let mut pending = pending.lock().await;
    closed.cancel();
    if !pending.is_empty() {
        tracing::warn!(
            "Server '{server}' closed with {} requests in flight",
            pending.len()
        );
    }
    pending.clear();
}

/// Parse a `tools/list` result into `tools`, skipping unusable entries and
/// names already present.
fn parse_tools(server: &str, result: &serde_json::Value, tools: &mut Vec<ToolMeta>) {
    let Some(entries) = result.get("tools").and_then(serde_json::Value::as_array) else {
        return;
    };
    for raw in entries {
        let entry: ToolEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping tool entry from '{server}': {e}");
                continue;
            }
        };
        if tools.iter().any(|t| t.local_name == entry.name) {
            tracing::debug!("Duplicate tool '{}' from '{server}' ignored", entry.name);
            continue;
        }
        let input_schema = entry
            .input_schema
            .filter(serde_json::Value::is_object)
            .or(entry.schema.filter(serde_json::Value::is_object))
            .unwrap_or_else(default_schema);
        tools.push(ToolMeta {
            server: server.to_string(),
            local_name: entry.name,
            description: entry
                .description
                .as_ref()
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            input_schema,
        });
    }
}

fn next_cursor(result: &serde_json::Value) -> Option<String> {
    result
        .get("nextCursor")
        .and_then(serde_json::Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
