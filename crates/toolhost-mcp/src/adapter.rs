//! Blocking adapter over every configured MCP server.
//!
//! [`McpAdapter`] owns one event-loop thread. Every server runtime lives on
//! that loop, and synchronous callers reach it only through
//! [`EventLoopBridge::run_sync`].

use crate::bridge::EventLoopBridge;
use crate::client::millis;
use crate::config::{AdapterSettings, McpConfig, ServerConfig};
use crate::error::McpError;
use crate::registry::{ToolRegistry, ToolSpec};
use crate::runtime::{RuntimeSettings, ServerRuntime, ServerState};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Name of the event-loop thread.
const LOOP_THREAD_NAME: &str = "toolhost-mcp-loop";

/// Extra time a blocking caller waits beyond the bound enforced on the loop.
const BRIDGE_SLACK: Duration = Duration::from_millis(500);

/// Status of one server, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: ServerState,
    pub tools: usize,
}

/// Synchronous facade over all configured MCP servers.
pub struct McpAdapter {
    servers: Vec<ServerConfig>,
    settings: AdapterSettings,
    bridge: Mutex<Option<Arc<EventLoopBridge>>>,
    runtimes: RwLock<Vec<Arc<ServerRuntime>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    registry: ToolRegistry,
    closed: AtomicBool,
}

impl McpAdapter {
    /// Create an adapter. Nothing is spawned until [`start`](Self::start).
    pub fn new(servers: Vec<ServerConfig>, settings: AdapterSettings) -> Self {
        Self {
            servers,
            settings,
            bridge: Mutex::new(None),
            runtimes: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            registry: ToolRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &McpConfig) -> Self {
        Self::new(config.servers.clone(), config.adapter.clone())
    }

    /// Start every enabled server that is not already running and wait for
    /// each to settle, bounded per server by the init timeout.
    ///
    /// Servers that fail or time out are logged and skipped; the adapter
    /// continues with whatever servers are available.
    pub fn start(&self) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::AdapterClosed);
        }
        let bridge = self.ensure_bridge()?;

        {
            let mut runtimes = self.runtimes.write();
            for config in self.servers.iter().filter(|s| s.enabled) {
                if runtimes.iter().any(|rt| rt.name() == config.name) {
                    tracing::debug!("MCP server '{}' already started", config.name);
                    continue;
                }
                let runtime = Arc::new(ServerRuntime::new(config.clone()));
                let task = bridge.spawn(Arc::clone(&runtime).run(self.runtime_settings()));
                self.tasks.lock().push(task);
                runtimes.push(runtime);
            }
        }

        let init_timeout = self.settings.init_timeout();
        let waits: Vec<_> = self
            .runtimes
            .read()
            .iter()
            .map(|runtime| {
                let runtime = Arc::clone(runtime);
                async move {
                    let settled = tokio::time::timeout(init_timeout, runtime.wait_settled())
                        .await
                        .is_ok();
                    (runtime, settled)
                }
            })
            .collect();

        match bridge.run_sync(join_all(waits), init_timeout + BRIDGE_SLACK) {
            Ok(results) => {
                for (runtime, settled) in results {
                    if !settled {
                        tracing::warn!(
                            "Timeout waiting for MCP server '{}' to initialize",
                            runtime.name()
                        );
                    }
                }
            }
            Err(e) => tracing::warn!("Waiting for MCP servers failed: {e}"),
        }

        self.refresh();
        Ok(())
    }

    /// Rebuild the catalog from servers that are currently ready.
    pub fn refresh(&self) {
        let catalogs: Vec<_> = self
            .runtimes
            .read()
            .iter()
            .filter(|rt| rt.is_ready())
            .map(|rt| rt.tools())
            .collect();
        self.registry.aggregate(catalogs);
        tracing::info!("MCP adapter catalog holds {} tools", self.registry.len());
    }

    /// Publish the catalog in function-calling form under exposed names.
    pub fn build_tool_specs(&self) -> Vec<ToolSpec> {
        self.registry.build_exposed_spec()
    }

    /// Map an exposed name from the last published spec to `server:tool`.
    pub fn resolve(&self, exposed: &str) -> Option<String> {
        self.registry.resolve(exposed)
    }

    /// Call a tool by exposed or qualified name and wait for its result.
    ///
    /// Unknown names fail immediately without touching the event loop.
    pub fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let meta = self
            .registry
            .resolve(name)
            .or_else(|| name.contains(':').then(|| name.to_string()))
            .and_then(|qualified| self.registry.get(&qualified))
            .ok_or_else(|| McpError::UnknownTool {
                name: name.to_string(),
            })?;

        let not_ready = || McpError::ServerNotReady {
            server: meta.server.clone(),
        };
        if self.is_closed() {
            return Err(not_ready());
        }
        let runtime = self
            .runtime(&meta.server)
            .filter(|rt| rt.is_ready())
            .ok_or_else(not_ready)?;
        let client = runtime.client().ok_or_else(not_ready)?;
        let bridge = self.bridge.lock().clone().ok_or_else(not_ready)?;

        let timeout = self.settings.call_timeout_for(runtime.config());
        let tool = meta.local_name.clone();
        tracing::info!("Calling tool '{}' on server '{}'", tool, meta.server);

        let outcome = bridge
            .run_sync(
                async move { client.call_tool(&tool, arguments, timeout).await },
                timeout + BRIDGE_SLACK,
            )
            .and_then(|result| result)
            .map_err(|e| match e {
                McpError::BridgeTimeout { .. } => McpError::CallTimeout {
                    server: meta.server.clone(),
                    tool: meta.local_name.clone(),
                    timeout_ms: millis(timeout),
                },
                other => other,
            });

        if let Err(e) = &outcome {
            tracing::warn!("{e}");
        }
        outcome
    }

    /// Like [`call_tool`](Self::call_tool), but failures come back as
    /// `{"error": ...}` values.
    pub fn call_tool_value(&self, name: &str, arguments: serde_json::Value) -> serde_json::Value {
        self.call_tool(name, arguments)
            .unwrap_or_else(|e| e.to_error_value())
    }

    /// Per-server state and tool count, in configuration order.
    pub fn server_summary(&self) -> Vec<ServerStatus> {
        self.runtimes
            .read()
            .iter()
            .map(|rt| ServerStatus {
                name: rt.name().to_string(),
                state: rt.state(),
                tools: rt.tools().len(),
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop every server and the event loop. Safe to call more than once, and
    /// before [`start`](Self::start).
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(bridge) = self.bridge.lock().take() else {
            tracing::debug!("MCP adapter closed before start");
            return;
        };

        let runtimes: Vec<_> = self.runtimes.read().clone();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let drain_timeout = self.settings.shutdown_timeout();

        // Stop signals are delivered on the loop, never from this thread.
        let drained = bridge.run_sync(
            async move {
                for runtime in &runtimes {
                    runtime.request_stop();
                }
                tokio::time::timeout(drain_timeout, join_all(tasks))
                    .await
                    .is_ok()
            },
            drain_timeout + BRIDGE_SLACK,
        );
        match drained {
            Ok(true) => tracing::debug!("All MCP server tasks finished"),
            Ok(false) => tracing::warn!(
                "MCP server tasks did not finish within {}ms; cancelling",
                millis(drain_timeout)
            ),
            Err(e) => tracing::warn!("Draining MCP server tasks failed: {e}"),
        }
        for abort in aborts {
            abort.abort();
        }

        bridge.shutdown(self.settings.shutdown_timeout());
        tracing::info!("MCP adapter shut down");
    }

    fn ensure_bridge(&self) -> Result<Arc<EventLoopBridge>, McpError> {
        let mut slot = self.bridge.lock();
        if let Some(bridge) = slot.as_ref().filter(|b| b.is_running()) {
            return Ok(Arc::clone(bridge));
        }
        let bridge = Arc::new(EventLoopBridge::start(LOOP_THREAD_NAME)?);
        *slot = Some(Arc::clone(&bridge));
        Ok(bridge)
    }

    fn runtime(&self, server: &str) -> Option<Arc<ServerRuntime>> {
        self.runtimes
            .read()
            .iter()
            .find(|rt| rt.name() == server)
            .cloned()
    }

    fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            request_timeout: self.settings.request_timeout(),
            terminate_grace: self.settings.terminate_grace(),
            negotiation: self.settings.negotiation.clone(),
        }
    }
}

impl Drop for McpAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
