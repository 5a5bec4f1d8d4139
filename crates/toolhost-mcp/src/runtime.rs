//! Per-server lifecycle: spawn, negotiate, serve, stop.

use crate::client::ProtocolClient;
use crate::config::ServerConfig;
use crate::error::McpError;
use crate::negotiate::NegotiationTables;
use crate::process::ServerProcess;
use crate::registry::ToolMeta;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Spawned,
    Initializing,
    ListingTools,
    Ready,
    Failed,
    ShuttingDown,
    Stopped,
}

impl ServerState {
    /// Negotiation has finished one way or another.
    pub fn is_settled(self) -> bool {
        !matches!(
            self,
            ServerState::Spawned | ServerState::Initializing | ServerState::ListingTools
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServerState::Spawned => "spawned",
            ServerState::Initializing => "initializing",
            ServerState::ListingTools => "listing_tools",
            ServerState::Ready => "ready",
            ServerState::Failed => "failed",
            ServerState::ShuttingDown => "shutting_down",
            ServerState::Stopped => "stopped",
        };
        f.pad(label)
    }
}

/// Timeouts and tables a runtime task needs.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub request_timeout: Duration,
    pub terminate_grace: Duration,
    pub negotiation: NegotiationTables,
}

/// State shared between a server's lifecycle task and the adapter.
pub struct ServerRuntime {
    config: ServerConfig,
    state: watch::Sender<ServerState>,
    stop: CancellationToken,
    client: RwLock<Option<Arc<ProtocolClient>>>,
    tools: RwLock<Vec<ToolMeta>>,
}

impl ServerRuntime {
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Spawned);
        Self {
            config,
            state,
            stop: CancellationToken::new(),
            client: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Ready and not asked to stop.
    pub fn is_ready(&self) -> bool {
        self.state() == ServerState::Ready && !self.stop.is_cancelled()
    }

    /// Tools discovered during negotiation.
    pub fn tools(&self) -> Vec<ToolMeta> {
        self.tools.read().clone()
    }

    pub fn client(&self) -> Option<Arc<ProtocolClient>> {
        self.client.read().clone()
    }

    /// Signal the lifecycle task to stop. Only call this on the event loop.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Wait until negotiation has settled.
    pub async fn wait_settled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.is_settled()).await;
    }

    fn set_state(&self, state: ServerState) {
        tracing::debug!("Server '{}' -> {state}", self.config.name);
        self.state.send_replace(state);
    }

    /// Drive the server from spawn to stop.
    pub async fn run(self: Arc<Self>, settings: RuntimeSettings) {
        let name = self.config.name.clone();
        let (process, inbound) = match ServerProcess::spawn(&self.config) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!("{e}");
                self.set_state(ServerState::Failed);
                return;
            }
        };
        let client = Arc::new(ProtocolClient::new(
            process,
            inbound,
            settings.request_timeout,
        ));

        let negotiated = tokio::select! {
            outcome = self.negotiate(&client, &settings.negotiation) => Some(outcome),
            _ = self.stop.cancelled() => None,
        };

        match negotiated {
            Some(Ok(tools)) => {
                tracing::info!("MCP server '{name}' ready ({} tools)", tools.len());
                *self.tools.write() = tools;
                *self.client.write() = Some(Arc::clone(&client));
                self.set_state(ServerState::Ready);

                tokio::select! {
                    _ = self.stop.cancelled() => {}
                    _ = client.closed() => {
                        tracing::warn!("MCP server '{name}' exited unexpectedly");
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!("MCP server '{name}' failed: {e}");
                client.shutdown(settings.terminate_grace).await;
                self.set_state(ServerState::Failed);
                return;
            }
            None => tracing::debug!("Server '{name}' stopped during negotiation"),
        }

        self.set_state(ServerState::ShuttingDown);
        client.shutdown(settings.terminate_grace).await;
        self.client.write().take();
        self.set_state(ServerState::Stopped);
        tracing::info!("MCP server '{name}' stopped");
    }

    async fn negotiate(
        &self,
        client: &ProtocolClient,
        tables: &NegotiationTables,
    ) -> Result<Vec<ToolMeta>, McpError> {
        self.set_state(ServerState::Initializing);
        client.initialize(&tables.initialize).await?;

        self.set_state(ServerState::ListingTools);
        match client.list_tools(&tables.list_tools).await {
            Ok(tools) => Ok(tools),
            Err(e) => {
                tracing::warn!("{e}; continuing with zero tools");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            request_timeout: Duration::from_millis(300),
            terminate_grace: Duration::from_millis(200),
            negotiation: NegotiationTables::default(),
        }
    }

    #[test]
    fn settled_states() {
        assert!(!ServerState::Spawned.is_settled());
        assert!(!ServerState::Initializing.is_settled());
        assert!(!ServerState::ListingTools.is_settled());
        assert!(ServerState::Ready.is_settled());
        assert!(ServerState::Failed.is_settled());
        assert!(ServerState::Stopped.is_settled());
        assert_eq!(ServerState::ListingTools.to_string(), "listing_tools");
    }

    #[tokio::test]
    async fn spawn_failure_settles_as_failed() {
        let runtime = Arc::new(ServerRuntime::new(ServerConfig::new(
            "missing",
            "this_command_does_not_exist_xyz123",
            vec![],
        )));
        Arc::clone(&runtime).run(settings()).await;
        assert_eq!(runtime.state(), ServerState::Failed);
        assert!(runtime.tools().is_empty());
        assert!(runtime.client().is_none());
    }

    #[tokio::test]
    async fn silent_server_fails_handshake() {
        let runtime = Arc::new(ServerRuntime::new(ServerConfig::new(
            "silent",
            "sh",
            vec!["-c".into(), "cat > /dev/null".into()],
        )));
        Arc::clone(&runtime).run(settings()).await;
        assert_eq!(runtime.state(), ServerState::Failed);
        assert!(!runtime.is_ready());
    }

    #[tokio::test]
    async fn stop_during_negotiation_stops_cleanly() {
        let runtime = Arc::new(ServerRuntime::new(ServerConfig::new(
            "silent",
            "sh",
            vec!["-c".into(), "cat > /dev/null".into()],
        )));
        let task = tokio::spawn(Arc::clone(&runtime).run(settings()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.request_stop();
        task.await.unwrap();
        assert_eq!(runtime.state(), ServerState::Stopped);
    }
}
