//! Configuration types for MCP servers and the adapter.

use crate::codec::Framing;
use crate::negotiate::NegotiationTables;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an interpreter that replaces every server command.
pub const PYTHON_OVERRIDE_ENV: &str = "TOOLHOST_PYTHON";

/// Environment variable naming a fallback virtualenv for `python` commands.
pub const VENV_OVERRIDE_ENV: &str = "TOOLHOST_VENV";

/// Top-level MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl McpConfig {
    /// Servers that should be spawned, in configuration order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique key for this server; also the prefix of qualified tool names.
    pub name: String,
    /// Command to run (e.g., "npx", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides layered on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Only enabled servers are spawned.
    #[serde(default)]
    pub enabled: bool,
    /// Outbound framing style.
    #[serde(default)]
    pub framing: Framing,
    /// Virtualenv whose interpreter replaces a bare `python` command.
    #[serde(default)]
    pub venv: Option<PathBuf>,
    /// Per-server override of the tool call timeout.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

impl ServerConfig {
    /// A minimal enabled server entry.
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
            enabled: true,
            framing: Framing::default(),
            venv: None,
            call_timeout_ms: None,
        }
    }

    /// The executable to spawn after interpreter overrides are applied.
    pub fn resolved_command(&self) -> PathBuf {
        resolve_command(
            &self.command,
            self.venv.as_deref(),
            std::env::var_os(PYTHON_OVERRIDE_ENV).map(PathBuf::from),
            std::env::var_os(VENV_OVERRIDE_ENV).map(PathBuf::from),
        )
    }
}

/// Pick the executable for a server command.
///
/// Precedence: global interpreter override (if it exists) > the server's own
/// venv > the global venv (only when the server has none) > the command as
/// written. Venvs only apply to bare `python`/`python3` commands.
pub fn resolve_command(
    command: &str,
    venv: Option<&Path>,
    global_python: Option<PathBuf>,
    global_venv: Option<PathBuf>,
) -> PathBuf {
    if let Some(python) = global_python.filter(|p| p.exists()) {
        return python;
    }
    let is_python = matches!(command, "python" | "python3");
    let interpreter = match (venv, global_venv) {
        (Some(venv), _) if is_python => venv_python(venv),
        (None, Some(global)) if is_python => venv_python(&global),
        _ => None,
    };
    interpreter.unwrap_or_else(|| PathBuf::from(command))
}

fn venv_python(root: &Path) -> Option<PathBuf> {
    [root.join("bin").join("python"), root.join("Scripts").join("python.exe")]
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn default_init_timeout() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    3_000
}

fn default_call_timeout() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    2_000
}

fn default_terminate_grace() -> u64 {
    1_000
}

/// Timeouts and negotiation tables for one adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// How long `start()` waits for each server to become ready.
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,
    /// Per-attempt bound for `initialize` and `tools/list` requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Default bound for `tools/call`.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// Bound on draining server tasks and joining the loop thread.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    /// Time a server gets to exit after stdin closes before it is killed.
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,
    #[serde(skip)]
    pub negotiation: NegotiationTables,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            init_timeout_ms: default_init_timeout(),
            request_timeout_ms: default_request_timeout(),
            call_timeout_ms: default_call_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            terminate_grace_ms: default_terminate_grace(),
            negotiation: NegotiationTables::default(),
        }
    }
}

impl AdapterSettings {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Call timeout for a server, honoring its override.
    pub fn call_timeout_for(&self, server: &ServerConfig) -> Duration {
        Duration::from_millis(server.call_timeout_ms.unwrap_or(self.call_timeout_ms))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}
