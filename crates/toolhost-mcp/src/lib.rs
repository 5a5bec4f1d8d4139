//! MCP (Model Context Protocol) tool-server adapter.
//!
//! Spawns each configured stdio MCP server as a child process, negotiates the
//! handshake and tool discovery with whichever parameter shapes the server
//! accepts, and republishes every discovered tool in function-calling form.
//! All async work runs on one dedicated event-loop thread; [`McpAdapter`]
//! exposes it to synchronous callers.

pub mod adapter;
pub mod bridge;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod negotiate;
pub mod normalize;
pub mod process;
pub mod registry;
pub mod runtime;

pub use adapter::{McpAdapter, ServerStatus};
pub use bridge::EventLoopBridge;
pub use client::ProtocolClient;
pub use codec::Framing;
pub use config::{AdapterSettings, McpConfig, ServerConfig};
pub use error::McpError;
pub use negotiate::NegotiationTables;
pub use normalize::normalize_call_result;
pub use registry::{FunctionSpec, ToolMeta, ToolRegistry, ToolSpec};
pub use runtime::{ServerRuntime, ServerState};
