//! Parameter-shape variants tried during negotiation.
//!
//! Servers disagree about what `initialize` and `tools/list` accept. Each
//! table is tried in order and the first accepted entry wins.

use serde_json::{Value, json};

/// Protocol versions offered after the version-less attempt, newest first.
pub const PROTOCOL_VERSIONS: [&str; 2] = ["2024-11-05", "2024-06-01"];

/// Client name announced in `clientInfo`.
pub const CLIENT_NAME: &str = "toolhost";

/// Ordered candidate payloads for the handshake and tool discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationTables {
    /// `initialize` params, each sent as-is.
    pub initialize: Vec<Value>,
    /// `tools/list` params; `None` sends `params: null`.
    pub list_tools: Vec<Option<Value>>,
}

impl Default for NegotiationTables {
    fn default() -> Self {
        let client_info = json!({
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        });

        let mut initialize = vec![json!({
            "capabilities": {},
            "clientInfo": client_info,
        })];
        initialize.extend(PROTOCOL_VERSIONS.iter().map(|version| {
            json!({
                "protocolVersion": version,
                "capabilities": {},
                "clientInfo": client_info,
            })
        }));

        let list_tools = vec![
            None,
            Some(json!({})),
            Some(json!({"cursor": null})),
            Some(json!({"cursor": 0})),
            Some(json!({"limit": 100})),
            Some(json!({"pageSize": 100})),
        ];

        Self {
            initialize,
            list_tools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_starts_without_protocol_version() {
        let tables = NegotiationTables::default();
        assert_eq!(tables.initialize.len(), 3);
        assert!(tables.initialize[0].get("protocolVersion").is_none());
        assert_eq!(tables.initialize[1]["protocolVersion"], "2024-11-05");
        assert_eq!(tables.initialize[2]["protocolVersion"], "2024-06-01");
        assert_eq!(tables.initialize[0]["clientInfo"]["name"], "toolhost");
    }

    #[test]
    fn list_tools_starts_with_no_params() {
        let tables = NegotiationTables::default();
        assert_eq!(tables.list_tools[0], None);
        assert_eq!(tables.list_tools[1], Some(json!({})));
        assert_eq!(tables.list_tools.len(), 6);
    }
}
