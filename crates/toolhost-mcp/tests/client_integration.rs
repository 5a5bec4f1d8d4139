//! Protocol client negotiation against the scripted stdio server.

use serde_json::json;
use std::time::Duration;
use toolhost_mcp::process::ServerProcess;
use toolhost_mcp::{McpError, NegotiationTables, ProtocolClient, ServerConfig};

fn connect(vars: &[(&str, &str)]) -> ProtocolClient {
    let script = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/mock_server.sh");
    let mut config = ServerConfig::new("mock", "sh", vec![script.to_string()]);
    for (key, value) in vars {
        config.env.insert(key.to_string(), value.to_string());
    }
    let (process, inbound) = ServerProcess::spawn(&config).unwrap();
    ProtocolClient::new(process, inbound, Duration::from_millis(500))
}

#[tokio::test]
async fn initialize_returns_server_result() {
    let client = connect(&[]);
    let tables = NegotiationTables::default();
    let result = client.initialize(&tables.initialize).await.unwrap();
    assert_eq!(result["serverInfo"]["name"], "mock");
    client.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn initialize_reports_every_attempt_on_failure() {
    let client = connect(&[("MOCK_INIT_VERSION", "1999-01-01")]);
    let tables = NegotiationTables::default();
    match client.initialize(&tables.initialize).await {
        Err(McpError::HandshakeFailure { attempts, last, .. }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last, "unsupported params");
        }
        other => panic!("Expected HandshakeFailure, got: {other:?}"),
    }
    client.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn custom_variant_tables_are_honoured() {
    let client = connect(&[("MOCK_INIT_VERSION", "2025-03-26"), ("MOCK_TOOLS", "x")]);
    let tables = NegotiationTables {
        initialize: vec![json!({"protocolVersion": "2025-03-26", "capabilities": {}})],
        list_tools: vec![Some(json!({}))],
    };
    client.initialize(&tables.initialize).await.unwrap();
    let tools = client.list_tools(&tables.list_tools).await.unwrap();
    assert_eq!(tools[0].local_name, "x");
    client.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn discovery_follows_next_cursor() {
    let client = connect(&[("MOCK_TOOLS", "a b"), ("MOCK_PAGE2_TOOLS", "c b")]);
    let tables = NegotiationTables::default();
    client.initialize(&tables.initialize).await.unwrap();
    let tools = client.list_tools(&tables.list_tools).await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.local_name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(tools[2].qualified_name(), "mock:c");
    client.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn empty_catalog_is_a_discovery_failure() {
    let client = connect(&[("MOCK_TOOLS", " ")]);
    let tables = NegotiationTables::default();
    client.initialize(&tables.initialize).await.unwrap();
    match client.list_tools(&tables.list_tools).await {
        Err(McpError::DiscoveryFailure { attempts, .. }) => assert_eq!(attempts, 6),
        other => panic!("Expected DiscoveryFailure, got: {other:?}"),
    }
    client.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn concurrent_calls_are_correlated() {
    let client = connect(&[("MOCK_TOOLS", "one two three")]);
    let tables = NegotiationTables::default();
    client.initialize(&tables.initialize).await.unwrap();

    let timeout = Duration::from_secs(5);
    let (one, two, three) = tokio::join!(
        client.call_tool("one", json!({}), timeout),
        client.call_tool("two", json!({}), timeout),
        client.call_tool("three", json!({}), timeout),
    );
    assert_eq!(one.unwrap(), "one-ok");
    assert_eq!(two.unwrap(), "two-ok");
    assert_eq!(three.unwrap(), "three-ok");
    client.shutdown(Duration::from_millis(300)).await;
}
