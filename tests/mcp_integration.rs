//! An external tool server bridged in over stdio: connecting registers
//! its tools into the shared registry under a namespaced name, and
//! calling that name round-trips through the real child process.

use agentrt::mcp::EtpManager;
use agentrt::tools::{external_namespace, namespaced_tool_name, AgentContext, ToolRegistry};
use agentrt::types::{ExternalServerConfig, ServerTrust, ToolCall, TransportKind};
use std::collections::HashMap;
use std::sync::Arc;

fn fixture_config() -> ExternalServerConfig {
    let fixture = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("echo_mcp_server.py");
    ExternalServerConfig {
        id: "echo-fixture".to_string(),
        name: "Echo Fixture".to_string(),
        transport: TransportKind::Stdio,
        command: Some("python3".to_string()),
        args: vec![fixture.to_string_lossy().to_string()],
        env: HashMap::new(),
        url: None,
        headers: HashMap::new(),
        trust: ServerTrust::UserAdded,
        sandbox_enabled: false,
        image: None,
        enabled: true,
        category: "testing".to_string(),
        created_at: chrono::Utc::now(),
        last_connected: None,
        last_error: None,
    }
}

#[tokio::test]
async fn connecting_registers_the_servers_tools_under_their_namespaced_name() {
    let registry = Arc::new(ToolRegistry::new());
    let manager = EtpManager::new(registry.clone());
    let config = fixture_config();

    manager.connect(&config).await.expect("connect to echo fixture");

    let expected_name = namespaced_tool_name(&config.id, "echo");
    assert_eq!(expected_name, format!("ext_{}_echo", external_namespace("echo-fixture")));
    assert!(registry.has(&expected_name));
}

#[tokio::test]
async fn calling_a_bridged_tool_round_trips_through_the_child_process() {
    let registry = Arc::new(ToolRegistry::new());
    let manager = EtpManager::new(registry.clone());
    let config = fixture_config();
    manager.connect(&config).await.expect("connect to echo fixture");

    let tool_name = namespaced_tool_name(&config.id, "echo");
    let mut params = HashMap::new();
    params.insert("message".to_string(), serde_json::json!("hello from the test"));
    let call = ToolCall::new(tool_name, params);
    let ctx = AgentContext::new("test-session", None);

    let result = registry.execute(&call, &ctx).await;

    assert!(result.success, "tool call failed: {:?}", result.error);
    let text = result.data.unwrap();
    assert!(text.as_str().unwrap().contains("hello from the test"));
}

#[tokio::test]
async fn unknown_server_command_fails_connect_instead_of_panicking() {
    let registry = Arc::new(ToolRegistry::new());
    let manager = EtpManager::new(registry.clone());
    let mut config = fixture_config();
    config.command = Some("definitely-not-a-real-binary-xyz".to_string());

    let result = manager.connect(&config).await;
    assert!(result.is_err());
}
