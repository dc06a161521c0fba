//! EtpManager: owns one connection per configured external server,
//! registers its tools into the shared [`ToolRegistry`], and reconnects
//! with exponential backoff when a connection drops.
//!
//! Replaces the teacher's single free function `bridge_mcp_tool` (one
//! tool, one already-live `Arc<McpClient>`, no lifecycle management)
//! with the process that owns that lifecycle: spawning/dialing,
//! `initialize`, `tools/list`, wrapping each discovered tool as a
//! [`Tool`] impl, and tearing the registry entries back out when the
//! server is given up on.

use crate::mcp::client::McpClient;
use crate::mcp::http_transport::HttpMcpClient;
use crate::mcp::transport::StdioTransport;
use crate::mcp::types::McpContent;
use crate::sandbox::{sandboxed_command, DEFAULT_POLICY, VERIFIED_POLICY};
use crate::tools::{namespaced_tool_name, AgentContext, Tool, ToolRegistry};
use crate::types::{ExternalServerConfig, ServerTrust, ToolResult, TransportKind};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: u32 = 2;
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;

enum Connection {
    Stdio(Arc<McpClient>),
    Http(Arc<HttpMcpClient>),
}

impl Connection {
    async fn list_tools(&self) -> anyhow::Result<Vec<crate::mcp::types::McpTool>> {
        match self {
            Connection::Stdio(c) => c.list_tools().await,
            Connection::Http(c) => c.list_tools().await,
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<crate::mcp::types::CallToolResult> {
        match self {
            Connection::Stdio(c) => c.call_tool(name, arguments).await,
            Connection::Http(c) => c.call_tool(name, arguments).await,
        }
    }
}

/// Bridges one remote tool into the local [`Tool`] ABI. `Tool::execute`
/// is already async, so unlike the teacher's `bridge_mcp_tool` this
/// needs no `block_in_place`/`Handle::block_on` bridge — it calls the
/// connection directly.
struct BridgedTool {
    remote_name: String,
    namespaced_name: String,
    description: String,
    input_schema: serde_json::Value,
    connection: Arc<Connection>,
}

#[async_trait]
impl Tool for BridgedTool {
    fn name(&self) -> String {
        self.namespaced_name.clone()
    }
    fn description(&self) -> String {
        self.description.clone()
    }
    fn parameters_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }
    fn category(&self) -> String {
        "external".to_string()
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
        let start = std::time::Instant::now();
        match self.connection.call_tool(&self.remote_name, params).await {
            Ok(result) => {
                let mut text = String::new();
                for content in &result.content {
                    if let McpContent::Text { text: t } = content {
                        text.push_str(t);
                        text.push('\n');
                    }
                }
                let duration = start.elapsed().as_millis() as u64;
                if result.is_error {
                    ToolResult::err("tmp", text.trim().to_string(), duration)
                } else {
                    ToolResult::ok("tmp", serde_json::json!(text.trim()), duration)
                }
            }
            Err(e) => ToolResult::err("tmp", format!("ETP call failed: {e}"), start.elapsed().as_millis() as u64),
        }
    }
}

pub struct EtpManager {
    registry: Arc<ToolRegistry>,
}

impl EtpManager {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Connects to `config`, registers every tool it advertises into the
    /// shared registry under its namespaced name, and returns once the
    /// initial connection + `tools/list` have succeeded. Reconnection on
    /// a later drop is the caller's responsibility via [`Self::run_reconnect_loop`],
    /// spawned once this returns `Ok`.
    pub async fn connect(&self, config: &ExternalServerConfig) -> anyhow::Result<()> {
        let connection = Arc::new(self.dial(config).await?);
        self.register_tools(config, &connection).await?;
        Ok(())
    }

    async fn dial(&self, config: &ExternalServerConfig) -> anyhow::Result<Connection> {
        match config.transport {
            TransportKind::Stdio => {
                let command = config
                    .command
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("stdio server '{}' missing command", config.id))?;
                let client = if config.sandbox_enabled && config.trust != ServerTrust::Builtin {
                    let image = config
                        .image
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("sandboxed server '{}' missing image", config.id))?;
                    let policy = if config.trust == ServerTrust::Verified { VERIFIED_POLICY } else { DEFAULT_POLICY };
                    let cmd = sandboxed_command(image, command, &config.args, policy);
                    let transport = StdioTransport::from_command(cmd)?;
                    McpClient::from_transport(transport).await?
                } else {
                    McpClient::new(command, &config.args).await?
                };
                Ok(Connection::Stdio(client))
            }
            TransportKind::Http => {
                let url = config
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("http server '{}' missing url", config.id))?;
                let client = HttpMcpClient::connect(url, config.headers.clone()).await?;
                Ok(Connection::Http(Arc::new(client)))
            }
        }
    }

    async fn register_tools(&self, config: &ExternalServerConfig, connection: &Arc<Connection>) -> anyhow::Result<()> {
        let tools = connection.list_tools().await?;
        for tool in tools {
            let namespaced_name = namespaced_tool_name(&config.id, &tool.name);
            let bridged = BridgedTool {
                remote_name: tool.name.clone(),
                namespaced_name: namespaced_name.clone(),
                description: tool.description.unwrap_or_default(),
                input_schema: tool.input_schema.unwrap_or_else(|| serde_json::json!({"type": "object"})),
                connection: connection.clone(),
            };
            self.registry.register_external(namespaced_name, Arc::new(bridged));
        }
        tracing::info!(server = %config.id, tool_count = self.registry.len(), "registered external server tools");
        Ok(())
    }

    /// Drives reconnection for a server whose connection has dropped:
    /// exponential backoff with jitter (base 1s, factor 2, cap 60s),
    /// deregistering the server's tools from the registry once
    /// `MAX_ATTEMPTS` is exhausted.
    pub async fn run_reconnect_loop(&self, config: &ExternalServerConfig) {
        self.registry.unregister_server(&config.id);
        let mut delay = BACKOFF_BASE;

        for attempt in 1..=MAX_ATTEMPTS {
            tracing::warn!(server = %config.id, attempt, "attempting to reconnect to ETP server");
            match self.connect(config).await {
                Ok(()) => {
                    tracing::info!(server = %config.id, attempt, "reconnected to ETP server");
                    return;
                }
                Err(e) => {
                    tracing::warn!(server = %config.id, attempt, error = %e, "reconnect attempt failed");
                }
            }

            if attempt == MAX_ATTEMPTS {
                break;
            }
            let jitter_ms = rand::thread_rng().gen_range(0..250);
            tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
            delay = std::cmp::min(delay * BACKOFF_FACTOR, BACKOFF_CAP);
        }

        tracing::error!(server = %config.id, "giving up on ETP server after exhausting reconnect attempts");
        self.registry.unregister_server(&config.id);
    }
}
