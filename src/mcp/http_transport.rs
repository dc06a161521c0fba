//! Streamable-HTTP ETP transport, the second of the two
//! wire transports alongside [`crate::mcp::client::McpClient`]'s stdio
//! pipe.
//!
//! Grounded on `llm::anthropic`'s hand-rolled `reqwest` usage (no
//! generated SDK, manual header/JSON-RPC envelope construction) rather
//! than on `mcp::transport::StdioTransport`, since an HTTP transport
//! has no persistent child process or background reader loop: each
//! call is one POST, matched to its response synchronously, so there is
//! no `pending: HashMap<id, oneshot::Sender<..>>` correlation table to
//! maintain.

use crate::mcp::types::{CallToolResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct HttpMcpClient {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
    next_id: AtomicU64,
    /// Server-assigned session id from `Mcp-Session-Id`, echoed on every
    /// subsequent request once the server hands one out.
    session_id: Mutex<Option<String>>,
}

impl HttpMcpClient {
    pub async fn connect(url: &str, headers: HashMap<String, String>) -> Result<Self> {
        let client = Client::builder().build().context("building HTTP client for ETP server")?;
        let this = Self {
            client,
            url: url.to_string(),
            headers,
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
        };
        this.initialize().await?;
        Ok(this)
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut req = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream");

        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(session_id) = self.session_id.lock().unwrap().clone() {
            req = req.header("mcp-session-id", session_id);
        }

        let resp = req.json(request).send().await.context("sending ETP HTTP request")?;

        if let Some(session_id) = resp.headers().get("mcp-session-id") {
            if let Ok(s) = session_id.to_str() {
                *self.session_id.lock().unwrap() = Some(s.to_string());
            }
        }

        if !resp.status().is_success() {
            return Err(anyhow!("ETP server returned HTTP {}", resp.status()));
        }

        let body = resp.text().await.context("reading ETP HTTP response body")?;
        parse_json_or_sse(&body)
    }

    async fn call(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest { jsonrpc: "2.0".to_string(), method: method.to_string(), params, id: json!(id) };
        let resp = self.post(&request).await?;
        if let Some(err) = resp.error {
            return Err(anyhow!("ETP call '{}' failed: {}", method, err.message));
        }
        Ok(resp.result.unwrap_or_default())
    }

    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": "2025-11-25",
            "capabilities": {},
            "clientInfo": { "name": "agentrt", "version": env!("CARGO_PKG_VERSION") }
        });
        self.call("initialize", Some(params)).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let result = self.call("tools/list", Some(json!({}))).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: HashMap<String, serde_json::Value>) -> Result<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.call("tools/call", Some(params)).await?;
        let parsed: CallToolResult = serde_json::from_value(result)?;
        Ok(parsed)
    }
}

/// A streamable-HTTP response body is either a bare JSON object or an
/// SSE stream of `data: {...}` frames; this takes the last `data:`
/// frame when the body looks like SSE, else parses it directly.
fn parse_json_or_sse(body: &str) -> Result<JsonRpcResponse> {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).context("parsing ETP JSON response");
    }

    let mut last_data = None;
    for line in trimmed.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            last_data = Some(data.trim().to_string());
        }
    }
    let data = last_data.ok_or_else(|| anyhow!("ETP HTTP response had no JSON or SSE data frame"))?;
    serde_json::from_str(&data).context("parsing ETP SSE response frame")
}
