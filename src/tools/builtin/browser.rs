//! `BrowserTool`: `{action, url?, selector?,
//! text?}` where `action` is one of `navigate`/`click`/`fill`/`extract`/
//! `screenshot`/`get_text`/`close`. A single headless browser instance is
//! launched lazily and reused across calls within the same session,
//! keyed by `AgentContext::session_id`.
//!
//! New module — the teacher has no browser layer. Grounded in the pack's
//! other agent repos (`pegasusheavy-safe-agent`, `scottopell-phoenix-ide`),
//! both of which drive `chromiumoxide` with the tokio runtime feature.

use super::params::{opt_str, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

const NAV_TIMEOUT: Duration = Duration::from_secs(30);

struct BrowserSession {
    browser: Browser,
    page: chromiumoxide::Page,
}

pub struct BrowserTool {
    sessions: AsyncMutex<HashMap<String, BrowserSession>>,
}

impl BrowserTool {
    pub fn new() -> Self {
        Self { sessions: AsyncMutex::new(HashMap::new()) }
    }

    async fn launch() -> Result<(Browser, chromiumoxide::Page), String> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(|e| format!("browser config failed: {e}"))?;
        let (browser, mut handler) =
            Browser::launch(config).await.map_err(|e| format!("browser launch failed: {e}"))?;
        tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| format!("opening page failed: {e}"))?;
        Ok((browser, page))
    }
}

impl Default for BrowserTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> String {
        "browser".to_string()
    }

    fn description(&self) -> String {
        "Drives a headless browser: navigate, click, fill, extract, screenshot, get_text, close.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string" },
                "url": { "type": "string" },
                "selector": { "type": "string" },
                "text": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn category(&self) -> String {
        "browser".to_string()
    }

    fn requires_approval_default(&self) -> bool {
        true
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, ctx: &AgentContext) -> ToolResult {
        let call_id = "pending";
        let start = std::time::Instant::now();
        let action = match require_str(&params, "action") {
            Ok(a) => a,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };

        let mut sessions = self.sessions.lock().await;

        if action == "close" {
            sessions.remove(&ctx.session_id);
            return ToolResult::ok(call_id, serde_json::json!({ "closed": true }), start.elapsed().as_millis() as u64);
        }

        if !sessions.contains_key(&ctx.session_id) {
            match Self::launch().await {
                Ok((browser, page)) => {
                    sessions.insert(ctx.session_id.clone(), BrowserSession { browser, page });
                }
                Err(e) => return ToolResult::err(call_id, e, start.elapsed().as_millis() as u64),
            }
        }
        let session = sessions.get_mut(&ctx.session_id).expect("just inserted or already present");

        let result = match action {
            "navigate" => {
                let Ok(url) = require_str(&params, "url") else {
                    return ToolResult::err(call_id, "missing 'url' for navigate", 0);
                };
                match tokio::time::timeout(NAV_TIMEOUT, session.page.goto(url)).await {
                    Ok(Ok(_)) => Ok(serde_json::json!({ "navigated_to": url })),
                    Ok(Err(e)) => Err(format!("navigation failed: {e}")),
                    Err(_) => Err("navigation timed out after 30s".to_string()),
                }
            }
            "click" => {
                let Ok(selector) = require_str(&params, "selector") else {
                    return ToolResult::err(call_id, "missing 'selector' for click", 0);
                };
                match session.page.find_element(selector).await {
                    Ok(element) => element
                        .click()
                        .await
                        .map(|_| serde_json::json!({ "clicked": selector }))
                        .map_err(|e| format!("click failed: {e}")),
                    Err(e) => Err(format!("element not found: {e}")),
                }
            }
            "fill" => {
                let Ok(selector) = require_str(&params, "selector") else {
                    return ToolResult::err(call_id, "missing 'selector' for fill", 0);
                };
                let text = opt_str(&params, "text").unwrap_or("");
                match session.page.find_element(selector).await {
                    Ok(element) => element
                        .type_str(text)
                        .await
                        .map(|_| serde_json::json!({ "filled": selector }))
                        .map_err(|e| format!("fill failed: {e}")),
                    Err(e) => Err(format!("element not found: {e}")),
                }
            }
            "extract" | "get_text" => session
                .page
                .content()
                .await
                .map(|html| serde_json::json!({ "content": html }))
                .map_err(|e| format!("extract failed: {e}")),
            "screenshot" => session
                .page
                .screenshot(ScreenshotParams::builder().build())
                .await
                .map(|bytes| {
                    serde_json::json!({ "screenshot_base64": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes) })
                })
                .map_err(|e| format!("screenshot failed: {e}")),
            other => Err(format!("unknown browser action '{other}'")),
        };

        match result {
            Ok(data) => ToolResult::ok(call_id, data, start.elapsed().as_millis() as u64),
            Err(e) => ToolResult::err(call_id, e, start.elapsed().as_millis() as u64),
        }
    }
}
