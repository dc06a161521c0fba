//! `RepoTool`: a thin GitHub REST client
//! exposing `{action, owner?, repo?, path?, content?, title?, body?}`
//! where `action` is one of `create_repo`/`list`/`read_file`/
//! `write_file`/`create_issue`/`create_pr`. Auth token comes from the
//! `token` parameter if present, else the `GITHUB_TOKEN` environment
//! variable (param wins).

use super::params::{opt_str, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use std::collections::HashMap;

const API_BASE: &str = "https://api.github.com";

pub struct RepoTool {
    client: reqwest::Client,
    env_token: Option<String>,
}

impl RepoTool {
    pub fn new(env_token: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), env_token }
    }

    fn token<'a>(&'a self, params: &'a HashMap<String, serde_json::Value>) -> Option<String> {
        opt_str(params, "token").map(|s| s.to_string()).or_else(|| self.env_token.clone())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, String> {
        let mut request = self
            .client
            .request(method, format!("{API_BASE}{path}"))
            .header("Authorization", format!("Bearer {token}"))
            .header("User-Agent", "agentrt")
            .header("Accept", "application/vnd.github+json");
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| format!("GitHub request failed: {e}"))?;
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        if !status.is_success() {
            return Err(format!("GitHub API returned {status}: {body}"));
        }
        Ok(body)
    }
}

#[async_trait]
impl Tool for RepoTool {
    fn name(&self) -> String {
        "repo".to_string()
    }

    fn description(&self) -> String {
        "Interacts with a remote Git repository host: create, list, read/write files, open issues and PRs.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string" },
                "owner": { "type": "string" },
                "repo": { "type": "string" },
                "path": { "type": "string" },
                "content": { "type": "string" },
                "title": { "type": "string" },
                "body": { "type": "string" },
                "token": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn category(&self) -> String {
        "repo".to_string()
    }

    fn requires_approval_default(&self) -> bool {
        true
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
        let call_id = "pending";
        let start = std::time::Instant::now();
        let action = match require_str(&params, "action") {
            Ok(a) => a,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let Some(token) = self.token(&params) else {
            return ToolResult::err(call_id, "no GitHub token: pass 'token' or set GITHUB_TOKEN", 0);
        };

        let owner = opt_str(&params, "owner").unwrap_or_default();
        let repo = opt_str(&params, "repo").unwrap_or_default();

        let outcome = match action {
            "create_repo" => {
                let name = opt_str(&params, "repo").unwrap_or_default();
                self.request(
                    reqwest::Method::POST,
                    "/user/repos",
                    &token,
                    Some(serde_json::json!({ "name": name, "private": true })),
                )
                .await
            }
            "list" => self.request(reqwest::Method::GET, &format!("/repos/{owner}/{repo}/contents"), &token, None).await,
            "read_file" => {
                let path = opt_str(&params, "path").unwrap_or_default();
                self.request(reqwest::Method::GET, &format!("/repos/{owner}/{repo}/contents/{path}"), &token, None).await
            }
            "write_file" => {
                let path = opt_str(&params, "path").unwrap_or_default();
                let content = opt_str(&params, "content").unwrap_or_default();
                let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, content.as_bytes());
                self.request(
                    reqwest::Method::PUT,
                    &format!("/repos/{owner}/{repo}/contents/{path}"),
                    &token,
                    Some(serde_json::json!({ "message": format!("update {path}"), "content": encoded })),
                )
                .await
            }
            "create_issue" => {
                let title = opt_str(&params, "title").unwrap_or_default();
                let body = opt_str(&params, "body").unwrap_or_default();
                self.request(
                    reqwest::Method::POST,
                    &format!("/repos/{owner}/{repo}/issues"),
                    &token,
                    Some(serde_json::json!({ "title": title, "body": body })),
                )
                .await
            }
            "create_pr" => {
                let title = opt_str(&params, "title").unwrap_or_default();
                let body = opt_str(&params, "body").unwrap_or_default();
                let head = opt_str(&params, "head").unwrap_or_default();
                let base = opt_str(&params, "base").unwrap_or("main");
                self.request(
                    reqwest::Method::POST,
                    &format!("/repos/{owner}/{repo}/pulls"),
                    &token,
                    Some(serde_json::json!({ "title": title, "body": body, "head": head, "base": base })),
                )
                .await
            }
            other => Err(format!("unknown repo action '{other}'")),
        };

        match outcome {
            Ok(data) => ToolResult::ok(call_id, data, start.elapsed().as_millis() as u64),
            Err(e) => ToolResult::err(call_id, e, start.elapsed().as_millis() as u64),
        }
    }
}
