//! Core value types shared across the runtime: sessions, plans, tool
//! calls/results, events, risk classification, and approvals.
//!
//! These are plain values — the executor owns them and copies them into
//! events or persists them; nothing here holds a lock or a connection.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Lifecycle state of a [`crate::session::Session`].
///
/// Once a session reaches one of the three terminal variants it never
/// changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Planning,
    Executing,
    AwaitingTool,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One role+content pair in a session's conversation with the `ChatModel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    /// Present when this message is the assistant requesting tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Present when this message reports a tool result back to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation, either requested by the LLM or emitted by a plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub parameters: HashMap<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, parameters: HashMap<String, serde_json::Value>) -> Self {
        Self { id: Uuid::new_v4().to_string(), tool_name: tool_name.into(), parameters }
    }
}

/// The outcome of executing a [`ToolCall`]. Produced at most once per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, data: serde_json::Value, duration_ms: u64) -> Self {
        Self { call_id: call_id.into(), success: true, data: Some(data), error: None, duration_ms }
    }

    pub fn err(call_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self { call_id: call_id.into(), success: false, data: None, error: Some(error.into()), duration_ms }
    }

    /// A short, human-readable rendering used in trace/observation text.
    pub fn summary(&self) -> String {
        if self.success {
            format!("SUCCESS: {}", self.data.as_ref().map(|d| d.to_string()).unwrap_or_default())
        } else {
            format!("ERROR: {}", self.error.clone().unwrap_or_default())
        }
    }
}

/// JSON-schema-described tool metadata, convertible into any provider's
/// function-calling shape by the `llm` module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object (`{"type": "object", ...}`).
    pub parameters: serde_json::Value,
    /// Free-form taxonomy string.
    pub category: String,
    pub is_destructive: bool,
    pub requires_approval_default: bool,
}

/// Status of a single step in a [`Plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One node in a [`Plan`]'s step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tool_name: None,
            params: None,
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// An ordered decomposition of a task into steps, produced by the planner.
///
/// Immutable after creation — re-planning produces a new `Plan` plus a new
/// `plan_created` event, never a mutation of this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    pub overview: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Single-step fallback plan used when the planner cannot parse a
    /// response from the model — never returns an error, so the loop
    /// always has something runnable.
    pub fn fallback(task: impl Into<String>) -> Self {
        let task = task.into();
        Self {
            overview: "Fallback plan: ask the model to answer directly.".to_string(),
            steps: vec![PlanStep::new("step-1", task.clone())],
            task,
        }
    }

    /// Validates that every dependency id refers to a step within this
    /// plan and that the dependency graph has no cycles. Called once at
    /// plan-creation time; the executor trusts a `Plan` it is given.
    pub fn validate(&self) -> Result<(), String> {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(format!("step '{}' depends on unknown step '{}'", step.id, dep));
                }
            }
        }
        if self.has_cycle() {
            return Err("plan contains a dependency cycle".to_string());
        }
        Ok(())
    }

    fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark { Unvisited, Visiting, Done }
        let mut marks: HashMap<&str, Mark> =
            self.steps.iter().map(|s| (s.id.as_str(), Mark::Unvisited)).collect();
        let by_id: HashMap<&str, &PlanStep> = self.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a PlanStep>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> bool {
            match marks.get(id).copied().unwrap_or(Mark::Done) {
                Mark::Visiting => return true,
                Mark::Done => return false,
                Mark::Unvisited => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(step) = by_id.get(id) {
                for dep in &step.dependencies {
                    if visit(dep.as_str(), by_id, marks) {
                        return true;
                    }
                }
            }
            marks.insert(id, Mark::Done);
            false
        }

        self.steps.iter().any(|s| visit(s.id.as_str(), &by_id, &mut marks))
    }

    /// The next step eligible to run: `Pending` with all dependencies
    /// `Completed`. Picks the first such step in declaration order —
    /// the executor may run ready steps in any order, but this keeps
    /// behavior deterministic for a given plan.
    pub fn next_runnable(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| {
            s.status == StepStatus::Pending
                && s.dependencies.iter().all(|dep| {
                    self.steps
                        .iter()
                        .find(|d| &d.id == dep)
                        .map(|d| d.status == StepStatus::Completed)
                        .unwrap_or(false)
                })
        })
    }

    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
    }

    /// True when the plan can make no further progress: not complete, and
    /// no step is runnable (a step failed whose dependents can never run).
    pub fn has_failed(&self) -> bool {
        !self.is_complete() && self.next_runnable().is_none()
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }
}

/// Risk tier assigned by the [`crate::classifier::Classifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Safe,
    Moderate,
    Destructive,
    Critical,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskTier::Safe => "safe",
            RiskTier::Moderate => "moderate",
            RiskTier::Destructive => "destructive",
            RiskTier::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Pure value object: the classifier's verdict for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionClassification {
    pub tool_name: String,
    pub parameters: HashMap<String, serde_json::Value>,
    pub risk_level: RiskTier,
    pub reason: String,
    pub requires_approval: bool,
}

/// The five autonomy levels, from fully manual to fully unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    L1,
    L2,
    L3,
    L4,
    L5,
}

impl AutonomyLevel {
    /// Risk tiers this level auto-executes without approval.
    pub fn auto_execute_tiers(self) -> &'static [RiskTier] {
        use RiskTier::*;
        match self {
            AutonomyLevel::L1 => &[],
            AutonomyLevel::L2 => &[Safe],
            AutonomyLevel::L3 => &[Safe, Moderate],
            AutonomyLevel::L4 => &[Safe, Moderate, Destructive],
            AutonomyLevel::L5 => &[Safe, Moderate, Destructive, Critical],
        }
    }
}

impl Default for AutonomyLevel {
    fn default() -> Self {
        AutonomyLevel::L2
    }
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which scope an "approve similar" decision is remembered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RememberScope {
    Session,
    ToolType,
}

/// Final disposition of an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Timeout,
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A pending request for human sign-off, queued by the approval manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub classification: ActionClassification,
    pub step_id: String,
    pub session_id: String,
}

/// The UI's (or test harness's) answer to an [`ApprovalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub decision: ApprovalDecision,
    pub approve_similar: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_params: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember_scope: Option<RememberScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
}

impl ApprovalResult {
    pub fn approved(decided_by: impl Into<String>) -> Self {
        Self {
            decision: ApprovalDecision::Approved,
            approve_similar: false,
            modified_params: None,
            remember_scope: None,
            decided_by: Some(decided_by.into()),
        }
    }

    pub fn rejected() -> Self {
        Self {
            decision: ApprovalDecision::Rejected,
            approve_similar: false,
            modified_params: None,
            remember_scope: None,
            decided_by: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            decision: ApprovalDecision::Timeout,
            approve_similar: false,
            modified_params: None,
            remember_scope: None,
            decided_by: None,
        }
    }
}

/// A durable, append-only record of one attempted tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub session_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tool_name: String,
    pub risk_level: RiskTier,
    /// JSON-encoded parameters, truncated to 4 KiB for non-YOLO entries.
    pub parameters: String,
    /// Only populated when `yolo_mode = true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_parameters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_decision: Option<ApprovalDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub yolo_mode: bool,
}

/// Transport kind for an [`ExternalServerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Http,
}

/// Trust tier of an external tool server, governing default approval and
/// sandbox policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTrust {
    Builtin,
    Verified,
    UserAdded,
}

/// Configuration for one external tool server (MCP-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServerConfig {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub trust: ServerTrust,
    pub sandbox_enabled: bool,
    /// Container image the sandboxed stdio process runs inside. Required
    /// whenever `sandbox_enabled=true` — the server's own `command`
    /// (e.g. `npx`, `python3`) is launched as the in-container process,
    /// not the image reference, so an image must be named explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub enabled: bool,
    pub category: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ExternalServerConfig {
    /// Validates the stdio-xor-http invariant: exactly one transport's
    /// required field must be set.
    pub fn validate(&self) -> Result<(), String> {
        match self.transport {
            TransportKind::Stdio if self.command.is_none() => {
                return Err("stdio transport requires `command`".to_string());
            }
            TransportKind::Http if self.url.is_none() => {
                return Err("http transport requires `url`".to_string());
            }
            _ => {}
        }
        if self.transport == TransportKind::Stdio && self.sandbox_enabled && self.image.is_none() {
            return Err("sandbox_enabled requires `image`".to_string());
        }
        Ok(())
    }

    /// Parses the Claude-Desktop-style `{"mcpServers": {name: {...}}}`
    /// config shape into one `ExternalServerConfig` per entry. A server
    /// entry with a `url` field is treated as HTTP; one with `command`
    /// as stdio. Every parsed entry defaults to `trust: UserAdded` and
    /// `sandbox_enabled: true` — callers must re-classify trust
    /// explicitly for anything that should run unsandboxed.
    pub fn from_mcp_json(json: &str) -> Result<Vec<Self>, String> {
        #[derive(Deserialize)]
        struct McpServerEntry {
            #[serde(default)]
            command: Option<String>,
            #[serde(default)]
            args: Vec<String>,
            #[serde(default)]
            env: HashMap<String, String>,
            #[serde(default)]
            url: Option<String>,
            #[serde(default)]
            headers: HashMap<String, String>,
        }
        #[derive(Deserialize)]
        struct McpServersFile {
            #[serde(rename = "mcpServers")]
            mcp_servers: HashMap<String, McpServerEntry>,
        }

        let parsed: McpServersFile =
            serde_json::from_str(json).map_err(|e| format!("invalid mcpServers json: {e}"))?;

        let now = chrono::Utc::now();
        let mut configs: Vec<Self> = parsed
            .mcp_servers
            .into_iter()
            .map(|(name, entry)| {
                let transport = if entry.url.is_some() { TransportKind::Http } else { TransportKind::Stdio };
                let image = entry.command.as_deref().and_then(default_image_for_command);
                Self {
                    id: name.clone(),
                    name,
                    transport,
                    command: entry.command,
                    args: entry.args,
                    env: entry.env,
                    url: entry.url,
                    headers: entry.headers,
                    trust: ServerTrust::UserAdded,
                    sandbox_enabled: true,
                    image,
                    enabled: true,
                    category: "user_added".to_string(),
                    created_at: now,
                    last_connected: None,
                    last_error: None,
                }
            })
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));

        for config in &configs {
            config.validate()?;
        }
        Ok(configs)
    }
}

/// Best-effort container image for a stdio server's launch command,
/// used only to seed [`ExternalServerConfig::from_mcp_json`]'s imports
/// (which default to `sandbox_enabled: true` but carry no image of
/// their own). Unrecognized commands yield `None`, which makes
/// `validate()` fail and forces the caller to set an image explicitly
/// rather than guessing at an unrelated runtime.
fn default_image_for_command(command: &str) -> Option<String> {
    let binary = std::path::Path::new(command).file_name().and_then(|n| n.to_str()).unwrap_or(command);
    match binary {
        "npx" | "node" | "npm" => Some("node:20-alpine".to_string()),
        "python" | "python3" | "uv" | "uvx" | "pip" | "pip3" => Some("python:3.12-slim".to_string()),
        "deno" => Some("denoland/deno:alpine".to_string()),
        "bun" | "bunx" => Some("oven/bun:alpine".to_string()),
        _ => None,
    }
}

/// Per-project autonomy configuration. `L5` is intentionally absent from
/// this struct's persisted form — see [`crate::autonomy::AutonomyService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomySettings {
    pub project_path: String,
    pub level: AutonomyLevel,
    pub allowlist: Vec<String>,
    pub blocklist: Vec<String>,
}

impl Default for AutonomySettings {
    fn default() -> Self {
        Self {
            project_path: String::new(),
            level: AutonomyLevel::default(),
            allowlist: Vec::new(),
            blocklist: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_mcp_json_parses_stdio_and_http_entries() {
        let json = r#"{"mcpServers": {
            "filesystem": {"command": "npx", "args": ["-y", "@modelcontextprotocol/server-filesystem"]},
            "remote": {"url": "https://example.com/mcp", "headers": {"Authorization": "Bearer x"}}
        }}"#;
        let configs = ExternalServerConfig::from_mcp_json(json).unwrap();
        assert_eq!(configs.len(), 2);

        let filesystem = configs.iter().find(|c| c.id == "filesystem").unwrap();
        assert_eq!(filesystem.transport, TransportKind::Stdio);
        assert_eq!(filesystem.command.as_deref(), Some("npx"));

        let remote = configs.iter().find(|c| c.id == "remote").unwrap();
        assert_eq!(remote.transport, TransportKind::Http);
        assert_eq!(remote.url.as_deref(), Some("https://example.com/mcp"));
    }

    #[test]
    fn from_mcp_json_rejects_malformed_input() {
        assert!(ExternalServerConfig::from_mcp_json("not json").is_err());
    }

    #[test]
    fn plan_next_runnable_respects_declared_dependencies() {
        let mut plan = Plan {
            task: "t".to_string(),
            overview: "o".to_string(),
            steps: vec![PlanStep::new("a", "first"), PlanStep::new("b", "second")],
        };
        plan.steps[1].dependencies = vec!["a".to_string()];
        assert_eq!(plan.next_runnable().unwrap().id, "a");

        plan.step_mut("a").unwrap().status = StepStatus::Completed;
        assert_eq!(plan.next_runnable().unwrap().id, "b");
    }

    #[test]
    fn plan_validate_rejects_cycles_and_unknown_deps() {
        let mut plan = Plan {
            task: "t".to_string(),
            overview: "o".to_string(),
            steps: vec![PlanStep::new("a", "first")],
        };
        plan.steps[0].dependencies = vec!["nonexistent".to_string()];
        assert!(plan.validate().is_err());

        plan.steps[0].dependencies = vec!["a".to_string()];
        assert!(plan.validate().is_err(), "a step depending on itself is a cycle");
    }
}
