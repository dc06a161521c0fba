//! `AgentBuilder`: the single entry point for wiring every service the
//! [`Executor`] needs — LLM provider, tool registry, autonomy/approval
//! machinery, audit store — into one runnable object.
//!
//! Keeps the teacher's fluent provider setters (`.openai()`, `.groq()`,
//! `.ollama()`, `.anthropic()`, `.retry_on_error()`) and tool/config
//! setters verbatim in spirit; `build()` used to hand those to
//! `AgentEngine::new` with a fixed state-handler table, it now hands
//! them to `Executor::new` with the safety-envelope services the
//! teacher never had to assemble.

use crate::approval::ApprovalManager;
use crate::audit::AuditStore;
use crate::autonomy::{AutonomyPersistence, AutonomyService};
use crate::error::AgentError;
use crate::events::EventBus;
use crate::executor::{Executor, ExecutorConfig};
use crate::kill_switch::KillSwitch;
use crate::llm::{AnthropicModel, ChatModel, OpenAiModel, RetryingChatModel};
use crate::storage::{SqliteAuditStore, SqliteAutonomyStore};
use crate::tools::builtin;
use crate::tools::{Tool, ToolRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct AgentBuilder {
    llm: Option<Arc<dyn ChatModel>>,
    retry_count: Option<u32>,
    model: String,
    system_prompt: Option<String>,
    max_steps: usize,
    step_timeout: Duration,
    approval_timeout: Duration,
    max_retries: u32,
    tool_registry: ToolRegistry,
    fs_allowlist: Vec<PathBuf>,
    search_api_key: Option<String>,
    github_token: Option<String>,
    skip_builtin_tools: bool,
    autonomy_persistence: Option<Arc<dyn AutonomyPersistence>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    audit_db_path: Option<PathBuf>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            llm: None,
            retry_count: None,
            model: defaults.model,
            system_prompt: None,
            max_steps: defaults.max_steps,
            step_timeout: defaults.step_timeout,
            approval_timeout: defaults.approval_timeout,
            max_retries: defaults.max_retries,
            tool_registry: ToolRegistry::new(),
            fs_allowlist: Vec::new(),
            search_api_key: None,
            github_token: None,
            skip_builtin_tools: false,
            autonomy_persistence: None,
            audit_store: None,
            audit_db_path: None,
        }
    }

    pub fn system_prompt(mut self, p: impl Into<String>) -> Self {
        self.system_prompt = Some(p.into());
        self
    }

    // ── LLM provider setters ──────────────────────────────────────────────

    /// Set the chat model explicitly — the escape hatch for any provider
    /// not covered by the convenience methods below.
    pub fn llm(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.llm = Some(model);
        self
    }

    /// Use the standard OpenAI API.
    ///
    /// Reads `OPENAI_API_KEY` from the environment if you pass `""`, or
    /// pass an explicit key.
    ///
    /// ```no_run
    /// # use agentrt::AgentBuilder;
    /// AgentBuilder::new().openai("sk-...");
    /// ```
    pub fn openai(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        let model = if key.is_empty() {
            OpenAiModel::new()
        } else {
            OpenAiModel::with_base_url("https://api.openai.com/v1", key)
        };
        self.llm = Some(Arc::new(model));
        self
    }

    /// Use Groq's OpenAI-compatible inference API.
    ///
    /// ```no_run
    /// # use agentrt::AgentBuilder;
    /// AgentBuilder::new().groq("gsk_...").model("llama-3.3-70b-versatile");
    /// ```
    pub fn groq(mut self, api_key: impl Into<String>) -> Self {
        self.llm = Some(Arc::new(OpenAiModel::with_base_url(
            "https://api.groq.com/openai/v1",
            api_key,
        )));
        self
    }

    /// Use a local Ollama instance. `base_url` defaults to
    /// `"http://localhost:11434/v1"` if empty.
    ///
    /// ```no_run
    /// # use agentrt::AgentBuilder;
    /// AgentBuilder::new().ollama("").model("llama3.2");
    /// ```
    pub fn ollama(mut self, base_url: impl Into<String>) -> Self {
        let url = {
            let s = base_url.into();
            if s.is_empty() { "http://localhost:11434/v1".to_string() } else { s }
        };
        self.llm = Some(Arc::new(OpenAiModel::with_base_url(url, "ollama")));
        self
    }

    /// Use the Anthropic Messages API (Claude models).
    ///
    /// Reads `ANTHROPIC_API_KEY` from the environment if you pass `""`.
    ///
    /// ```no_run
    /// # use agentrt::AgentBuilder;
    /// AgentBuilder::new().anthropic("sk-ant-...").model("claude-opus-4-6");
    /// ```
    pub fn anthropic(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        let result = if key.is_empty() { AnthropicModel::from_env() } else { Ok(AnthropicModel::new(key)) };
        // Stored error surfaces at build() as "chat model is required".
        if let Ok(model) = result {
            self.llm = Some(Arc::new(model));
        }
        self
    }

    // ── Retry policy ─────────────────────────────────────────────────────

    /// Wrap the current chat model with automatic retry on transient
    /// errors. Auth errors (401/403) are never retried. Must be called
    /// after a provider method.
    pub fn retry_on_error(mut self, n: u32) -> Self {
        self.retry_count = Some(n);
        self
    }

    // ── Configuration ────────────────────────────────────────────────────

    pub fn max_steps(mut self, n: usize) -> Self {
        self.max_steps = n;
        self
    }

    pub fn step_timeout(mut self, d: Duration) -> Self {
        self.step_timeout = d;
        self
    }

    pub fn approval_timeout(mut self, d: Duration) -> Self {
        self.approval_timeout = d;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the model used for planning, reasoning steps, and the final
    /// summary call.
    ///
    /// ```no_run
    /// # use agentrt::AgentBuilder;
    /// AgentBuilder::new().model("gpt-4o");
    /// AgentBuilder::new().model("claude-sonnet-4-6");
    /// ```
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Path to the SQLite database backing the audit log and autonomy
    /// settings. Required unless `.audit_store()`/`.autonomy_persistence()`
    /// are supplied directly.
    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_db_path = Some(path.into());
        self
    }

    pub fn autonomy_persistence(mut self, persistence: Arc<dyn AutonomyPersistence>) -> Self {
        self.autonomy_persistence = Some(persistence);
        self
    }

    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    // ── Tool registration ────────────────────────────────────────────────

    /// Restrict the built-in filesystem tools (`file_read`, `file_write`,
    /// `file_delete`, `file_list`) to paths under these roots.
    pub fn fs_allowlist(mut self, roots: Vec<PathBuf>) -> Self {
        self.fs_allowlist = roots;
        self
    }

    pub fn web_search_api_key(mut self, key: impl Into<String>) -> Self {
        self.search_api_key = Some(key.into());
        self
    }

    pub fn github_token(mut self, token: impl Into<String>) -> Self {
        self.github_token = Some(token.into());
        self
    }

    /// Skip registering the eight built-in tools — for callers who want
    /// to register their own tool set from scratch via `.add_tool()`.
    pub fn without_builtin_tools(mut self) -> Self {
        self.skip_builtin_tools = true;
        self
    }

    /// Register a tool implementation directly.
    pub fn add_tool(self, tool: Arc<dyn Tool>) -> Self {
        self.tool_registry.register_builtin(tool);
        self
    }

    // ── Build ────────────────────────────────────────────────────────────

    /// Assembles every service and returns a ready-to-run [`Executor`].
    pub fn build(self) -> Result<Arc<Executor>, AgentError> {
        let mut llm = self.llm.ok_or_else(|| {
            AgentError::BuildError(
                "chat model is required — use .openai(), .groq(), .ollama(), .anthropic(), or .llm()".to_string(),
            )
        })?;

        if let Some(n) = self.retry_count {
            llm = Arc::new(RetryingChatModel::new(llm, n));
        }

        if !self.skip_builtin_tools {
            builtin::register_defaults(
                &self.tool_registry,
                self.fs_allowlist,
                self.search_api_key,
                self.github_token,
            );
        }
        let tool_registry = Arc::new(self.tool_registry);

        let autonomy_persistence = match self.autonomy_persistence {
            Some(p) => p,
            None => {
                let path = self
                    .audit_db_path
                    .clone()
                    .ok_or_else(|| AgentError::BuildError("call .database(path) or .autonomy_persistence(...)".to_string()))?;
                Arc::new(SqliteAutonomyStore::new(path).map_err(AgentError::StorageError)?)
            }
        };
        let autonomy = Arc::new(AutonomyService::new(autonomy_persistence));

        let audit: Arc<dyn AuditStore> = match self.audit_store {
            Some(s) => s,
            None => {
                let path = self
                    .audit_db_path
                    .ok_or_else(|| AgentError::BuildError("call .database(path) or .audit_store(...)".to_string()))?;
                Arc::new(SqliteAuditStore::new(path).map_err(AgentError::StorageError)?)
            }
        };

        let config = ExecutorConfig {
            model: self.model,
            max_steps: self.max_steps,
            step_timeout: self.step_timeout,
            approval_timeout: self.approval_timeout,
            max_retries: self.max_retries,
            system_prompt: self.system_prompt,
        };

        Ok(Executor::new(
            config,
            Arc::new(EventBus::new()),
            tool_registry,
            autonomy,
            Arc::new(ApprovalManager::new()),
            KillSwitch::new(),
            audit,
            llm,
        ))
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
