//! The plan-and-execute orchestrator: drives one
//! [`Session`] from `Idle` to a terminal state, running each runnable
//! [`PlanStep`] through the risk-classify → maybe-approve →
//! retry-with-backoff → audit pipeline ("`execute_with_safety`").
//!
//! An earlier dispatch-table design — independent `Box<dyn AgentState>`
//! trait objects driven by a `(State, Event) -> next-state` table — doesn't
//! compose with the suspension points this loop needs: an approval wait
//! that must race the kill switch's `Notify`, and a retry backoff sleep
//! that must do the same, each needing a single async task to hold the
//! race rather than a handler invoked once and returned from. This module
//! keeps the plan → act → observe → reflect phase structure, logged at
//! each transition, as the shape of one `run_loop` function instead. The
//! tradeoff is recorded in DESIGN.md.

use crate::audit::{build_entry, AuditStore};
use crate::autonomy::AutonomyService;
use crate::classifier::Classifier;
use crate::events::{EventBus, EventPayload, SessionEmitter};
use crate::kill_switch::KillSwitch;
use crate::approval::ApprovalManager;
use crate::llm::ChatModel;
use crate::planner::Planner;
use crate::session::Session;
use crate::tools::{AgentContext, ToolRegistry};
use crate::types::{
    ApprovalDecision, AutonomyLevel, Message, SessionState, StepStatus, ToolCall, ToolResult,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_FACTOR: u32 = 2;
const RETRY_CAP: Duration = Duration::from_secs(30);
const MAX_SECONDS: Duration = Duration::from_secs(300);

pub struct ExecutorConfig {
    pub model: String,
    pub max_steps: usize,
    pub step_timeout: Duration,
    pub approval_timeout: Duration,
    pub max_retries: u32,
    pub system_prompt: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_steps: 20,
            step_timeout: Duration::from_secs(120),
            approval_timeout: Duration::from_secs(300),
            max_retries: 3,
            system_prompt: None,
        }
    }
}

/// Owns every service the loop needs and drives exactly one [`Session`]
/// per call to [`Executor::run`]. Safe to reuse across many runs — all
/// state specific to one run lives in the [`Session`] it returns.
pub struct Executor {
    config: ExecutorConfig,
    event_bus: Arc<EventBus>,
    tool_registry: Arc<ToolRegistry>,
    classifier: Classifier,
    autonomy: Arc<AutonomyService>,
    approval: Arc<ApprovalManager>,
    kill_switch: KillSwitch,
    audit: Arc<dyn AuditStore>,
    chat_model: Arc<dyn ChatModel>,
    planner: Planner,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        event_bus: Arc<EventBus>,
        tool_registry: Arc<ToolRegistry>,
        autonomy: Arc<AutonomyService>,
        approval: Arc<ApprovalManager>,
        kill_switch: KillSwitch,
        audit: Arc<dyn AuditStore>,
        chat_model: Arc<dyn ChatModel>,
    ) -> Arc<Self> {
        let planner = Planner::new(chat_model.clone(), config.model.clone());
        let executor = Arc::new(Self {
            config,
            event_bus: event_bus.clone(),
            tool_registry,
            classifier: Classifier::new(),
            autonomy,
            approval: approval.clone(),
            kill_switch,
            audit,
            chat_model,
            planner,
        });

        // The approval manager knows nothing about the event bus; wire
        // its request callback to publish `approval_requested` here so
        // subscribers see it without `approval.rs` depending on `events.rs`.
        let bus_for_callback = event_bus;
        approval.set_on_request(Box::new(move |request_id, classification, step_id| {
            let session_id = request_id.split(':').next().unwrap_or_default();
            bus_for_callback.publish(crate::events::AgentEvent::new(
                session_id,
                EventPayload::ApprovalRequested {
                    request_id: request_id.to_string(),
                    classification: classification.clone(),
                    step_id: step_id.to_string(),
                },
            ));
        }));

        executor
    }

    /// Resolves a pending approval request — the UI's (or test
    /// harness's) answer path, forwarded straight to the
    /// [`ApprovalManager`].
    pub fn resolve_approval(&self, request_id: &str, result: crate::types::ApprovalResult) -> bool {
        self.approval.resolve(request_id, result)
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        self.kill_switch.trigger(reason);
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<crate::events::AgentEvent> {
        self.event_bus.subscribe()
    }

    /// The autonomy service backing this executor — exposed so a caller
    /// can change a project's level (e.g. opt into L5/YOLO) before
    /// calling [`Self::run`].
    pub fn autonomy(&self) -> &Arc<AutonomyService> {
        &self.autonomy
    }

    /// Runs `task` to a terminal session state. Never panics and never
    /// returns early on tool/model failure — every failure mode ends in
    /// a terminal `Session` whose `error` field (if any) explains why.
    pub async fn run(&self, task: impl Into<String>, project_path: Option<String>) -> Session {
        let task = task.into();
        let mut session = Session::new(task.clone());
        if let Some(path) = &project_path {
            session = session.with_project_path(path.clone());
        }
        self.kill_switch.reset();
        self.approval.start_session(&session.id);
        let emitter = SessionEmitter::new(&self.event_bus, session.id.clone());

        session.transition(SessionState::Planning);
        emitter.emit(EventPayload::StateChange { from: SessionState::Idle, to: SessionState::Planning });

        let tool_defs = self.tool_registry.get_all_definitions();
        let plan = self.planner.plan(&task, &tool_defs).await;
        emitter.emit(EventPayload::PlanCreated { plan: plan.clone() });
        session.current_plan = Some(plan);

        session.transition(SessionState::Executing);
        emitter.emit(EventPayload::StateChange { from: SessionState::Planning, to: SessionState::Executing });

        self.run_loop(&mut session, &emitter).await;

        self.approval.end_session(&session.id);
        session
    }

    async fn run_loop(&self, session: &mut Session, emitter: &SessionEmitter<'_>) {
        let mut steps_run = 0usize;
        let started_at = Instant::now();

        loop {
            if self.kill_switch.is_triggered() {
                let reason = self.kill_switch.reason().unwrap_or_else(|| "cancelled".to_string());
                emitter.emit(EventPayload::KillSwitchTriggered { reason: reason.clone() });
                session.finish(SessionState::Cancelled);
                emitter.emit(EventPayload::Cancelled { reason });
                return;
            }

            if started_at.elapsed() > MAX_SECONDS {
                let err = format!("exceeded time budget ({}s)", MAX_SECONDS.as_secs());
                session.error = Some(err.clone());
                session.finish(SessionState::Failed);
                emitter.emit(EventPayload::Error { message: err });
                return;
            }

            if !session.budget.can_proceed() {
                emitter.emit(EventPayload::BudgetExceeded);
                session.error = Some("token budget exceeded".to_string());
                session.finish(SessionState::Failed);
                emitter.emit(EventPayload::Error { message: "token budget exceeded".to_string() });
                return;
            }

            if steps_run >= self.config.max_steps {
                session.error = Some(format!("exceeded max_steps ({})", self.config.max_steps));
                session.finish(SessionState::Failed);
                emitter.emit(EventPayload::Error { message: session.error.clone().unwrap() });
                return;
            }

            let next_id = match session.current_plan.as_ref().and_then(|p| p.next_runnable()) {
                Some(step) => step.id.clone(),
                None => {
                    let plan = session.current_plan.as_ref().unwrap();
                    if plan.is_complete() {
                        let answer = self.summarize(session).await;
                        session.final_answer = Some(answer.clone());
                        session.finish(SessionState::Completed);
                        emitter.emit(EventPayload::Completed { answer });
                    } else {
                        let err = "plan stalled: a dependency failed and no further step is runnable".to_string();
                        session.error = Some(err.clone());
                        session.finish(SessionState::Failed);
                        emitter.emit(EventPayload::Error { message: err });
                    }
                    return;
                }
            };

            steps_run += 1;
            self.run_step(session, emitter, &next_id).await;
        }
    }

    async fn run_step(&self, session: &mut Session, emitter: &SessionEmitter<'_>, step_id: &str) {
        {
            let plan = session.current_plan.as_mut().unwrap();
            let step = plan.step_mut(step_id).unwrap();
            step.status = StepStatus::Running;
            emitter.emit(EventPayload::StepStarted { step: step.clone() });
        }

        let tool_name = session
            .current_plan
            .as_ref()
            .unwrap()
            .steps
            .iter()
            .find(|s| s.id == step_id)
            .and_then(|s| s.tool_name.clone());

        let outcome = match tool_name {
            Some(tool_name) => self.run_tool_step(session, step_id, &tool_name).await,
            None => self.run_reasoning_step(session, step_id).await,
        };

        let plan = session.current_plan.as_mut().unwrap();
        let step = plan.step_mut(step_id).unwrap();
        match outcome {
            StepOutcome::Completed(result) => {
                step.status = StepStatus::Completed;
                step.result = Some(result);
            }
            StepOutcome::Skipped(reason) => {
                step.status = StepStatus::Skipped;
                step.error = Some(reason);
            }
            StepOutcome::Failed(reason) => {
                step.status = StepStatus::Failed;
                step.error = Some(reason);
            }
        }
        let finished = step.clone();
        emitter.emit(EventPayload::StepCompleted { step: finished });
    }

    async fn run_reasoning_step(&self, session: &mut Session, step_id: &str) -> StepOutcome {
        let description = session
            .current_plan
            .as_ref()
            .unwrap()
            .steps
            .iter()
            .find(|s| s.id == step_id)
            .map(|s| s.description.clone())
            .unwrap_or_default();

        let mut messages = Vec::new();
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend(session.messages.clone());
        messages.push(Message::user(description));

        match self.chat_model.chat(&messages, &[], &self.config.model).await {
            Ok(response) => {
                session.record_usage(response.input_tokens, response.output_tokens);
                let content = response.content.unwrap_or_default();
                session.push_message(Message::assistant(content.clone()));
                StepOutcome::Completed(serde_json::json!(content))
            }
            Err(reason) => StepOutcome::Failed(reason),
        }
    }

    async fn run_tool_step(&self, session: &mut Session, step_id: &str, tool_name: &str) -> StepOutcome {
        let params = session
            .current_plan
            .as_ref()
            .unwrap()
            .steps
            .iter()
            .find(|s| s.id == step_id)
            .and_then(|s| s.params.clone())
            .unwrap_or_else(|| serde_json::json!({}));
        let parameters: std::collections::HashMap<String, serde_json::Value> =
            serde_json::from_value(params.clone()).unwrap_or_default();

        if session.blacklisted_tools.contains(tool_name) {
            return StepOutcome::Skipped(format!("tool '{tool_name}' is blacklisted for this session"));
        }

        match self.execute_with_safety(session, step_id, tool_name, parameters).await {
            Ok(Some(result)) => {
                if result.success {
                    StepOutcome::Completed(result.data.unwrap_or(serde_json::Value::Null))
                } else {
                    StepOutcome::Failed(result.error.unwrap_or_default())
                }
            }
            Ok(None) => StepOutcome::Skipped("approval request timed out".to_string()),
            Err(reason) => StepOutcome::Failed(reason),
        }
    }

    /// The safety pipeline for one tool call: classify → maybe request
    /// approval → retry-with-backoff on retryable failure → audit.
    ///
    /// Returns `Ok(None)` for an approval timeout (a soft skip, not a
    /// rejection) and `Err` for a rejection or an unrecoverable failure.
    async fn execute_with_safety(
        &self,
        session: &mut Session,
        step_id: &str,
        tool_name: &str,
        parameters: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<Option<ToolResult>, String> {
        let project_path = session.project_path.clone();
        let settings = self
            .autonomy
            .get_settings(project_path.as_deref().unwrap_or_default())
            .await
            .map_err(|e| format!("autonomy lookup failed: {e}"))?;
        let yolo_mode = settings.level == AutonomyLevel::L5;
        let tool_def = self.tool_registry.get_all_definitions().into_iter().find(|d| d.name == tool_name);

        let classification =
            self.classifier.classify(tool_name, &parameters, project_path.as_deref(), &settings, tool_def.as_ref());
        let emitter = SessionEmitter::new(&self.event_bus, session.id.clone());
        emitter.emit(EventPayload::ActionClassified { classification: classification.clone() });

        let mut approved_by = None;
        let mut approval_decision = None;

        if classification.requires_approval {
            let result = self
                .approval
                .request_approval(classification.clone(), step_id, &session.id, self.config.approval_timeout)
                .await;
            emitter.emit(EventPayload::ApprovalReceived { result: result.clone() });
            approval_decision = Some(result.decision);
            approved_by = result.decided_by.clone();

            match result.decision {
                ApprovalDecision::Rejected => {
                    self.record_audit(session, tool_name, classification.risk_level, &parameters, approval_decision, approved_by, 0, false, None, Some("rejected by reviewer".to_string()), yolo_mode).await;
                    return Err("approval rejected".to_string());
                }
                ApprovalDecision::Timeout => {
                    self.record_audit(session, tool_name, classification.risk_level, &parameters, approval_decision, approved_by, 0, false, None, Some("approval timed out".to_string()), yolo_mode).await;
                    return Ok(None);
                }
                ApprovalDecision::Approved => {}
            }
        }

        let call = ToolCall::new(tool_name, parameters.clone());
        let ctx = AgentContext::with_variables(session.id.clone(), project_path, session.variables.clone());

        let mut attempt = 0u32;
        let mut delay = RETRY_BASE;
        loop {
            attempt += 1;
            let attempt_result =
                tokio::time::timeout(self.config.step_timeout, self.tool_registry.execute(&call, &ctx)).await;

            let result = match attempt_result {
                Ok(result) => result,
                Err(_) => ToolResult::err(call.id.clone(), format!("tool '{tool_name}' timed out"), self.config.step_timeout.as_millis() as u64),
            };

            session.variables = ctx.snapshot_variables();
            emitter.emit(EventPayload::ToolCalled { call: call.clone() });
            emitter.emit(EventPayload::ToolResultEvent { result: result.clone() });

            let should_retry = !result.success && attempt < self.config.max_retries && is_retryable_failure(&result);
            if !should_retry {
                self.record_audit(
                    session,
                    tool_name,
                    classification.risk_level,
                    &parameters,
                    approval_decision,
                    approved_by.clone(),
                    result.duration_ms,
                    result.success,
                    result.data.as_ref().map(|d| d.to_string()),
                    result.error.clone(),
                    yolo_mode,
                )
                .await;
                return Ok(Some(result));
            }

            tracing::warn!(tool_name, attempt, "tool call failed, retrying after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.kill_switch.wait() => {
                    self.record_audit(
                        session,
                        tool_name,
                        classification.risk_level,
                        &parameters,
                        approval_decision,
                        approved_by.clone(),
                        result.duration_ms,
                        result.success,
                        result.data.as_ref().map(|d| d.to_string()),
                        result.error.clone(),
                        yolo_mode,
                    )
                    .await;
                    return Ok(Some(result));
                }
            }
            delay = std::cmp::min(delay * RETRY_FACTOR, RETRY_CAP);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_audit(
        &self,
        session: &Session,
        tool_name: &str,
        risk_level: crate::types::RiskTier,
        parameters: &std::collections::HashMap<String, serde_json::Value>,
        approval_decision: Option<ApprovalDecision>,
        approved_by: Option<String>,
        duration_ms: u64,
        success: bool,
        result: Option<String>,
        error: Option<String>,
        yolo_mode: bool,
    ) {
        let parameters_json = serde_json::to_string(parameters).unwrap_or_default();
        let entry = build_entry(
            &session.id,
            tool_name,
            risk_level,
            &parameters_json,
            approval_decision,
            approved_by,
            duration_ms,
            success,
            result,
            error,
            yolo_mode,
        );
        if let Err(reason) = self.audit.append(entry).await {
            tracing::error!(%reason, "failed to append audit entry");
        }
    }

    /// Produces the session's final answer text once every step has
    /// settled — a last call to the model summarizing completed step
    /// results, falling back to a plain listing if that call fails.
    async fn summarize(&self, session: &Session) -> String {
        let plan = session.current_plan.as_ref().unwrap();
        let results: Vec<String> = plan
            .steps
            .iter()
            .map(|s| format!("- {} ({:?}): {}", s.description, s.status, s.result.as_ref().map(|r| r.to_string()).unwrap_or_default()))
            .collect();
        let summary_prompt = format!(
            "Task: {}\n\nStep results:\n{}\n\nWrite a concise final answer for the user.",
            session.task,
            results.join("\n")
        );
        let messages = vec![Message::user(summary_prompt)];
        match self.chat_model.chat(&messages, &[], &self.config.model).await {
            Ok(response) => response.content.unwrap_or_else(|| results.join("\n")),
            Err(_) => results.join("\n"),
        }
    }
}

enum StepOutcome {
    Completed(serde_json::Value),
    Skipped(String),
    Failed(String),
}

fn is_retryable_failure(result: &ToolResult) -> bool {
    result
        .error
        .as_deref()
        .map(|e| {
            let lower = e.to_lowercase();
            lower.contains("timed out") || lower.contains("timeout") || lower.contains("connection") || lower.contains("transport")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomy::AutonomyPersistence;
    use crate::llm::{ChatResponse, MockChatModel};
    use crate::storage::SqliteAuditStore;
    use crate::tools::builtin;
    use async_trait::async_trait;
    use std::collections::HashMap as StdMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct InMemoryPersistence {
        data: StdMutex<StdMap<String, crate::types::AutonomySettings>>,
    }

    #[async_trait]
    impl AutonomyPersistence for InMemoryPersistence {
        async fn load(&self, project_path: &str) -> Result<Option<crate::types::AutonomySettings>, String> {
            Ok(self.data.lock().unwrap().get(project_path).cloned())
        }
        async fn save(&self, settings: &crate::types::AutonomySettings) -> Result<(), String> {
            self.data.lock().unwrap().insert(settings.project_path.clone(), settings.clone());
            Ok(())
        }
    }

    /// A tool that always fails with a retryable-looking error, counting
    /// how many times it was actually invoked.
    struct FlakyTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::tools::Tool for FlakyTool {
        fn name(&self) -> String {
            "flaky".to_string()
        }
        fn description(&self) -> String {
            "Always fails with a transport error".to_string()
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _params: StdMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolResult::err("tmp", "transport error: connection reset".to_string(), 1)
        }
    }

    fn make_executor(responses: Vec<ChatResponse>, audit_path: &std::path::Path, registry: Arc<ToolRegistry>) -> Arc<Executor> {
        let autonomy = Arc::new(AutonomyService::new(Arc::new(InMemoryPersistence { data: StdMutex::new(StdMap::new()) })));
        let audit = Arc::new(SqliteAuditStore::new(audit_path).unwrap());
        Executor::new(
            ExecutorConfig { max_steps: 10, ..Default::default() },
            Arc::new(EventBus::new()),
            registry,
            autonomy,
            Arc::new(ApprovalManager::new()),
            KillSwitch::new(),
            audit,
            Arc::new(MockChatModel::new(responses)),
        )
    }

    fn default_registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        builtin::register_defaults(&registry, vec![], None, None);
        registry
    }

    #[tokio::test]
    async fn fallback_plan_runs_a_single_reasoning_step_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("audit.sqlite3");
        // Planner call fails to parse -> fallback plan; then one chat call
        // answers the single fallback step; then summarize() issues a third call.
        let responses = vec![
            ChatResponse { content: Some("not json".to_string()), tool_calls: vec![], input_tokens: 1, output_tokens: 1 },
            ChatResponse { content: Some("42".to_string()), tool_calls: vec![], input_tokens: 2, output_tokens: 2 },
            ChatResponse { content: Some("The answer is 42.".to_string()), tool_calls: vec![], input_tokens: 1, output_tokens: 1 },
        ];
        let executor = make_executor(responses, &db, default_registry());
        let session = executor.run("what is the answer?", None).await;
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.final_answer.as_deref(), Some("The answer is 42."));
    }

    #[tokio::test]
    async fn kill_switch_already_triggered_skips_the_retry_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("audit.sqlite3");
        let registry = Arc::new(ToolRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register_builtin(Arc::new(FlakyTool { calls: calls.clone() }));

        let executor = make_executor(vec![], &db, registry);
        // Trigger before the call so `KillSwitch::wait()`'s first check
        // (no registration race) is the one that fires.
        executor.cancel("test cancellation");

        let mut session = Session::new("task");
        let result = executor
            .execute_with_safety(&mut session, "step-1", "flaky", StdMap::new())
            .await
            .expect("execute_with_safety does not itself error on a retryable tool failure");

        // One attempt runs (retries are only skipped *between* attempts),
        // then the kill switch short-circuits further backoff.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!result.unwrap().success);
    }

    #[tokio::test]
    async fn blacklisted_tool_step_is_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("audit.sqlite3");
        let executor = make_executor(vec![], &db, default_registry());
        let mut session = Session::new("task");
        session.blacklist_tool("file_delete");
        session.current_plan = Some(crate::types::Plan {
            task: "task".to_string(),
            overview: "single destructive step".to_string(),
            steps: vec![crate::types::PlanStep {
                id: "step-1".to_string(),
                description: "delete a file".to_string(),
                tool_name: Some("file_delete".to_string()),
                params: Some(serde_json::json!({"path": "/tmp/x"})),
                dependencies: vec![],
                status: StepStatus::Pending,
                result: None,
                error: None,
            }],
        });
        let emitter = SessionEmitter::new(&executor.event_bus, session.id.clone());
        executor.run_step(&mut session, &emitter, "step-1").await;
        let step = session.current_plan.as_ref().unwrap().steps.first().unwrap();
        assert_eq!(step.status, StepStatus::Skipped);
    }
}
