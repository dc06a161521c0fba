//! The runtime's closed-set error taxonomy.
//!
//! Failures inside a tool are always captured into a [`crate::types::ToolResult`]
//! and never escape as a panic across the executor boundary — see
//! `executor::execute_with_safety`. `AgentError` is for failures in the
//! surrounding machinery: the state machine itself, the planner, storage.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("token budget exceeded")]
    BudgetExceeded,

    #[error("{kind} timed out after {elapsed_ms}ms")]
    Timeout { kind: TimeoutKind, elapsed_ms: u64 },

    #[error("parameter validation failed for tool '{tool_name}': {reason}")]
    Validation { tool_name: String, reason: String },

    #[error("transport error talking to '{server}': {reason}")]
    Transport { server: String, reason: String },

    #[error("tool '{tool_name}' reported failure: {reason}")]
    ToolFailure { tool_name: String, reason: String, retryable: bool },

    #[error("session cancelled: {0}")]
    Cancelled(String),

    #[error("approval for '{tool_name}' was rejected")]
    ApprovalRejected { tool_name: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("step iteration cap ({0}) exceeded")]
    IterationCapExceeded(usize),

    #[error("planner error: {0}")]
    PlannerError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("build error: {0}")]
    BuildError(String),
}

/// Which kind of timeout fired. Plan-level, tool-level, and approval-level
/// timeouts are distinguished because they retry differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Plan,
    Tool,
    Approval,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeoutKind::Plan => "plan",
            TimeoutKind::Tool => "tool",
            TimeoutKind::Approval => "approval",
        };
        write!(f, "{s}")
    }
}

impl AgentError {
    /// Whether the executor's retry loop should re-attempt this failure.
    /// Schema validation errors and approval rejections never retry
    ///; transport errors and tool failures that
    /// declare themselves retryable do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Transport { .. }
                | AgentError::Timeout { kind: TimeoutKind::Tool, .. }
                | AgentError::ToolFailure { retryable: true, .. }
        )
    }
}
