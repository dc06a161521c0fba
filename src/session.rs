//! [`Session`] — one execution of one task, from `run` to terminal event.
//!
//! Holds a `state` machine field, a `variables` map tools may read/write,
//! and token-budget bookkeeping, alongside the plan/history bookkeeping
//! the executor needs to drive the loop.

use crate::budget::TokenBudget;
use crate::types::{Message, Plan, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub task: String,
    pub state: SessionState,
    pub messages: Vec<Message>,
    pub variables: HashMap<String, serde_json::Value>,
    pub tokens_used_input: u32,
    pub tokens_used_output: u32,
    pub budget: TokenBudget,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,

    // ── Execution bookkeeping owned by the executor for the run's duration ──
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub blacklisted_tools: HashSet<String>,
}

impl Session {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.into(),
            state: SessionState::Idle,
            messages: Vec::new(),
            variables: HashMap::new(),
            tokens_used_input: 0,
            tokens_used_output: 0,
            budget: TokenBudget::default(),
            created_at: chrono::Utc::now(),
            ended_at: None,
            project_path: None,
            current_plan: None,
            final_answer: None,
            error: None,
            blacklisted_tools: HashSet::new(),
        }
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// Transitions to a new non-terminal state. Once `self.state` is
    /// terminal this is a no-op: terminal states are sticky.
    pub fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = next;
    }

    /// Transitions into a terminal state and stamps `ended_at` exactly
    /// once. Calling this twice is safe — the second call is a no-op.
    pub fn finish(&mut self, terminal: SessionState) {
        if self.state.is_terminal() {
            return;
        }
        debug_assert!(terminal.is_terminal(), "finish() requires a terminal state");
        self.state = terminal;
        self.ended_at = Some(chrono::Utc::now());
    }

    pub fn record_usage(&mut self, input: u32, output: u32) {
        self.tokens_used_input += input;
        self.tokens_used_output += output;
        self.budget.consume(input, output);
    }

    pub fn blacklist_tool(&mut self, name: impl Into<String>) {
        self.blacklisted_tools.insert(name.into());
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_state_is_sticky() {
        let mut s = Session::new("task");
        s.finish(SessionState::Completed);
        assert_eq!(s.state, SessionState::Completed);
        assert!(s.ended_at.is_some());

        let first_ended_at = s.ended_at;
        // A further attempt to change state or re-stamp ended_at is a no-op.
        s.transition(SessionState::Failed);
        s.finish(SessionState::Cancelled);
        assert_eq!(s.state, SessionState::Completed);
        assert_eq!(s.ended_at, first_ended_at);
    }
}
