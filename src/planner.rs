//! Turns a task description into a [`Plan`].
//!
//! Generalizes the teacher's `PlanningState::handle`, which asked the
//! `LlmCaller` for one JSON object and fell back to a single-step plan
//! on any parse failure. This keeps that shape — one prompt, one parse
//! attempt, never an `Err` — but decomposes it into a reusable
//! `Planner` independent of any state-handler dispatch, and widens the
//! parsed shape to carry `tool_name`/`params`/`dependencies` per step.

use crate::llm::ChatModel;
use crate::types::{Message, Plan, PlanStep, ToolDefinition};
use serde::Deserialize;
use std::sync::Arc;

/// Upper bound on how many steps a model-produced plan may contain
/// before it is rejected as unreasonable and replaced by the fallback
/// plan. Spec §9 leaves the exact cap an open question; see DESIGN.md.
const MAX_PLAN_STEPS: usize = 50;

pub struct Planner {
    llm: Arc<dyn ChatModel>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    overview: String,
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    id: String,
    description: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl Planner {
    pub fn new(llm: Arc<dyn ChatModel>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Asks the model to decompose `task` into a dependency-ordered
    /// [`Plan`]. Never fails: any parse error, empty step list, or
    /// invalid dependency graph falls back to [`Plan::fallback`], since
    /// the executor must always have something runnable.
    pub async fn plan(&self, task: &str, tools: &[ToolDefinition]) -> Plan {
        let system = build_system_prompt(tools);
        let messages = vec![Message::system(system), Message::user(task.to_string())];

        let response = match self.llm.chat(&messages, &[], &self.model).await {
            Ok(r) => r,
            Err(reason) => {
                tracing::warn!(%reason, "planner: chat call failed, using fallback plan");
                return Plan::fallback(task);
            }
        };

        let content = match response.content {
            Some(c) => c,
            None => {
                tracing::warn!("planner: model returned no content, using fallback plan");
                return Plan::fallback(task);
            }
        };

        match parse_plan(task, &content) {
            Some(plan) => plan,
            None => {
                tracing::warn!("planner: could not parse a usable plan, using fallback plan");
                Plan::fallback(task)
            }
        }
    }
}

fn build_system_prompt(tools: &[ToolDefinition]) -> String {
    let mut catalog = String::new();
    for tool in tools {
        catalog.push_str(&format!(
            "- {}: {} (schema: {})\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    format!(
        "You are a planning assistant. Decompose the user's task into an ordered \
         list of steps. Respond with ONLY a JSON object of this exact shape:\n\
         {{\"overview\": \"...\", \"steps\": [{{\"id\": \"step-1\", \"description\": \"...\", \
         \"tool_name\": \"optional_tool_name\", \"params\": {{}}, \"dependencies\": []}}]}}\n\n\
         Available tools:\n{catalog}\n\
         Every `dependencies` entry must reference another step's `id`. Omit \
         `tool_name`/`params` for steps that require reasoning rather than a tool call."
    )
}

fn parse_plan(task: &str, content: &str) -> Option<Plan> {
    let json_slice = extract_json_object(content)?;
    let raw: RawPlan = serde_json::from_str(json_slice).ok()?;

    if raw.steps.is_empty() || raw.steps.len() > MAX_PLAN_STEPS {
        return None;
    }

    let steps = raw
        .steps
        .into_iter()
        .map(|s| PlanStep {
            id: s.id,
            description: s.description,
            tool_name: s.tool_name,
            params: s.params,
            dependencies: s.dependencies,
            status: crate::types::StepStatus::Pending,
            result: None,
            error: None,
        })
        .collect();

    let plan = Plan { task: task.to_string(), overview: raw.overview, steps };
    plan.validate().ok()?;
    Some(plan)
}

/// Extracts the first balanced `{...}` span from `content`, tolerant of
/// a model wrapping its JSON in prose or a markdown code fence.
fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChatModel;
    use crate::llm::ChatResponse;

    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "file_read".to_string(),
            description: "Reads a file".to_string(),
            parameters: serde_json::json!({"type": "object"}),
            category: "filesystem".to_string(),
            is_destructive: false,
            requires_approval_default: false,
        }]
    }

    #[tokio::test]
    async fn parses_a_well_formed_plan_with_dependencies() {
        let body = r#"Sure, here is the plan:
        {"overview": "Read then summarize", "steps": [
            {"id": "step-1", "description": "Read the file", "tool_name": "file_read", "params": {"path": "a.txt"}, "dependencies": []},
            {"id": "step-2", "description": "Summarize", "dependencies": ["step-1"]}
        ]}
        Let me know if you need changes."#;
        let mock = MockChatModel::new(vec![ChatResponse {
            content: Some(body.to_string()),
            tool_calls: vec![],
            input_tokens: 10,
            output_tokens: 20,
        }]);
        let planner = Planner::new(Arc::new(mock), "test-model");
        let plan = planner.plan("summarize a.txt", &tools()).await;
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].dependencies, vec!["step-1".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_when_the_model_response_is_not_json() {
        let mock = MockChatModel::new(vec![ChatResponse {
            content: Some("I cannot produce a plan right now.".to_string()),
            tool_calls: vec![],
            input_tokens: 5,
            output_tokens: 5,
        }]);
        let planner = Planner::new(Arc::new(mock), "test-model");
        let plan = planner.plan("do something", &tools()).await;
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, "step-1");
    }

    #[tokio::test]
    async fn falls_back_when_the_plan_has_a_dependency_cycle() {
        let body = r#"{"overview": "bad", "steps": [
            {"id": "a", "description": "x", "dependencies": ["b"]},
            {"id": "b", "description": "y", "dependencies": ["a"]}
        ]}"#;
        let mock = MockChatModel::new(vec![ChatResponse {
            content: Some(body.to_string()),
            tool_calls: vec![],
            input_tokens: 5,
            output_tokens: 5,
        }]);
        let planner = Planner::new(Arc::new(mock), "test-model");
        let plan = planner.plan("cyclic task", &tools()).await;
        assert_eq!(plan.overview, "Fallback plan: ask the model to answer directly.");
    }
}
