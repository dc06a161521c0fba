//! End-to-end runs of the executor through the public `AgentBuilder`/
//! `Executor` surface: a scripted `MockChatModel` stands in for the
//! real provider, and every scenario below drives `Executor::run` to a
//! terminal `Session` the way a caller actually would.

use agentrt::llm::{ChatResponse, MockChatModel};
use agentrt::types::{ApprovalResult, AutonomyLevel, SessionState};
use agentrt::{AgentBuilder, EventPayload};
use std::sync::Arc;

fn plan_response(body: &str) -> ChatResponse {
    ChatResponse { content: Some(body.to_string()), tool_calls: vec![], input_tokens: 5, output_tokens: 5 }
}

fn text_response(body: &str) -> ChatResponse {
    ChatResponse { content: Some(body.to_string()), tool_calls: vec![], input_tokens: 1, output_tokens: 1 }
}

#[tokio::test]
async fn a_safe_tool_step_auto_executes_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), "name = \"demo\"").unwrap();
    let db = dir.path().join("agentrt.sqlite3");

    let plan = format!(
        r#"{{"overview": "Inspect config", "steps": [
            {{"id": "step-1", "description": "Read the config", "tool_name": "file_read",
              "params": {{"path": "{}"}}, "dependencies": []}}
        ]}}"#,
        dir.path().join("config.toml").display()
    );

    let responses = vec![plan_response(&plan), text_response("The config declares a demo project.")];
    let executor = AgentBuilder::new()
        .llm(Arc::new(MockChatModel::new(responses)))
        .database(db)
        .fs_allowlist(vec![dir.path().to_path_buf()])
        .build()
        .expect("build");

    let session = executor.run("describe the project config", Some(dir.path().to_string_lossy().to_string())).await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.final_answer.as_deref(), Some("The config declares a demo project."));
    let step = &session.current_plan.unwrap().steps[0];
    assert!(step.result.is_some());
}

#[tokio::test]
async fn a_destructive_step_waits_for_approval_then_completes_once_approved() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("agentrt.sqlite3");
    let target = dir.path().join("notes.txt");

    let plan = format!(
        r#"{{"overview": "Write notes", "steps": [
            {{"id": "step-1", "description": "Write the notes file", "tool_name": "file_write",
              "params": {{"path": "{}", "content": "hello"}}, "dependencies": []}}
        ]}}"#,
        target.display()
    );
    let responses = vec![plan_response(&plan), text_response("Wrote the notes file.")];
    let executor = AgentBuilder::new()
        .llm(Arc::new(MockChatModel::new(responses)))
        .database(db)
        .fs_allowlist(vec![dir.path().to_path_buf()])
        .build()
        .expect("build");

    let mut events = executor.subscribe();
    let approver = executor.clone();
    let approvals_seen = tokio::spawn(async move {
        let mut count = 0;
        while let Some(event) = events.recv().await {
            if let EventPayload::ApprovalRequested { request_id, .. } = event.data {
                count += 1;
                approver.resolve_approval(&request_id, ApprovalResult::approved("test-reviewer"));
            }
        }
        count
    });

    let session = executor.run("write a notes file", Some(dir.path().to_string_lossy().to_string())).await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
    // Dropping this clone lets the bus close the subscription once the
    // terminal event drains, so the watcher task below can finish.
    drop(executor);
    let count = tokio::time::timeout(std::time::Duration::from_secs(1), approvals_seen).await.unwrap().unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn a_rejected_approval_fails_the_step_and_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("agentrt.sqlite3");
    let target = dir.path().join("secrets.txt");

    let plan = format!(
        r#"{{"overview": "Write secrets", "steps": [
            {{"id": "step-1", "description": "Write a secrets file", "tool_name": "file_write",
              "params": {{"path": "{}", "content": "sensitive"}}, "dependencies": []}}
        ]}}"#,
        target.display()
    );
    let responses = vec![plan_response(&plan)];
    let executor = AgentBuilder::new()
        .llm(Arc::new(MockChatModel::new(responses)))
        .database(db)
        .fs_allowlist(vec![dir.path().to_path_buf()])
        .build()
        .expect("build");

    let mut events = executor.subscribe();
    let approver = executor.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let EventPayload::ApprovalRequested { request_id, .. } = event.data {
                approver.resolve_approval(&request_id, ApprovalResult::rejected());
            }
        }
    });

    let session = executor.run("write a secrets file", Some(dir.path().to_string_lossy().to_string())).await;

    assert_eq!(session.state, SessionState::Failed);
    assert!(!target.exists());
    let step = &session.current_plan.unwrap().steps[0];
    assert_eq!(step.status, agentrt::types::StepStatus::Failed);
    assert_eq!(step.error.as_deref(), Some("approval rejected"));
}

#[tokio::test]
async fn an_unrecognized_tool_name_fails_the_step_instead_of_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("agentrt.sqlite3");

    let plan = r#"{"overview": "Use a nonexistent tool", "steps": [
        {"id": "step-1", "description": "Call a tool that was never registered", "tool_name": "teleport",
         "params": {}, "dependencies": []}
    ]}"#;
    let responses = vec![plan_response(plan)];
    let executor = AgentBuilder::new()
        .llm(Arc::new(MockChatModel::new(responses)))
        .database(db)
        .build()
        .expect("build");

    let session = executor.run("teleport somewhere", None).await;

    assert_eq!(session.state, SessionState::Failed);
    let step = &session.current_plan.unwrap().steps[0];
    assert_eq!(step.status, agentrt::types::StepStatus::Failed);
    assert!(step.error.as_deref().unwrap().contains("not found in registry"));
}

#[tokio::test]
async fn max_steps_is_enforced_even_when_more_steps_remain_runnable() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("agentrt.sqlite3");

    let plan = r#"{"overview": "Two independent reasoning steps", "steps": [
        {"id": "step-1", "description": "First thought", "dependencies": []},
        {"id": "step-2", "description": "Second thought", "dependencies": []}
    ]}"#;
    // Only the planner call is ever consumed: the loop hits max_steps
    // before a second chat call for either reasoning step would occur.
    let responses = vec![plan_response(plan)];
    let executor = AgentBuilder::new()
        .llm(Arc::new(MockChatModel::new(responses)))
        .database(db)
        .max_steps(0)
        .build()
        .expect("build");

    let session = executor.run("think about two things", None).await;

    assert_eq!(session.state, SessionState::Failed);
    assert!(session.error.unwrap().contains("max_steps"));
}

#[tokio::test]
async fn yolo_autonomy_skips_approval_for_a_destructive_step() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("agentrt.sqlite3");
    let target = dir.path().join("yolo.txt");

    let plan = format!(
        r#"{{"overview": "Write without asking", "steps": [
            {{"id": "step-1", "description": "Write the file", "tool_name": "file_write",
              "params": {{"path": "{}", "content": "fast and loose"}}, "dependencies": []}}
        ]}}"#,
        target.display()
    );
    let responses = vec![plan_response(&plan), text_response("Done.")];
    let executor = AgentBuilder::new()
        .llm(Arc::new(MockChatModel::new(responses)))
        .database(db)
        .fs_allowlist(vec![dir.path().to_path_buf()])
        .build()
        .expect("build");

    let project_path = dir.path().to_string_lossy().to_string();
    executor.autonomy().set_level(&project_path, AutonomyLevel::L5).await.unwrap();

    let mut events = executor.subscribe();
    let watcher = tokio::spawn(async move {
        let mut saw_approval_request = false;
        while let Some(event) = events.recv().await {
            if matches!(event.data, EventPayload::ApprovalRequested { .. }) {
                saw_approval_request = true;
            }
        }
        saw_approval_request
    });

    let session = executor.run("write without asking", Some(project_path)).await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "fast and loose");
    drop(executor);
    let saw_approval_request = tokio::time::timeout(std::time::Duration::from_secs(1), watcher).await.unwrap().unwrap();
    assert!(!saw_approval_request);
}
