//! A basic L2-autonomy run: safe tool calls execute automatically,
//! anything riskier waits on an approval that this demo auto-approves
//! from a background task, simulating a human reviewer.
//!
//! Run with `OPENAI_API_KEY` set:
//! ```sh
//! cargo run --example basic_task
//! ```

use agentrt::types::ApprovalResult;
use agentrt::AgentBuilder;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let dir = std::env::temp_dir().join("agentrt-basic-demo");
    std::fs::create_dir_all(&dir).expect("create demo state dir");
    let db = dir.join("agentrt.sqlite3");

    let executor = AgentBuilder::new()
        .openai("")
        .model("gpt-4o")
        .database(db)
        .fs_allowlist(vec![dir.clone()])
        .system_prompt("You are a careful software assistant. Use tools when they help.")
        .build()
        .expect("failed to build executor");

    // Simulate a human reviewer: approve every request within the demo's
    // lifetime. A real UI would drive `executor.resolve_approval` from
    // user input instead.
    let mut events = executor.subscribe();
    let approver = executor.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let agentrt::EventPayload::ApprovalRequested { request_id, .. } = event.data {
                approver.resolve_approval(&request_id, ApprovalResult::approved("demo-reviewer"));
            }
        }
    });

    let session = executor
        .run(
            "List the files in the working directory and summarize what kind of project this is.",
            Some(dir.to_string_lossy().to_string()),
        )
        .await;

    println!("session {} finished in state {:?}", session.id, session.state);
    if let Some(answer) = session.final_answer {
        println!("\n{answer}");
    }
    if let Some(err) = session.error {
        eprintln!("error: {err}");
    }
}
