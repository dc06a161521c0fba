//! A YOLO (L5) run: every tool call auto-executes regardless of risk
//! tier, no approval is ever requested, and the audit log keeps full
//! (untruncated) parameters with a 90-day retention window instead of
//! the usual 30 (spec §4.9/§4.10).
//!
//! Run with `OPENAI_API_KEY` set:
//! ```sh
//! cargo run --example yolo_task
//! ```

use agentrt::types::AutonomyLevel;
use agentrt::AgentBuilder;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let dir = std::env::temp_dir().join("agentrt-yolo-demo");
    std::fs::create_dir_all(&dir).expect("create demo state dir");
    let db = dir.join("agentrt.sqlite3");
    let project_path = dir.to_string_lossy().to_string();

    let executor = AgentBuilder::new()
        .openai("")
        .model("gpt-4o")
        .database(db)
        .fs_allowlist(vec![dir.clone()])
        .max_steps(20)
        .system_prompt("You are an autonomous coding agent running with no human oversight. Be decisive.")
        .build()
        .expect("failed to build executor");

    // L5 bypasses classification entirely and is never persisted — it
    // lasts only as long as this process keeps the project in its
    // in-memory set.
    executor
        .autonomy()
        .set_level(&project_path, AutonomyLevel::L5)
        .await
        .expect("failed to enable YOLO mode");

    let session = executor
        .run(
            "Scaffold a README.md for this project describing its purpose, then list the directory to confirm it was written.",
            Some(project_path),
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
