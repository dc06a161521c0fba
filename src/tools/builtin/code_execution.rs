//! `CodeExecutionTool`: runs a short snippet in
//! one of a handful of interpreters under a wall-clock timeout, killing
//! the whole process on expiry.
//!
//! Grounded in `mcp/transport.rs::StdioTransport::spawn`'s
//! `Command::new(...).stdin(Stdio::piped())...spawn()` shape; this tool
//! adds the `tokio::time::timeout` wrapper and a temp-file path for code
//! too long to pass inline.

use super::params::{opt_u64, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_TIMEOUT_S: u64 = 300;
const MAX_TIMEOUT_S: u64 = 300;
/// Code longer than this is written to a temp file instead of passed inline.
const INLINE_THRESHOLD_BYTES: usize = 4096;

pub struct CodeExecutionTool;

fn interpreter_for(language: &str) -> Option<(&'static str, Vec<String>)> {
    match language {
        "python" => Some(("python3", vec![])),
        "node" => Some(("node", vec![])),
        "bash" => Some(("bash", vec![])),
        "powershell" => Some(("pwsh", vec![])),
        _ => None,
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> String {
        "code_execution".to_string()
    }

    fn description(&self) -> String {
        "Executes a short code snippet in an isolated subprocess with a timeout.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "language": { "type": "string" },
                "code": { "type": "string" },
                "timeout_s": { "type": "integer" }
            },
            "required": ["language", "code"]
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn category(&self) -> String {
        "code_execution".to_string()
    }

    fn requires_approval_default(&self) -> bool {
        true
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
        let call_id = "pending";
        let language = match require_str(&params, "language") {
            Ok(l) => l,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let code = match require_str(&params, "code") {
            Ok(c) => c,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let timeout_s = opt_u64(&params, "timeout_s").unwrap_or(DEFAULT_TIMEOUT_S).min(MAX_TIMEOUT_S);

        let Some((binary, mut args)) = interpreter_for(language) else {
            return ToolResult::err(call_id, format!("unsupported language '{language}'"), 0);
        };

        let mut temp_file = None;
        if code.len() > INLINE_THRESHOLD_BYTES {
            let suffix = match language {
                "python" => "py",
                "node" => "js",
                "powershell" => "ps1",
                _ => "sh",
            };
            let path = std::env::temp_dir().join(format!("agentrt-exec-{}.{suffix}", uuid::Uuid::new_v4()));
            if let Err(e) = tokio::fs::write(&path, code).await {
                return ToolResult::err(call_id, format!("writing temp script failed: {e}"), 0);
            }
            args.push(path.to_string_lossy().to_string());
            temp_file = Some(path);
        } else {
            args.push("-c".to_string());
            args.push(code.to_string());
        }
        if language == "bash" && temp_file.is_none() {
            // bash reads code from stdin via `-s` when we don't want `-c` quoting hazards
            args = vec!["-s".to_string()];
        }

        let start = std::time::Instant::now();
        let mut command = Command::new(binary);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // New process group so the timeout path below can kill the whole
        // tree (e.g. a backgrounded grandchild) instead of just this pid.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                if let Some(path) = &temp_file {
                    let _ = tokio::fs::remove_file(path).await;
                }
                return ToolResult::err(call_id, format!("failed to spawn '{binary}': {e}"), 0);
            }
        };
        let child_pid = child.id();

        if language == "bash" && temp_file.is_none() {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(code.as_bytes()).await;
            }
        }

        let (exit_code, stdout, stderr, timed_out) =
            match tokio::time::timeout(Duration::from_secs(timeout_s), child.wait_with_output()).await {
                Ok(Ok(output)) => (
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stdout).to_string(),
                    String::from_utf8_lossy(&output.stderr).to_string(),
                    false,
                ),
                Ok(Err(e)) => {
                    if let Some(path) = &temp_file {
                        let _ = tokio::fs::remove_file(path).await;
                    }
                    return ToolResult::err(call_id, format!("execution failed: {e}"), start.elapsed().as_millis() as u64);
                }
                Err(_) => {
                    #[cfg(unix)]
                    if let Some(pid) = child_pid {
                        kill_process_group(pid);
                    }
                    (-1, String::new(), "execution timed out".to_string(), true)
                }
            };

        if let Some(path) = &temp_file {
            let _ = tokio::fs::remove_file(path).await;
        }

        let duration_s = start.elapsed().as_secs_f64();
        ToolResult::ok(
            call_id,
            serde_json::json!({
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
                "duration_s": duration_s,
                "timed_out": timed_out,
                "language": language,
            }),
            (duration_s * 1000.0) as u64,
        )
    }
}

/// Sends `SIGKILL` to every process in `pid`'s group, not just `pid`
/// itself — the child was spawned as its own group leader via
/// `process_group(0)`, so a negative pid targets the whole tree.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(pid: u32) {
    // SAFETY: `pid` comes from a just-spawned `tokio::process::Child::id()`.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}
