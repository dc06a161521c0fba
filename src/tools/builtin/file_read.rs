//! `FileReadTool`: `{path, encoding?}` guarded by [`FsGuard`],
//! refusing files over 50 MiB and base64-encoding recognized binary
//! extensions rather than attempting to decode them as UTF-8.

use super::fs_guard::FsGuard;
use super::params::{opt_str, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::path::Path;

const MAX_READ_BYTES: u64 = 50 * 1024 * 1024;

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tar", "7z", "rar",
    "exe", "dll", "so", "dylib", "bin", "wasm", "mp3", "mp4", "mov", "avi", "woff", "woff2",
];

pub struct FileReadTool {
    guard: FsGuard,
}

impl FileReadTool {
    pub fn new(guard: FsGuard) -> Self {
        Self { guard }
    }
}

fn is_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> String {
        "file_read".to_string()
    }

    fn description(&self) -> String {
        "Reads a file's contents from the allowlisted filesystem.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "encoding": { "type": "string" }
            },
            "required": ["path"]
        })
    }

    fn category(&self) -> String {
        "filesystem".to_string()
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
        let call_id = "pending"; // overwritten by the registry after return
        let path_str = match require_str(&params, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let path = Path::new(path_str);

        if let Err(reason) = self.guard.check(path) {
            return ToolResult::err(call_id, reason, 0);
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => return ToolResult::err(call_id, format!("stat failed: {e}"), 0),
        };
        if metadata.len() > MAX_READ_BYTES {
            return ToolResult::err(
                call_id,
                format!("file is {} bytes, exceeds the 50 MiB limit", metadata.len()),
                0,
            );
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => return ToolResult::err(call_id, format!("read failed: {e}"), 0),
        };

        let (content, encoding) = if is_binary_extension(path) {
            (base64::engine::general_purpose::STANDARD.encode(&bytes), "base64")
        } else {
            match String::from_utf8(bytes.clone()) {
                Ok(s) => (s, opt_str(&params, "encoding").unwrap_or("utf-8")),
                Err(_) => (base64::engine::general_purpose::STANDARD.encode(&bytes), "base64"),
            }
        };

        ToolResult::ok(
            call_id,
            serde_json::json!({ "path": path_str, "content": content, "encoding": encoding, "size": metadata.len() }),
            0,
        )
    }
}
