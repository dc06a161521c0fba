//! `FileDeleteTool`: `{path}`. Unlike
//! `FileWriteTool`, the backup here is mandatory — if it cannot be
//! created the delete itself is refused, since there would be no way to
//! recover the file afterward.

use super::fs_guard::FsGuard;
use super::params::require_str;
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct FileDeleteTool {
    guard: FsGuard,
}

impl FileDeleteTool {
    pub fn new(guard: FsGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> String {
        "file_delete".to_string()
    }

    fn description(&self) -> String {
        "Deletes a file from the allowlisted filesystem after taking a mandatory backup.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn category(&self) -> String {
        "filesystem".to_string()
    }

    fn requires_approval_default(&self) -> bool {
        true
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
        let call_id = "pending";
        let path_str = match require_str(&params, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let path = Path::new(path_str);

        if let Err(reason) = self.guard.check(path) {
            return ToolResult::err(call_id, reason, 0);
        }

        let existing = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolResult::err(call_id, format!("reading file before delete failed: {e}"), 0),
        };

        let stamp = chrono::Utc::now().timestamp_millis();
        let backup_path = PathBuf::from(format!("{}.{stamp}.bak", path.display()));
        if let Err(e) = tokio::fs::write(&backup_path, &existing).await {
            return ToolResult::err(
                call_id,
                format!("refusing to delete: backup could not be created: {e}"),
                0,
            );
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => ToolResult::ok(
                call_id,
                serde_json::json!({ "path": path_str, "backup_path": backup_path.to_string_lossy() }),
                0,
            ),
            Err(e) => ToolResult::err(call_id, format!("delete failed: {e}"), 0),
        }
    }
}
