//! `FileWriteTool`: `{path, content, append?}`.
//! Creates a timestamped `.bak` of the prior content before an overwrite
//! (never before an append, and never when the file is new), creates
//! missing parent directories, and prunes backups down to the 5 most
//! recent per path.

use super::fs_guard::FsGuard;
use super::params::{opt_bool, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MAX_BACKUPS: usize = 5;

pub struct FileWriteTool {
    guard: FsGuard,
}

impl FileWriteTool {
    pub fn new(guard: FsGuard) -> Self {
        Self { guard }
    }
}

/// Copies `path`'s current contents to `path.<unix_ts_millis>.bak`, then
/// deletes the oldest backups beyond [`MAX_BACKUPS`]. Only called when
/// `path` already exists, so a missing file is never an error here.
async fn backup_and_prune(path: &Path) -> Result<(), String> {
    let existing = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(format!("reading prior content for backup failed: {e}")),
    };

    let stamp = chrono::Utc::now().timestamp_millis();
    let backup_path = PathBuf::from(format!("{}.{stamp}.bak", path.display()));
    tokio::fs::write(&backup_path, &existing)
        .await
        .map_err(|e| format!("writing backup failed: {e}"))?;

    prune_backups(path).await
}

async fn prune_backups(path: &Path) -> Result<(), String> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
    let prefix = format!("{file_name}.");

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };

    let mut backups = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) && name.ends_with(".bak") {
            backups.push(entry.path());
        }
    }
    backups.sort();
    if backups.len() > MAX_BACKUPS {
        for stale in &backups[..backups.len() - MAX_BACKUPS] {
            let _ = tokio::fs::remove_file(stale).await;
        }
    }
    Ok(())
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> String {
        "file_write".to_string()
    }

    fn description(&self) -> String {
        "Writes or appends content to a file on the allowlisted filesystem, backing up the prior version on overwrite.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
                "append": { "type": "boolean" }
            },
            "required": ["path", "content"]
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
        let content = match require_str(&params, "content") {
            Ok(c) => c,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let append = opt_bool(&params, "append").unwrap_or(false);
        let path = Path::new(path_str);

        if let Err(reason) = self.guard.check(path) {
            return ToolResult::err(call_id, reason, 0);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResult::err(call_id, format!("creating parent directories failed: {e}"), 0);
                }
            }
        }

        if !append {
            if let Err(reason) = backup_and_prune(path).await {
                return ToolResult::err(call_id, reason, 0);
            }
        }

        let write_result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new().create(true).append(true).open(path).await {
                Ok(mut file) => file.write_all(content.as_bytes()).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        } else {
            tokio::fs::write(path, content.as_bytes()).await.map_err(|e| e.to_string())
        };

        match write_result {
            Ok(()) => ToolResult::ok(
                call_id,
                serde_json::json!({ "path": path_str, "bytes_written": content.len(), "append": append }),
                0,
            ),
            Err(e) => ToolResult::err(call_id, format!("write failed: {e}"), 0),
        }
    }
}
