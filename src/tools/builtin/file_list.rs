//! `FileListTool`: `{path, glob?, recursive?}` → directory
//! entries. Glob patterns are translated to a regex rather than pulling
//! in a dedicated glob crate, since `regex` is already part of the
//! filesystem-tool stack via [`FsGuard`].

use super::fs_guard::FsGuard;
use super::params::{opt_bool, opt_str, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

pub struct FileListTool {
    guard: FsGuard,
}

impl FileListTool {
    pub fn new(guard: FsGuard) -> Self {
        Self { guard }
    }
}

/// Translates a small glob subset (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, String> {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c if "\\.+^$()[]{}|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| format!("invalid glob pattern: {e}"))
}

async fn collect(
    dir: &Path,
    recursive: bool,
    pattern: &Option<Regex>,
    out: &mut Vec<serde_json::Value>,
) -> Result<(), String> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| format!("listing '{}' failed: {e}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| e.to_string())?;
        let name = entry.file_name().to_string_lossy().to_string();

        let matches = pattern.as_ref().map(|re| re.is_match(&name)).unwrap_or(true);
        if matches {
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            out.push(serde_json::json!({
                "name": name,
                "path": path.to_string_lossy(),
                "size": metadata.len(),
                "is_dir": metadata.is_dir(),
                "modified": modified,
            }));
        }

        if recursive && metadata.is_dir() {
            Box::pin(collect(&path, recursive, pattern, out)).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> String {
        "file_list".to_string()
    }

    fn description(&self) -> String {
        "Lists entries under an allowlisted directory, optionally filtered by glob and recursive.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "glob": { "type": "string" },
                "recursive": { "type": "boolean" }
            },
            "required": ["path"]
        })
    }

    fn category(&self) -> String {
        "filesystem".to_string()
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

        let pattern = match opt_str(&params, "glob") {
            Some(g) => match glob_to_regex(g) {
                Ok(re) => Some(re),
                Err(e) => return ToolResult::err(call_id, e, 0),
            },
            None => None,
        };
        let recursive = opt_bool(&params, "recursive").unwrap_or(false);

        let mut entries = Vec::new();
        if let Err(e) = collect(path, recursive, &pattern, &mut entries).await {
            return ToolResult::err(call_id, e, 0);
        }

        ToolResult::ok(call_id, serde_json::json!({ "entries": entries }), 0)
    }
}
