//! The eight built-in tools, plus the shared filesystem guard and
//! parameter helpers they're constructed with.

pub mod browser;
pub mod code_execution;
pub mod file_delete;
pub mod file_list;
pub mod file_read;
pub mod file_write;
pub mod fs_guard;
pub mod knowledge_query;
pub(crate) mod params;
pub mod repo;
pub mod web_search;

pub use browser::BrowserTool;
pub use code_execution::CodeExecutionTool;
pub use file_delete::FileDeleteTool;
pub use file_list::FileListTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use fs_guard::FsGuard;
pub use knowledge_query::{KnowledgeBackend, KnowledgeQueryTool};
pub use repo::RepoTool;
pub use web_search::WebSearchTool;

use crate::tools::{Tool, ToolRegistry};
use std::path::PathBuf;
use std::sync::Arc;

/// Registers every built-in tool with default construction — the
/// wiring a [`crate::builder::AgentBuilder`] calls unless the caller
/// overrides individual tools.
pub fn register_defaults(
    registry: &ToolRegistry,
    allowlist: Vec<PathBuf>,
    search_api_key: Option<String>,
    github_token: Option<String>,
) {
    let guard = FsGuard::new(allowlist);

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(WebSearchTool::new(search_api_key)),
        Arc::new(FileReadTool::new(guard.clone())),
        Arc::new(FileWriteTool::new(guard.clone())),
        Arc::new(FileDeleteTool::new(guard.clone())),
        Arc::new(FileListTool::new(guard)),
        Arc::new(CodeExecutionTool),
        Arc::new(BrowserTool::new()),
        Arc::new(RepoTool::new(github_token)),
        Arc::new(KnowledgeQueryTool::new(None)),
    ];
    for tool in tools {
        registry.register_builtin(tool);
    }
}
