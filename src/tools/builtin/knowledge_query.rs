//! `KnowledgeQueryTool`: `{query, collection?, top_k?,
//! min_score?}`. The knowledge base itself is out of scope here (spec
//! §1 Non-goals) — this tool only needs to expose the query contract and
//! degrade gracefully when no collection has been wired in, which is the
//! only behavior callers can depend on without a RAG backend attached.

use super::params::{opt_str, opt_u64, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Swappable backend a host application can provide once it wires up an
/// actual vector store; `None` means "no collection initialized".
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        query: &str,
        top_k: u64,
        min_score: f64,
    ) -> Result<Vec<serde_json::Value>, String>;
}

pub struct KnowledgeQueryTool {
    backend: Option<std::sync::Arc<dyn KnowledgeBackend>>,
}

impl KnowledgeQueryTool {
    pub fn new(backend: Option<std::sync::Arc<dyn KnowledgeBackend>>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for KnowledgeQueryTool {
    fn name(&self) -> String {
        "knowledge_query".to_string()
    }

    fn description(&self) -> String {
        "Queries a configured knowledge-base collection for semantically relevant passages.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "collection": { "type": "string" },
                "top_k": { "type": "integer" },
                "min_score": { "type": "number" }
            },
            "required": ["query"]
        })
    }

    fn category(&self) -> String {
        "knowledge".to_string()
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
        let call_id = "pending";
        let query = match require_str(&params, "query") {
            Ok(q) => q,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let collection = opt_str(&params, "collection").unwrap_or("default");
        let top_k = opt_u64(&params, "top_k").unwrap_or(5);
        let min_score = params.get("min_score").and_then(|v| v.as_f64()).unwrap_or(0.0);

        let Some(backend) = &self.backend else {
            return ToolResult::ok(
                call_id,
                serde_json::json!({ "results": [], "collection_initialized": false }),
                0,
            );
        };

        let start = std::time::Instant::now();
        match backend.query(collection, query, top_k, min_score).await {
            Ok(results) => ToolResult::ok(
                call_id,
                serde_json::json!({ "results": results, "collection_initialized": true }),
                start.elapsed().as_millis() as u64,
            ),
            Err(e) => ToolResult::err(call_id, e, start.elapsed().as_millis() as u64),
        }
    }
}
