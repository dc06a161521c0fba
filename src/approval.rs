//! Human-in-the-loop approval mediation.
//!
//! Generalizes the teacher's synchronous `approval_callback: Arc<dyn Fn(..)
//! -> HumanDecision>` sketch into an async mediator: callers `await` a
//! `tokio::sync::oneshot` held in a `Mutex<HashMap<Uuid, _>>`, the same
//! request/response correlation shape `McpClient`'s `pending` map already
//! uses for its JSON-RPC replies.

use crate::types::{ActionClassification, ApprovalDecision, ApprovalResult, RememberScope};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

struct Pending {
    tx: oneshot::Sender<ApprovalResult>,
}

/// A similarity key is either a bare tool name, or `(tool_name,
/// parent_directory)` for filesystem tools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SimilarityKey {
    tool_name: String,
    parent_dir: Option<String>,
}

impl SimilarityKey {
    fn derive(classification: &ActionClassification) -> Self {
        let parent_dir = classification
            .parameters
            .get("path")
            .and_then(|v| v.as_str())
            .and_then(|p| Path::new(p).parent())
            .map(|p| p.to_string_lossy().to_string());
        Self { tool_name: classification.tool_name.clone(), parent_dir }
    }

    /// A cached key at `/src` also covers a request under `/src/components`
    ///.
    fn covers(&self, other: &SimilarityKey) -> bool {
        if self.tool_name != other.tool_name {
            return false;
        }
        match (&self.parent_dir, &other.parent_dir) {
            (None, None) => true,
            (Some(cached), Some(requested)) => requested.starts_with(cached.as_str()),
            _ => false,
        }
    }
}

#[derive(Default)]
struct SessionCache {
    entries: Vec<SimilarityKey>,
}

pub struct ApprovalManager {
    pending: Mutex<HashMap<String, Pending>>,
    session_caches: Mutex<HashMap<String, SessionCache>>,
    /// `remember_scope = "tool_type"` entries apply across every session.
    global_cache: Mutex<Vec<SimilarityKey>>,
    on_request: Mutex<Option<Box<dyn Fn(&str, &ActionClassification, &str) + Send + Sync>>>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            session_caches: Mutex::new(HashMap::new()),
            global_cache: Mutex::new(Vec::new()),
            on_request: Mutex::new(None),
        }
    }

    /// Registers the callback the executor uses to publish
    /// `approval_requested` without this module depending on the event bus
    /// directly.
    pub fn set_on_request(&self, callback: Box<dyn Fn(&str, &ActionClassification, &str) + Send + Sync>) {
        *self.on_request.lock().unwrap() = Some(callback);
    }

    pub fn start_session(&self, session_id: &str) {
        self.session_caches.lock().unwrap().insert(session_id.to_string(), SessionCache::default());
    }

    /// Clears the session's cache and resolves any still-pending requests
    /// for it as `timeout`.
    pub fn end_session(&self, session_id: &str) {
        self.session_caches.lock().unwrap().remove(session_id);
        let mut pending = self.pending.lock().unwrap();
        let stale: Vec<String> = pending
            .keys()
            .filter(|id| id.starts_with(&format!("{session_id}:")))
            .cloned()
            .collect();
        for id in stale {
            if let Some(p) = pending.remove(&id) {
                let _ = p.tx.send(ApprovalResult::timeout());
            }
        }
    }

    pub async fn request_approval(
        &self,
        classification: ActionClassification,
        step_id: &str,
        session_id: &str,
        timeout: Duration,
    ) -> ApprovalResult {
        let key = SimilarityKey::derive(&classification);

        if self.session_cache_covers(session_id, &key) || self.global_cache_covers(&key) {
            return ApprovalResult {
                decision: ApprovalDecision::Approved,
                approve_similar: false,
                modified_params: None,
                remember_scope: None,
                decided_by: Some("similar_match".to_string()),
            };
        }

        let request_id = format!("{session_id}:{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id.clone(), Pending { tx });

        if let Some(callback) = self.on_request.lock().unwrap().as_ref() {
            callback(&request_id, &classification, step_id);
        }

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => ApprovalResult::timeout(),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                ApprovalResult::timeout()
            }
        };

        if result.decision == ApprovalDecision::Approved && result.approve_similar {
            self.remember(session_id, &key, result.remember_scope);
        }

        result
    }

    /// The UI's (or test harness's) answer to a pending request. Returns
    /// `false` if `request_id` is unknown (already resolved or expired).
    pub fn resolve(&self, request_id: &str, result: ApprovalResult) -> bool {
        let pending = self.pending.lock().unwrap().remove(request_id);
        match pending {
            Some(p) => p.tx.send(result).is_ok(),
            None => false,
        }
    }

    fn remember(&self, session_id: &str, key: &SimilarityKey, scope: Option<RememberScope>) {
        match scope {
            Some(RememberScope::ToolType) => {
                self.global_cache.lock().unwrap().push(key.clone());
            }
            _ => {
                if let Some(cache) = self.session_caches.lock().unwrap().get_mut(session_id) {
                    cache.entries.push(key.clone());
                }
            }
        }
    }

    fn session_cache_covers(&self, session_id: &str, key: &SimilarityKey) -> bool {
        self.session_caches
            .lock()
            .unwrap()
            .get(session_id)
            .map(|cache| cache.entries.iter().any(|cached| cached.covers(key)))
            .unwrap_or(false)
    }

    fn global_cache_covers(&self, key: &SimilarityKey) -> bool {
        self.global_cache.lock().unwrap().iter().any(|cached| cached.covers(key))
    }
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn classification(tool_name: &str, path: Option<&str>) -> ActionClassification {
        let mut parameters = StdHashMap::new();
        if let Some(p) = path {
            parameters.insert("path".to_string(), serde_json::json!(p));
        }
        ActionClassification {
            tool_name: tool_name.to_string(),
            parameters,
            risk_level: crate::types::RiskTier::Destructive,
            reason: "test".to_string(),
            requires_approval: true,
        }
    }

    #[tokio::test]
    async fn timeout_resolves_as_timeout_not_rejection() {
        let manager = ApprovalManager::new();
        manager.start_session("s1");
        let result = manager
            .request_approval(classification("file_write", Some("/a")), "step-1", "s1", Duration::from_millis(20))
            .await;
        assert_eq!(result.decision, ApprovalDecision::Timeout);
    }

    #[tokio::test]
    async fn approve_similar_covers_subdirectory() {
        let manager = ApprovalManager::new();
        manager.start_session("s1");

        let cls1 = classification("file_write", Some("/src/a.py"));
        let key1 = SimilarityKey::derive(&cls1);
        manager.remember("s1", &key1, Some(RememberScope::Session));

        let cls2 = classification("file_write", Some("/src/components/b.py"));
        let result = manager.request_approval(cls2, "step-2", "s1", Duration::from_secs(1)).await;
        assert_eq!(result.decided_by.as_deref(), Some("similar_match"));
    }

    #[tokio::test]
    async fn end_session_resolves_pending_as_timeout() {
        let manager = std::sync::Arc::new(ApprovalManager::new());
        manager.start_session("s1");
        let manager2 = manager.clone();
        let handle = tokio::spawn(async move {
            manager2
                .request_approval(classification("code_execution", None), "step-1", "s1", Duration::from_secs(5))
                .await
        });
        tokio::task::yield_now().await;
        manager.end_session("s1");
        let result = handle.await.unwrap();
        assert_eq!(result.decision, ApprovalDecision::Timeout);
    }
}
