//! The human-in-the-loop machinery — classifier, autonomy levels, and
//! the approval manager — exercised together against their public
//! APIs, independent of the executor that normally wires them up.

use agentrt::approval::ApprovalManager;
use agentrt::autonomy::{AutonomyPersistence, AutonomyService};
use agentrt::classifier::Classifier;
use agentrt::types::{ApprovalDecision, ApprovalResult, AutonomyLevel, AutonomySettings, RememberScope, RiskTier};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

struct InMemoryPersistence {
    data: Mutex<HashMap<String, AutonomySettings>>,
}

impl InMemoryPersistence {
    fn new() -> Self {
        Self { data: Mutex::new(HashMap::new()) }
    }
}

#[async_trait::async_trait]
impl AutonomyPersistence for InMemoryPersistence {
    async fn load(&self, project_path: &str) -> Result<Option<AutonomySettings>, String> {
        Ok(self.data.lock().unwrap().get(project_path).cloned())
    }
    async fn save(&self, settings: &AutonomySettings) -> Result<(), String> {
        self.data.lock().unwrap().insert(settings.project_path.clone(), settings.clone());
        Ok(())
    }
}

#[tokio::test]
async fn a_newly_created_project_starts_at_l2_and_requires_approval_for_a_destructive_action() {
    let autonomy = AutonomyService::new(std::sync::Arc::new(InMemoryPersistence::new()));
    let classifier = Classifier::new();

    let settings = autonomy.get_settings("/projects/demo").await.unwrap();
    assert_eq!(settings.level, AutonomyLevel::L2);

    let mut params = HashMap::new();
    params.insert("path".to_string(), serde_json::json!("/projects/demo/out.txt"));
    let classification = classifier.classify(
        "file_write",
        &params,
        Some("/projects/demo"),
        &settings,
        None,
    );
    assert_eq!(classification.risk_level, RiskTier::Safe);
    // No `tool_def` is known here, so the classifier can't see
    // `is_destructive`; requires_approval only follows from risk tier.
    assert!(!classification.requires_approval);
}

#[tokio::test]
async fn raising_the_autonomy_level_lets_a_moderate_action_auto_execute() {
    let autonomy = AutonomyService::new(std::sync::Arc::new(InMemoryPersistence::new()));
    autonomy.set_level("/projects/demo", AutonomyLevel::L3).await.unwrap();
    let settings = autonomy.get_settings("/projects/demo").await.unwrap();

    let classifier = Classifier::new();
    let classification = classifier.classify("file_list", &HashMap::new(), Some("/projects/demo"), &settings, None);
    assert_eq!(classification.risk_level, RiskTier::Safe);
    assert!(!classification.requires_approval);
}

#[tokio::test]
async fn a_blocklisted_pattern_always_requires_approval_regardless_of_level() {
    let autonomy = AutonomyService::new(std::sync::Arc::new(InMemoryPersistence::new()));
    autonomy.set_level("/projects/demo", AutonomyLevel::L4).await.unwrap();
    autonomy.add_to_blocklist("/projects/demo", "DROP TABLE").await.unwrap();
    let settings = autonomy.get_settings("/projects/demo").await.unwrap();

    let mut params = HashMap::new();
    params.insert("query".to_string(), serde_json::json!("DROP TABLE users"));
    let classifier = Classifier::new();
    let classification = classifier.classify("knowledge_query", &params, Some("/projects/demo"), &settings, None);
    assert_eq!(classification.risk_level, RiskTier::Critical);
    assert!(classification.requires_approval);
}

#[tokio::test]
async fn an_approval_request_without_a_reviewer_eventually_times_out() {
    let manager = ApprovalManager::new();
    manager.start_session("session-1");
    let classifier = Classifier::new();
    let settings = AutonomySettings { project_path: "/proj".to_string(), level: AutonomyLevel::L1, allowlist: vec![], blocklist: vec![] };
    let classification = classifier.classify("code_execution", &HashMap::new(), Some("/proj"), &settings, None);

    let result = manager
        .request_approval(classification, "step-1", "session-1", Duration::from_millis(30))
        .await;
    assert_eq!(result.decision, ApprovalDecision::Timeout);
}

#[tokio::test]
async fn resolving_a_pending_request_unblocks_the_waiting_caller_with_the_given_decision() {
    let manager = std::sync::Arc::new(ApprovalManager::new());
    manager.start_session("session-1");
    let classifier = Classifier::new();
    let settings = AutonomySettings { project_path: "/proj".to_string(), level: AutonomyLevel::L1, allowlist: vec![], blocklist: vec![] };
    let classification = classifier.classify("file_delete", &HashMap::new(), Some("/proj"), &settings, None);

    let request_id = std::sync::Arc::new(std::sync::Mutex::new(None));
    manager.set_on_request(Box::new({
        let request_id = request_id.clone();
        move |id, _classification, _step_id| {
            *request_id.lock().unwrap() = Some(id.to_string());
        }
    }));

    let manager2 = manager.clone();
    let handle = tokio::spawn(async move {
        manager2.request_approval(classification, "step-1", "session-1", Duration::from_secs(5)).await
    });

    // Give the spawned request a tick to register before we resolve it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let id = request_id.lock().unwrap().clone().expect("on_request callback fired");
    assert!(manager.resolve(&id, ApprovalResult::approved("reviewer-1")));

    let result = handle.await.unwrap();
    assert_eq!(result.decision, ApprovalDecision::Approved);
    assert_eq!(result.decided_by.as_deref(), Some("reviewer-1"));
}

#[tokio::test]
async fn approving_with_remember_similar_at_tool_type_scope_covers_a_later_session() {
    let manager = std::sync::Arc::new(ApprovalManager::new());
    manager.start_session("session-1");
    let classifier = Classifier::new();
    let settings = AutonomySettings { project_path: "/proj".to_string(), level: AutonomyLevel::L1, allowlist: vec![], blocklist: vec![] };

    let request_id = std::sync::Arc::new(std::sync::Mutex::new(None));
    manager.set_on_request(Box::new({
        let request_id = request_id.clone();
        move |id, _classification, _step_id| {
            *request_id.lock().unwrap() = Some(id.to_string());
        }
    }));

    let mut params_a = HashMap::new();
    params_a.insert("path".to_string(), serde_json::json!("/proj/src/a.py"));
    let classification_a = classifier.classify("file_write", &params_a, Some("/proj"), &settings, None);

    let manager_bg = manager.clone();
    let first = tokio::spawn(async move {
        manager_bg.request_approval(classification_a, "step-1", "session-1", Duration::from_secs(5)).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let id = request_id.lock().unwrap().clone().expect("on_request callback fired");
    manager.resolve(
        &id,
        ApprovalResult {
            decision: ApprovalDecision::Approved,
            approve_similar: true,
            modified_params: None,
            remember_scope: Some(RememberScope::ToolType),
            decided_by: Some("reviewer-1".to_string()),
        },
    );
    let first_result = first.await.unwrap();
    assert_eq!(first_result.decision, ApprovalDecision::Approved);

    // A second, independent session touching a subdirectory of the same
    // remembered path should be auto-approved via the global cache —
    // it never even reaches `on_request`.
    manager.start_session("session-2");
    let mut params_b = HashMap::new();
    params_b.insert("path".to_string(), serde_json::json!("/proj/src/components/b.py"));
    let classification_b = classifier.classify("file_write", &params_b, Some("/proj"), &settings, None);

    let covered = manager
        .request_approval(classification_b, "step-2", "session-2", Duration::from_millis(20))
        .await;
    assert_eq!(covered.decision, ApprovalDecision::Approved);
    assert_eq!(covered.decided_by.as_deref(), Some("similar_match"));
}
