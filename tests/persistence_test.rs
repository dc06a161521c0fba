//! The three SQLite-backed stores — audit log, autonomy settings, and
//! session/step repo — exercised directly against a throwaway on-disk
//! database, independent of the executor that normally drives them.

use agentrt::audit::{AuditFilter, AuditStore, ExportFormat};
use agentrt::autonomy::AutonomyPersistence;
use agentrt::storage::{temp_db_path, Db, SqliteAuditStore, SqliteAutonomyStore, SqliteSessionRepo};
use agentrt::types::{AutonomyLevel, AutonomySettings, PlanStep, RiskTier, StepStatus};
use agentrt::Session;

fn build_entry(session_id: &str, tool_name: &str, risk: RiskTier) -> agentrt::types::AuditEntry {
    agentrt::audit::build_entry(
        session_id,
        tool_name,
        risk,
        "{\"path\":\"/tmp/x\"}",
        None,
        None,
        12,
        true,
        Some("\"ok\"".to_string()),
        None,
        false,
    )
}

#[tokio::test]
async fn audit_entries_survive_a_round_trip_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = temp_db_path(dir.path(), "audit");
    let store = SqliteAuditStore::new(&db).unwrap();

    store.append(build_entry("session-1", "file_read", RiskTier::Safe)).await.unwrap();
    store.append(build_entry("session-1", "file_write", RiskTier::Destructive)).await.unwrap();
    store.append(build_entry("session-2", "web_search", RiskTier::Safe)).await.unwrap();

    let all = store.query(AuditFilter::default(), 0, 10).await.unwrap();
    assert_eq!(all.len(), 3);

    let session_1_only = store
        .query(AuditFilter { session_id: Some("session-1".to_string()), ..Default::default() }, 0, 10)
        .await
        .unwrap();
    assert_eq!(session_1_only.len(), 2);

    let destructive_only = store
        .query(AuditFilter { risk_level: Some(RiskTier::Destructive), ..Default::default() }, 0, 10)
        .await
        .unwrap();
    assert_eq!(destructive_only.len(), 1);
    assert_eq!(destructive_only[0].tool_name, "file_write");
}

#[tokio::test]
async fn audit_export_renders_both_formats() {
    let dir = tempfile::tempdir().unwrap();
    let db = temp_db_path(dir.path(), "audit");
    let store = SqliteAuditStore::new(&db).unwrap();
    store.append(build_entry("session-1", "file_read", RiskTier::Safe)).await.unwrap();

    let json = store.export(AuditFilter::default(), ExportFormat::Json).await.unwrap();
    assert!(json.contains("file_read"));

    let csv = store.export(AuditFilter::default(), ExportFormat::Csv).await.unwrap();
    assert!(csv.starts_with("id,session_id,timestamp"));
    assert!(csv.contains("file_read"));
}

#[tokio::test]
async fn audit_cleanup_removes_only_entries_past_retention() {
    let dir = tempfile::tempdir().unwrap();
    let db = temp_db_path(dir.path(), "audit");
    let store = SqliteAuditStore::new(&db).unwrap();
    store.append(build_entry("session-1", "file_read", RiskTier::Safe)).await.unwrap();

    // A fresh entry is well within the 30-day non-YOLO retention window.
    let removed = store.cleanup(chrono::Utc::now()).await.unwrap();
    assert_eq!(removed, 0);
    assert_eq!(store.query(AuditFilter::default(), 0, 10).await.unwrap().len(), 1);

    // Sixty days from now, the same entry is past the non-YOLO cutoff.
    let removed = store.cleanup(chrono::Utc::now() + chrono::Duration::days(60)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.query(AuditFilter::default(), 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn autonomy_settings_persist_across_a_fresh_connection_and_never_store_l5() {
    let dir = tempfile::tempdir().unwrap();
    let db = temp_db_path(dir.path(), "autonomy");
    let store = SqliteAutonomyStore::new(&db).unwrap();

    assert!(store.load("/projects/demo").await.unwrap().is_none());

    let settings = AutonomySettings {
        project_path: "/projects/demo".to_string(),
        level: AutonomyLevel::L3,
        allowlist: vec!["web_search".to_string()],
        blocklist: vec!["DROP TABLE".to_string()],
    };
    store.save(&settings).await.unwrap();

    // A second store instance opening the same file sees the save.
    let reopened = SqliteAutonomyStore::new(&db).unwrap();
    let loaded = reopened.load("/projects/demo").await.unwrap().unwrap();
    assert_eq!(loaded.level, AutonomyLevel::L3);
    assert_eq!(loaded.allowlist, vec!["web_search".to_string()]);
    assert_eq!(loaded.blocklist, vec!["DROP TABLE".to_string()]);
}

#[tokio::test]
async fn session_repo_round_trips_session_and_step_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = temp_db_path(dir.path(), "sessions");
    // `Db::open` runs the same migrations the repo itself would run on
    // first use; opening it here just proves migrations are idempotent
    // across repeated opens of the same file.
    Db::open(&db).unwrap();
    let repo = SqliteSessionRepo::new(&db).unwrap();

    let mut session = Session::new("investigate the outage");
    repo.save_session(&session).unwrap();

    let mut step = PlanStep::new("step-1", "look at the logs");
    step.status = StepStatus::Completed;
    step.result = Some(serde_json::json!({"lines_scanned": 400}));
    repo.save_step(&session.id, &step).unwrap();

    session.finish(agentrt::types::SessionState::Completed);
    repo.save_session(&session).unwrap();

    let ids = repo.list_sessions().unwrap();
    assert!(ids.contains(&session.id));
}
