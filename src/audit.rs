//! The durable, append-only audit log.
//!
//! Defines the storage-agnostic trait; `storage::audit_store` supplies
//! the SQLite-backed implementation with the indexes spec.md asks for.
//! Kept separate from `storage` the way the teacher keeps `trace.rs`
//! (the in-memory contract) apart from `checkpoint.rs` (the persistence
//! backends) for the same record type.

use crate::types::{ApprovalDecision, AuditEntry, RiskTier};
use chrono::{DateTime, Utc};

const NON_YOLO_RETENTION_DAYS: i64 = 30;
const YOLO_RETENTION_DAYS: i64 = 90;

/// Truncation applied to `parameters` for non-YOLO entries.
const PARAM_TRUNCATE_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub session_id: Option<String>,
    pub risk_level: Option<RiskTier>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub enum ExportFormat {
    Json,
    Csv,
}

#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), String>;
    async fn query(&self, filter: AuditFilter, page: usize, page_size: usize) -> Result<Vec<AuditEntry>, String>;
    async fn export(&self, filter: AuditFilter, format: ExportFormat) -> Result<String, String>;
    /// Deletes rows past retention. Returns
    /// the number of rows removed.
    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, String>;
}

/// Builds the `AuditEntry` for one invocation, truncating parameters for
/// non-YOLO entries and stashing the full payload separately when they
/// were captured under YOLO mode.
pub fn build_entry(
    session_id: &str,
    tool_name: &str,
    risk_level: RiskTier,
    parameters_json: &str,
    approval_decision: Option<ApprovalDecision>,
    approved_by: Option<String>,
    duration_ms: u64,
    success: bool,
    result: Option<String>,
    error: Option<String>,
    yolo_mode: bool,
) -> AuditEntry {
    let (parameters, full_parameters) = if yolo_mode {
        (truncate(parameters_json), Some(parameters_json.to_string()))
    } else {
        (truncate(parameters_json), None)
    };

    AuditEntry {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        timestamp: Utc::now(),
        tool_name: tool_name.to_string(),
        risk_level,
        parameters,
        full_parameters,
        approval_decision,
        approved_by,
        duration_ms,
        success,
        result,
        error,
        yolo_mode,
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= PARAM_TRUNCATE_BYTES {
        s.to_string()
    } else {
        let mut end = PARAM_TRUNCATE_BYTES;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...<truncated>", &s[..end])
    }
}

/// Whether an entry is past its retention window, per the 30d/90d rule.
pub fn is_expired(entry: &AuditEntry, now: DateTime<Utc>) -> bool {
    let age_days = (now - entry.timestamp).num_days();
    if entry.yolo_mode {
        age_days > YOLO_RETENTION_DAYS
    } else {
        age_days > NON_YOLO_RETENTION_DAYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_parameters_are_truncated_for_non_yolo() {
        let big = "x".repeat(PARAM_TRUNCATE_BYTES + 100);
        let entry = build_entry("s1", "file_write", RiskTier::Destructive, &big, None, None, 10, true, None, None, false);
        assert!(entry.parameters.len() < big.len());
        assert!(entry.full_parameters.is_none());
    }

    #[test]
    fn yolo_entries_keep_the_full_payload() {
        let big = "y".repeat(PARAM_TRUNCATE_BYTES + 100);
        let entry = build_entry("s1", "file_write", RiskTier::Destructive, &big, None, None, 10, true, None, None, true);
        assert_eq!(entry.full_parameters.as_deref(), Some(big.as_str()));
    }

    #[test]
    fn non_yolo_expires_after_30_days_yolo_after_90() {
        let now = Utc::now();
        let mut entry = build_entry("s1", "file_read", RiskTier::Safe, "{}", None, None, 1, true, None, None, false);
        entry.timestamp = now - chrono::Duration::days(31);
        assert!(is_expired(&entry, now));

        entry.yolo_mode = true;
        entry.timestamp = now - chrono::Duration::days(31);
        assert!(!is_expired(&entry, now));

        entry.timestamp = now - chrono::Duration::days(91);
        assert!(is_expired(&entry, now));
    }
}
