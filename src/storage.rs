//! The embedded SQL database: one SQLite file in WAL mode
//! backing every table the core owns (`agent_session`, `agent_step`,
//! `agent_audit`, `project_autonomy`, `external_servers`,
//! `tool_approval`).
//!
//! Generalizes `SqliteCheckpointStore`'s `Connection::open` +
//! `CREATE TABLE IF NOT EXISTS` + explicit `params!` binding pattern —
//! the teacher opens one throwaway connection per call against a single
//! `checkpoints` table; this module does the same against six tables,
//! plus sets `PRAGMA journal_mode=WAL` once per connection the way spec
//! §6 requires ("a single embedded SQL database (WAL)").

use crate::audit::{AuditFilter, AuditStore, ExportFormat};
use crate::autonomy::AutonomyPersistence;
use crate::types::{
    ApprovalDecision, AuditEntry, AutonomyLevel, AutonomySettings, ExternalServerConfig,
    RiskTier, ServerTrust, TransportKind,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Owns the database file path and runs migrations once at construction.
/// Every store below opens its own short-lived connection against this
/// same path — safe under WAL, which allows one writer and many
/// concurrent readers.
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(|e| e.to_string())?;
        Self::migrate(&conn)?;
        Ok(Self { path })
    }

    /// In-memory database — each connection would otherwise see its own
    /// private database, so callers that need an in-memory `Db` for
    /// tests should keep the returned handle alive and call
    /// [`Db::connect`] rather than opening a fresh `:memory:` path per
    /// store; this crate's stores always go through `connect()`.
    pub fn connect(&self) -> Result<Connection, String> {
        let conn = Connection::open(&self.path).map_err(|e| e.to_string())?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| e.to_string())?;
        Ok(conn)
    }

    fn migrate(conn: &Connection) -> Result<(), String> {
        conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

            CREATE TABLE IF NOT EXISTS agent_session (
                id          TEXT PRIMARY KEY,
                task        TEXT NOT NULL,
                state       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                ended_at    TEXT,
                tokens_in   INTEGER NOT NULL,
                tokens_out  INTEGER NOT NULL,
                cost        REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS agent_step (
                session_id  TEXT NOT NULL,
                step_id     TEXT NOT NULL,
                description TEXT NOT NULL,
                tool_name   TEXT,
                params      TEXT,
                status      TEXT NOT NULL,
                result      TEXT,
                error       TEXT,
                deps        TEXT NOT NULL,
                PRIMARY KEY (session_id, step_id)
            );

            CREATE TABLE IF NOT EXISTS agent_audit (
                id                  TEXT PRIMARY KEY,
                session_id          TEXT NOT NULL,
                timestamp           TEXT NOT NULL,
                tool_name           TEXT NOT NULL,
                risk_level          TEXT NOT NULL,
                parameters          TEXT NOT NULL,
                full_parameters     TEXT,
                approval_decision   TEXT,
                approved_by         TEXT,
                duration_ms         INTEGER NOT NULL,
                success             INTEGER NOT NULL,
                result              TEXT,
                error               TEXT,
                yolo_mode           INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_session   ON agent_audit(session_id);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON agent_audit(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_risk      ON agent_audit(risk_level);

            CREATE TABLE IF NOT EXISTS project_autonomy (
                project_path   TEXT PRIMARY KEY,
                level          TEXT NOT NULL,
                allowlist_json TEXT NOT NULL,
                blocklist_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS external_servers (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                description     TEXT,
                transport       TEXT NOT NULL,
                command         TEXT,
                args_json       TEXT NOT NULL,
                env_json        TEXT NOT NULL,
                url             TEXT,
                headers_json    TEXT NOT NULL,
                trust           TEXT NOT NULL,
                sandbox_enabled INTEGER NOT NULL,
                image           TEXT,
                category        TEXT NOT NULL,
                enabled         INTEGER NOT NULL,
                created_at      TEXT NOT NULL,
                last_connected  TEXT,
                last_error      TEXT
            );

            CREATE TABLE IF NOT EXISTS tool_approval (
                id          TEXT PRIMARY KEY,
                server_id   TEXT NOT NULL REFERENCES external_servers(id) ON DELETE CASCADE,
                tool_name   TEXT NOT NULL,
                approved    INTEGER NOT NULL,
                approved_at TEXT
            );
            ",
        )
        .map_err(|e| e.to_string())?;

        let has_version: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .map_err(|e| e.to_string())?;
        if has_version == 0 {
            conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

fn risk_str(r: RiskTier) -> &'static str {
    match r {
        RiskTier::Safe => "safe",
        RiskTier::Moderate => "moderate",
        RiskTier::Destructive => "destructive",
        RiskTier::Critical => "critical",
    }
}

fn risk_from_str(s: &str) -> RiskTier {
    match s {
        "moderate" => RiskTier::Moderate,
        "destructive" => RiskTier::Destructive,
        "critical" => RiskTier::Critical,
        _ => RiskTier::Safe,
    }
}

fn decision_str(d: ApprovalDecision) -> &'static str {
    match d {
        ApprovalDecision::Approved => "approved",
        ApprovalDecision::Rejected => "rejected",
        ApprovalDecision::Timeout => "timeout",
    }
}

fn decision_from_str(s: &str) -> ApprovalDecision {
    match s {
        "rejected" => ApprovalDecision::Rejected,
        "timeout" => ApprovalDecision::Timeout,
        _ => ApprovalDecision::Approved,
    }
}

/// SQLite-backed [`AuditStore`]: append-only, indexed on
/// `(session_id)`, `(timestamp)`, `(risk_level)`.
pub struct SqliteAuditStore {
    path: PathBuf,
}

impl SqliteAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(|e| e.to_string())?;
        Db::migrate(&conn)?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection, String> {
        let conn = Connection::open(&self.path).map_err(|e| e.to_string())?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| e.to_string())?;
        Ok(conn)
    }
}

#[async_trait::async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agent_audit (id, session_id, timestamp, tool_name, risk_level,
                parameters, full_parameters, approval_decision, approved_by, duration_ms,
                success, result, error, yolo_mode)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                entry.id,
                entry.session_id,
                entry.timestamp.to_rfc3339(),
                entry.tool_name,
                risk_str(entry.risk_level),
                entry.parameters,
                entry.full_parameters,
                entry.approval_decision.map(decision_str),
                entry.approved_by,
                entry.duration_ms as i64,
                entry.success as i64,
                entry.result,
                entry.error,
                entry.yolo_mode as i64,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn query(&self, filter: AuditFilter, page: usize, page_size: usize) -> Result<Vec<AuditEntry>, String> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, session_id, timestamp, tool_name, risk_level, parameters, full_parameters,
                    approval_decision, approved_by, duration_ms, success, result, error, yolo_mode
             FROM agent_audit WHERE 1=1",
        );
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if filter.risk_level.is_some() {
            sql.push_str(" AND risk_level = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp ASC LIMIT ? OFFSET ?");

        let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
        let mut idx = 1;
        // rusqlite doesn't support heterogeneous dynamic binding by index
        // cleanly without boxed params, so we bind via a small helper.
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(s) = &filter.session_id {
            bound.push(Box::new(s.clone()));
        }
        if let Some(r) = filter.risk_level {
            bound.push(Box::new(risk_str(r).to_string()));
        }
        if let Some(s) = filter.since {
            bound.push(Box::new(s.to_rfc3339()));
        }
        if let Some(u) = filter.until {
            bound.push(Box::new(u.to_rfc3339()));
        }
        bound.push(Box::new(page_size as i64));
        bound.push(Box::new((page * page_size) as i64));
        let _ = &mut idx;

        let param_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    timestamp: DateTime::parse_from_rfc3339(&row.get::<_, String>(2)?)
                        .unwrap()
                        .with_timezone(&Utc),
                    tool_name: row.get(3)?,
                    risk_level: risk_from_str(&row.get::<_, String>(4)?),
                    parameters: row.get(5)?,
                    full_parameters: row.get(6)?,
                    approval_decision: row.get::<_, Option<String>>(7)?.map(|s| decision_from_str(&s)),
                    approved_by: row.get(8)?,
                    duration_ms: row.get::<_, i64>(9)? as u64,
                    success: row.get::<_, i64>(10)? != 0,
                    result: row.get(11)?,
                    error: row.get(12)?,
                    yolo_mode: row.get::<_, i64>(13)? != 0,
                })
            })
            .map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(|e| e.to_string())?);
        }
        Ok(out)
    }

    async fn export(&self, filter: AuditFilter, format: ExportFormat) -> Result<String, String> {
        let entries = self.query(filter, 0, usize::MAX / 2).await?;
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&entries).map_err(|e| e.to_string()),
            ExportFormat::Csv => {
                let mut out = String::from(
                    "id,session_id,timestamp,tool_name,risk_level,approval_decision,duration_ms,success,yolo_mode\n",
                );
                for e in entries {
                    out.push_str(&format!(
                        "{},{},{},{},{},{},{},{},{}\n",
                        e.id,
                        e.session_id,
                        e.timestamp.to_rfc3339(),
                        e.tool_name,
                        risk_str(e.risk_level),
                        e.approval_decision.map(decision_str).unwrap_or(""),
                        e.duration_ms,
                        e.success,
                        e.yolo_mode,
                    ));
                }
                Ok(out)
            }
        }
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, String> {
        let conn = self.conn()?;
        let non_yolo_cutoff = (now - chrono::Duration::days(30)).to_rfc3339();
        let yolo_cutoff = (now - chrono::Duration::days(90)).to_rfc3339();
        let n = conn
            .execute(
                "DELETE FROM agent_audit
                 WHERE (yolo_mode = 0 AND timestamp < ?1)
                    OR (yolo_mode = 1 AND timestamp < ?2)",
                params![non_yolo_cutoff, yolo_cutoff],
            )
            .map_err(|e| e.to_string())?;
        Ok(n as u64)
    }
}

/// SQLite-backed [`AutonomyPersistence`] against `project_autonomy`.
pub struct SqliteAutonomyStore {
    path: PathBuf,
}

impl SqliteAutonomyStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(|e| e.to_string())?;
        Db::migrate(&conn)?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection, String> {
        Connection::open(&self.path).map_err(|e| e.to_string())
    }
}

fn level_str(l: AutonomyLevel) -> &'static str {
    match l {
        AutonomyLevel::L1 => "L1",
        AutonomyLevel::L2 => "L2",
        AutonomyLevel::L3 => "L3",
        AutonomyLevel::L4 => "L4",
        AutonomyLevel::L5 => "L5",
    }
}

fn level_from_str(s: &str) -> AutonomyLevel {
    match s {
        "L1" => AutonomyLevel::L1,
        "L3" => AutonomyLevel::L3,
        "L4" => AutonomyLevel::L4,
        "L5" => AutonomyLevel::L5,
        _ => AutonomyLevel::L2,
    }
}

#[async_trait::async_trait]
impl AutonomyPersistence for SqliteAutonomyStore {
    async fn load(&self, project_path: &str) -> Result<Option<AutonomySettings>, String> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT level, allowlist_json, blocklist_json FROM project_autonomy WHERE project_path = ?1",
                params![project_path],
                |row| {
                    let level: String = row.get(0)?;
                    let allow: String = row.get(1)?;
                    let block: String = row.get(2)?;
                    Ok((level, allow, block))
                },
            )
            .optional()
            .map_err(|e| e.to_string())?;

        Ok(row.map(|(level, allow, block)| AutonomySettings {
            project_path: project_path.to_string(),
            // L5 is never persisted — a stored row is
            // always L1..L4; `level_from_str` never maps to L5.
            level: level_from_str(&level),
            allowlist: serde_json::from_str(&allow).unwrap_or_default(),
            blocklist: serde_json::from_str(&block).unwrap_or_default(),
        }))
    }

    async fn save(&self, settings: &AutonomySettings) -> Result<(), String> {
        debug_assert!(settings.level != AutonomyLevel::L5, "L5 must never be persisted");
        let conn = self.conn()?;
        let allow = serde_json::to_string(&settings.allowlist).map_err(|e| e.to_string())?;
        let block = serde_json::to_string(&settings.blocklist).map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO project_autonomy (project_path, level, allowlist_json, blocklist_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_path) DO UPDATE SET
                level = excluded.level,
                allowlist_json = excluded.allowlist_json,
                blocklist_json = excluded.blocklist_json",
            params![settings.project_path, level_str(settings.level), allow, block],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn transport_str(t: TransportKind) -> &'static str {
    match t {
        TransportKind::Stdio => "stdio",
        TransportKind::Http => "http",
    }
}

fn transport_from_str(s: &str) -> TransportKind {
    if s == "http" {
        TransportKind::Http
    } else {
        TransportKind::Stdio
    }
}

fn trust_str(t: ServerTrust) -> &'static str {
    match t {
        ServerTrust::Builtin => "builtin",
        ServerTrust::Verified => "verified",
        ServerTrust::UserAdded => "user_added",
    }
}

fn trust_from_str(s: &str) -> ServerTrust {
    match s {
        "builtin" => ServerTrust::Builtin,
        "verified" => ServerTrust::Verified,
        _ => ServerTrust::UserAdded,
    }
}

/// SQLite-backed store for `external_servers` + cascade-deleted
/// `tool_approval` rows.
pub struct SqliteServerStore {
    path: PathBuf,
}

impl SqliteServerStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(|e| e.to_string())?;
        Db::migrate(&conn)?;
        conn.execute("PRAGMA foreign_keys = ON", []).map_err(|e| e.to_string())?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection, String> {
        let conn = Connection::open(&self.path).map_err(|e| e.to_string())?;
        conn.execute("PRAGMA foreign_keys = ON", []).map_err(|e| e.to_string())?;
        Ok(conn)
    }

    pub fn save(&self, cfg: &ExternalServerConfig) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO external_servers (id, name, description, transport, command, args_json,
                env_json, url, headers_json, trust, sandbox_enabled, image, category, enabled,
                created_at, last_connected, last_error)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
             ON CONFLICT(id) DO UPDATE SET
                name=excluded.name, description=excluded.description, transport=excluded.transport,
                command=excluded.command, args_json=excluded.args_json, env_json=excluded.env_json,
                url=excluded.url, headers_json=excluded.headers_json, trust=excluded.trust,
                sandbox_enabled=excluded.sandbox_enabled, image=excluded.image,
                category=excluded.category,
                enabled=excluded.enabled, last_connected=excluded.last_connected,
                last_error=excluded.last_error",
            params![
                cfg.id,
                cfg.name,
                None::<String>,
                transport_str(cfg.transport),
                cfg.command,
                serde_json::to_string(&cfg.args).map_err(|e| e.to_string())?,
                serde_json::to_string(&cfg.env).map_err(|e| e.to_string())?,
                cfg.url,
                serde_json::to_string(&cfg.headers).map_err(|e| e.to_string())?,
                trust_str(cfg.trust),
                cfg.sandbox_enabled as i64,
                cfg.image,
                cfg.category,
                cfg.enabled as i64,
                cfg.created_at.to_rfc3339(),
                cfg.last_connected.map(|t| t.to_rfc3339()),
                cfg.last_error,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<ExternalServerConfig>, String> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, transport, command, args_json, env_json, url, headers_json, trust,
                    sandbox_enabled, image, category, enabled, created_at, last_connected, last_error
             FROM external_servers WHERE id = ?1",
            params![id],
            |row| {
                Ok(ExternalServerConfig {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    transport: transport_from_str(&row.get::<_, String>(2)?),
                    command: row.get(3)?,
                    args: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                    env: serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
                    url: row.get(6)?,
                    headers: serde_json::from_str(&row.get::<_, String>(7)?).unwrap_or_default(),
                    trust: trust_from_str(&row.get::<_, String>(8)?),
                    sandbox_enabled: row.get::<_, i64>(9)? != 0,
                    image: row.get(10)?,
                    category: row.get(11)?,
                    enabled: row.get::<_, i64>(12)? != 0,
                    created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(13)?)
                        .unwrap()
                        .with_timezone(&Utc),
                    last_connected: row
                        .get::<_, Option<String>>(14)?
                        .map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)),
                    last_error: row.get(15)?,
                })
            },
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn delete(&self, id: &str) -> Result<(), String> {
        let conn = self.conn()?;
        // `tool_approval` rows cascade-delete via the foreign key.
        conn.execute("DELETE FROM external_servers WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Repository for session/step replay and history, backing `agent_session`/`agent_step`.
pub struct SqliteSessionRepo {
    path: PathBuf,
}

impl SqliteSessionRepo {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(|e| e.to_string())?;
        Db::migrate(&conn)?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection, String> {
        Connection::open(&self.path).map_err(|e| e.to_string())
    }

    pub fn save_session(&self, session: &crate::session::Session) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agent_session (id, task, state, created_at, ended_at, tokens_in, tokens_out, cost)
             VALUES (?1,?2,?3,?4,?5,?6,?7,0)
             ON CONFLICT(id) DO UPDATE SET
                state=excluded.state, ended_at=excluded.ended_at,
                tokens_in=excluded.tokens_in, tokens_out=excluded.tokens_out",
            params![
                session.id,
                session.task,
                session.state.to_string(),
                session.created_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.tokens_used_input as i64,
                session.tokens_used_output as i64,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn save_step(&self, session_id: &str, step: &crate::types::PlanStep) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agent_step (session_id, step_id, description, tool_name, params, status, result, error, deps)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(session_id, step_id) DO UPDATE SET
                status=excluded.status, result=excluded.result, error=excluded.error",
            params![
                session_id,
                step.id,
                step.description,
                step.tool_name,
                step.params.as_ref().map(|p| p.to_string()),
                format!("{:?}", step.status),
                step.result.as_ref().map(|r| r.to_string()),
                step.error,
                serde_json::to_string(&step.dependencies).map_err(|e| e.to_string())?,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn list_sessions(&self) -> Result<Vec<String>, String> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM agent_session ORDER BY created_at DESC").map_err(|e| e.to_string())?;
        let rows = stmt.query_map([], |r| r.get(0)).map_err(|e| e.to_string())?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(|e| e.to_string())?);
        }
        Ok(out)
    }
}

/// Convenience used by tests and demos: a throwaway on-disk database in
/// a temp directory, torn down when the `tempfile::TempDir` drops.
pub fn temp_db_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.sqlite3"))
}
