//! Database schema definitions for CoolSafe.
//!
//! Contains SQL statements for creating and managing database tables.

/// SQL statement to create the migrations tracking table.
pub const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQL statement to create the cooling sessions table.
pub const CREATE_COOLING_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cooling_sessions (
    id TEXT PRIMARY KEY,
    item_name TEXT NOT NULL,
    category TEXT NOT NULL,
    site_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    soft_due_at TEXT NOT NULL,
    hard_due_at TEXT NOT NULL,
    status TEXT NOT NULL,
    closed_at TEXT,
    close_action TEXT,
    start_temperature REAL,
    end_temperature REAL,
    closed_by_staff_id TEXT,
    closed_by TEXT,
    discard_reason TEXT,
    exception_reason TEXT,
    exception_approved_by TEXT,
    synced INTEGER NOT NULL DEFAULT 0
);
"#;

/// Index for the open-session scan run on every status tick.
pub const CREATE_SESSIONS_OPEN_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_cooling_sessions_open ON cooling_sessions(closed_at, started_at);
"#;

/// SQL statement to create the append-only compliance events table.
pub const CREATE_COMPLIANCE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS compliance_events (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES cooling_sessions(id),
    event_type TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    payload TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);
"#;

pub const CREATE_EVENTS_SESSION_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_compliance_events_session ON compliance_events(session_id, occurred_at);
"#;

/// SQL statement to create the alerts table (v2 migration).
///
/// The unique constraint is what keeps a threshold from alerting twice.
pub const CREATE_ALERTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES cooling_sessions(id),
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    triggered_at TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    UNIQUE (session_id, kind)
);
"#;

/// SQL statement to create the offline sync queue (v2 migration).
pub const CREATE_SYNC_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL UNIQUE REFERENCES compliance_events(id),
    session_id TEXT NOT NULL,
    session_snapshot TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);
"#;
