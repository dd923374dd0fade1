//! Schema migrations
//!
//! Applied versions are recorded in the `migrations` table, so opening an
//! existing database only runs what it has not seen yet.

use rusqlite::Connection;

use crate::database::schema::{
    CREATE_ALERTS_TABLE, CREATE_COMPLIANCE_EVENTS_TABLE, CREATE_COOLING_SESSIONS_TABLE,
    CREATE_EVENTS_SESSION_INDEX, CREATE_MIGRATIONS_TABLE, CREATE_SESSIONS_OPEN_INDEX,
    CREATE_SYNC_QUEUE_TABLE,
};
use crate::database::DatabaseError;

/// One schema step
struct Migration {
    version: i32,
    name: &'static str,
    statements: &'static [&'static str],
}

/// Ordered by version; never edit a released entry, append a new one.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_cooling_tables",
        statements: &[
            CREATE_COOLING_SESSIONS_TABLE,
            CREATE_SESSIONS_OPEN_INDEX,
            CREATE_COMPLIANCE_EVENTS_TABLE,
            CREATE_EVENTS_SESSION_INDEX,
        ],
    },
    Migration {
        version: 2,
        name: "add_alerts_and_sync_queue",
        statements: &[CREATE_ALERTS_TABLE, CREATE_SYNC_QUEUE_TABLE],
    },
];

/// Highest applied version, 0 for a fresh database
fn schema_version(conn: &Connection) -> Result<i32, DatabaseError> {
    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

fn mark_applied(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        (migration.version, migration.name),
    )?;
    Ok(())
}

/// Brings the schema up to date.
///
/// Every step gets its own transaction; the first failure rolls that step
/// back and aborts the rest.
pub fn run_migrations(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(CREATE_MIGRATIONS_TABLE)?;

    let applied = schema_version(conn)?;
    let mut steps = MIGRATIONS.iter().filter(|m| m.version > applied).peekable();
    if steps.peek().is_none() {
        tracing::debug!("Schema already at v{}", applied);
        return Ok(());
    }

    for migration in steps {
        tracing::info!("Migrating schema to v{} ({})", migration.version, migration.name);

        let tx = conn.transaction()?;
        for sql in migration.statements {
            tx.execute_batch(sql).map_err(|e| {
                DatabaseError::Migration(format!("v{} {}: {}", migration.version, migration.name, e))
            })?;
        }
        mark_applied(&tx, migration)?;
        tx.commit()?;
    }

    tracing::info!("Schema now at v{}", schema_version(conn)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_rerun_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();

        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        for table in ["cooling_sessions", "compliance_events", "alerts", "sync_queue"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_latest_version_recorded() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_alert_uniqueness_constraint() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        conn.execute_batch(
            r#"
            INSERT INTO cooling_sessions (id, item_name, category, site_id, started_at,
                soft_due_at, hard_due_at, status)
            VALUES ('s1', 'Rice', 'rice', 'site', '2026-03-01T12:00:00.000Z',
                '2026-03-01T13:30:00.000Z', '2026-03-01T14:00:00.000Z', 'active');
            INSERT INTO alerts (id, session_id, kind, message, triggered_at)
            VALUES ('a1', 's1', 'warning', 'check', '2026-03-01T13:30:00.000Z');
            "#,
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO alerts (id, session_id, kind, message, triggered_at)
             VALUES ('a2', 's1', 'warning', 'check', '2026-03-01T13:31:00.000Z')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
