//! Database module for CoolSafe.
//!
//! Local SQLite store for cooling sessions, the compliance audit log, alerts,
//! and the offline sync queue. The local database is authoritative; the remote
//! backend only ever receives copies. Default location is
//! `~/.coolsafe/coolsafe.db`.

pub mod alerts;
pub mod events;
pub mod migrations;
pub mod queue;
pub mod schema;
pub mod sessions;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Row, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::database::migrations::run_migrations;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Failed to serialise record: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// Returns the path to the database file (~/.coolsafe/coolsafe.db).
pub fn default_database_path() -> PathBuf {
    crate::config::get_config_dir().join("coolsafe.db")
}

/// Handle to the local SQLite database.
///
/// One connection guarded by a mutex. Components receive an
/// `Arc<Database>` at construction; nothing opens connections on its own.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database at `path` and applies migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
                tracing::info!("Created database directory at {:?}", dir);
            }
        }

        tracing::info!("Opening database at {:?}", path);
        let conn = Connection::open(path)?;
        Self::initialise(conn, Some(path.to_path_buf()))
    }

    /// Opens a private in-memory database with migrations applied.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::initialise(conn, None)
    }

    fn initialise(mut conn: Connection, path: Option<PathBuf>) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runs `f` with the shared connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside a transaction, committing only if it succeeds.
    ///
    /// Any error returned by `f` rolls the transaction back.
    pub fn transaction<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(value)
    }
}

// =============================================================================
// Column helpers
// =============================================================================

/// Format a timestamp for storage. Fixed precision keeps text ordering correct.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_optional_timestamp(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    })
    .transpose()
}

/// Parse a text column holding an enum name.
pub(crate) fn parse_text<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

pub(crate) fn parse_optional_text<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        value.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_database_path_format() {
        let path = default_database_path();
        assert!(path.to_string_lossy().contains(".coolsafe"));
        assert!(path.to_string_lossy().ends_with("coolsafe.db"));
    }

    #[test]
    fn test_in_memory_database_has_no_path() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
    }

    #[test]
    fn test_timestamp_format_is_sortable() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert!(format_timestamp(&early).ends_with('Z'));
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result = db.transaction(|tx| -> Result<(), DatabaseError> {
            tx.execute(
                "INSERT INTO migrations (version, name) VALUES (99, 'scratch')",
                [],
            )?;
            Err(DatabaseError::Migration("forced".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM migrations WHERE version = 99",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
