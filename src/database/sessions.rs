//! Cooling session persistence.
//!
//! Functions take a `&Connection` so they can run inside a caller's
//! transaction (`&Transaction` derefs to `&Connection`).

use rusqlite::{params, Connection};

use crate::cooling::session::{CoolingSession, SessionStatus};
use crate::database::{
    format_timestamp, parse_optional_text, parse_optional_timestamp, parse_text, parse_timestamp,
    DatabaseError,
};

/// Column list for all SELECT queries.
const SELECT_COLUMNS: &str = r#"
    id, item_name, category, site_id, started_at, soft_due_at, hard_due_at,
    status, closed_at, close_action, start_temperature, end_temperature,
    closed_by_staff_id, closed_by, discard_reason, exception_reason,
    exception_approved_by, synced
"#;

/// Map a database row to a CoolingSession struct.
fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<CoolingSession> {
    Ok(CoolingSession {
        id: row.get(0)?,
        item_name: row.get(1)?,
        category: parse_text(row, 2)?,
        site_id: row.get(3)?,
        started_at: parse_timestamp(row, 4)?,
        soft_due_at: parse_timestamp(row, 5)?,
        hard_due_at: parse_timestamp(row, 6)?,
        status: parse_text(row, 7)?,
        closed_at: parse_optional_timestamp(row, 8)?,
        close_action: parse_optional_text(row, 9)?,
        start_temperature: row.get(10)?,
        end_temperature: row.get(11)?,
        closed_by_staff_id: row.get(12)?,
        closed_by: row.get(13)?,
        discard_reason: row.get(14)?,
        exception_reason: row.get(15)?,
        exception_approved_by: row.get(16)?,
        synced: row.get::<_, i32>(17)? != 0,
    })
}

/// Inserts a new session.
pub fn insert_session(conn: &Connection, session: &CoolingSession) -> Result<(), DatabaseError> {
    conn.execute(
        r#"
        INSERT INTO cooling_sessions (
            id, item_name, category, site_id, started_at, soft_due_at, hard_due_at,
            status, closed_at, close_action, start_temperature, end_temperature,
            closed_by_staff_id, closed_by, discard_reason, exception_reason,
            exception_approved_by, synced
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        "#,
        params![
            session.id,
            session.item_name,
            session.category.as_str(),
            session.site_id,
            format_timestamp(&session.started_at),
            format_timestamp(&session.soft_due_at),
            format_timestamp(&session.hard_due_at),
            session.status.as_str(),
            session.closed_at.as_ref().map(format_timestamp),
            session.close_action.map(|a| a.as_str()),
            session.start_temperature,
            session.end_temperature,
            session.closed_by_staff_id,
            session.closed_by,
            session.discard_reason,
            session.exception_reason,
            session.exception_approved_by,
            session.synced as i32,
        ],
    )?;

    tracing::debug!("Inserted cooling session: {}", session.id);
    Ok(())
}

/// Writes the mutable fields of an existing session.
///
/// Due times and start time are never rewritten. Returns false when no row
/// matched.
pub fn update_session(conn: &Connection, session: &CoolingSession) -> Result<bool, DatabaseError> {
    let rows_affected = conn.execute(
        r#"
        UPDATE cooling_sessions
        SET status = ?2, closed_at = ?3, close_action = ?4, end_temperature = ?5,
            closed_by_staff_id = ?6, closed_by = ?7, discard_reason = ?8,
            exception_reason = ?9, exception_approved_by = ?10, synced = ?11
        WHERE id = ?1
        "#,
        params![
            session.id,
            session.status.as_str(),
            session.closed_at.as_ref().map(format_timestamp),
            session.close_action.map(|a| a.as_str()),
            session.end_temperature,
            session.closed_by_staff_id,
            session.closed_by,
            session.discard_reason,
            session.exception_reason,
            session.exception_approved_by,
            session.synced as i32,
        ],
    )?;

    if rows_affected == 0 {
        tracing::warn!("No cooling session found with id: {}", session.id);
    }
    Ok(rows_affected > 0)
}

/// Retrieves a session by its ID.
pub fn get_session(conn: &Connection, id: &str) -> Result<Option<CoolingSession>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {} FROM cooling_sessions WHERE id = ?1", SELECT_COLUMNS),
        params![id],
        row_to_session,
    );

    match result {
        Ok(session) => Ok(Some(session)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Lists every session, oldest first.
pub fn list_sessions(conn: &Connection) -> Result<Vec<CoolingSession>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM cooling_sessions ORDER BY started_at ASC, rowid ASC",
        SELECT_COLUMNS
    ))?;

    let sessions = stmt
        .query_map([], row_to_session)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(sessions)
}

/// Lists sessions that have not been closed, oldest first.
pub fn list_open_sessions(conn: &Connection) -> Result<Vec<CoolingSession>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM cooling_sessions WHERE closed_at IS NULL ORDER BY started_at ASC, rowid ASC",
        SELECT_COLUMNS
    ))?;

    let sessions = stmt
        .query_map([], row_to_session)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(sessions)
}

/// Lists open sessions currently in `status`, oldest first.
pub fn list_open_sessions_with_status(
    conn: &Connection,
    status: SessionStatus,
) -> Result<Vec<CoolingSession>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM cooling_sessions WHERE closed_at IS NULL AND status = ?1 \
         ORDER BY started_at ASC, rowid ASC",
        SELECT_COLUMNS
    ))?;

    let sessions = stmt
        .query_map(params![status.as_str()], row_to_session)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(sessions)
}

/// Sets the synced flag. Allowed on closed sessions.
pub fn mark_session_synced(conn: &Connection, id: &str, synced: bool) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE cooling_sessions SET synced = ?2 WHERE id = ?1",
        params![id, synced as i32],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooling::session::{CloseAction, CoolingLimits, FoodCategory};
    use crate::database::Database;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(name: &str, minutes_after: i64) -> CoolingSession {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
            + Duration::minutes(minutes_after);
        CoolingSession::new(
            name,
            FoodCategory::Stock,
            "site-1",
            start,
            &CoolingLimits::default(),
        )
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let mut session = sample("Chicken Stock", 0);
        session.start_temperature = Some(74.5);

        db.with_conn(|conn| insert_session(conn, &session)).unwrap();
        let loaded = db
            .with_conn(|conn| get_session(conn, &session.id))
            .unwrap()
            .unwrap();

        assert_eq!(loaded, session);
    }

    #[test]
    fn test_get_missing_session_returns_none() {
        let db = Database::open_in_memory().unwrap();
        let loaded = db.with_conn(|conn| get_session(conn, "missing")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_update_closes_session() {
        let db = Database::open_in_memory().unwrap();
        let mut session = sample("Rice", 0);
        db.with_conn(|conn| insert_session(conn, &session)).unwrap();

        session.status = SessionStatus::Closed;
        session.closed_at = Some(session.started_at + Duration::minutes(45));
        session.close_action = Some(CloseAction::InFridge);
        session.end_temperature = Some(5.0);
        session.closed_by = Some("Jane".to_string());

        assert!(db.with_conn(|conn| update_session(conn, &session)).unwrap());
        let open = db.with_conn(list_open_sessions).unwrap();
        assert!(open.is_empty());

        let loaded = db
            .with_conn(|conn| get_session(conn, &session.id))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.close_action, Some(CloseAction::InFridge));
        assert_eq!(loaded.closed_by.as_deref(), Some("Jane"));
    }

    #[test]
    fn test_open_sessions_ordered_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let later = sample("Beef Stew", 30);
        let earlier = sample("Tomato Soup", 5);
        db.with_conn(|conn| insert_session(conn, &later)).unwrap();
        db.with_conn(|conn| insert_session(conn, &earlier)).unwrap();

        let open = db.with_conn(list_open_sessions).unwrap();
        let names: Vec<&str> = open.iter().map(|s| s.item_name.as_str()).collect();
        assert_eq!(names, vec!["Tomato Soup", "Beef Stew"]);
    }

    #[test]
    fn test_filter_by_status() {
        let db = Database::open_in_memory().unwrap();
        let mut warning = sample("Rice", 0);
        warning.status = SessionStatus::Warning;
        let active = sample("Stock", 10);
        db.with_conn(|conn| insert_session(conn, &warning)).unwrap();
        db.with_conn(|conn| insert_session(conn, &active)).unwrap();

        let found = db
            .with_conn(|conn| list_open_sessions_with_status(conn, SessionStatus::Warning))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, warning.id);
    }
}
