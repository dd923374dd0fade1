//! Offline sync queue.
//!
//! Each entry pairs one compliance event with the session snapshot taken in
//! the same transaction. Entries leave the queue only after the backend has
//! accepted both.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::cooling::event::ComplianceEvent;
use crate::cooling::session::CoolingSession;
use crate::database::{format_timestamp, parse_text, parse_timestamp, DatabaseError};

/// A queued event with the session state it should be pushed alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSync {
    pub seq: i64,
    pub event: ComplianceEvent,
    pub session: CoolingSession,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

fn row_to_queued(row: &rusqlite::Row) -> rusqlite::Result<QueuedSync> {
    let payload_raw: String = row.get(5)?;
    let payload = serde_json::from_str(&payload_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let snapshot_raw: String = row.get(7)?;
    let session = serde_json::from_str(&snapshot_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(QueuedSync {
        seq: row.get(0)?,
        event: ComplianceEvent {
            id: row.get(1)?,
            session_id: row.get(2)?,
            event_type: parse_text(row, 3)?,
            occurred_at: parse_timestamp(row, 4)?,
            payload,
            synced: row.get::<_, i32>(6)? != 0,
        },
        session,
        queued_at: parse_timestamp(row, 8)?,
        attempts: row.get(9)?,
        last_error: row.get(10)?,
    })
}

/// Queues an event and session snapshot. A second enqueue of the same event
/// is ignored.
pub fn enqueue(
    conn: &Connection,
    event: &ComplianceEvent,
    session: &CoolingSession,
    queued_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let snapshot = serde_json::to_string(session)?;
    conn.execute(
        r#"
        INSERT OR IGNORE INTO sync_queue (event_id, session_id, session_snapshot, queued_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![
            event.id,
            event.session_id,
            snapshot,
            format_timestamp(&queued_at)
        ],
    )?;
    tracing::debug!("Queued event {} for sync", event.id);
    Ok(())
}

/// Returns queued entries in original order.
pub fn pending(conn: &Connection) -> Result<Vec<QueuedSync>, DatabaseError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT q.seq, e.id, e.session_id, e.event_type, e.occurred_at, e.payload, e.synced,
               q.session_snapshot, q.queued_at, q.attempts, q.last_error
        FROM sync_queue q
        JOIN compliance_events e ON e.id = q.event_id
        ORDER BY q.seq ASC
        "#,
    )?;

    let entries = stmt
        .query_map([], row_to_queued)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

pub fn remove(conn: &Connection, seq: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM sync_queue WHERE seq = ?1", params![seq])?;
    Ok(())
}

/// Records a failed push attempt against an entry.
pub fn record_failure(conn: &Connection, seq: i64, error: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?2 WHERE seq = ?1",
        params![seq, error],
    )?;
    Ok(())
}

pub fn count(conn: &Connection) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
    Ok(count)
}

/// Number of entries still queued for a session.
pub fn count_for_session(conn: &Connection, session_id: &str) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooling::event::EventType;
    use crate::cooling::session::{CoolingLimits, FoodCategory};
    use crate::database::events::insert_event;
    use crate::database::sessions::insert_session;
    use crate::database::Database;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn queue_started(db: &Database, name: &str) -> (CoolingSession, ComplianceEvent) {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let session = CoolingSession::new(
            name,
            FoodCategory::Soup,
            "site-1",
            start,
            &CoolingLimits::default(),
        );
        let event = ComplianceEvent::new(&session.id, EventType::Started, start, json!({}));
        db.transaction(|tx| -> Result<(), DatabaseError> {
            insert_session(tx, &session)?;
            insert_event(tx, &event)?;
            enqueue(tx, &event, &session, start)
        })
        .unwrap();
        (session, event)
    }

    #[test]
    fn test_pending_in_original_order() {
        let db = Database::open_in_memory().unwrap();
        let (_, first) = queue_started(&db, "Tomato Soup");
        let (_, second) = queue_started(&db, "Pea Soup");

        let entries = db.with_conn(pending).unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.event.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(entries[0].session.item_name, "Tomato Soup");
    }

    #[test]
    fn test_enqueue_same_event_twice_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let (session, event) = queue_started(&db, "Tomato Soup");
        db.with_conn(|conn| enqueue(conn, &event, &session, Utc::now()))
            .unwrap();
        assert_eq!(db.with_conn(count).unwrap(), 1);
    }

    #[test]
    fn test_record_failure_and_remove() {
        let db = Database::open_in_memory().unwrap();
        let (session, _) = queue_started(&db, "Tomato Soup");
        let seq = db.with_conn(pending).unwrap()[0].seq;

        db.with_conn(|conn| record_failure(conn, seq, "connection refused"))
            .unwrap();
        let entry = db.with_conn(pending).unwrap().remove(0);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_error.as_deref(), Some("connection refused"));
        assert!(entry.queued_at <= entry.event.occurred_at + Duration::seconds(1));

        db.with_conn(|conn| remove(conn, seq)).unwrap();
        assert_eq!(
            db.with_conn(|conn| count_for_session(conn, &session.id))
                .unwrap(),
            0
        );
    }
}
