//! Compliance event log.
//!
//! Append-only: there is no update path apart from the synced flag.

use rusqlite::{params, Connection};

use crate::cooling::event::ComplianceEvent;
use crate::database::{format_timestamp, parse_text, parse_timestamp, DatabaseError};

const SELECT_COLUMNS: &str = "id, session_id, event_type, occurred_at, payload, synced";

/// Map a database row to a ComplianceEvent struct.
pub(crate) fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<ComplianceEvent> {
    let payload_raw: String = row.get(4)?;
    let payload = serde_json::from_str(&payload_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ComplianceEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        event_type: parse_text(row, 2)?,
        occurred_at: parse_timestamp(row, 3)?,
        payload,
        synced: row.get::<_, i32>(5)? != 0,
    })
}

/// Appends an event to the log.
pub fn insert_event(conn: &Connection, event: &ComplianceEvent) -> Result<(), DatabaseError> {
    let payload = serde_json::to_string(&event.payload)?;
    conn.execute(
        r#"
        INSERT INTO compliance_events (id, session_id, event_type, occurred_at, payload, synced)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            event.id,
            event.session_id,
            event.event_type.as_str(),
            format_timestamp(&event.occurred_at),
            payload,
            event.synced as i32,
        ],
    )?;

    tracing::debug!(
        "Logged {} event {} for session {}",
        event.event_type.as_str(),
        event.id,
        event.session_id
    );
    Ok(())
}

/// Lists events for a session in the order they occurred.
pub fn list_events_for_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ComplianceEvent>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM compliance_events WHERE session_id = ?1 ORDER BY occurred_at ASC, rowid ASC",
        SELECT_COLUMNS
    ))?;

    let events = stmt
        .query_map(params![session_id], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Lists every event in insertion order.
pub fn list_events(conn: &Connection) -> Result<Vec<ComplianceEvent>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM compliance_events ORDER BY rowid ASC",
        SELECT_COLUMNS
    ))?;

    let events = stmt
        .query_map([], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Returns whether an event has already been pushed to the backend.
pub fn is_event_synced(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let synced: Option<i32> = match conn.query_row(
        "SELECT synced FROM compliance_events WHERE id = ?1",
        params![id],
        |row| row.get(0),
    ) {
        Ok(value) => Some(value),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(synced.unwrap_or(0) != 0)
}

pub fn mark_event_synced(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE compliance_events SET synced = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Returns the total number of logged events.
pub fn count_events(conn: &Connection) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM compliance_events", [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooling::event::EventType;
    use crate::cooling::session::{CoolingLimits, CoolingSession, FoodCategory};
    use crate::database::sessions::insert_session;
    use crate::database::Database;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn setup() -> (Database, CoolingSession) {
        let db = Database::open_in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let session = CoolingSession::new(
            "Chicken Stock",
            FoodCategory::Stock,
            "site-1",
            start,
            &CoolingLimits::default(),
        );
        db.with_conn(|conn| insert_session(conn, &session)).unwrap();
        (db, session)
    }

    #[test]
    fn test_insert_and_list_preserves_payload() {
        let (db, session) = setup();
        let event = ComplianceEvent::new(
            &session.id,
            EventType::Closed,
            session.started_at + Duration::minutes(40),
            json!({ "elapsed_minutes": 40, "temperature_compliant": true }),
        );
        db.with_conn(|conn| insert_event(conn, &event)).unwrap();

        let events = db
            .with_conn(|conn| list_events_for_session(conn, &session.id))
            .unwrap();
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn test_events_ordered_by_occurrence() {
        let (db, session) = setup();
        let started = ComplianceEvent::new(&session.id, EventType::Started, session.started_at, json!({}));
        let warned = ComplianceEvent::new(
            &session.id,
            EventType::WarningTriggered,
            session.started_at + Duration::minutes(90),
            json!({}),
        );
        db.with_conn(|conn| insert_event(conn, &warned)).unwrap();
        db.with_conn(|conn| insert_event(conn, &started)).unwrap();

        let types: Vec<EventType> = db
            .with_conn(|conn| list_events_for_session(conn, &session.id))
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types, vec![EventType::Started, EventType::WarningTriggered]);
    }

    #[test]
    fn test_event_requires_existing_session() {
        let (db, _) = setup();
        let orphan = ComplianceEvent::new("nope", EventType::Started, Utc::now(), json!({}));
        assert!(db.with_conn(|conn| insert_event(conn, &orphan)).is_err());
    }

    #[test]
    fn test_mark_synced() {
        let (db, session) = setup();
        let event = ComplianceEvent::new(&session.id, EventType::Started, session.started_at, json!({}));
        db.with_conn(|conn| insert_event(conn, &event)).unwrap();

        assert!(!db.with_conn(|conn| is_event_synced(conn, &event.id)).unwrap());
        db.with_conn(|conn| mark_event_synced(conn, &event.id)).unwrap();
        assert!(db.with_conn(|conn| is_event_synced(conn, &event.id)).unwrap());
        assert_eq!(db.with_conn(count_events).unwrap(), 1);
    }
}
