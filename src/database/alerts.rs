//! Alert persistence.

use rusqlite::{params, Connection};

use crate::cooling::alert::Alert;
use crate::database::{format_timestamp, parse_text, parse_timestamp, DatabaseError};

const SELECT_COLUMNS: &str = "id, session_id, kind, message, triggered_at, acknowledged";

fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: parse_text(row, 2)?,
        message: row.get(3)?,
        triggered_at: parse_timestamp(row, 4)?,
        acknowledged: row.get::<_, i32>(5)? != 0,
    })
}

/// Inserts an alert unless one of the same kind already exists for the session.
///
/// Returns true if the alert was new.
pub fn insert_alert_once(conn: &Connection, alert: &Alert) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO alerts (id, session_id, kind, message, triggered_at, acknowledged)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            alert.id,
            alert.session_id,
            alert.kind.as_str(),
            alert.message,
            format_timestamp(&alert.triggered_at),
            alert.acknowledged as i32,
        ],
    )?;
    Ok(inserted > 0)
}

/// Lists all alerts, newest first.
pub fn list_alerts(conn: &Connection) -> Result<Vec<Alert>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM alerts ORDER BY triggered_at DESC, rowid DESC",
        SELECT_COLUMNS
    ))?;

    let alerts = stmt
        .query_map([], row_to_alert)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(alerts)
}

pub fn list_unacknowledged_alerts(conn: &Connection) -> Result<Vec<Alert>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM alerts WHERE acknowledged = 0 ORDER BY triggered_at DESC, rowid DESC",
        SELECT_COLUMNS
    ))?;

    let alerts = stmt
        .query_map([], row_to_alert)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(alerts)
}

/// Marks an alert acknowledged. Returns false if no alert has that id.
pub fn acknowledge_alert(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE alerts SET acknowledged = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooling::alert::{alert_for_transition, StatusTransition};
    use crate::cooling::session::{CoolingLimits, CoolingSession, FoodCategory, SessionStatus};
    use crate::database::sessions::insert_session;
    use crate::database::Database;
    use chrono::{Duration, TimeZone, Utc};

    fn warning_alert(db: &Database) -> Alert {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let session = CoolingSession::new(
            "Beef Stew",
            FoodCategory::Meat,
            "site-1",
            start,
            &CoolingLimits::default(),
        );
        db.with_conn(|conn| insert_session(conn, &session)).unwrap();
        alert_for_transition(&StatusTransition {
            session_id: session.id.clone(),
            item_name: session.item_name.clone(),
            from: SessionStatus::Active,
            to: SessionStatus::Warning,
            at: start + Duration::minutes(90),
        })
        .unwrap()
    }

    #[test]
    fn test_alert_inserted_once_per_kind() {
        let db = Database::open_in_memory().unwrap();
        let alert = warning_alert(&db);

        assert!(db.with_conn(|conn| insert_alert_once(conn, &alert)).unwrap());

        let mut again = alert.clone();
        again.id = "another-id".to_string();
        assert!(!db.with_conn(|conn| insert_alert_once(conn, &again)).unwrap());

        assert_eq!(db.with_conn(list_alerts).unwrap().len(), 1);
    }

    #[test]
    fn test_acknowledge_alert() {
        let db = Database::open_in_memory().unwrap();
        let alert = warning_alert(&db);
        db.with_conn(|conn| insert_alert_once(conn, &alert)).unwrap();

        assert_eq!(db.with_conn(list_unacknowledged_alerts).unwrap().len(), 1);
        assert!(db.with_conn(|conn| acknowledge_alert(conn, &alert.id)).unwrap());
        assert!(db.with_conn(list_unacknowledged_alerts).unwrap().is_empty());
        assert!(!db.with_conn(|conn| acknowledge_alert(conn, "missing")).unwrap());
    }
}
