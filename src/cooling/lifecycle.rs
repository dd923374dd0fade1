//! Cooling session lifecycle
//!
//! [`SessionManager`] owns every state change on a cooling session. Each
//! mutation writes the session row, one compliance event and one sync queue
//! entry in a single SQLite transaction, then asks the sync task to flush.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::alert::{alert_for_transition, Alert, StatusTransition};
use super::event::{ComplianceEvent, EventType};
use super::session::{CloseAction, CoolingLimits, CoolingSession, FoodCategory, SessionStatus};
use crate::clock::Clock;
use crate::config::CoolingConfig;
use crate::database::{alerts, events, queue, sessions, Database, DatabaseError};
use crate::sync::SyncHandle;

/// Lifecycle error types
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Unknown cooling session: {0}")]
    UnknownSession(String),

    #[error("Cooling session {0} is already closed")]
    AlreadyClosed(String),

    #[error("Item name must not be empty")]
    EmptyItemName,

    #[error("A reason is required")]
    MissingReason,

    #[error("An exception must name who approved it")]
    MissingApprover,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Details collected when an item goes into the fridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseDetails {
    pub temperature: Option<f64>,
    pub staff_id: Option<String>,
    pub staff_name: Option<String>,
}

/// Result of one status sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSweep {
    pub transitions: Vec<StatusTransition>,
    /// Alerts raised for the first time during this sweep
    pub alerts: Vec<Alert>,
}

/// Session lifecycle manager
pub struct SessionManager {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    limits: CoolingLimits,
    compliant_below: f64,
    sync: Option<SyncHandle>,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, config: &CoolingConfig) -> Self {
        Self {
            db,
            clock,
            limits: CoolingLimits::from(config),
            compliant_below: config.compliant_below_celsius,
            sync: None,
        }
    }

    /// Requests a sync flush after every committed mutation
    pub fn with_sync(mut self, sync: SyncHandle) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn limits(&self) -> CoolingLimits {
        self.limits
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether a fridge-entry temperature meets the compliance threshold
    pub fn is_temperature_compliant(&self, celsius: f64) -> bool {
        celsius < self.compliant_below
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Starts a new cooling session
    pub fn start(
        &self,
        item_name: &str,
        category: FoodCategory,
        site_id: &str,
    ) -> Result<CoolingSession, LifecycleError> {
        self.start_with_temperature(item_name, category, site_id, None)
    }

    /// Starts a new cooling session, recording the temperature going in
    pub fn start_with_temperature(
        &self,
        item_name: &str,
        category: FoodCategory,
        site_id: &str,
        start_temperature: Option<f64>,
    ) -> Result<CoolingSession, LifecycleError> {
        let item_name = item_name.trim();
        if item_name.is_empty() {
            return Err(LifecycleError::EmptyItemName);
        }

        let now = self.clock.now();
        let mut session = CoolingSession::new(item_name, category, site_id, now, &self.limits);
        session.start_temperature = start_temperature;

        let event = ComplianceEvent::new(
            &session.id,
            EventType::Started,
            now,
            json!({
                "item_name": session.item_name,
                "category": session.category,
                "start_temperature": start_temperature,
                "soft_due_at": session.soft_due_at,
                "hard_due_at": session.hard_due_at,
            }),
        );

        self.db.transaction(|tx| -> Result<(), DatabaseError> {
            sessions::insert_session(tx, &session)?;
            events::insert_event(tx, &event)?;
            queue::enqueue(tx, &event, &session, now)
        })?;

        tracing::info!(
            "Started cooling session {} for {} ({})",
            session.id,
            session.item_name,
            session.category.as_str()
        );
        self.request_sync();
        Ok(session)
    }

    /// Closes a session with the item going into the fridge
    ///
    /// A session already past its hard limit keeps the `overdue` status so
    /// the late close stays visible in the record.
    pub fn close(
        &self,
        session_id: &str,
        details: CloseDetails,
    ) -> Result<CoolingSession, LifecycleError> {
        let now = self.clock.now();
        let compliant_below = self.compliant_below;
        let hard_limit = self.limits.hard;

        let session = self.mutate_open(session_id, now, |session| {
            let elapsed = session.elapsed(now);
            let late = session.status == SessionStatus::Overdue || elapsed >= hard_limit;

            session.status = if late {
                SessionStatus::Overdue
            } else {
                SessionStatus::Closed
            };
            session.closed_at = Some(now);
            session.close_action = Some(CloseAction::InFridge);
            session.end_temperature = details.temperature;
            session.closed_by_staff_id = details.staff_id.clone();
            session.closed_by = details.staff_name.clone();

            let payload = json!({
                "elapsed_minutes": elapsed.num_minutes(),
                "end_temperature": details.temperature,
                "temperature_compliant": details.temperature.map(|t| t < compliant_below),
                "closed_by": details.staff_name,
                "closed_by_staff_id": details.staff_id,
                "closed_late": late,
            });
            Ok((EventType::Closed, payload))
        })?;

        tracing::info!(
            "Closed cooling session {} ({}) status={}",
            session.id,
            session.item_name,
            session.status
        );
        Ok(session)
    }

    /// Discards the item and closes the session
    pub fn discard(&self, session_id: &str, reason: &str) -> Result<CoolingSession, LifecycleError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::MissingReason);
        }

        let now = self.clock.now();
        let session = self.mutate_open(session_id, now, |session| {
            session.status = SessionStatus::Discarded;
            session.closed_at = Some(now);
            session.close_action = Some(CloseAction::Discarded);
            session.discard_reason = Some(reason.to_string());

            let payload = json!({
                "reason": reason,
                "elapsed_minutes": session.elapsed_minutes(now),
            });
            Ok((EventType::Discarded, payload))
        })?;

        tracing::info!("Discarded cooling session {} ({})", session.id, session.item_name);
        Ok(session)
    }

    /// Closes a session under an approved exception
    pub fn add_exception(
        &self,
        session_id: &str,
        reason: &str,
        approved_by: &str,
    ) -> Result<CoolingSession, LifecycleError> {
        let reason = reason.trim();
        let approved_by = approved_by.trim();
        if approved_by.is_empty() {
            return Err(LifecycleError::MissingApprover);
        }
        if reason.is_empty() {
            return Err(LifecycleError::MissingReason);
        }

        let now = self.clock.now();
        let session = self.mutate_open(session_id, now, |session| {
            session.status = SessionStatus::Closed;
            session.closed_at = Some(now);
            session.close_action = Some(CloseAction::Exception);
            session.exception_reason = Some(reason.to_string());
            session.exception_approved_by = Some(approved_by.to_string());

            let payload = json!({
                "reason": reason,
                "approved_by": approved_by,
                "elapsed_minutes": session.elapsed_minutes(now),
            });
            Ok((EventType::ExceptionAdded, payload))
        })?;

        tracing::info!(
            "Exception recorded for cooling session {} approved by {}",
            session.id,
            approved_by
        );
        Ok(session)
    }

    /// Moves open sessions forward to the status their elapsed time implies
    ///
    /// Each transition writes one `warning_triggered` or `overdue_triggered`
    /// event. The matching alert is stored at most once per session and kind.
    pub fn recompute_statuses(&self) -> Result<StatusSweep, LifecycleError> {
        let now = self.clock.now();
        let limits = self.limits;

        let sweep = self.db.transaction(|tx| -> Result<StatusSweep, DatabaseError> {
            let mut sweep = StatusSweep::default();

            for mut session in sessions::list_open_sessions(tx)? {
                let Some(next) = session.next_status(now, &limits) else {
                    continue;
                };

                let transition = StatusTransition {
                    session_id: session.id.clone(),
                    item_name: session.item_name.clone(),
                    from: session.status,
                    to: next,
                    at: now,
                };

                let event_type = match next {
                    SessionStatus::Overdue => EventType::OverdueTriggered,
                    _ => EventType::WarningTriggered,
                };

                session.status = next;
                session.synced = false;
                let event = ComplianceEvent::new(
                    &session.id,
                    event_type,
                    now,
                    json!({
                        "from": transition.from,
                        "to": transition.to,
                        "elapsed_minutes": session.elapsed_minutes(now),
                    }),
                );

                sessions::update_session(tx, &session)?;
                events::insert_event(tx, &event)?;
                queue::enqueue(tx, &event, &session, now)?;

                if let Some(alert) = alert_for_transition(&transition) {
                    if alerts::insert_alert_once(tx, &alert)? {
                        sweep.alerts.push(alert);
                    }
                }

                sweep.transitions.push(transition);
            }

            Ok(sweep)
        })?;

        for transition in &sweep.transitions {
            tracing::info!(
                "Cooling session {} ({}) moved {} -> {}",
                transition.session_id,
                transition.item_name,
                transition.from,
                transition.to
            );
        }
        if !sweep.transitions.is_empty() {
            self.request_sync();
        }

        Ok(sweep)
    }

    /// Loads an open session, applies `change` and records the resulting event
    fn mutate_open<F>(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        change: F,
    ) -> Result<CoolingSession, LifecycleError>
    where
        F: FnOnce(&mut CoolingSession) -> Result<(EventType, serde_json::Value), LifecycleError>,
    {
        let session = self.db.transaction(|tx| -> Result<CoolingSession, LifecycleError> {
            let mut session = sessions::get_session(tx, session_id)?
                .ok_or_else(|| LifecycleError::UnknownSession(session_id.to_string()))?;
            if !session.is_open() {
                return Err(LifecycleError::AlreadyClosed(session_id.to_string()));
            }

            let (event_type, payload) = change(&mut session)?;
            session.synced = false;
            let event = ComplianceEvent::new(&session.id, event_type, now, payload);

            sessions::update_session(tx, &session)?;
            events::insert_event(tx, &event)?;
            queue::enqueue(tx, &event, &session, now)?;
            Ok(session)
        });

        match session {
            Ok(session) => {
                self.request_sync();
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("Lifecycle operation on {} rejected: {}", session_id, e);
                Err(e)
            }
        }
    }

    fn request_sync(&self) {
        if let Some(sync) = &self.sync {
            sync.request_flush();
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn session(&self, id: &str) -> Result<Option<CoolingSession>, LifecycleError> {
        Ok(self.db.with_conn(|conn| sessions::get_session(conn, id))?)
    }

    /// Every session, oldest first
    pub fn sessions(&self) -> Result<Vec<CoolingSession>, LifecycleError> {
        Ok(self.db.with_conn(sessions::list_sessions)?)
    }

    /// Open sessions, oldest first
    pub fn active_sessions(&self) -> Result<Vec<CoolingSession>, LifecycleError> {
        Ok(self.db.with_conn(sessions::list_open_sessions)?)
    }

    pub fn warning_sessions(&self) -> Result<Vec<CoolingSession>, LifecycleError> {
        Ok(self.db.with_conn(|conn| {
            sessions::list_open_sessions_with_status(conn, SessionStatus::Warning)
        })?)
    }

    pub fn overdue_sessions(&self) -> Result<Vec<CoolingSession>, LifecycleError> {
        Ok(self.db.with_conn(|conn| {
            sessions::list_open_sessions_with_status(conn, SessionStatus::Overdue)
        })?)
    }

    pub fn events_for(&self, session_id: &str) -> Result<Vec<ComplianceEvent>, LifecycleError> {
        Ok(self
            .db
            .with_conn(|conn| events::list_events_for_session(conn, session_id))?)
    }

    pub fn alerts(&self) -> Result<Vec<Alert>, LifecycleError> {
        Ok(self.db.with_conn(alerts::list_alerts)?)
    }

    pub fn unacknowledged_alerts(&self) -> Result<Vec<Alert>, LifecycleError> {
        Ok(self.db.with_conn(alerts::list_unacknowledged_alerts)?)
    }

    /// Acknowledges an alert. Never touches the session it belongs to.
    pub fn acknowledge_alert(&self, alert_id: &str) -> Result<bool, LifecycleError> {
        Ok(self
            .db
            .with_conn(|conn| alerts::acknowledge_alert(conn, alert_id))?)
    }
}
