//! Threshold alerts
//!
//! [`alert_for_transition`] is a pure function: given a status transition it
//! returns the alert to raise, if any. Persistence guarantees at most one alert
//! per session and kind, so re-checking an already-warning session never
//! raises a second warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::session::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Warning,
    Overdue,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Warning => "warning",
            AlertKind::Overdue => "overdue",
        }
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warning" => Ok(AlertKind::Warning),
            "overdue" => Ok(AlertKind::Overdue),
            other => Err(format!("Unknown alert kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub session_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// An open session moving to a later status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub session_id: String,
    pub item_name: String,
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub at: DateTime<Utc>,
}

/// Alert raised by a status transition, if any
pub fn alert_for_transition(transition: &StatusTransition) -> Option<Alert> {
    let (kind, message) = match (transition.from, transition.to) {
        (SessionStatus::Active, SessionStatus::Warning) => (
            AlertKind::Warning,
            format!(
                "{} has reached its soft cooling limit. Check it soon.",
                transition.item_name
            ),
        ),
        (from, SessionStatus::Overdue) if from != SessionStatus::Overdue => (
            AlertKind::Overdue,
            format!(
                "CRITICAL: {} has passed its hard cooling limit. Act now.",
                transition.item_name
            ),
        ),
        _ => return None,
    };

    Some(Alert {
        id: Uuid::new_v4().to_string(),
        session_id: transition.session_id.clone(),
        kind,
        message,
        triggered_at: transition.at,
        acknowledged: false,
    })
}
