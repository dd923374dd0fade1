//! Append-only compliance audit events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Kind of state change recorded by a [`ComplianceEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    WarningTriggered,
    OverdueTriggered,
    Closed,
    Discarded,
    ExceptionAdded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Started => "started",
            EventType::WarningTriggered => "warning_triggered",
            EventType::OverdueTriggered => "overdue_triggered",
            EventType::Closed => "closed",
            EventType::Discarded => "discarded",
            EventType::ExceptionAdded => "exception_added",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(EventType::Started),
            "warning_triggered" => Ok(EventType::WarningTriggered),
            "overdue_triggered" => Ok(EventType::OverdueTriggered),
            "closed" => Ok(EventType::Closed),
            "discarded" => Ok(EventType::Discarded),
            "exception_added" => Ok(EventType::ExceptionAdded),
            other => Err(format!("Unknown event type: {}", other)),
        }
    }
}

/// Immutable audit record; one per state-changing operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceEvent {
    pub id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub synced: bool,
}

impl ComplianceEvent {
    pub fn new(
        session_id: impl Into<String>,
        event_type: EventType,
        occurred_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            event_type,
            occurred_at,
            payload,
            synced: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serialisation() {
        assert_eq!(
            serde_json::to_string(&EventType::WarningTriggered).unwrap(),
            "\"warning_triggered\""
        );
        assert_eq!(
            serde_json::from_str::<EventType>("\"exception_added\"").unwrap(),
            EventType::ExceptionAdded
        );
    }

    #[test]
    fn test_new_events_have_unique_ids() {
        let now = Utc::now();
        let a = ComplianceEvent::new("s1", EventType::Started, now, serde_json::json!({}));
        let b = ComplianceEvent::new("s1", EventType::Started, now, serde_json::json!({}));
        assert_ne!(a.id, b.id);
        assert!(!a.synced);
    }
}
