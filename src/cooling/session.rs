//! Cooling session record and its time-based status rules

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::CoolingConfig;

/// Cooling session status
///
/// While a session is open its status only moves forward
/// (active → warning → overdue). Closing freezes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Warning,
    Overdue,
    Closed,
    Discarded,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Warning => "warning",
            SessionStatus::Overdue => "overdue",
            SessionStatus::Closed => "closed",
            SessionStatus::Discarded => "discarded",
        }
    }

    /// Ordering of the open statuses; closed statuses have no severity
    fn severity(&self) -> Option<u8> {
        match self {
            SessionStatus::Active => Some(0),
            SessionStatus::Warning => Some(1),
            SessionStatus::Overdue => Some(2),
            SessionStatus::Closed | SessionStatus::Discarded => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "warning" => Ok(SessionStatus::Warning),
            "overdue" => Ok(SessionStatus::Overdue),
            "closed" => Ok(SessionStatus::Closed),
            "discarded" => Ok(SessionStatus::Discarded),
            other => Err(format!("Unknown session status: {}", other)),
        }
    }
}

/// How a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseAction {
    InFridge,
    Discarded,
    Exception,
}

impl CloseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseAction::InFridge => "in_fridge",
            CloseAction::Discarded => "discarded",
            CloseAction::Exception => "exception",
        }
    }
}

impl FromStr for CloseAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_fridge" => Ok(CloseAction::InFridge),
            "discarded" => Ok(CloseAction::Discarded),
            "exception" => Ok(CloseAction::Exception),
            other => Err(format!("Unknown close action: {}", other)),
        }
    }
}

/// Food category of the item being cooled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FoodCategory {
    Sauce,
    Soup,
    Stock,
    Meat,
    Poultry,
    Seafood,
    Rice,
    Pasta,
    Vegetables,
    Dessert,
    #[default]
    Other,
}

impl FoodCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoodCategory::Sauce => "sauce",
            FoodCategory::Soup => "soup",
            FoodCategory::Stock => "stock",
            FoodCategory::Meat => "meat",
            FoodCategory::Poultry => "poultry",
            FoodCategory::Seafood => "seafood",
            FoodCategory::Rice => "rice",
            FoodCategory::Pasta => "pasta",
            FoodCategory::Vegetables => "vegetables",
            FoodCategory::Dessert => "dessert",
            FoodCategory::Other => "other",
        }
    }
}

impl FromStr for FoodCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sauce" => Ok(FoodCategory::Sauce),
            "soup" => Ok(FoodCategory::Soup),
            "stock" => Ok(FoodCategory::Stock),
            "meat" => Ok(FoodCategory::Meat),
            "poultry" => Ok(FoodCategory::Poultry),
            "seafood" => Ok(FoodCategory::Seafood),
            "rice" => Ok(FoodCategory::Rice),
            "pasta" => Ok(FoodCategory::Pasta),
            "vegetables" => Ok(FoodCategory::Vegetables),
            "dessert" => Ok(FoodCategory::Dessert),
            "other" => Ok(FoodCategory::Other),
            other => Err(format!("Unknown food category: {}", other)),
        }
    }
}

/// Soft and hard cooling thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoolingLimits {
    pub soft: Duration,
    pub hard: Duration,
}

impl Default for CoolingLimits {
    fn default() -> Self {
        Self {
            soft: Duration::minutes(90),
            hard: Duration::minutes(120),
        }
    }
}

impl From<&CoolingConfig> for CoolingLimits {
    fn from(config: &CoolingConfig) -> Self {
        Self {
            soft: Duration::minutes(config.soft_limit_minutes),
            hard: Duration::minutes(config.hard_limit_minutes),
        }
    }
}

/// Status an open session should have after `elapsed`
pub fn status_for_elapsed(elapsed: Duration, limits: &CoolingLimits) -> SessionStatus {
    if elapsed >= limits.hard {
        SessionStatus::Overdue
    } else if elapsed >= limits.soft {
        SessionStatus::Warning
    } else {
        SessionStatus::Active
    }
}

/// A tracked cooling interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoolingSession {
    pub id: String,
    pub item_name: String,
    pub category: FoodCategory,
    pub site_id: String,
    pub started_at: DateTime<Utc>,
    pub soft_due_at: DateTime<Utc>,
    pub hard_due_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_action: Option<CloseAction>,
    pub start_temperature: Option<f64>,
    pub end_temperature: Option<f64>,
    pub closed_by_staff_id: Option<String>,
    pub closed_by: Option<String>,
    pub discard_reason: Option<String>,
    pub exception_reason: Option<String>,
    pub exception_approved_by: Option<String>,
    pub synced: bool,
}

impl CoolingSession {
    /// Creates an active session with due times derived from `started_at`
    pub fn new(
        item_name: impl Into<String>,
        category: FoodCategory,
        site_id: impl Into<String>,
        started_at: DateTime<Utc>,
        limits: &CoolingLimits,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item_name: item_name.into(),
            category,
            site_id: site_id.into(),
            started_at,
            soft_due_at: started_at + limits.soft,
            hard_due_at: started_at + limits.hard,
            status: SessionStatus::Active,
            closed_at: None,
            close_action: None,
            start_temperature: None,
            end_temperature: None,
            closed_by_staff_id: None,
            closed_by: None,
            discard_reason: None,
            exception_reason: None,
            exception_approved_by: None,
            synced: false,
        }
    }

    /// A session is open until `closed_at` is set
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }

    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.elapsed(now).num_minutes()
    }

    /// Status this session should move to at `now`, if it changes
    ///
    /// Returns `None` for closed sessions and when the computed status would
    /// not move forward.
    pub fn next_status(&self, now: DateTime<Utc>, limits: &CoolingLimits) -> Option<SessionStatus> {
        if !self.is_open() {
            return None;
        }
        let computed = status_for_elapsed(self.elapsed(now), limits);
        match (self.status.severity(), computed.severity()) {
            (Some(current), Some(next)) if next > current => Some(computed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_due_times_derived_from_start() {
        let session = CoolingSession::new(
            "Bolognese Sauce",
            FoodCategory::Sauce,
            "site-1",
            t0(),
            &CoolingLimits::default(),
        );
        assert_eq!(session.soft_due_at, t0() + Duration::minutes(90));
        assert_eq!(session.hard_due_at, t0() + Duration::minutes(120));
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.is_open());
        assert!(!session.synced);
    }

    #[test]
    fn test_status_boundaries() {
        let limits = CoolingLimits::default();
        assert_eq!(status_for_elapsed(Duration::minutes(89), &limits), SessionStatus::Active);
        assert_eq!(status_for_elapsed(Duration::minutes(90), &limits), SessionStatus::Warning);
        assert_eq!(status_for_elapsed(Duration::minutes(119), &limits), SessionStatus::Warning);
        assert_eq!(status_for_elapsed(Duration::minutes(120), &limits), SessionStatus::Overdue);
    }

    #[test]
    fn test_next_status_never_regresses() {
        let limits = CoolingLimits::default();
        let mut session =
            CoolingSession::new("Rice", FoodCategory::Rice, "site-1", t0(), &limits);
        session.status = SessionStatus::Overdue;
        assert_eq!(session.next_status(t0() + Duration::minutes(95), &limits), None);
    }

    #[test]
    fn test_next_status_skips_warning_when_late() {
        let limits = CoolingLimits::default();
        let session = CoolingSession::new("Rice", FoodCategory::Rice, "site-1", t0(), &limits);
        assert_eq!(
            session.next_status(t0() + Duration::minutes(130), &limits),
            Some(SessionStatus::Overdue)
        );
    }

    #[test]
    fn test_closed_session_has_no_next_status() {
        let limits = CoolingLimits::default();
        let mut session =
            CoolingSession::new("Rice", FoodCategory::Rice, "site-1", t0(), &limits);
        session.closed_at = Some(t0() + Duration::minutes(30));
        session.status = SessionStatus::Closed;
        assert_eq!(session.next_status(t0() + Duration::minutes(200), &limits), None);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Warning,
            SessionStatus::Overdue,
            SessionStatus::Closed,
            SessionStatus::Discarded,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("Sauce".parse::<FoodCategory>().unwrap(), FoodCategory::Sauce);
        assert!("gravel".parse::<FoodCategory>().is_err());
    }
}
