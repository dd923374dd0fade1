//! Cooling compliance core
//!
//! Sessions, their audit events, threshold alerts, and the lifecycle manager
//! that ties them to the local database.

pub mod alert;
pub mod event;
pub mod lifecycle;
pub mod monitor;
pub mod session;

pub use alert::{alert_for_transition, Alert, AlertKind, StatusTransition};
pub use event::{ComplianceEvent, EventType};
pub use lifecycle::{CloseDetails, LifecycleError, SessionManager, StatusSweep};
pub use monitor::{MonitorHandle, StatusMonitor};
pub use session::{
    status_for_elapsed, CloseAction, CoolingLimits, CoolingSession, FoodCategory, SessionStatus,
};
