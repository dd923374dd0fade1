//! Status monitor task
//!
//! Recomputes session status on a fixed tick and publishes newly raised
//! alerts. It only touches session data.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::alert::Alert;
use super::lifecycle::{LifecycleError, SessionManager, StatusSweep};

const ALERT_CHANNEL_CAPACITY: usize = 64;

pub struct StatusMonitor {
    manager: Arc<SessionManager>,
    tick: Duration,
    alerts_tx: broadcast::Sender<Alert>,
}

impl StatusMonitor {
    pub fn new(manager: Arc<SessionManager>, tick: Duration) -> Self {
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            manager,
            tick,
            alerts_tx,
        }
    }

    /// Stream of alerts raised by future ticks
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts_tx.subscribe()
    }

    /// Runs one sweep and publishes its alerts
    pub fn tick_once(&self) -> Result<StatusSweep, LifecycleError> {
        let sweep = self.manager.recompute_statuses()?;
        for alert in &sweep.alerts {
            tracing::warn!("Alert raised: {}", alert.message);
            // Err only means nobody is subscribed
            let _ = self.alerts_tx.send(alert.clone());
        }
        Ok(sweep)
    }

    /// Spawns the periodic task. Dropping the handle does not stop it; call
    /// [`MonitorHandle::stop`].
    pub fn spawn(self) -> MonitorHandle {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!("Status monitor started (tick {:?})", self.tick);

            loop {
                interval.tick().await;
                if let Err(e) = self.tick_once() {
                    tracing::error!("Status sweep failed: {}", e);
                }
            }
        });
        MonitorHandle { task }
    }
}

pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.task.abort();
        tracing::info!("Status monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CoolingConfig;
    use crate::cooling::alert::AlertKind;
    use crate::cooling::session::FoodCategory;
    use crate::database::Database;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_tick_publishes_new_alerts_once() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = Arc::new(SessionManager::new(
            db,
            Arc::new(clock.clone()),
            &CoolingConfig::default(),
        ));
        manager.start("Rice", FoodCategory::Rice, "site-1").unwrap();

        let monitor = StatusMonitor::new(manager, Duration::from_secs(10));
        let mut alerts = monitor.subscribe();

        clock.advance_minutes(121);
        monitor.tick_once().unwrap();
        monitor.tick_once().unwrap();

        let alert = alerts.try_recv().unwrap();
        assert_eq!(alert.kind, AlertKind::Overdue);
        assert!(alerts.try_recv().is_err());
    }
}
