//! Queue replay
//!
//! [`Syncer::flush`] walks the queue in original order. An entry is removed
//! only after the backend has accepted both its session snapshot and its
//! event; the first failure stops the flush and leaves that entry and all
//! later ones queued.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{BackendStore, SyncError};
use crate::database::{events, queue, sessions, Database, DatabaseError};

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub reachable: bool,
    /// Entries pushed to the backend
    pub sent: usize,
    /// Entries dropped because their event was already synced
    pub skipped: usize,
    /// Entries still queued afterwards
    pub remaining: usize,
    pub error: Option<String>,
}

/// Clears the in-flight flag on drop
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Syncer<B> {
    db: Arc<Database>,
    backend: B,
    flushing: AtomicBool,
}

impl<B: BackendStore> Syncer<B> {
    pub fn new(db: Arc<Database>, backend: B) -> Self {
        Self {
            db,
            backend,
            flushing: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of entries waiting to be pushed
    pub fn pending_count(&self) -> Result<usize, SyncError> {
        let count = self.db.with_conn(queue::count)?;
        Ok(count as usize)
    }

    /// Replays queued entries against the backend
    pub async fn flush(&self) -> Result<FlushReport, SyncError> {
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            return Err(SyncError::FlushInProgress);
        };

        let mut report = FlushReport::default();
        let pending = self.db.with_conn(queue::pending)?;
        if pending.is_empty() {
            report.reachable = true;
            return Ok(report);
        }

        if !self.backend.is_reachable().await {
            tracing::debug!("Backend unreachable, {} entries stay queued", pending.len());
            report.remaining = pending.len();
            return Ok(report);
        }
        report.reachable = true;

        tracing::debug!("Flushing {} queued sync entries", pending.len());

        for entry in pending {
            if entry.event.synced {
                self.db.transaction(|tx| -> Result<(), DatabaseError> {
                    queue::remove(tx, entry.seq)?;
                    settle_session(tx, &entry.session.id)
                })?;
                report.skipped += 1;
                continue;
            }

            let pushed = match self.backend.upsert_session(&entry.session).await {
                Ok(()) => self.backend.insert_event(&entry.event).await,
                Err(e) => Err(e),
            };

            if let Err(e) = pushed {
                tracing::warn!(
                    "Sync of event {} failed, stopping flush: {}",
                    entry.event.id,
                    e
                );
                let message = e.to_string();
                self.db
                    .with_conn(|conn| queue::record_failure(conn, entry.seq, &message))?;
                report.error = Some(message);
                break;
            }

            self.db.transaction(|tx| -> Result<(), DatabaseError> {
                events::mark_event_synced(tx, &entry.event.id)?;
                queue::remove(tx, entry.seq)?;
                settle_session(tx, &entry.session.id)
            })?;
            report.sent += 1;
        }

        report.remaining = self.db.with_conn(queue::count)? as usize;
        if report.sent > 0 {
            tracing::info!(
                "Synced {} entries ({} still queued)",
                report.sent,
                report.remaining
            );
        }
        Ok(report)
    }
}

/// Marks a session synced once nothing is queued for it
fn settle_session(conn: &rusqlite::Connection, session_id: &str) -> Result<(), DatabaseError> {
    if queue::count_for_session(conn, session_id)? == 0 {
        sessions::mark_session_synced(conn, session_id, true)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CoolingConfig;
    use crate::cooling::{CloseDetails, FoodCategory, SessionManager};
    use crate::sync::MemoryBackend;
    use chrono::{TimeZone, Utc};

    fn setup(online: bool) -> (Arc<Database>, SessionManager, Syncer<MemoryBackend>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let manager = SessionManager::new(db.clone(), Arc::new(clock), &CoolingConfig::default());
        let syncer = Syncer::new(db.clone(), MemoryBackend::new(online));
        (db, manager, syncer)
    }

    #[tokio::test]
    async fn test_offline_entries_stay_queued() {
        let (_, manager, syncer) = setup(false);
        manager.start("Rice", FoodCategory::Rice, "site-1").unwrap();

        let report = syncer.flush().await.unwrap();
        assert!(!report.reachable);
        assert_eq!(report.remaining, 1);
        assert_eq!(syncer.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_marks_event_and_session_synced() {
        let (db, manager, syncer) = setup(true);
        let session = manager.start("Rice", FoodCategory::Rice, "site-1").unwrap();
        manager.close(&session.id, CloseDetails::default()).unwrap();

        let report = syncer.flush().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.remaining, 0);

        let stored = manager.session(&session.id).unwrap().unwrap();
        assert!(stored.synced);
        for event in manager.events_for(&session.id).unwrap() {
            assert!(db.with_conn(|conn| events::is_event_synced(conn, &event.id)).unwrap());
        }
        assert_eq!(syncer.backend().session(&session.id).unwrap().status, stored.status);
    }

    #[tokio::test]
    async fn test_failure_stops_flush_and_records_attempt() {
        let (db, manager, syncer) = setup(true);
        manager.start("Rice", FoodCategory::Rice, "site-1").unwrap();
        manager.start("Pasta", FoodCategory::Pasta, "site-1").unwrap();
        syncer.backend().fail_next_write("boom");

        let report = syncer.flush().await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.remaining, 2);
        assert!(report.error.unwrap().contains("boom"));

        let entries = db.with_conn(queue::pending).unwrap();
        assert_eq!(entries[0].attempts, 1);
        assert_eq!(entries[1].attempts, 0);

        let report = syncer.flush().await.unwrap();
        assert_eq!(report.sent, 2);
    }

    #[tokio::test]
    async fn test_already_synced_event_not_resent() {
        let (db, manager, syncer) = setup(true);
        let session = manager.start("Rice", FoodCategory::Rice, "site-1").unwrap();
        let event = manager.events_for(&session.id).unwrap().remove(0);
        db.with_conn(|conn| events::mark_event_synced(conn, &event.id))
            .unwrap();

        let report = syncer.flush().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(syncer.backend().event_writes(), 0);
    }
}
