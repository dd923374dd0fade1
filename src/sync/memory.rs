//! In-memory backend for tests and offline demos

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BackendStore, SyncError};
use crate::cooling::{ComplianceEvent, CoolingSession};

#[derive(Debug, Default)]
struct MemoryState {
    online: bool,
    sessions: HashMap<String, CoolingSession>,
    events: HashMap<String, ComplianceEvent>,
    event_writes: usize,
    fail_next: Option<String>,
}

/// Backend store held in memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemoryBackend {
    pub fn new(online: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                online,
                ..MemoryState::default()
            })),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Makes the next write fail with `message`
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    pub fn session(&self, id: &str) -> Option<CoolingSession> {
        self.state.lock().sessions.get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Number of event writes received, including repeats
    pub fn event_writes(&self) -> usize {
        self.state.lock().event_writes
    }

    fn check_write(state: &mut MemoryState) -> Result<(), SyncError> {
        if !state.online {
            return Err(SyncError::ConnectionFailed("backend offline".to_string()));
        }
        if let Some(message) = state.fail_next.take() {
            return Err(SyncError::ServerError {
                status: 500,
                message,
            });
        }
        Ok(())
    }
}

impl BackendStore for MemoryBackend {
    async fn is_reachable(&self) -> bool {
        self.state.lock().online
    }

    async fn upsert_session(&self, session: &CoolingSession) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        Self::check_write(&mut state)?;
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn insert_event(&self, event: &ComplianceEvent) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        Self::check_write(&mut state)?;
        state.event_writes += 1;
        state
            .events
            .entry(event.id.clone())
            .or_insert_with(|| event.clone());
        Ok(())
    }
}
