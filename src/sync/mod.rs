//! Offline-first backend sync
//!
//! The local database is authoritative. Every lifecycle mutation leaves an
//! entry in the `sync_queue` table; the sync task replays those entries in
//! order against a [`BackendStore`] whenever it is reachable.

pub mod flush;
pub mod http;
pub mod memory;
pub mod task;

use std::future::Future;

use crate::cooling::{ComplianceEvent, CoolingSession};
use crate::database::DatabaseError;

pub use flush::{FlushReport, Syncer};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use task::{spawn_sync_task, SyncHandle};

/// Error types for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("All {attempts} retry attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("A flush is already in progress")]
    FlushInProgress,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl SyncError {
    /// Transient failures worth retrying within the same flush
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => true,
            SyncError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Remote copy of sessions and events
///
/// Both writes must be idempotent: upserting the same session or inserting
/// the same event id twice leaves the backend unchanged.
pub trait BackendStore: Send + Sync {
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;

    fn upsert_session(
        &self,
        session: &CoolingSession,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn insert_event(
        &self,
        event: &ComplianceEvent,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Timeout(15).is_retryable());
        assert!(SyncError::ServerError {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!SyncError::ServerError {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!SyncError::FlushInProgress.is_retryable());
    }
}
