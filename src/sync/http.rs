//! HTTP backend client
//!
//! Sessions are written with `PUT /cooling_sessions/{id}` and events with
//! `PUT /compliance_events/{id}`, so replays overwrite rather than duplicate.
//! A `409 Conflict` on an event means the backend already holds it.

use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

use super::{BackendStore, SyncError};
use crate::config::SyncConfig;
use crate::cooling::{ComplianceEvent, CoolingSession};

/// Base delay for exponential backoff in milliseconds
const BASE_RETRY_DELAY_MS: u64 = 200;

/// Timeout for the health probe in seconds
const HEALTH_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    max_attempts: u32,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout_secs: u64, max_attempts: u32) -> Result<Self, SyncError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Client(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
            max_attempts: max_attempts.max(1),
        })
    }

    /// Builds a client from config; `None` when no backend URL is set
    pub fn from_config(config: &SyncConfig) -> Result<Option<Self>, SyncError> {
        match config.backend_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Some(Self::new(
                url.trim(),
                config.timeout_secs,
                config.max_retry_attempts,
            )?)),
            _ => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a single PUT request (internal helper)
    async fn send_put<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), SyncError> {
        let response = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Timeout(self.timeout.as_secs())
                } else {
                    SyncError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(SyncError::ServerError {
            status: status.as_u16(),
            message,
        })
    }

    /// PUT with retry and exponential backoff for transient failures
    async fn put_with_retry<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<(), SyncError> {
        let mut last_error: Option<SyncError> = None;

        for attempt in 0..self.max_attempts {
            match self.send_put(url, body).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::debug!("Sync request succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(());
                }
                Err(e) => {
                    if !e.is_retryable() {
                        tracing::warn!("Sync request to {} rejected: {}", url, e);
                        return Err(e);
                    }
                    if attempt == self.max_attempts - 1 {
                        last_error = Some(e);
                        break;
                    }

                    let delay_ms = BASE_RETRY_DELAY_MS * 2u64.pow(attempt);
                    tracing::warn!(
                        "Sync request failed (attempt {}), retrying in {}ms: {}",
                        attempt + 1,
                        delay_ms,
                        e
                    );
                    last_error = Some(e);
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Err(SyncError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

impl BackendStore for HttpBackend {
    async fn is_reachable(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Backend not reachable: {}", e);
                false
            }
        }
    }

    async fn upsert_session(&self, session: &CoolingSession) -> Result<(), SyncError> {
        let url = format!("{}/cooling_sessions/{}", self.base_url, session.id);
        self.put_with_retry(&url, session).await
    }

    async fn insert_event(&self, event: &ComplianceEvent) -> Result<(), SyncError> {
        let url = format!("{}/compliance_events/{}", self.base_url, event.id);
        self.put_with_retry(&url, event).await
    }
}
