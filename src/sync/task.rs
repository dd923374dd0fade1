//! Sync task
//!
//! One task owns the [`Syncer`] so flushes never overlap. Requests that
//! arrive while a flush runs are coalesced into the next one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{BackendStore, FlushReport, Syncer};

#[derive(Debug)]
enum SyncCommand {
    Flush {
        reply: Option<oneshot::Sender<FlushReport>>,
    },
    Shutdown,
}

/// Cloneable handle to the sync task
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncCommand>,
}

impl SyncHandle {
    /// Asks for a flush without waiting for it
    pub fn request_flush(&self) {
        if self.tx.send(SyncCommand::Flush { reply: None }).is_err() {
            tracing::debug!("Sync task is gone; entries stay queued");
        }
    }

    /// Flushes and waits for the report. `None` if the task has stopped.
    pub async fn flush_now(&self) -> Option<FlushReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SyncCommand::Flush {
                reply: Some(reply_tx),
            })
            .ok()?;
        reply_rx.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SyncCommand::Shutdown);
    }
}

/// Spawns the sync task
///
/// Besides explicit requests, the task retries every `interval` while
/// entries remain queued.
pub fn spawn_sync_task<B>(syncer: Arc<Syncer<B>>, interval: Duration) -> (SyncHandle, JoinHandle<()>)
where
    B: BackendStore + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Sync task started");

        loop {
            let mut waiters = Vec::new();

            tokio::select! {
                command = rx.recv() => match command {
                    Some(SyncCommand::Flush { reply }) => waiters.extend(reply),
                    Some(SyncCommand::Shutdown) | None => break,
                },
                _ = ticker.tick() => {
                    match syncer.pending_count() {
                        Ok(0) => continue,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Could not read sync queue: {}", e);
                            continue;
                        }
                    }
                }
            }

            // Coalesce requests that queued up behind this one
            let mut shutdown = false;
            while let Ok(command) = rx.try_recv() {
                match command {
                    SyncCommand::Flush { reply } => waiters.extend(reply),
                    SyncCommand::Shutdown => shutdown = true,
                }
            }

            let report = match syncer.flush().await {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!("Sync flush failed: {}", e);
                    FlushReport {
                        error: Some(e.to_string()),
                        ..FlushReport::default()
                    }
                }
            };

            for waiter in waiters {
                let _ = waiter.send(report.clone());
            }
            if shutdown {
                break;
            }
        }

        tracing::info!("Sync task stopped");
    });

    (SyncHandle { tx }, task)
}
