//! Background worker for scheduled and on-demand flushes.
//!
//! The store tracks which keys changed; it does not know their current
//! payloads. [`PayloadSource`] is the bridge: the host implements it over
//! its own state, and [`AutoSaveWorker`] periodically asks it for the
//! payload of every pending key and saves what it gets.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::store::persistent::PersistentStore;

// ---------------------------------------------------------------------------
// PayloadSource trait
// ---------------------------------------------------------------------------

/// Supplies the current payload for a logical key.
///
/// Returning `None` means the source has nothing for that key right now;
/// the key stays pending and the next flush asks again.
pub trait PayloadSource: Send + Sync + 'static {
    /// Current payload for `key`, if the source tracks it.
    fn current_payload(&self, key: &str) -> Option<Value>;
}

// ---------------------------------------------------------------------------
// AutoSaveTask
// ---------------------------------------------------------------------------

/// Task variants for the auto-save worker.
#[derive(Debug)]
pub enum AutoSaveTask {
    /// Flush pending keys now, regardless of the tick schedule and the
    /// store's auto-save gate.
    Flush {
        /// Why the flush was forced, for the logs.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// AutoSaveWorker
// ---------------------------------------------------------------------------

/// Background task that flushes pending keys on a fixed interval.
///
/// The worker spawns a tokio task that:
/// 1. Listens for [`AutoSaveTask`]s on an mpsc channel
/// 2. Ticks at the configured interval, flushing when the store's
///    auto-save gate is open and keys are pending
/// 3. Runs one final flush when stopped, so nothing pending is stranded
pub struct AutoSaveWorker {
    tx: Option<mpsc::Sender<AutoSaveTask>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AutoSaveWorker {
    /// Starts the worker over `store`, pulling payloads from `source`.
    ///
    /// Returns a handle used to force flushes and stop the worker. The
    /// channel capacity is fixed at 256.
    #[must_use]
    pub fn start(
        store: Arc<PersistentStore>,
        source: Arc<dyn PayloadSource>,
        interval_ms: u64,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<AutoSaveTask>(256);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(Duration::from_millis(interval_ms));
            // Skip the first immediate tick so a flush doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(AutoSaveTask::Flush { reason }) => {
                                let outcome = store.flush_pending(source.as_ref()).await;
                                tracing::debug!(
                                    reason = %reason,
                                    saved = outcome.saved,
                                    still_pending = outcome.still_pending.len(),
                                    "forced flush"
                                );
                            }
                            None => break, // Channel closed.
                        }
                    }
                    _ = tick_interval.tick() => {
                        if store.auto_save_enabled() && !store.pending_changes().is_empty() {
                            let outcome = store.flush_pending(source.as_ref()).await;
                            tracing::debug!(
                                saved = outcome.saved,
                                still_pending = outcome.still_pending.len(),
                                "scheduled flush"
                            );
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            // Final flush; the gate is ignored because stopping is explicit.
            if !store.pending_changes().is_empty() {
                let outcome = store.flush_pending(source.as_ref()).await;
                tracing::debug!(
                    saved = outcome.saved,
                    still_pending = outcome.still_pending.len(),
                    "final flush on stop"
                );
            }
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submits a task to the worker, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: AutoSaveTask) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stops the worker gracefully, waiting for its final flush to complete.
    pub async fn stop(&mut self) {
        // Signal shutdown.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Close the task channel.
        self.tx.take();
        // Wait for the worker task to finish.
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
