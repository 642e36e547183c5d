//! Graceful shutdown with in-flight flush tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions and an atomic counter
//! with RAII guards so shutdown can wait for host-initiated flushes that
//! are still running. The store never blocks shutdown on its own: the
//! outcome reports what is still pending and the host decides whether to
//! warn the user.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::autosave::PayloadSource;
use crate::store::persistent::{FlushOutcome, PersistentStore};

/// Store lifecycle state, transitioned by [`Lifecycle`].
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Host is initializing; sessions are not yet wired up.
    Starting,
    /// Fully operational.
    Ready,
    /// Shutting down; in-flight flushes are being drained.
    Draining,
    /// Fully stopped; the final flush has run.
    Stopped,
}

/// What happened during [`Lifecycle::shutdown`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownOutcome {
    /// Whether all in-flight flushes completed within the drain timeout.
    pub drained: bool,
    /// Keys persisted by the final flush.
    pub flushed: usize,
    /// Keys still unpersisted after the final flush. The host decides
    /// whether these warrant a warning.
    pub still_pending: Vec<String>,
}

/// Coordinates graceful teardown of everything using one store:
/// 1. Host tasks select on [`shutdown_receiver`](Lifecycle::shutdown_receiver)
///    alongside their main loop
/// 2. Long flushes hold a [`FlushGuard`] so shutdown can wait for them
/// 3. [`shutdown`](Lifecycle::shutdown) drains, runs one final flush, and
///    reports what is still pending
#[derive(Debug)]
pub struct Lifecycle {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl Lifecycle {
    /// Creates a lifecycle in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Starting)),
        }
    }

    /// Transitions to `Ready` once the host has wired its sessions up.
    pub fn set_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns a receiver that is notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Creates an RAII guard that tracks one in-flight flush.
    ///
    /// The counter is incremented on creation and decremented when the
    /// guard is dropped, even if the flushing task panics.
    #[must_use]
    pub fn flush_guard(&self) -> FlushGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        FlushGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Returns the current number of in-flight flushes.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight flushes to complete, up to `timeout`.
    ///
    /// Returns `true` once the counter reaches zero (transitions to
    /// `Stopped`). Returns `false` if the timeout expired (state remains
    /// `Draining`).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.state.store(Arc::new(LifecycleState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Shuts the store down: signals receivers, drains in-flight flushes,
    /// then runs one final flush of everything still pending.
    ///
    /// Never blocks beyond `drain_timeout` waiting for stragglers, and
    /// never refuses to stop; unpersisted keys come back in the outcome for
    /// the host to act on.
    pub async fn shutdown(
        &self,
        store: &PersistentStore,
        source: &dyn PayloadSource,
        drain_timeout: Duration,
    ) -> ShutdownOutcome {
        self.state.store(Arc::new(LifecycleState::Draining));
        // Ignore send errors -- receivers may have been dropped
        let _ = self.shutdown_signal.send(true);

        let drained = self.wait_for_drain(drain_timeout).await;
        if !drained {
            tracing::warn!(
                in_flight = self.in_flight_count(),
                "drain timeout expired, flushing over still-running work"
            );
        }

        let outcome = store.flush_pending(source).await;
        if !outcome.still_pending.is_empty() {
            tracing::warn!(
                still_pending = outcome.still_pending.len(),
                "shutdown leaves unpersisted changes"
            );
        }

        ShutdownOutcome {
            drained,
            flushed: outcome.saved,
            still_pending: outcome.still_pending,
        }
    }

    /// Best-effort flush for when the host loses foreground focus.
    ///
    /// Holds a flush guard so a concurrent shutdown waits for it; does not
    /// transition the lifecycle state.
    pub async fn on_hidden(
        &self,
        store: &PersistentStore,
        source: &dyn PayloadSource,
    ) -> FlushOutcome {
        let _guard = self.flush_guard();
        let outcome = store.flush_pending(source).await;
        tracing::debug!(
            saved = outcome.saved,
            still_pending = outcome.still_pending.len(),
            "background flush"
        );
        outcome
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
///
/// Drop runs during stack unwinding too, so the count stays accurate even
/// if a flushing task panics.
#[derive(Debug)]
pub struct FlushGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
