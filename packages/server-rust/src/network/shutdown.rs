//! Shutdown signal, health state and in-flight batch tracking.
//!
//! Health state lives in an `ArcSwap` so the health endpoint reads it
//! without locking. Every batch being saved holds a [`BatchGuard`]; the
//! last guard to drop wakes whoever waits for the batches to settle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Process health, as reported by the health endpoint.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Components are being wired; queues are not consumed yet.
    Starting,
    /// Consuming and saving.
    Ready,
    /// Shutdown was requested; remaining buffers are being saved.
    Draining,
    /// Every in-flight batch has finished.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates shutdown across components.
///
/// 1. The health endpoint reads `health_state()`
/// 2. Long-running loops select on `shutdown_receiver()`
/// 3. `trigger_shutdown()` moves to `Draining` and signals every receiver
/// 4. `wait_for_batches()` waits for in-flight batches
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    batches: Arc<Batches>,
    health_state: Arc<ArcSwap<HealthState>>,
}

/// Count of batches being saved, and the wakeup fired when it hits zero.
#[derive(Debug, Default)]
struct Batches {
    count: AtomicU64,
    settled: Notify,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            batches: Arc::new(Batches::default()),
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Receiver that flips to `true` once shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining` and signals every receiver. Idempotent.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        let _ = self.shutdown_signal.send_replace(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Tracks one batch until the guard is dropped.
    #[must_use]
    pub fn track_batch(&self) -> BatchGuard {
        self.batches.count.fetch_add(1, Ordering::AcqRel);
        BatchGuard {
            batches: Arc::clone(&self.batches),
        }
    }

    #[must_use]
    pub fn batches_in_flight(&self) -> u64 {
        self.batches.count.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for every tracked batch to finish.
    ///
    /// Returns `true` and moves to `Stopped` if none is left; returns
    /// `false` and stays `Draining` otherwise.
    pub async fn wait_for_batches(&self, timeout: Duration) -> bool {
        let settled = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.batches.settled.notified();
                tokio::pin!(notified);
                // Registered before the check so a guard dropping in between
                // still wakes us.
                notified.as_mut().enable();
                if self.batches_in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if settled {
            self.health_state.store(Arc::new(HealthState::Stopped));
        }
        settled
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one tracked batch on drop, including during unwinding.
#[derive(Debug)]
pub struct BatchGuard {
    batches: Arc<Batches>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.batches.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.batches.settled.notify_waiters();
        }
    }
}

/// Resolves once `rx` observes shutdown, or its controller is gone.
pub async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopping| *stopping).await;
}
