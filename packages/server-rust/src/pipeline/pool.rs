//! Bounded pool of concurrent batch saves.
//!
//! `submit` waits for one of `max_in_flight` permits before spawning the
//! save, so a slow storage pushes back on the handlers instead of piling
//! up tasks. Every save is tracked so `stop` can wait for all of them.

use std::sync::Arc;

use ledgerq_core::{Message, Operation};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::network::ShutdownController;
use crate::uow::UnitOfWork;

#[derive(Debug, thiserror::Error)]
#[error("save pool is stopped, {dropped} messages not saved")]
pub struct PoolStopped {
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct SavePool {
    uow: Arc<UnitOfWork>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    tracker: TaskTracker,
    controller: Arc<ShutdownController>,
}

impl SavePool {
    #[must_use]
    pub fn new(uow: Arc<UnitOfWork>, max_in_flight: usize, controller: Arc<ShutdownController>) -> Self {
        Self {
            uow,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            tracker: TaskTracker::new(),
            controller,
        }
    }

    /// Starts saving `batch`, waiting for a free slot first.
    ///
    /// # Errors
    ///
    /// Returns [`PoolStopped`] if the pool was stopped; the batch is not
    /// saved.
    pub async fn submit(&self, operation: Arc<Operation>, batch: Vec<Message>) -> Result<(), PoolStopped> {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Err(PoolStopped { dropped: batch.len() });
        };
        let guard = self.controller.track_batch();
        let uow = Arc::clone(&self.uow);

        debug!(operation = %operation.name, batch_size = batch.len(), "batch submitted");
        self.tracker.spawn(async move {
            // Outcome is logged inside the save span.
            let _ = uow.save(&operation, batch).await;
            drop(guard);
            drop(permit);
        });
        Ok(())
    }

    /// Batches currently being saved.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Refuses new batches and waits for every submitted one to finish.
    pub async fn stop(&self) {
        self.permits.close();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
