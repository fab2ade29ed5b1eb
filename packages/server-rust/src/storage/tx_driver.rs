//! Generic [`Driver`] built on a native transaction backend.
//!
//! [`TxDriver`] owns the `id -> native transaction` map and implements the
//! driver contract once; a [`TxBackend`] only knows how to open, use and
//! close a single native transaction.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use ledgerq_core::Statement;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::driver::{Driver, DriverError, DriverInfo, TimedOut};

/// Native transaction operations of one backend.
#[async_trait]
pub trait TxBackend: Send + Sync + 'static {
    /// Backend handle for one open transaction.
    type Tx: Send + 'static;

    fn kind(&self) -> &'static str;

    async fn begin(&self) -> anyhow::Result<Self::Tx>;

    async fn exec(&self, tx: &mut Self::Tx, statement: &Statement) -> anyhow::Result<u64>;

    async fn commit(&self, tx: &mut Self::Tx) -> anyhow::Result<()>;

    async fn rollback(&self, tx: &mut Self::Tx) -> anyhow::Result<()>;

    /// Called with a handle whose rollback failed during forced cleanup.
    /// The handle is in an unknown state and must not be reused.
    async fn discard(&self, tx: Self::Tx) {
        drop(tx);
    }

    async fn close(&self) {}
}

type TxHandle<T> = Arc<tokio::sync::Mutex<T>>;

/// Driver contract over any [`TxBackend`].
///
/// Every backend call is bounded by `info.insert_timeout`; a call that runs
/// over is abandoned and reported as [`TimedOut`].
pub struct TxDriver<B: TxBackend> {
    info: DriverInfo,
    backend: B,
    txs: Mutex<HashMap<String, TxHandle<B::Tx>>>,
}

impl<B: TxBackend> TxDriver<B> {
    #[must_use]
    pub fn new(info: DriverInfo, backend: B) -> Self {
        Self {
            info,
            backend,
            txs: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn bounded<T>(&self, fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
        let limit = self.info.insert_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(TimedOut(limit).into()),
        }
    }

    fn lookup(&self, id: &str) -> Result<TxHandle<B::Tx>, DriverError> {
        self.txs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::TxNotFound { id: id.to_string() })
    }

    fn forget(&self, id: &str) {
        self.txs.lock().remove(id);
    }
}

#[async_trait]
impl<B: TxBackend> Driver for TxDriver<B> {
    fn info(&self) -> &DriverInfo {
        &self.info
    }

    async fn begin(&self, id: &str) -> Result<(), DriverError> {
        if self.txs.lock().contains_key(id) {
            return Ok(());
        }

        let tx = self
            .bounded(self.backend.begin())
            .await
            .map_err(|source| DriverError::Begin {
                id: id.to_string(),
                source,
            })?;

        // Another caller may have opened the same id while we were waiting.
        let duplicate = match self.txs.lock().entry(id.to_string()) {
            Entry::Occupied(_) => Some(tx),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(tokio::sync::Mutex::new(tx)));
                None
            }
        };
        if let Some(mut tx) = duplicate {
            if let Err(e) = self.bounded(self.backend.rollback(&mut tx)).await {
                warn!(driver = %self.info.name, tx_id = id, error = %e, "failed to roll back duplicate begin");
                self.backend.discard(tx).await;
            }
        }

        debug!(driver = %self.info.name, tx_id = id, "transaction opened");
        Ok(())
    }

    async fn exec(&self, statement: &Statement, id: &str) -> Result<u64, DriverError> {
        let tx = self.lookup(id)?;
        let mut tx = tx.lock().await;
        self.bounded(self.backend.exec(&mut tx, statement))
            .await
            .map_err(|source| DriverError::Exec {
                id: id.to_string(),
                source,
            })
    }

    async fn commit(&self, id: &str) -> Result<(), DriverError> {
        let handle = self.lookup(id)?;
        let mut tx = handle.lock().await;
        self.bounded(self.backend.commit(&mut tx))
            .await
            .map_err(|source| DriverError::Commit {
                id: id.to_string(),
                source,
            })?;
        self.forget(id);
        debug!(driver = %self.info.name, tx_id = id, "transaction committed");
        Ok(())
    }

    async fn rollback(&self, id: &str) -> Result<(), DriverError> {
        let handle = self.lookup(id)?;
        let mut tx = handle.lock().await;
        self.bounded(self.backend.rollback(&mut tx))
            .await
            .map_err(|source| DriverError::Rollback {
                id: id.to_string(),
                source,
            })?;
        self.forget(id);
        debug!(driver = %self.info.name, tx_id = id, "transaction rolled back");
        Ok(())
    }

    async fn finish_tx(&self, id: &str) -> Result<(), DriverError> {
        let Some(handle) = self.txs.lock().remove(id) else {
            return Ok(());
        };

        let result = {
            let mut tx = handle.lock().await;
            self.bounded(self.backend.rollback(&mut tx)).await
        };
        if let Err(e) = result {
            warn!(driver = %self.info.name, tx_id = id, error = %e, "rollback during finish failed, discarding transaction");
            if let Ok(mutex) = Arc::try_unwrap(handle) {
                self.backend.discard(mutex.into_inner()).await;
            }
        }
        Ok(())
    }

    fn has_tx(&self, id: &str) -> bool {
        self.txs.lock().contains_key(id)
    }

    fn open_count(&self) -> usize {
        self.txs.lock().len()
    }

    async fn close(&self) {
        let leaked: Vec<String> = self.txs.lock().keys().cloned().collect();
        for id in leaked {
            warn!(driver = %self.info.name, tx_id = %id, "transaction still open at close, finishing");
            let _ = self.finish_tx(&id).await;
        }
        self.backend.close().await;
    }
}
