//! Unit of work: one batch written across the ledger and N data storages.
//!
//! Per transaction id:
//!
//! ```text
//! NONE --begin--> OPEN --commit---> COMMITTED
//!                      \-rollback-> FAILED
//! ```
//!
//! The ledger transaction is committed by `create_tx` before any data write,
//! so an attempt is recorded even when the data write later fails. There is
//! no two-phase commit: if a data commit fails after another storage already
//! committed, the ledger row stays `in progress` for out-of-band recovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ledgerq_core::{Message, Operation, Statement};
use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ledger::{LedgerDriver, LedgerError, TxOutcome};
use crate::storage::{Driver, DriverError, DriverRegistry};

#[derive(Debug, thiserror::Error)]
pub enum UowError {
    #[error("transaction already exists: {id}")]
    AlreadyExists { id: Uuid },
    #[error("transaction not found: {id}")]
    NotFound { id: Uuid },
    #[error("transaction {id}: unknown storage {storage}")]
    UnknownStorage { id: Uuid, storage: String },
    #[error("transaction {id}: storage {storage} is not part of this transaction")]
    NotEnlisted { id: Uuid, storage: String },
    #[error("transaction {id} on {storage}: {source}")]
    Driver {
        id: Uuid,
        storage: String,
        #[source]
        source: DriverError,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("transaction {id}: commit failed on {storage}, ledger left in progress: {source}")]
    Commit {
        id: Uuid,
        storage: String,
        #[source]
        source: DriverError,
    },
    #[error("transaction {id}: rollback failed on {}, ledger left in progress", .storages.join(", "))]
    Rollback { id: Uuid, storages: Vec<String> },
}

/// Result of a successfully saved batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub tx_id: Option<Uuid>,
    pub saved: usize,
    pub dropped: usize,
}

/// Coordinates one transaction id across the ledger and data drivers.
pub struct UnitOfWork {
    ledger: LedgerDriver,
    storages: Arc<DriverRegistry>,
    open: Mutex<HashMap<Uuid, Vec<Arc<dyn Driver>>>>,
}

impl UnitOfWork {
    #[must_use]
    pub fn new(ledger: LedgerDriver, storages: Arc<DriverRegistry>) -> Self {
        Self {
            ledger,
            storages,
            open: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &LedgerDriver {
        &self.ledger
    }

    #[must_use]
    pub fn is_open(&self, id: Uuid) -> bool {
        self.open.lock().contains_key(&id)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    /// Opens `id` on the ledger and on every named storage.
    ///
    /// If any begin fails, everything already opened for `id` is
    /// force-finished before the error is returned.
    ///
    /// # Errors
    ///
    /// [`UowError::AlreadyExists`] if `id` is already open, otherwise the
    /// first storage lookup or begin failure.
    pub async fn begin(&self, id: Uuid, storages: &[&str]) -> Result<(), UowError> {
        {
            let mut open = self.open.lock();
            if open.contains_key(&id) {
                return Err(UowError::AlreadyExists { id });
            }
            open.insert(id, Vec::new());
        }

        match self.open_all(id, storages).await {
            Ok(drivers) => {
                self.open.lock().insert(id, drivers);
                debug!(tx_id = %id, storages = ?storages, "unit of work opened");
                Ok(())
            }
            Err(e) => {
                self.open.lock().remove(&id);
                Err(e)
            }
        }
    }

    async fn open_all(&self, id: Uuid, storages: &[&str]) -> Result<Vec<Arc<dyn Driver>>, UowError> {
        let mut drivers = Vec::with_capacity(storages.len());
        for name in storages {
            let driver = self.storages.get(name).ok_or_else(|| UowError::UnknownStorage {
                id,
                storage: (*name).to_string(),
            })?;
            if !drivers.iter().any(|d: &Arc<dyn Driver>| Arc::ptr_eq(d, &driver)) {
                drivers.push(driver);
            }
        }

        if let Err(source) = self.ledger.begin(id).await {
            return Err(UowError::Driver {
                id,
                storage: self.ledger.driver().info().name.clone(),
                source,
            });
        }

        let key = id.to_string();
        for (i, driver) in drivers.iter().enumerate() {
            if let Err(source) = driver.begin(&key).await {
                warn!(tx_id = %id, storage = %driver.info().name, error = %source, "begin failed, finishing opened transactions");
                for opened in &drivers[..i] {
                    let _ = opened.finish_tx(&key).await;
                }
                self.ledger.finish(id).await;
                return Err(UowError::Driver {
                    id,
                    storage: driver.info().name.clone(),
                    source,
                });
            }
        }
        Ok(drivers)
    }

    /// Records the attempt in the ledger. See [`LedgerDriver::create_tx`].
    ///
    /// # Errors
    ///
    /// [`UowError::NotFound`] if `id` is not open, or the ledger error.
    pub async fn create_tx(&self, id: Uuid, entity: &str, messages: &[Message]) -> Result<(), UowError> {
        if !self.is_open(id) {
            return Err(UowError::NotFound { id });
        }
        self.ledger.create_tx(id, entity, messages).await?;
        Ok(())
    }

    /// Executes `statement` on the named storage inside `id`.
    ///
    /// On failure that storage's transaction is rolled back (or
    /// force-finished if the rollback fails too) and leaves the unit of
    /// work; the caller is expected to [`rollback`](Self::rollback) the rest.
    ///
    /// # Errors
    ///
    /// [`UowError::NotFound`], [`UowError::NotEnlisted`], or the driver error
    /// wrapped with the transaction id.
    pub async fn exec(&self, id: Uuid, storage: &str, statement: &Statement) -> Result<u64, UowError> {
        let driver = {
            let open = self.open.lock();
            let drivers = open.get(&id).ok_or(UowError::NotFound { id })?;
            drivers
                .iter()
                .find(|d| d.info().name == storage)
                .cloned()
                .ok_or_else(|| UowError::NotEnlisted {
                    id,
                    storage: storage.to_string(),
                })?
        };

        let key = id.to_string();
        match driver.exec(statement, &key).await {
            Ok(rows) => Ok(rows),
            Err(source) => {
                if let Err(e) = driver.rollback(&key).await {
                    warn!(tx_id = %id, storage, error = %e, "rollback after failed exec failed, finishing");
                    let _ = driver.finish_tx(&key).await;
                }
                if let Some(drivers) = self.open.lock().get_mut(&id) {
                    drivers.retain(|d| !Arc::ptr_eq(d, &driver));
                }
                Err(UowError::Driver {
                    id,
                    storage: storage.to_string(),
                    source,
                })
            }
        }
    }

    /// Commits every data storage in enlistment order, then marks the
    /// ledger row `success`. `id` is no longer open afterwards, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// [`UowError::Commit`] if a data commit fails: storages not yet
    /// committed and any ledger transaction still open for `id` are
    /// force-finished, and the ledger row stays `in progress`.
    /// [`UowError::Ledger`] if only the ledger update fails; the data is
    /// committed.
    pub async fn commit(&self, id: Uuid) -> Result<(), UowError> {
        let drivers = self.open.lock().remove(&id).ok_or(UowError::NotFound { id })?;
        let key = id.to_string();

        for (i, driver) in drivers.iter().enumerate() {
            if let Err(source) = driver.commit(&key).await {
                error!(
                    tx_id = %id,
                    storage = %driver.info().name,
                    committed = i,
                    error = %source,
                    "commit failed, ledger left in progress"
                );
                for rest in &drivers[i..] {
                    let _ = rest.finish_tx(&key).await;
                }
                self.ledger.finish(id).await;
                return Err(UowError::Commit {
                    id,
                    storage: driver.info().name.clone(),
                    source,
                });
            }
        }

        self.ledger.save_result(id, &TxOutcome::success()).await?;
        Ok(())
    }

    /// Rolls back every data storage and marks the ledger row `failed` with
    /// `cause`. `id` is no longer open afterwards.
    ///
    /// # Errors
    ///
    /// [`UowError::Rollback`] if any rollback fails (those storages and any
    /// ledger transaction still open for `id` are force-finished, and the
    /// ledger row stays `in progress`), or the ledger error.
    pub async fn rollback(&self, id: Uuid, cause: &str) -> Result<(), UowError> {
        let drivers = self.open.lock().remove(&id).ok_or(UowError::NotFound { id })?;
        let key = id.to_string();

        let mut failed = Vec::new();
        for driver in &drivers {
            if let Err(e) = driver.rollback(&key).await {
                warn!(tx_id = %id, storage = %driver.info().name, error = %e, "rollback failed, finishing");
                let _ = driver.finish_tx(&key).await;
                failed.push(driver.info().name.clone());
            }
        }
        if !failed.is_empty() {
            self.ledger.finish(id).await;
            return Err(UowError::Rollback { id, storages: failed });
        }

        self.ledger.save_result(id, &TxOutcome::failed(cause)).await?;
        Ok(())
    }

    /// Releases `id` without touching the ledger. Used when the attempt was
    /// never recorded.
    async fn discard(&self, id: Uuid) {
        let drivers = self.open.lock().remove(&id).unwrap_or_default();
        let key = id.to_string();
        for driver in drivers {
            let _ = driver.finish_tx(&key).await;
        }
        self.ledger.finish(id).await;
    }

    /// Saves one batch of messages for `operation` under a fresh transaction
    /// id: begin, record in the ledger, write, commit. Any failure after the
    /// ledger record rolls everything back and marks the ledger `failed`.
    ///
    /// Messages whose statement cannot be rendered are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage.
    pub async fn save(&self, operation: &Operation, batch: Vec<Message>) -> Result<BatchReport, UowError> {
        let mut messages = Vec::with_capacity(batch.len());
        let mut statements = Vec::with_capacity(batch.len());
        let mut dropped = 0;
        for message in batch {
            match operation.statement(&message) {
                Ok(statement) => {
                    statements.push(statement);
                    messages.push(message);
                }
                Err(e) => {
                    warn!(operation = %operation.name, request_id = %message.request_id, error = %e, "dropping message");
                    metrics::counter!("ledgerq_messages_dropped_total", "reason" => "statement").increment(1);
                    dropped += 1;
                }
            }
        }

        if messages.is_empty() {
            return Ok(BatchReport {
                tx_id: None,
                saved: 0,
                dropped,
            });
        }

        let id = Uuid::new_v4();
        let span = info_span!(
            "save_batch",
            tx_id = %id,
            operation = %operation.name,
            storage = %operation.storage,
            batch_size = messages.len(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = self.run_batch(id, operation, &messages, &statements).await;

            let outcome = if result.is_ok() { "success" } else { "failed" };
            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            metrics::counter!("ledgerq_batches_total", "outcome" => outcome).increment(1);

            match &result {
                Ok(()) => info!(saved = messages.len(), dropped, duration_ms, "batch saved"),
                Err(e) => error!(error = %e, duration_ms, "batch failed"),
            }
            result.map(|()| BatchReport {
                tx_id: Some(id),
                saved: messages.len(),
                dropped,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_batch(
        &self,
        id: Uuid,
        operation: &Operation,
        messages: &[Message],
        statements: &[Statement],
    ) -> Result<(), UowError> {
        self.begin(id, &[operation.storage.as_str()]).await?;

        if let Err(e) = self.create_tx(id, &operation.table, messages).await {
            self.discard(id).await;
            return Err(e);
        }

        for statement in statements {
            if let Err(e) = self.exec(id, &operation.storage, statement).await {
                if let Err(rollback) = self.rollback(id, &e.to_string()).await {
                    error!(tx_id = %id, error = %rollback, "rollback after failed write failed");
                }
                return Err(e);
            }
        }

        self.commit(id).await
    }

    /// Closes the ledger and every data driver. Called once at shutdown.
    pub async fn close(&self) {
        let leftover = self.open_count();
        if leftover > 0 {
            warn!(open = leftover, "closing with open units of work");
        }
        self.storages.close_all().await;
        self.ledger.close().await;
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("ledger", &self.ledger)
            .field("storages", &self.storages)
            .field("open", &self.open_count())
            .finish()
    }
}
