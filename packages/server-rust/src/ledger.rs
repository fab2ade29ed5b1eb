//! System ledger: the durable record of every attempted batch.
//!
//! ```text
//! transactions.transactions(id uuid PK, status tx_status, error text null,
//!                           created_at bigint, instance_id int)
//! transactions.requests(id uuid, entity text, data jsonb, operation text, tx_id uuid)
//! ```
//!
//! A ledger transaction is committed on its own, before the data writes it
//! describes. Rows are written once as `in progress` and updated once to a
//! terminal status; they are never deleted.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ledgerq_core::{Message, Statement, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::{Driver, DriverError};

pub const TRANSACTIONS_TABLE: &str = "transactions.transactions";
pub const REQUESTS_TABLE: &str = "transactions.requests";

/// Values of the `transactions.tx_status` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    InProgress,
    Success,
    Failed,
}

impl TxStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result written by [`LedgerDriver::save_result`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub status: TxStatus,
    pub error: Option<String>,
}

impl TxOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: TxStatus::Success,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(cause: impl Into<String>) -> Self {
        Self {
            status: TxStatus::Failed,
            error: Some(cause.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to record ledger transaction {tx_id}: {source}")]
    CreateTx {
        tx_id: Uuid,
        #[source]
        source: DriverError,
    },
    #[error("failed to save result of ledger transaction {tx_id}: {source}")]
    SaveResult {
        tx_id: Uuid,
        #[source]
        source: DriverError,
    },
    #[error("ledger outcome for {tx_id} must be terminal, got {status}")]
    NotTerminal { tx_id: Uuid, status: TxStatus },
}

/// Ledger writes on top of a plain [`Driver`].
#[derive(Clone)]
pub struct LedgerDriver {
    driver: Arc<dyn Driver>,
    instance_id: i64,
}

impl LedgerDriver {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, instance_id: i64) -> Self {
        Self {
            driver,
            instance_id,
        }
    }

    #[must_use]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    #[must_use]
    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    /// Opens the ledger transaction for `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns the driver's begin error.
    pub async fn begin(&self, tx_id: Uuid) -> Result<(), DriverError> {
        self.driver.begin(&tx_id.to_string()).await
    }

    /// Forced cleanup of the ledger transaction for `tx_id`.
    pub async fn finish(&self, tx_id: Uuid) {
        let _ = self.driver.finish_tx(&tx_id.to_string()).await;
    }

    /// Records the attempt: one `in progress` transaction row and one
    /// request row per message, committed immediately.
    ///
    /// On failure the ledger transaction is force-finished and nothing is
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::CreateTx`] wrapping the failing driver call.
    pub async fn create_tx(
        &self,
        tx_id: Uuid,
        entity: &str,
        messages: &[Message],
    ) -> Result<(), LedgerError> {
        let id = tx_id.to_string();
        let result = self.write_attempt(&id, tx_id, entity, messages).await;
        if let Err(source) = result {
            self.finish(tx_id).await;
            return Err(LedgerError::CreateTx { tx_id, source });
        }
        debug!(tx_id = %tx_id, entity, requests = messages.len(), "ledger transaction recorded");
        Ok(())
    }

    async fn write_attempt(
        &self,
        id: &str,
        tx_id: Uuid,
        entity: &str,
        messages: &[Message],
    ) -> Result<(), DriverError> {
        self.driver.begin(id).await?;
        self.driver
            .exec(&self.transaction_row(tx_id), id)
            .await?;
        for message in messages {
            self.driver
                .exec(&request_row(tx_id, entity, message), id)
                .await?;
        }
        self.driver.commit(id).await
    }

    /// Moves the ledger row for `tx_id` to its terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotTerminal`] for an `in progress` outcome, or
    /// [`LedgerError::SaveResult`] wrapping the failing driver call.
    pub async fn save_result(&self, tx_id: Uuid, outcome: &TxOutcome) -> Result<(), LedgerError> {
        if outcome.status == TxStatus::InProgress {
            return Err(LedgerError::NotTerminal {
                tx_id,
                status: outcome.status,
            });
        }

        let id = tx_id.to_string();
        let statement = Statement::new(
            format!(
                "UPDATE {TRANSACTIONS_TABLE} SET status = ?::transactions.tx_status, error = ? WHERE id = ?"
            ),
            vec![
                Value::from(outcome.status.as_str()),
                outcome.error.clone().map_or(Value::Null, Value::String),
                Value::String(id.clone()),
            ],
        );

        let result = async {
            self.driver.begin(&id).await?;
            self.driver.exec(&statement, &id).await?;
            self.driver.commit(&id).await
        }
        .await;

        if let Err(source) = result {
            warn!(tx_id = %tx_id, status = %outcome.status, error = %source, "failed to save ledger result");
            self.finish(tx_id).await;
            return Err(LedgerError::SaveResult { tx_id, source });
        }
        debug!(tx_id = %tx_id, status = %outcome.status, "ledger result saved");
        Ok(())
    }

    pub async fn close(&self) {
        self.driver.close().await;
    }

    fn transaction_row(&self, tx_id: Uuid) -> Statement {
        Statement::new(
            format!(
                "INSERT INTO {TRANSACTIONS_TABLE} (id, status, created_at, instance_id) VALUES (?, ?::transactions.tx_status, ?, ?)"
            ),
            vec![
                Value::String(tx_id.to_string()),
                Value::from(TxStatus::InProgress.as_str()),
                Value::Int(unix_seconds()),
                Value::Int(self.instance_id),
            ],
        )
    }
}

impl fmt::Debug for LedgerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerDriver")
            .field("driver", self.driver.info())
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

fn request_row(tx_id: Uuid, entity: &str, message: &Message) -> Statement {
    Statement::new(
        format!("INSERT INTO {REQUESTS_TABLE} (id, entity, data, operation, tx_id) VALUES (?, ?, ?, ?, ?)"),
        vec![
            Value::String(message.request_id.to_string()),
            Value::from(entity),
            Value::from(message.payload()),
            Value::from(message.kind.as_str()),
            Value::String(tx_id.to_string()),
        ],
    )
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
