//! Storage driver contract.
//!
//! A [`Driver`] exposes transactions keyed by an opaque caller-supplied id.
//! Each driver owns its own transaction map; two drivers never share one.
//!
//! Lifecycle of an id on one driver:
//!
//! ```text
//! begin ──> exec* ──> commit | rollback | finish_tx
//! ```
//!
//! `begin` is idempotent. `commit`/`rollback` leave the entry in place when
//! they fail, so the caller can retry or force it out with `finish_tx`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ledgerq_core::Statement;

/// Descriptive metadata for logs and diagnostics. Never used for control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    /// Logical name operations refer to in their `storage` attribute.
    pub name: String,
    /// Default table of this storage, informational only.
    pub table: String,
    /// Backend kind, e.g. `postgres` or `memory`.
    pub kind: &'static str,
    /// Connection string.
    pub address: String,
    /// Bound on every write-path call (begin, exec, commit, rollback).
    pub insert_timeout: Duration,
    /// Bound on acquiring a connection and on reads.
    pub read_timeout: Duration,
}

impl DriverInfo {
    /// Connection string with any password replaced, safe to log.
    #[must_use]
    pub fn redacted_address(&self) -> String {
        let Some((scheme, rest)) = self.address.split_once("://") else {
            return self.address.clone();
        };
        let Some((userinfo, host)) = rest.rsplit_once('@') else {
            return self.address.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for DriverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.name, self.kind, self.redacted_address())
    }
}

/// A call did not finish within the driver's configured bound.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("timed out after {}ms", .0.as_millis())]
pub struct TimedOut(pub Duration);

/// Errors from a [`Driver`].
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("error on begin transaction {id}: {source}")]
    Begin {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("error getting transaction {id}: transaction not found")]
    TxNotFound { id: String },
    #[error("error executing statement in transaction {id}: {source}")]
    Exec {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("error on commit transaction {id}: {source}")]
    Commit {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("error on rollback transaction {id}: {source}")]
    Rollback {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DriverError {
    /// Returns `true` if the underlying call hit the driver's timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Begin { source, .. }
            | Self::Exec { source, .. }
            | Self::Commit { source, .. }
            | Self::Rollback { source, .. } => source.downcast_ref::<TimedOut>().is_some(),
            Self::TxNotFound { .. } => false,
        }
    }
}

/// A storage backend exposing id-scoped transactions.
///
/// Used as `Arc<dyn Driver>`. Implementations guard their transaction map
/// with their own lock; callers must not run two lifecycles for the same id
/// concurrently on one driver.
#[async_trait]
pub trait Driver: Send + Sync {
    fn info(&self) -> &DriverInfo;

    /// Opens a transaction for `id`. Succeeds without side effects if one is
    /// already open.
    async fn begin(&self, id: &str) -> Result<(), DriverError>;

    /// Executes a statement inside the transaction for `id`. Returns the
    /// number of affected rows.
    async fn exec(&self, statement: &Statement, id: &str) -> Result<u64, DriverError>;

    /// Commits and forgets the transaction for `id`.
    async fn commit(&self, id: &str) -> Result<(), DriverError>;

    /// Rolls back and forgets the transaction for `id`.
    async fn rollback(&self, id: &str) -> Result<(), DriverError>;

    /// Forced cleanup. A no-op for unknown ids; otherwise rolls back,
    /// ignores the rollback error, and always forgets the id.
    async fn finish_tx(&self, id: &str) -> Result<(), DriverError>;

    /// Whether a transaction is currently open for `id`.
    fn has_tx(&self, id: &str) -> bool;

    /// Number of open transactions.
    fn open_count(&self) -> usize;

    /// Releases the backend's resources. Called once at shutdown.
    async fn close(&self);
}
