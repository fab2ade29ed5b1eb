//! `PostgreSQL` backend.
//!
//! Each native transaction pins one pooled connection for its whole life;
//! `BEGIN`, the statements and `COMMIT`/`ROLLBACK` all run on it.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ledgerq_core::{Statement, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::Postgres;
use tracing::warn;
use uuid::Uuid;

use crate::storage::tx_driver::TxBackend;

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Creates a lazily connecting pool. No connection is opened until the
    /// first transaction begins.
    ///
    /// # Errors
    ///
    /// Returns an error if `address` is not a valid connection string.
    pub fn connect_lazy(
        address: &str,
        acquire_timeout: Duration,
        max_connections: u32,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(address)
            .context("invalid postgres connection string")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => match parse_uuid(s) {
            Some(id) => query.bind(id),
            None => query.bind(s.clone()),
        },
        Value::Array(_) | Value::Map(_) => {
            query.bind(sqlx::types::Json(serde_json::Value::from(value.clone())))
        }
    }
}

/// Only the canonical hyphenated form is bound as `uuid`; anything else
/// stays text.
fn parse_uuid(s: &str) -> Option<Uuid> {
    if s.len() == 36 {
        Uuid::parse_str(s).ok()
    } else {
        None
    }
}

#[async_trait]
impl TxBackend for PostgresBackend {
    type Tx = PoolConnection<Postgres>;

    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> anyhow::Result<Self::Tx> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .context("BEGIN")?;
        Ok(conn)
    }

    async fn exec(&self, tx: &mut Self::Tx, statement: &Statement) -> anyhow::Result<u64> {
        let sql = statement.to_postgres();
        let query = statement
            .args
            .iter()
            .fold(sqlx::query(&sql), |q, arg| bind(q, arg));
        let result = query.execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(&self, tx: &mut Self::Tx) -> anyhow::Result<()> {
        sqlx::query("COMMIT").execute(&mut **tx).await.context("COMMIT")?;
        Ok(())
    }

    async fn rollback(&self, tx: &mut Self::Tx) -> anyhow::Result<()> {
        sqlx::query("ROLLBACK")
            .execute(&mut **tx)
            .await
            .context("ROLLBACK")?;
        Ok(())
    }

    async fn discard(&self, tx: Self::Tx) {
        // The session may still hold an open transaction; never hand it back.
        if let Err(e) = tx.close().await {
            warn!(error = %e, "failed to close discarded connection");
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
