//! Native transaction backends plugged into [`TxDriver`](super::TxDriver).

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{MemoryBackend, MemoryStats, MemoryTx, Stage};
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
