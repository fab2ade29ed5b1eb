//! `ledgerq` server: queue workers, batching, unit-of-work coordination
//! across storage drivers, and the system ledger.

pub mod app;
pub mod config;
pub mod ledger;
pub mod network;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod supervisor;
pub mod uow;

pub use app::{App, ShutdownReport};
pub use config::{ConfigError, ServerConfig};
pub use ledger::{LedgerDriver, LedgerError, TxOutcome, TxStatus};
pub use storage::{Driver, DriverError, DriverRegistry};
pub use uow::{BatchReport, UnitOfWork, UowError};
