//! Message path from a queue to the unit of work.
//!
//! ```text
//! queue ──RawMessage──> QueueWorker ──Message──> MessageHandler ──batch──> SavePool ──> UnitOfWork
//! ```

pub mod buffer;
pub mod handler;
pub mod pool;
pub mod worker;

pub use buffer::{Buffer, BufferFull};
pub use handler::MessageHandler;
pub use pool::{PoolStopped, SavePool};
pub use worker::QueueWorker;
