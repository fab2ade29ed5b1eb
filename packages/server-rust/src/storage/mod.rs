//! Storage drivers.
//!
//! - [`Driver`]: the id-scoped transaction contract every backend exposes
//! - [`TxDriver`]: the contract implemented once over a [`TxBackend`]
//! - [`backends`]: `memory` and (feature `postgres`) `postgres`
//! - [`DriverRegistry`]: drivers by logical storage name

pub mod backends;
pub mod driver;
pub mod registry;
pub mod tx_driver;

pub use driver::{Driver, DriverError, DriverInfo, TimedOut};
pub use registry::{build_driver, DriverRegistry};
pub use tx_driver::{TxBackend, TxDriver};
