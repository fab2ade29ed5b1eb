use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::backends::MemoryBackend;
use super::driver::{Driver, DriverInfo};
use super::tx_driver::TxDriver;
use crate::config::{DriverConfig, StorageKind};

/// Builds the driver described by `config`.
///
/// # Errors
///
/// Returns an error if the backend cannot be constructed, e.g. a malformed
/// connection string or a backend kind not compiled into this binary.
pub fn build_driver(config: &DriverConfig) -> anyhow::Result<Arc<dyn Driver>> {
    let info = DriverInfo {
        name: config.name.clone(),
        table: config.table.clone(),
        kind: config.kind.as_str(),
        address: config.address.clone(),
        insert_timeout: config.insert_timeout(),
        read_timeout: config.read_timeout(),
    };

    let driver: Arc<dyn Driver> = match config.kind {
        StorageKind::Memory => Arc::new(TxDriver::new(info, MemoryBackend::new())),
        #[cfg(feature = "postgres")]
        StorageKind::Postgres => {
            let backend = super::backends::PostgresBackend::connect_lazy(
                &config.address,
                config.read_timeout(),
                config.max_connections,
            )?;
            Arc::new(TxDriver::new(info, backend))
        }
        #[cfg(not(feature = "postgres"))]
        StorageKind::Postgres => {
            anyhow::bail!("storage {}: postgres support is not compiled in", config.name)
        }
    };
    info!(driver = %driver.info(), "storage driver created");
    Ok(driver)
}

/// Data storage drivers by logical name.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one driver per config entry.
    ///
    /// # Errors
    ///
    /// Returns the first driver that fails to build. Drivers built before it
    /// are dropped.
    pub fn from_configs(configs: &[DriverConfig]) -> anyhow::Result<Self> {
        let registry = Self::new();
        for config in configs {
            registry.insert(build_driver(config)?);
        }
        Ok(registry)
    }

    /// Registers a driver under its `info().name`, replacing any previous one.
    pub fn insert(&self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.info().name.clone(), driver);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Closes every driver. Called once at shutdown.
    pub async fn close_all(&self) {
        let drivers: Vec<Arc<dyn Driver>> =
            self.drivers.iter().map(|e| Arc::clone(e.value())).collect();
        for driver in drivers {
            driver.close().await;
            info!(driver = %driver.info().name, "storage driver closed");
        }
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
