//! Server configuration, loaded from YAML.
//!
//! Every struct has defaults for its optional keys and a `validate()` that
//! rejects values the server cannot run with. Validation happens once at
//! startup; components receive already-checked configs.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use ledgerq_core::OperationCatalog;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("storage name must not be empty")]
    EmptyStorageName,
    #[error("duplicate storage name: {name}")]
    DuplicateStorage { name: String },
    #[error("storage {name}: {kind} storage requires an address")]
    MissingAddress { name: String, kind: StorageKind },
    #[error("operation {operation} refers to unknown storage {storage}")]
    UnknownStorage { operation: String, storage: String },
}

/// Backend a storage is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Postgres,
    Memory,
}

impl StorageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction parameters of one storage driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    pub name: String,
    pub kind: StorageKind,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_insert_timeout_ms")]
    pub insert_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub table: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_insert_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_max_connections() -> u32 {
    10
}

impl DriverConfig {
    /// In-process storage with default timeouts.
    #[must_use]
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StorageKind::Memory,
            address: String::new(),
            insert_timeout_ms: default_insert_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            table: String::new(),
            max_connections: default_max_connections(),
        }
    }

    #[must_use]
    pub fn insert_timeout(&self) -> Duration {
        Duration::from_millis(self.insert_timeout_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// # Errors
    ///
    /// Returns an error for an empty name, zero timeouts, or a postgres
    /// storage without an address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyStorageName);
        }
        if self.insert_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "insert_timeout_ms",
            });
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "read_timeout_ms",
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero {
                field: "max_connections",
            });
        }
        if self.kind == StorageKind::Postgres && self.address.trim().is_empty() {
            return Err(ConfigError::MissingAddress {
                name: self.name.clone(),
                kind: self.kind,
            });
        }
        Ok(())
    }
}

/// Batching and concurrency limits of the message handlers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerConfig {
    /// Messages per batch. A batch is saved when full or when the upstream
    /// channel is drained.
    pub buffer_size: usize,
    /// Capacity of the channel between a worker and its handler.
    pub channel_capacity: usize,
    /// Batches saving concurrently across all handlers.
    pub max_in_flight_batches: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            channel_capacity: 1024,
            max_in_flight_batches: 16,
        }
    }
}

impl HandlerConfig {
    /// # Errors
    ///
    /// Returns an error if any limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("handler.buffer_size", self.buffer_size),
            ("handler.channel_capacity", self.channel_capacity),
            ("handler.max_in_flight_batches", self.max_in_flight_batches),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }
}

/// Bind address of the health endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    pub host: String,
    /// 0 means OS-assigned.
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Recorded in every ledger row this process writes.
    #[serde(default)]
    pub instance_id: i64,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default)]
    pub health: HealthConfig,
    pub ledger: DriverConfig,
    pub storages: Vec<DriverConfig>,
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

impl ServerConfig {
    /// Parses a YAML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an I/O, parse or validation error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// # Errors
    ///
    /// Returns the first invalid section, or a duplicate storage name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handler.validate()?;
        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "shutdown_timeout_ms",
            });
        }
        self.ledger.validate()?;

        let mut seen = HashSet::new();
        for storage in &self.storages {
            storage.validate()?;
            if !seen.insert(storage.name.as_str()) {
                return Err(ConfigError::DuplicateStorage {
                    name: storage.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Checks that every operation writes to a configured storage.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStorage`] for the first operation whose
    /// storage is not configured.
    pub fn validate_against(&self, catalog: &OperationCatalog) -> Result<(), ConfigError> {
        for op in catalog.iter() {
            if !self.storages.iter().any(|s| s.name == op.storage) {
                return Err(ConfigError::UnknownStorage {
                    operation: op.name.clone(),
                    storage: op.storage.clone(),
                });
            }
        }
        Ok(())
    }
}
