use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::operation::Operation;
use crate::error::{SchemaError, ValidationError};
use crate::message::{Message, RawMessage};

#[derive(Deserialize)]
struct OperationsFile {
    operations: Vec<Operation>,
}

/// The validated set of operations known to the process.
///
/// Every operation passes [`Operation::validate`] and names are unique, so a
/// catalog that loaded successfully can be used without further checks.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    operations: BTreeMap<String, Operation>,
}

impl OperationCatalog {
    /// Builds a catalog from already-parsed operations.
    ///
    /// # Errors
    ///
    /// Returns the first invalid operation or duplicate name.
    pub fn new(operations: Vec<Operation>) -> Result<Self, SchemaError> {
        let mut by_name = BTreeMap::new();
        for op in operations {
            op.validate()?;
            if by_name.contains_key(&op.name) {
                return Err(SchemaError::DuplicateOperation { name: op.name });
            }
            debug!(operation = %op.name, kind = %op.kind, storage = %op.storage, "operation loaded");
            by_name.insert(op.name.clone(), op);
        }
        Ok(Self {
            operations: by_name,
        })
    }

    /// Parses a YAML document with a top-level `operations` list.
    ///
    /// # Errors
    ///
    /// Returns a parse error or the first invalid operation.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let file: OperationsFile = serde_yaml::from_str(yaml)?;
        Self::new(file.operations)
    }

    /// Reads and parses an operations file.
    ///
    /// # Errors
    ///
    /// Returns an I/O, parse, or validation error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    /// Decodes a raw message against the named operation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownOperation`] for an unknown name, or
    /// the decode error of the operation.
    pub fn decode(&self, name: &str, raw: &RawMessage) -> Result<Message, ValidationError> {
        self.get(name)
            .ok_or_else(|| ValidationError::UnknownOperation {
                name: name.to_string(),
            })?
            .decode(raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
