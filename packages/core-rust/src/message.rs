use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{OperationType, Value};

/// Undecoded inbound message: a flat key/value map as delivered by a queue.
pub type RawMessage = BTreeMap<String, Value>;

/// A message that passed validation against its operation.
///
/// `fields` holds every declared field that resolved to a value (supplied or
/// default), in canonical form. Undeclared keys from the raw message are gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Name of the operation this message was decoded against.
    pub operation: String,
    pub kind: OperationType,
    /// Correlation key carried through the pipeline and into the ledger.
    pub request_id: Uuid,
    pub fields: BTreeMap<String, Value>,
}

impl Message {
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// JSON document of the resolved fields, as stored in the ledger.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
                .collect(),
        )
    }
}

/// Decodes a JSON object into a [`RawMessage`]. Non-object documents yield
/// `None`.
#[must_use]
pub fn raw_from_json(json: serde_json::Value) -> Option<RawMessage> {
    match Value::from(json) {
        Value::Map(map) => Some(map),
        _ => None,
    }
}
