//! Declarative operation and field schemas.
//!
//! Operations are described in YAML and turned into runtime validators and
//! SQL fragments:
//!
//! - [`Field`] / [`FieldType`]: typed attribute with `required`, `default`
//!   and a list of [`Constraint`]s
//! - [`Operation`]: one create/update/delete action with its fields, where
//!   conditions, target storage and inbound [`RequestConfig`]
//! - [`OperationCatalog`]: the validated set of operations loaded at startup

mod catalog;
mod constraint;
mod field;
mod operation;
mod request;

pub use catalog::OperationCatalog;
pub use constraint::Constraint;
pub use field::{Field, FieldType};
pub use operation::{Operation, OPERATION_KEY, REQUEST_ID_FIELD};
pub use request::{HttpRequest, MessageShape, OperationShape, RabbitMqRequest, RequestConfig, Transport};
