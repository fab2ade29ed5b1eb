//! Error types for schema loading and per-message validation.
//!
//! [`SchemaError`] is a configuration error: it is raised while operation
//! definitions are loaded and stops the process from starting.
//! [`ValidationError`] is raised per message; the caller logs it and drops
//! the message.

use crate::schema::FieldType;

/// A value failed the checks declared for one field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("field is required")]
    Required,
    #[error("expected value of type {expected}, got {actual}")]
    TypeMismatch {
        expected: FieldType,
        actual: &'static str,
    },
    #[error("value {actual} is less than min {min}")]
    BelowMin { min: f64, actual: f64 },
    #[error("value {actual} is greater than max {max}")]
    AboveMax { max: f64, actual: f64 },
    #[error("length {len} exceeds max_length {max}")]
    TooLong { max: usize, len: usize },
    #[error("value {value} is not one of the allowed values")]
    NotInEnum { value: String },
    #[error("value must not be empty")]
    Empty,
    #[error("constraint {constraint} does not apply to {actual} values")]
    NotApplicable {
        constraint: &'static str,
        actual: &'static str,
    },
}

/// A message could not be decoded against its operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("field {field}: {source}")]
    Field {
        field: String,
        #[source]
        source: FieldError,
    },
    #[error("required where condition {field} is missing")]
    MissingCondition { field: String },
    #[error("message operation {actual} does not match operation type {expected}")]
    OperationMismatch { expected: String, actual: String },
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error("update has no columns to set")]
    EmptyUpdate,
    #[error("{kind} without where conditions is refused")]
    UnboundedWrite { kind: String },
}

impl ValidationError {
    pub(crate) fn field(field: &str, source: FieldError) -> Self {
        Self::Field {
            field: field.to_string(),
            source,
        }
    }
}

/// An operation definition is malformed.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("operation {operation}: fields must declare request_id")]
    MissingRequestId { operation: String },
    #[error("operation {operation}: request_id must be of type uuid and required")]
    InvalidRequestId { operation: String },
    #[error("operation {operation}: where condition {field} is not declared in fields")]
    DanglingWhereCondition { operation: String, field: String },
    #[error("operation {operation}: constraint column {column} is not declared in fields")]
    DanglingConstraint { operation: String, column: String },
    #[error("operation {operation}: {kind} requires at least one where condition")]
    UnboundedWrite { operation: String, kind: String },
    #[error("operation {operation}: default of field {field} is invalid: {source}")]
    InvalidDefault {
        operation: String,
        field: String,
        #[source]
        source: FieldError,
    },
    #[error("operation {operation}: {field} must not be empty")]
    EmptyAttribute {
        operation: String,
        field: &'static str,
    },
    #[error("operation {operation}: {kind} operation declares message operation value {declared}")]
    OperationValueMismatch {
        operation: String,
        kind: String,
        declared: String,
    },
    #[error("operation {operation}: invalid request config: {reason}")]
    InvalidRequest { operation: String, reason: String },
    #[error("operation {operation}: {ident:?} is not a valid SQL identifier")]
    InvalidIdentifier { operation: String, ident: String },
    #[error("invalid constraint definition: {reason}")]
    InvalidConstraint { reason: String },
    #[error("duplicate operation name: {name}")]
    DuplicateOperation { name: String },
    #[error("failed to read operations file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse operations yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
