//! `ledgerq` core: declarative operation schemas, field validation, and SQL fragments.

pub mod error;
pub mod message;
pub mod schema;
pub mod sql;
pub mod types;

pub use error::{FieldError, SchemaError, ValidationError};
pub use message::{Message, RawMessage};
pub use schema::{Constraint, Field, FieldType, Operation, OperationCatalog, RequestConfig};
pub use sql::{SqlClause, Statement};
pub use types::{OperationType, Value};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
