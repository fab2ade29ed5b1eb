//! Operation definitions: the declarative description of one write.
//!
//! An [`Operation`] is loaded from YAML, checked once with
//! [`Operation::validate`], and then used for two things at runtime:
//! decoding raw queue messages into typed [`Message`]s and rendering the
//! SQL statement each message turns into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::field::{Field, FieldType};
use super::request::RequestConfig;
use crate::error::{FieldError, SchemaError, ValidationError};
use crate::message::{Message, RawMessage};
use crate::sql::{SqlClause, Statement};
use crate::types::{OperationType, Value};

/// Name of the correlation field every operation must declare.
pub const REQUEST_ID_FIELD: &str = "request_id";

/// Name of the discriminator key carried by every inbound message.
pub const OPERATION_KEY: &str = "operation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OperationType,
    /// Name of the storage driver the write goes to.
    pub storage: String,
    pub table: String,
    pub fields: BTreeMap<String, Field>,
    #[serde(default)]
    pub where_conditions: BTreeMap<String, Field>,
    /// Conflict-target columns. A `create` with constraints skips rows that
    /// already exist, which makes redelivered messages harmless.
    #[serde(default)]
    pub constraints: Vec<String>,
    pub request: RequestConfig,
}

impl Operation {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: OperationType,
        storage: impl Into<String>,
        table: impl Into<String>,
        request: RequestConfig,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            storage: storage.into(),
            table: table.into(),
            fields: BTreeMap::new(),
            where_conditions: BTreeMap::new(),
            constraints: Vec::new(),
            request,
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    #[must_use]
    pub fn with_where(mut self, name: impl Into<String>, field: Field) -> Self {
        self.where_conditions.insert(name.into(), field);
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, column: impl Into<String>) -> Self {
        self.constraints.push(column.into());
        self
    }

    /// Checks the structural invariants of the definition.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] naming the operation and the violated rule:
    /// `request_id` must be a required `uuid` field, every where condition
    /// and constraint column must be a declared field, `update`/`delete` need
    /// at least one where condition, defaults must satisfy their field, the
    /// request config must be well formed, and a `create`/`update` must
    /// declare its own type as the message operation value.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let op = || self.name.clone();

        for (attr, value) in [("name", &self.name), ("storage", &self.storage), ("table", &self.table)] {
            if value.trim().is_empty() {
                return Err(SchemaError::EmptyAttribute {
                    operation: op(),
                    field: attr,
                });
            }
        }

        let idents = std::iter::once(&self.table)
            .chain(self.fields.keys())
            .chain(self.where_conditions.keys())
            .chain(self.constraints.iter());
        for ident in idents {
            if !is_identifier(ident) {
                return Err(SchemaError::InvalidIdentifier {
                    operation: op(),
                    ident: ident.clone(),
                });
            }
        }

        match self.fields.get(REQUEST_ID_FIELD) {
            None => return Err(SchemaError::MissingRequestId { operation: op() }),
            Some(f) if f.field_type != FieldType::Uuid || !f.required => {
                return Err(SchemaError::InvalidRequestId { operation: op() })
            }
            Some(_) => {}
        }

        if let Some(field) = self
            .where_conditions
            .keys()
            .find(|k| !self.fields.contains_key(*k))
        {
            return Err(SchemaError::DanglingWhereCondition {
                operation: op(),
                field: field.clone(),
            });
        }

        if let Some(column) = self
            .constraints
            .iter()
            .find(|c| !self.fields.contains_key(*c))
        {
            return Err(SchemaError::DanglingConstraint {
                operation: op(),
                column: column.clone(),
            });
        }

        if self.kind != OperationType::Create && self.where_conditions.is_empty() {
            return Err(SchemaError::UnboundedWrite {
                operation: op(),
                kind: self.kind.to_string(),
            });
        }

        for (name, field) in self.fields.iter().chain(self.where_conditions.iter()) {
            if let Some(default) = &field.default {
                field
                    .validate(Some(default))
                    .map_err(|source| SchemaError::InvalidDefault {
                        operation: op(),
                        field: name.clone(),
                        source,
                    })?;
            }
        }

        self.request
            .validate()
            .map_err(|reason| SchemaError::InvalidRequest {
                operation: op(),
                reason,
            })?;

        // Inbound messages can only say create or update; a delete is
        // triggered by whichever of the two its shape declares.
        if let Some(declared) = self.request.operation_value() {
            if self.kind != OperationType::Delete && declared != self.kind {
                return Err(SchemaError::OperationValueMismatch {
                    operation: op(),
                    kind: self.kind.to_string(),
                    declared: declared.to_string(),
                });
            }
        }
        Ok(())
    }

    /// `operation` value inbound messages must carry: the one declared in
    /// the request shape, else the operation type.
    #[must_use]
    pub fn wire_operation(&self) -> OperationType {
        self.request.operation_value().unwrap_or(self.kind)
    }

    /// Renders `col = ?` for every where condition present in `conditions`,
    /// joined with `AND`, in column-name order.
    ///
    /// Absent optional conditions are skipped. An operation without where
    /// conditions yields an empty clause for any input.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingCondition`] for the first required
    /// condition absent from `conditions`.
    pub fn build_where_clause(
        &self,
        conditions: &BTreeMap<String, Value>,
    ) -> Result<SqlClause, ValidationError> {
        let mut parts = Vec::with_capacity(self.where_conditions.len());
        let mut args = Vec::with_capacity(self.where_conditions.len());

        for (name, field) in &self.where_conditions {
            match field.resolve(conditions.get(name)) {
                Some(value) => {
                    parts.push(format!("{name} = ?"));
                    args.push(value);
                }
                None if field.required => {
                    return Err(ValidationError::MissingCondition {
                        field: name.clone(),
                    })
                }
                None => {}
            }
        }

        Ok(SqlClause {
            sql: parts.join(" AND "),
            args,
        })
    }

    /// Validates a raw message and resolves it into a typed [`Message`].
    ///
    /// The message must carry an `operation` key equal to
    /// [`wire_operation`](Self::wire_operation). Keys that are not declared
    /// fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first field that fails validation.
    pub fn decode(&self, raw: &RawMessage) -> Result<Message, ValidationError> {
        let expected = self.wire_operation();
        match raw.get(OPERATION_KEY) {
            None | Some(Value::Null) => {
                return Err(ValidationError::field(OPERATION_KEY, FieldError::Required))
            }
            Some(Value::String(s)) if s == expected.as_str() => {}
            Some(Value::String(s)) => {
                return Err(ValidationError::OperationMismatch {
                    expected: expected.to_string(),
                    actual: s.clone(),
                })
            }
            Some(other) => {
                return Err(ValidationError::field(
                    OPERATION_KEY,
                    FieldError::TypeMismatch {
                        expected: FieldType::String,
                        actual: other.kind(),
                    },
                ))
            }
        }

        let mut fields = BTreeMap::new();
        for (name, field) in &self.fields {
            let supplied = raw.get(name);
            field
                .validate(supplied)
                .map_err(|e| ValidationError::field(name, e))?;
            if let Some(value) = field.resolve(supplied) {
                fields.insert(name.clone(), value);
            }
        }

        let request_id = fields
            .get(REQUEST_ID_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| ValidationError::field(REQUEST_ID_FIELD, FieldError::Required))?;

        Ok(Message {
            operation: self.name.clone(),
            kind: self.kind,
            request_id,
            fields,
        })
    }

    /// Renders the data write for a decoded message.
    ///
    /// `request_id` is a ledger concern and is never written to the data
    /// table. For `update`, where-condition columns are not part of `SET`.
    ///
    /// # Errors
    ///
    /// Fails if a required where condition is missing, if an `update` has no
    /// columns to set, or if an `update`/`delete` would render without a
    /// WHERE clause.
    pub fn statement(&self, message: &Message) -> Result<Statement, ValidationError> {
        let data = message
            .fields
            .iter()
            .filter(|(name, _)| name.as_str() != REQUEST_ID_FIELD);

        match self.kind {
            OperationType::Create => {
                let (cols, args): (Vec<&String>, Vec<Value>) =
                    data.map(|(k, v)| (k, v.clone())).unzip();
                let cols: Vec<&str> = cols.into_iter().map(String::as_str).collect();
                let placeholders = vec!["?"; cols.len()].join(", ");
                let mut sql = format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders})",
                    self.table,
                    cols.join(", ")
                );
                if !self.constraints.is_empty() {
                    sql.push_str(&format!(
                        " ON CONFLICT ({}) DO NOTHING",
                        self.constraints.join(", ")
                    ));
                }
                Ok(Statement::new(sql, args))
            }
            OperationType::Update => {
                let clause = self.bounded_where(message)?;
                let (sets, mut args): (Vec<String>, Vec<Value>) = data
                    .filter(|(name, _)| !self.where_conditions.contains_key(*name))
                    .map(|(k, v)| (format!("{k} = ?"), v.clone()))
                    .unzip();
                if sets.is_empty() {
                    return Err(ValidationError::EmptyUpdate);
                }
                args.extend(clause.args);
                Ok(Statement::new(
                    format!("UPDATE {} SET {} WHERE {}", self.table, sets.join(", "), clause.sql),
                    args,
                ))
            }
            OperationType::Delete => {
                let clause = self.bounded_where(message)?;
                Ok(Statement::new(
                    format!("DELETE FROM {} WHERE {}", self.table, clause.sql),
                    clause.args,
                ))
            }
        }
    }

    fn bounded_where(&self, message: &Message) -> Result<SqlClause, ValidationError> {
        let clause = self.build_where_clause(&message.fields)?;
        if clause.is_empty() {
            return Err(ValidationError::UnboundedWrite {
                kind: self.kind.to_string(),
            });
        }
        Ok(clause)
    }

    /// Queue this operation consumes from, if its transport is queue based.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        self.request.queue()
    }
}

/// Accepts `name` and `schema.name` style identifiers.
fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::request::{MessageShape, OperationShape, RabbitMqRequest, Transport};

    const NOTE_ID: &str = "123e4567-e89b-12d3-a456-426614174000";
    const REQ_ID: &str = "9b2f6a1e-3c4d-4e5f-8a9b-0c1d2e3f4a5b";

    fn request(value: OperationType) -> RequestConfig {
        RequestConfig {
            transport: Transport::Rabbitmq,
            rabbitmq: Some(RabbitMqRequest {
                queue: "notes".into(),
                routing_key: "notes".into(),
                message: MessageShape {
                    operation: OperationShape {
                        value_type: "string".into(),
                        required: true,
                        value,
                    },
                },
            }),
            http: None,
        }
    }

    fn request_id() -> Field {
        Field::new(FieldType::Uuid, true)
    }

    fn create_note() -> Operation {
        Operation::new("create_note", OperationType::Create, "main", "notes", request(OperationType::Create))
            .with_field(REQUEST_ID_FIELD, request_id())
            .with_field("note_id", Field::new(FieldType::Uuid, true))
            .with_field(
                "status",
                Field::new(FieldType::String, false).with_default(Value::from("draft")),
            )
    }

    fn update_note() -> Operation {
        Operation::new("update_note", OperationType::Update, "main", "notes", request(OperationType::Update))
            .with_field(REQUEST_ID_FIELD, request_id())
            .with_field("note_id", Field::new(FieldType::Uuid, true))
            .with_field("title", Field::new(FieldType::String, true))
            .with_where("note_id", Field::new(FieldType::Uuid, true))
    }

    fn raw(pairs: &[(&str, Value)]) -> RawMessage {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn valid_operation_passes() {
        assert!(create_note().validate().is_ok());
        assert!(update_note().validate().is_ok());
    }

    #[test]
    fn missing_request_id_is_rejected() {
        let mut op = create_note();
        op.fields.remove(REQUEST_ID_FIELD);
        let err = op.validate().unwrap_err();
        assert!(matches!(err, SchemaError::MissingRequestId { .. }));
        assert!(err.to_string().contains("create_note"));
    }

    #[test]
    fn request_id_must_be_required_uuid() {
        let op = create_note().with_field(REQUEST_ID_FIELD, Field::new(FieldType::Uuid, false));
        assert!(matches!(op.validate(), Err(SchemaError::InvalidRequestId { .. })));

        let op = create_note().with_field(REQUEST_ID_FIELD, Field::new(FieldType::String, true));
        assert!(matches!(op.validate(), Err(SchemaError::InvalidRequestId { .. })));
    }

    #[test]
    fn where_condition_must_be_declared_field() {
        let op = update_note().with_where("owner_id", Field::new(FieldType::Uuid, false));
        let err = op.validate().unwrap_err();
        assert!(matches!(
            err,
            SchemaError::DanglingWhereCondition { ref field, .. } if field == "owner_id"
        ));
    }

    #[test]
    fn constraint_column_must_be_declared_field() {
        let op = create_note().with_constraint("slug");
        assert!(matches!(op.validate(), Err(SchemaError::DanglingConstraint { .. })));
    }

    #[test]
    fn update_without_where_is_rejected() {
        let mut op = update_note();
        op.where_conditions.clear();
        assert!(matches!(op.validate(), Err(SchemaError::UnboundedWrite { .. })));
    }

    #[test]
    fn invalid_default_is_rejected() {
        let op = create_note().with_field(
            "pages",
            Field::new(FieldType::Int, false).with_default(Value::from("many")),
        );
        assert!(matches!(op.validate(), Err(SchemaError::InvalidDefault { .. })));
    }

    #[test]
    fn table_must_be_identifier() {
        let mut op = create_note();
        op.table = "notes; DROP TABLE x".into();
        assert!(matches!(op.validate(), Err(SchemaError::InvalidIdentifier { .. })));

        op.table = "app.notes".into();
        assert!(op.validate().is_ok());
    }

    #[test]
    fn empty_where_conditions_yield_empty_clause() {
        let op = create_note();
        let anything = BTreeMap::from([("note_id".to_string(), Value::from(NOTE_ID))]);
        assert_eq!(op.build_where_clause(&anything).unwrap(), SqlClause::default());
        assert_eq!(op.build_where_clause(&BTreeMap::new()).unwrap(), SqlClause::default());
    }

    #[test]
    fn where_clause_for_single_uuid_condition() {
        let op = update_note();
        let conditions = BTreeMap::from([("note_id".to_string(), Value::from(NOTE_ID))]);
        let clause = op.build_where_clause(&conditions).unwrap();
        assert_eq!(clause.sql, "note_id = ?");
        assert_eq!(clause.args, vec![Value::from(NOTE_ID)]);
    }

    #[test]
    fn where_clause_skips_absent_optional_and_fails_on_missing_required() {
        let op = update_note()
            .with_field("owner_id", Field::new(FieldType::Uuid, false))
            .with_where("owner_id", Field::new(FieldType::Uuid, false));

        let conditions = BTreeMap::from([("note_id".to_string(), Value::from(NOTE_ID))]);
        assert_eq!(op.build_where_clause(&conditions).unwrap().sql, "note_id = ?");

        let conditions = BTreeMap::from([
            ("note_id".to_string(), Value::from(NOTE_ID)),
            ("owner_id".to_string(), Value::from(REQ_ID)),
        ]);
        let clause = op.build_where_clause(&conditions).unwrap();
        assert_eq!(clause.sql, "note_id = ? AND owner_id = ?");
        assert_eq!(clause.args.len(), 2);

        let err = op.build_where_clause(&BTreeMap::new()).unwrap_err();
        assert_eq!(err, ValidationError::MissingCondition { field: "note_id".into() });
    }

    #[test]
    fn decode_resolves_defaults_and_drops_unknown_keys() {
        let msg = create_note()
            .decode(&raw(&[
                (OPERATION_KEY, Value::from("create")),
                (REQUEST_ID_FIELD, Value::from(REQ_ID)),
                ("note_id", Value::from(NOTE_ID)),
                ("junk", Value::Int(1)),
            ]))
            .unwrap();
        assert_eq!(msg.request_id, Uuid::parse_str(REQ_ID).unwrap());
        assert_eq!(msg.get("status"), Some(&Value::from("draft")));
        assert!(msg.get("junk").is_none());
        assert_eq!(msg.operation, "create_note");
    }

    #[test]
    fn decode_rejects_missing_required_field() {
        let err = create_note()
            .decode(&raw(&[
                (OPERATION_KEY, Value::from("create")),
                (REQUEST_ID_FIELD, Value::from(REQ_ID)),
            ]))
            .unwrap_err();
        assert_eq!(err, ValidationError::field("note_id", FieldError::Required));
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn decode_checks_operation_discriminator() {
        let base = [
            (REQUEST_ID_FIELD, Value::from(REQ_ID)),
            ("note_id", Value::from(NOTE_ID)),
        ];
        let err = create_note().decode(&raw(&base)).unwrap_err();
        assert_eq!(err, ValidationError::field(OPERATION_KEY, FieldError::Required));

        let mut wrong = base.to_vec();
        wrong.push((OPERATION_KEY, Value::from("update")));
        let err = create_note().decode(&raw(&wrong)).unwrap_err();
        assert!(matches!(err, ValidationError::OperationMismatch { .. }));
    }

    #[test]
    fn create_statement_excludes_request_id() {
        let op = create_note().with_constraint("note_id");
        let msg = op
            .decode(&raw(&[
                (OPERATION_KEY, Value::from("create")),
                (REQUEST_ID_FIELD, Value::from(REQ_ID)),
                ("note_id", Value::from(NOTE_ID)),
            ]))
            .unwrap();
        let stmt = op.statement(&msg).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO notes (note_id, status) VALUES (?, ?) ON CONFLICT (note_id) DO NOTHING"
        );
        assert_eq!(stmt.args, vec![Value::from(NOTE_ID), Value::from("draft")]);
    }

    #[test]
    fn update_statement_sets_non_key_columns() {
        let op = update_note();
        let msg = op
            .decode(&raw(&[
                (OPERATION_KEY, Value::from("update")),
                (REQUEST_ID_FIELD, Value::from(REQ_ID)),
                ("note_id", Value::from(NOTE_ID)),
                ("title", Value::from("Groceries")),
            ]))
            .unwrap();
        let stmt = op.statement(&msg).unwrap();
        assert_eq!(stmt.sql, "UPDATE notes SET title = ? WHERE note_id = ?");
        assert_eq!(stmt.args, vec![Value::from("Groceries"), Value::from(NOTE_ID)]);
        assert_eq!(stmt.to_postgres(), "UPDATE notes SET title = $1 WHERE note_id = $2");
    }

    #[test]
    fn message_operation_value_must_match_type() {
        let mut op = update_note();
        op.request = request(OperationType::Create);
        let err = op.validate().unwrap_err();
        assert!(matches!(err, SchemaError::OperationValueMismatch { .. }));
        assert!(err.to_string().contains("update operation declares message operation value create"));
    }

    #[test]
    fn delete_decodes_against_declared_message_operation() {
        let mut op = update_note();
        op.kind = OperationType::Delete;
        op.fields.remove("title");
        op.validate().unwrap();
        assert_eq!(op.wire_operation(), OperationType::Update);

        let base = [
            (REQUEST_ID_FIELD, Value::from(REQ_ID)),
            ("note_id", Value::from(NOTE_ID)),
        ];
        let mut update = base.to_vec();
        update.push((OPERATION_KEY, Value::from("update")));
        let msg = op.decode(&raw(&update)).unwrap();
        assert_eq!(msg.kind, OperationType::Delete);

        let mut delete = base.to_vec();
        delete.push((OPERATION_KEY, Value::from("delete")));
        assert!(matches!(
            op.decode(&raw(&delete)),
            Err(ValidationError::OperationMismatch { .. })
        ));
    }

    #[test]
    fn delete_statement_uses_where_clause() {
        let mut op = update_note();
        op.kind = OperationType::Delete;
        op.fields.remove("title");
        let msg = Message {
            operation: op.name.clone(),
            kind: OperationType::Delete,
            request_id: Uuid::nil(),
            fields: BTreeMap::from([("note_id".to_string(), Value::from(NOTE_ID))]),
        };
        let stmt = op.statement(&msg).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM notes WHERE note_id = ?");
    }
}
