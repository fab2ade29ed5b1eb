use std::fmt;

use serde::{Deserialize, Serialize};

use super::constraint::Constraint;
use crate::error::FieldError;
use crate::types::Value;

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Int64,
    Uuid,
    Bool,
}

type TypeCheck = fn(&Value) -> bool;

/// Type checks keyed by declared type.
const TYPE_CHECKS: &[(FieldType, TypeCheck)] = &[
    (FieldType::String, is_string),
    (FieldType::Int, is_integer),
    (FieldType::Int64, is_integer),
    (FieldType::Uuid, is_uuid),
    (FieldType::Bool, is_bool),
];

fn is_string(v: &Value) -> bool {
    matches!(v, Value::String(_))
}

fn is_integer(v: &Value) -> bool {
    v.as_i64().is_some()
}

fn is_uuid(v: &Value) -> bool {
    v.as_str().is_some_and(|s| uuid::Uuid::parse_str(s).is_ok())
}

fn is_bool(v: &Value) -> bool {
    matches!(v, Value::Bool(_))
}

impl FieldType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Int64 => "int64",
            Self::Uuid => "uuid",
            Self::Bool => "bool",
        }
    }

    /// Returns `true` if `value` has this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        TYPE_CHECKS
            .iter()
            .find(|(ty, _)| *ty == self)
            .is_some_and(|(_, check)| check(value))
    }

    /// Brings an accepted value into canonical form: integral floats become
    /// integers and UUIDs are lower-cased hyphenated strings.
    fn normalize(self, value: Value) -> Value {
        match self {
            Self::Int | Self::Int64 => value.as_i64().map_or(value, Value::Int),
            Self::Uuid => match value.as_str().map(uuid::Uuid::parse_str) {
                Some(Ok(id)) => Value::String(id.hyphenated().to_string()),
                _ => value,
            },
            Self::String | Self::Bool => value,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed, optionally constrained attribute of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<Constraint>,
}

impl Field {
    #[must_use]
    pub fn new(field_type: FieldType, required: bool) -> Self {
        Self {
            field_type,
            required,
            default: None,
            validation: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.validation.push(constraint);
        self
    }

    /// Validates a supplied value. `None` and `Value::Null` both mean absent.
    ///
    /// Order: required check, absent short-circuit, type check, then each
    /// constraint in declaration order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first rule the value violates.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), FieldError> {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ if self.required => return Err(FieldError::Required),
            _ => return Ok(()),
        };

        if !self.field_type.accepts(value) {
            return Err(FieldError::TypeMismatch {
                expected: self.field_type,
                actual: value.kind(),
            });
        }

        self.validation.iter().try_for_each(|c| c.check(value))
    }

    /// Returns the supplied value, or the declared default when absent.
    #[must_use]
    pub fn resolve(&self, value: Option<&Value>) -> Option<Value> {
        match value {
            Some(v) if !v.is_null() => Some(self.field_type.normalize(v.clone())),
            _ => self.default.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const NOTE_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

    #[test]
    fn required_field_rejects_absent_value() {
        let field = Field::new(FieldType::String, true);
        let err = field.validate(None).unwrap_err();
        assert!(err.to_string().contains("required"));
        assert_eq!(field.validate(Some(&Value::Null)), Err(FieldError::Required));
    }

    #[test]
    fn optional_absent_value_skips_type_and_constraints() {
        let field = Field::new(FieldType::Int, false).with_constraint(Constraint::Min(10.0));
        assert!(field.validate(None).is_ok());
    }

    #[test]
    fn int64_tolerates_integral_float() {
        let field = Field::new(FieldType::Int64, true);
        assert!(field.validate(Some(&Value::Float(12.0))).is_ok());
        assert!(matches!(
            field.validate(Some(&Value::Float(12.5))),
            Err(FieldError::TypeMismatch { expected: FieldType::Int64, actual: "float" })
        ));
    }

    #[test]
    fn uuid_requires_parseable_string() {
        let field = Field::new(FieldType::Uuid, true);
        assert!(field.validate(Some(&Value::from(NOTE_ID))).is_ok());
        assert!(field.validate(Some(&Value::from("not-a-uuid"))).is_err());
        assert!(field.validate(Some(&Value::Int(1))).is_err());
    }

    #[test]
    fn bool_rejects_string_true() {
        let field = Field::new(FieldType::Bool, true);
        assert!(field.validate(Some(&Value::Bool(true))).is_ok());
        assert!(field.validate(Some(&Value::from("true"))).is_err());
    }

    #[test]
    fn constraints_short_circuit_in_declaration_order() {
        let field = Field::new(FieldType::String, true)
            .with_constraint(Constraint::NotEmpty)
            .with_constraint(Constraint::MaxLength(1));
        assert_eq!(field.validate(Some(&Value::from(""))), Err(FieldError::Empty));
        assert_eq!(
            field.validate(Some(&Value::from("ab"))),
            Err(FieldError::TooLong { max: 1, len: 2 })
        );
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let field = Field::new(FieldType::String, false).with_default(Value::from("draft"));
        assert_eq!(field.resolve(None), Some(Value::from("draft")));
        assert_eq!(field.resolve(Some(&Value::from("x"))), Some(Value::from("x")));

        let bare = Field::new(FieldType::String, false);
        assert_eq!(bare.resolve(None), None);
    }

    #[test]
    fn resolve_normalizes_integral_float_and_uuid_case() {
        let int = Field::new(FieldType::Int, true);
        assert_eq!(int.resolve(Some(&Value::Float(3.0))), Some(Value::Int(3)));

        let id = Field::new(FieldType::Uuid, true);
        assert_eq!(
            id.resolve(Some(&Value::from(NOTE_ID.to_uppercase()))),
            Some(Value::from(NOTE_ID))
        );
    }

    #[test]
    fn field_parses_from_yaml() {
        let field: Field = serde_yaml::from_str(
            "type: int\nrequired: false\ndefault: 5\nvalidation:\n  - min: 1\n",
        )
        .unwrap();
        assert_eq!(field.field_type, FieldType::Int);
        assert_eq!(field.default, Some(Value::Int(5)));
        assert_eq!(field.validation, vec![Constraint::Min(1.0)]);
    }

    fn any_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::String),
            Just(FieldType::Int),
            Just(FieldType::Int64),
            Just(FieldType::Uuid),
            Just(FieldType::Bool),
        ]
    }

    proptest! {
        #[test]
        fn absent_value_fails_iff_required(ty in any_type(), required: bool) {
            let result = Field::new(ty, required).validate(None);
            prop_assert_eq!(result.is_err(), required);
        }

        #[test]
        fn any_i64_passes_int_check(n: i64) {
            prop_assert!(Field::new(FieldType::Int64, true).validate(Some(&Value::Int(n))).is_ok());
        }
    }
}
