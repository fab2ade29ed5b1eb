//! Value constraints declared under a field's `validation` list.
//!
//! Each list entry is a single-key map:
//!
//! ```yaml
//! validation:
//!   - min: 1
//!   - max: 100
//!   - max_length: 64
//!   - enum: [draft, published, 3]
//!   - not_empty: true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, SchemaError};
use crate::types::Value;

/// A single declarative check applied after the type check passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConstraintDef", into = "ConstraintDef")]
pub enum Constraint {
    /// Numeric lower bound (inclusive).
    Min(f64),
    /// Numeric upper bound (inclusive).
    Max(f64),
    /// Maximum character count of a string, or item count of an array.
    MaxLength(usize),
    /// Allowed values. Compared by string form, so `"3"` matches `3`.
    Enum(Vec<Value>),
    /// Rejects empty strings, arrays and maps.
    NotEmpty,
}

impl Constraint {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::MaxLength(_) => "max_length",
            Self::Enum(_) => "enum",
            Self::NotEmpty => "not_empty",
        }
    }

    /// Applies the constraint to an already type-checked value.
    ///
    /// # Errors
    ///
    /// Returns the violated rule as a [`FieldError`].
    pub fn check(&self, value: &Value) -> Result<(), FieldError> {
        match self {
            Self::Min(min) => {
                let actual = self.numeric(value)?;
                if actual < *min {
                    return Err(FieldError::BelowMin { min: *min, actual });
                }
            }
            Self::Max(max) => {
                let actual = self.numeric(value)?;
                if actual > *max {
                    return Err(FieldError::AboveMax { max: *max, actual });
                }
            }
            Self::MaxLength(max) => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    other => return Err(self.not_applicable(other)),
                };
                if len > *max {
                    return Err(FieldError::TooLong { max: *max, len });
                }
            }
            Self::Enum(allowed) => {
                let needle = value.to_string();
                if !allowed.iter().any(|a| a.to_string() == needle) {
                    return Err(FieldError::NotInEnum { value: needle });
                }
            }
            Self::NotEmpty => {
                let empty = match value {
                    Value::String(s) => s.trim().is_empty(),
                    Value::Array(items) => items.is_empty(),
                    Value::Map(map) => map.is_empty(),
                    other => return Err(self.not_applicable(other)),
                };
                if empty {
                    return Err(FieldError::Empty);
                }
            }
        }
        Ok(())
    }

    fn numeric(&self, value: &Value) -> Result<f64, FieldError> {
        value.as_f64().ok_or_else(|| self.not_applicable(value))
    }

    fn not_applicable(&self, value: &Value) -> FieldError {
        FieldError::NotApplicable {
            constraint: self.name(),
            actual: value.kind(),
        }
    }
}

/// Wire form of a constraint: exactly one key set.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConstraintDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<usize>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    one_of: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    not_empty: Option<bool>,
}

impl TryFrom<ConstraintDef> for Constraint {
    type Error = SchemaError;

    fn try_from(def: ConstraintDef) -> Result<Self, Self::Error> {
        let mut found = Vec::with_capacity(1);
        if let Some(min) = def.min {
            found.push(Self::Min(min));
        }
        if let Some(max) = def.max {
            found.push(Self::Max(max));
        }
        if let Some(len) = def.max_length {
            found.push(Self::MaxLength(len));
        }
        if let Some(values) = def.one_of {
            if values.is_empty() {
                return Err(SchemaError::InvalidConstraint {
                    reason: "enum must list at least one value".to_string(),
                });
            }
            found.push(Self::Enum(values));
        }
        match def.not_empty {
            Some(true) => found.push(Self::NotEmpty),
            Some(false) => {
                return Err(SchemaError::InvalidConstraint {
                    reason: "not_empty only accepts true".to_string(),
                })
            }
            None => {}
        }

        if found.len() != 1 {
            return Err(SchemaError::InvalidConstraint {
                reason: format!("expected exactly one rule per entry, got {}", found.len()),
            });
        }
        Ok(found.remove(0))
    }
}

impl From<Constraint> for ConstraintDef {
    fn from(c: Constraint) -> Self {
        let mut def = Self::default();
        match c {
            Constraint::Min(v) => def.min = Some(v),
            Constraint::Max(v) => def.max = Some(v),
            Constraint::MaxLength(v) => def.max_length = Some(v),
            Constraint::Enum(v) => def.one_of = Some(v),
            Constraint::NotEmpty => def.not_empty = Some(true),
        }
        def
    }
}
