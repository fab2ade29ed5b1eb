//! Rendered SQL fragments with positional arguments.
//!
//! Fragments use `?` placeholders. Backends that need numbered placeholders
//! convert with [`Statement::to_postgres`].

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// A rendered WHERE fragment (without the `WHERE` keyword) and its arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlClause {
    pub sql: String,
    pub args: Vec<Value>,
}

impl SqlClause {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// A complete statement ready to hand to a storage driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// Rewrites `?` placeholders as `$1, $2, ...`.
    ///
    /// Question marks inside single-quoted literals are left alone; `??`
    /// escapes a literal question mark.
    #[must_use]
    pub fn to_postgres(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + 8);
        let mut n = 0;
        let mut in_literal = false;
        let mut chars = self.sql.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                '?' if !in_literal => {
                    if chars.peek() == Some(&'?') {
                        chars.next();
                        out.push('?');
                    } else {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    }
                }
                _ => out.push(c),
            }
        }
        out
    }
}
