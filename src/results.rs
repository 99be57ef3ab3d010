//! Identifier sets produced by executing cohort SQL.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One patient identifier as returned by the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Text(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(i) => write!(f, "{}", i),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

impl Identifier {
    /// Identifier from a JSON cell as returned by the worker; `None` for NULL.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Identifier::Int(i),
                None => Identifier::Text(n.to_string()),
            }),
            serde_json::Value::String(s) => Some(Identifier::Text(s.clone())),
            other => Some(Identifier::Text(other.to_string())),
        }
    }
}

impl From<i64> for Identifier {
    fn from(i: i64) -> Self {
        Identifier::Int(i)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::Text(s.to_string())
    }
}

pub type IdentifierSet = BTreeSet<Identifier>;

/// Name and SQL type of the column a cohort's identifiers come from.
///
/// Stored alongside cached results; the cache has no other way to know how
/// the column was typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierColumn {
    pub name: String,
    pub data_type: String,
}

impl IdentifierColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}
