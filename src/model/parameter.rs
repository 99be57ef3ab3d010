//! SQL parameters and the scopes they are declared at.

use serde::{Deserialize, Serialize};

/// A typed SQL parameter.
///
/// Authored SQL refers to a parameter as `@name`; the name is stored without
/// the marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    /// SQL type used in declarations, e.g. `varchar(10)` or `date`.
    pub data_type: String,
    /// Value as a SQL literal, e.g. `'T'` or `2001-01-01` quoted as authored.
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl SqlParameter {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            name: name.trim_start_matches('@').to_string(),
            data_type: data_type.into(),
            value: value.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Same declared type and value, regardless of name or comment.
    pub fn is_equivalent(&self, other: &SqlParameter) -> bool {
        self.data_type.trim().eq_ignore_ascii_case(other.data_type.trim())
            && self.value.trim() == other.value.trim()
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Scope a parameter was declared at, lowest precedence first.
///
/// When two scopes declare the same name the higher level wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterLevel {
    Filter,
    TableInfo,
    QueryLevel,
    CompositeQueryLevel,
    Global,
}
