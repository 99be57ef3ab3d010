//! WHERE filters and the AND/OR containers that combine them.

use serde::{Deserialize, Serialize};

use super::SqlParameter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: u32,
    pub name: String,
    pub where_sql: String,
    #[serde(default)]
    pub parameters: Vec<SqlParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Filter {
    pub fn new(id: u32, name: impl Into<String>, where_sql: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            where_sql: where_sql.into(),
            parameters: Vec::new(),
            description: None,
        }
    }

    pub fn with_parameter(mut self, parameter: SqlParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOperation {
    #[default]
    And,
    Or,
}

impl FilterOperation {
    pub fn keyword(&self) -> &'static str {
        match self {
            FilterOperation::And => "AND",
            FilterOperation::Or => "OR",
        }
    }
}

/// A node of the filter tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterContainer {
    #[serde(default)]
    pub operation: FilterOperation,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub subcontainers: Vec<FilterContainer>,
}

impl FilterContainer {
    pub fn and() -> Self {
        Self::default()
    }

    pub fn or() -> Self {
        Self {
            operation: FilterOperation::Or,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_subcontainer(mut self, container: FilterContainer) -> Self {
        self.subcontainers.push(container);
        self
    }

    /// True when no filter exists anywhere below this container.
    pub fn is_empty_recursive(&self) -> bool {
        self.filters.is_empty() && self.subcontainers.iter().all(|c| c.is_empty_recursive())
    }
}
