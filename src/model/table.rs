//! Tables and the joins between them.

use serde::{Deserialize, Serialize};

use super::SqlParameter;
use crate::sql::Dialect;

pub type TableId = u32;

/// A table as it is referenced from SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    /// Fully qualified, already quoted name, e.g. `[biochem]..[Results]`.
    pub name: String,
    pub dialect: Dialect,
    /// The table that drives extraction for the dataset; at most one per query.
    #[serde(default)]
    pub is_primary_extraction_table: bool,
    #[serde(default)]
    pub parameters: Vec<SqlParameter>,
}

impl TableInfo {
    pub fn new(id: TableId, name: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            id,
            name: name.into(),
            dialect,
            is_primary_extraction_table: false,
            parameters: Vec::new(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary_extraction_table = true;
        self
    }

    pub fn with_parameter(mut self, parameter: SqlParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// A column in a specific table, by its select SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnKey {
    pub table_id: TableId,
    pub column: String,
}

impl ColumnKey {
    pub fn new(table_id: TableId, column: impl Into<String>) -> Self {
        Self {
            table_id,
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }

    /// The same join seen from the other table.
    pub fn flipped(&self) -> Self {
        match self {
            JoinKind::Inner => JoinKind::Inner,
            JoinKind::Left => JoinKind::Right,
            JoinKind::Right => JoinKind::Left,
        }
    }
}

/// How the foreign key table joins to the primary key table.
///
/// `join_type` reads left to right: `<foreign key table> <kind> <primary key table>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinInfo {
    pub foreign_key: ColumnKey,
    pub primary_key: ColumnKey,
    #[serde(default)]
    pub join_type: JoinKind,
}

/// Tables and joins known to a configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalogue {
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub joins: Vec<JoinInfo>,
}

impl Catalogue {
    pub fn table(&self, id: TableId) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.id == id)
    }
}
