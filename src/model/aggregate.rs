//! Aggregate configurations: the unit of compilation.

use serde::{Deserialize, Serialize};

use super::{FilterContainer, JoinableUse, SqlParameter, TableId};

pub type AggregateId = u32;
pub type DimensionId = u32;

/// Bucket size of a date axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisIncrement {
    Day,
    Month,
    Quarter,
    Year,
}

/// A continuous date axis; every bucket between the two dates appears in the
/// output, with or without data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSpec {
    /// Inclusive, `YYYY-MM-DD`.
    pub start_date: String,
    /// Inclusive, `YYYY-MM-DD`.
    pub end_date: String,
    pub increment: AxisIncrement,
}

impl AxisSpec {
    pub fn new(
        start_date: impl Into<String>,
        end_date: impl Into<String>,
        increment: AxisIncrement,
    ) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
            increment,
        }
    }
}

/// A column of an aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDimension {
    pub id: DimensionId,
    pub table_id: TableId,
    pub select_sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub is_extraction_identifier: bool,
    #[serde(default)]
    pub hash_on_data_release: bool,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<AxisSpec>,
}

fn default_data_type() -> String {
    "varchar(max)".to_string()
}

impl AggregateDimension {
    pub fn new(id: DimensionId, table_id: TableId, select_sql: impl Into<String>) -> Self {
        Self {
            id,
            table_id,
            select_sql: select_sql.into(),
            alias: None,
            order: 0,
            is_extraction_identifier: false,
            hash_on_data_release: false,
            data_type: default_data_type(),
            axis: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }

    pub fn identifier(mut self) -> Self {
        self.is_extraction_identifier = true;
        self
    }

    pub fn hashed(mut self) -> Self {
        self.hash_on_data_release = true;
        self
    }

    pub fn with_axis(mut self, axis: AxisSpec) -> Self {
        self.axis = Some(axis);
        self
    }

    /// Name of the column in a result set: the alias, or the last part of the
    /// select SQL with its quoting removed.
    pub fn runtime_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        let last = self
            .select_sql
            .rsplit('.')
            .next()
            .unwrap_or(&self.select_sql);
        last.trim()
            .trim_matches(|c| matches!(c, '[' | ']' | '"' | '`'))
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// Keep only the first `top_x` rows, ordered by a dimension or by the count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopX {
    pub top_x: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by_dimension: Option<DimensionId>,
    #[serde(default)]
    pub direction: SortDirection,
}

impl TopX {
    pub fn by_count(top_x: u32, direction: SortDirection) -> Self {
        Self {
            top_x,
            order_by_dimension: None,
            direction,
        }
    }
}

/// A grouped dataset query, either a standalone graph or a cohort set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfiguration {
    pub id: AggregateId,
    pub name: String,
    /// Position among the siblings of a cohort container.
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub dimensions: Vec<AggregateDimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_dimension: Option<DimensionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_filter: Option<FilterContainer>,
    #[serde(default)]
    pub parameters: Vec<SqlParameter>,
    #[serde(default)]
    pub forced_joins: Vec<TableId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_x: Option<TopX>,
    /// Cohort sets select only their identifier; a count is used by HAVING alone.
    #[serde(default)]
    pub is_cohort_identification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_to: Option<JoinableUse>,
}

impl AggregateConfiguration {
    pub fn new(id: AggregateId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            order: 0,
            dimensions: Vec::new(),
            count_sql: None,
            having_sql: None,
            pivot_dimension: None,
            root_filter: None,
            parameters: Vec::new(),
            forced_joins: Vec::new(),
            top_x: None,
            is_cohort_identification: false,
            join_to: None,
        }
    }

    pub fn with_dimension(mut self, dimension: AggregateDimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn with_count(mut self, count_sql: impl Into<String>) -> Self {
        self.count_sql = Some(count_sql.into());
        self
    }

    pub fn with_having(mut self, having_sql: impl Into<String>) -> Self {
        self.having_sql = Some(having_sql.into());
        self
    }

    pub fn with_filter(mut self, root: FilterContainer) -> Self {
        self.root_filter = Some(root);
        self
    }

    pub fn with_parameter(mut self, parameter: SqlParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn cohort_set(mut self) -> Self {
        self.is_cohort_identification = true;
        self
    }

    pub fn joined_to(mut self, use_: JoinableUse) -> Self {
        self.join_to = Some(use_);
        self
    }

    pub fn dimension(&self, id: DimensionId) -> Option<&AggregateDimension> {
        self.dimensions.iter().find(|d| d.id == id)
    }

    pub fn extraction_identifiers(&self) -> impl Iterator<Item = &AggregateDimension> {
        self.dimensions.iter().filter(|d| d.is_extraction_identifier)
    }
}
