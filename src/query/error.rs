//! Configuration errors raised while generating SQL.

use crate::model::TableId;

/// Why an aggregate cannot be used as a cohort set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierProblem {
    TooFew,
    TooMany,
    /// A cohort set selects its identifier and nothing else.
    TooManyDimensions,
}

impl std::fmt::Display for IdentifierProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierProblem::TooFew => write!(f, "no extraction identifier column"),
            IdentifierProblem::TooMany => write!(f, "more than one extraction identifier column"),
            IdentifierProblem::TooManyDimensions => {
                write!(f, "only the extraction identifier may be selected")
            }
        }
    }
}

/// A configuration that cannot be turned into SQL.
///
/// Every variant names the aggregate (and column or table) at fault so it
/// can be shown to the user as-is.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryBuildingError {
    #[error("aggregate '{aggregate}' has an axis and needs exactly 2 columns (axis and count), found {found}: {columns:?}")]
    AxisColumnCount {
        aggregate: String,
        found: usize,
        columns: Vec<String>,
    },

    #[error("aggregate '{aggregate}' has an axis and a pivot and needs exactly 3 columns, found {found}: {columns:?}")]
    PivotColumnCount {
        aggregate: String,
        found: usize,
        columns: Vec<String>,
    },

    #[error("aggregate '{aggregate}' has more than one axis: '{first}' and '{second}'")]
    MultipleAxes {
        aggregate: String,
        first: String,
        second: String,
    },

    #[error("aggregate '{aggregate}': column '{column}' cannot be both the axis and the pivot")]
    AxisIsPivot { aggregate: String, column: String },

    #[error("aggregate '{aggregate}' has a pivot but no axis")]
    PivotRequiresAxis { aggregate: String },

    #[error("aggregate '{aggregate}': pivot dimension {dimension} is not one of its columns")]
    PivotNotFound { aggregate: String, dimension: u32 },

    #[error("aggregate '{aggregate}': pivot column '{column}' is excluded from GROUP BY")]
    PivotOnSkippedColumn { aggregate: String, column: String },

    #[error("aggregate '{aggregate}': column '{column}' is hashed on data release and cannot be aggregated")]
    HashOnDataRelease { aggregate: String, column: String },

    #[error("aggregate '{aggregate}' references two primary extraction tables: '{first}' and '{second}'")]
    AmbiguousPrimaryTable {
        aggregate: String,
        first: String,
        second: String,
    },

    #[error("aggregate '{aggregate}' does not reference any table")]
    NoTables { aggregate: String },

    #[error("aggregate '{aggregate}' references unknown table {table}")]
    UnknownTable { aggregate: String, table: TableId },

    #[error("'{name}' mixes tables from different databases: {dialects:?}")]
    MixedDialects { name: String, dialects: Vec<String> },

    #[error("aggregate '{aggregate}': no join path from '{from}' to '{table}'")]
    UnjoinableTable {
        aggregate: String,
        from: String,
        table: String,
    },

    #[error("aggregate '{aggregate}' is not a valid cohort set: {reason}")]
    ExtractionIdentifier {
        aggregate: String,
        reason: IdentifierProblem,
    },

    #[error("patient index table '{aggregate}' has no extraction identifier to join on")]
    JoinableWithoutIdentifier { aggregate: String },

    #[error("parameter '@{name}' is declared twice with different definitions: '{first}' and '{second}'")]
    ParameterConflict {
        name: String,
        first: String,
        second: String,
    },

    #[error("container '{container}' has no children")]
    EmptyContainer { container: String },

    #[error("aggregate '{aggregate}' joins to unknown patient index table {joinable}")]
    UnknownJoinable { aggregate: String, joinable: u32 },

    #[error("'{node}' is not part of this configuration")]
    UnknownNode { node: String },

    #[error("pivot values must be supplied before a pivot aggregate can be rendered")]
    PivotValuesRequired,

    #[error("aggregate '{aggregate}' has a count or HAVING; its select list cannot be overridden")]
    OverrideSelectListWithCount { aggregate: String },

    #[error("aggregate '{aggregate}': top x orders by dimension {dimension} which is not one of its columns")]
    TopXOrderColumnMissing { aggregate: String, dimension: u32 },

    #[error("count '{count_sql}' is not an aggregate function call and cannot be pivoted")]
    UnpivotableCount { count_sql: String },
}

pub type QueryResult<T> = Result<T, QueryBuildingError>;
