//! Read-only metadata consumed by the query builders and the compiler.
//!
//! Everything here is authored elsewhere and loaded as-is: the builders never
//! write back into these types.
//!
//! ```text
//! CohortConfiguration
//! ├── catalogue (tables + joins)
//! ├── parameters (global)
//! ├── joinables: [Joinable { aggregate }]          -- patient index tables
//! └── root: CohortContainer (UNION | INTERSECT | EXCEPT)
//!           ├── AggregateConfiguration
//!           │     ├── dimensions, count/having, axis, pivot, top x
//!           │     ├── root_filter: FilterContainer (AND | OR)
//!           │     └── join_to: Option<JoinableUse>
//!           └── CohortContainer ...
//! ```

pub mod aggregate;
pub mod cohort;
pub mod filter;
pub mod parameter;
pub mod table;

pub use aggregate::{
    AggregateConfiguration, AggregateDimension, AggregateId, AxisIncrement, AxisSpec,
    DimensionId, SortDirection, TopX,
};
pub use cohort::{
    CohortConfiguration, CohortContainer, CohortNode, ContainerId, JoinDirection, Joinable,
    JoinableId, JoinableUse, NodeKey, SetOperation,
};
pub use filter::{Filter, FilterContainer, FilterOperation};
pub use parameter::{ParameterLevel, SqlParameter};
pub use table::{Catalogue, ColumnKey, JoinInfo, JoinKind, TableId, TableInfo};

use std::path::PathBuf;

/// Errors raised while loading configurations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;
