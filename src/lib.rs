//! # Sieve
//!
//! Compiles cohort-identification query trees to multi-dialect SQL and runs
//! them concurrently.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Model (cohort trees, aggregates, filters)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [query: aggregate + cohort builders]
//! ┌─────────────────────────────────────────────────────────┐
//! │      SqlFragment lines + ParameterManager per node        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [sql::dialect]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Isolated SQL per node (declarations + body)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [compiler + executor / worker]
//! ┌─────────────────────────────────────────────────────────┐
//! │      Identifier sets per node, cached by isolated SQL    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod model;
pub mod query;
pub mod results;
pub mod sql;
pub mod worker;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compiler::{
        CacheHitPolicy, CohortCompiler, CompilationState, CompileError, CompilerOptions,
        QueryExecutor, SqliteExecutor,
    };
    pub use crate::model::{
        AggregateConfiguration, AggregateDimension, Catalogue, CohortConfiguration,
        CohortContainer, Filter, FilterContainer, NodeKey, SetOperation, SqlParameter, TableInfo,
    };
    pub use crate::query::{AggregateRequest, CohortQueryBuilder, QueryBuildingError};
    pub use crate::results::{Identifier, IdentifierSet};
    pub use crate::sql::{Dialect, SqlDialect};
}
