//! Query builders.
//!
//! - [`parameters`] - Parameter Manager (scopes, collisions, renames)
//! - [`filters`] - Filter tree walker and WHERE rendering
//! - [`tables`] - Primary table resolution and join discovery
//! - [`aggregate`] - Aggregate Builder
//! - [`cohort`] - Cohort sets and set-operation containers

pub mod aggregate;
pub mod cohort;
mod error;
pub mod filters;
pub mod parameters;
pub mod tables;

pub use aggregate::{AggregateRequest, BuiltAggregate, QueryColumn};
pub use cohort::{CohortQueryArgs, CohortQueryBuilder, CohortQueryBuilderHelper, CohortSql, JoinArgs};
pub use error::{IdentifierProblem, QueryBuildingError, QueryResult};
pub use parameters::ParameterManager;
pub use tables::{resolve_tables, ResolvedTables};
