//! SQL text generation.
//!
//! - [`fragment`] - SQL text with structured parameter placeholders
//! - [`line`] - Tagged lines an aggregate query is assembled from
//! - [`dialect`] - Per-engine syntax, including aggregate rendering

pub mod dialect;
pub mod fragment;
pub mod line;
pub mod test_utils;

pub use dialect::{Dialect, SqlDialect};
pub use fragment::{FragmentPart, Placeholder, RenameMap, ScopeId, SqlFragment};
pub use line::{LineRole, QueryComponent, QueryLine};
