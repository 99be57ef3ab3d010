//! Filter tree walker.
//!
//! Flattens an AND/OR container tree into the filters it holds (for
//! parameter collection) and renders it as a WHERE clause:
//!
//! ```text
//! WHERE
//! (
//! /*Biochemistry only*/
//! t.code = @code
//! AND
//! (
//! /*Recent*/
//! t.dt > '2001-01-01'
//! OR
//! ...
//! )
//! )
//! ```

use crate::model::{Filter, FilterContainer};
use crate::sql::{ScopeId, SqlFragment};

/// Every filter below `container`: its own first, then each subcontainer
/// depth first.
pub fn all_filters_recursive(container: &FilterContainer) -> Vec<&Filter> {
    let mut out: Vec<&Filter> = container.filters.iter().collect();
    for sub in &container.subcontainers {
        out.extend(all_filters_recursive(sub));
    }
    out
}

/// The WHERE clause for a filter tree, or `None` when it holds no filters.
pub fn where_fragment(container: &FilterContainer, scope: ScopeId) -> Option<SqlFragment> {
    let body = container_body(container, scope)?;
    let mut out = SqlFragment::text("WHERE\n(\n");
    out.append(&body);
    out.push_str("\n)");
    Some(out)
}

fn container_body(container: &FilterContainer, scope: ScopeId) -> Option<SqlFragment> {
    let mut parts: Vec<SqlFragment> = container
        .filters
        .iter()
        .map(|f| {
            SqlFragment::parse(
                &format!("/*{}*/\n{}", f.name.replace("*/", "* /"), f.where_sql.trim()),
                scope,
            )
        })
        .collect();

    for sub in &container.subcontainers {
        if let Some(inner) = container_body(sub, scope) {
            let mut wrapped = SqlFragment::text("(\n");
            wrapped.append(&inner);
            wrapped.push_str("\n)");
            parts.push(wrapped);
        }
    }

    if parts.is_empty() {
        return None;
    }
    let separator = format!("\n{}\n", container.operation.keyword());
    Some(SqlFragment::join(parts.iter(), &separator))
}
