//! DuckDB dialect.
//!
//! PostgreSQL-compatible for everything the aggregate builder emits:
//! double-quoted identifiers, inlined parameters, `generate_series` calendars.

use super::helpers;
use super::SqlDialect;
use crate::model::{AxisIncrement, AxisSpec};

/// DuckDB dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn date_bucket(&self, expr: &str, increment: AxisIncrement) -> String {
        format!(
            "CAST(date_trunc('{}', {}) AS DATE)",
            helpers::trunc_unit(increment),
            expr
        )
    }

    fn date_add(&self, expr: &str, increment: AxisIncrement) -> String {
        format!("CAST({} + {} AS DATE)", expr, helpers::interval_postgres(increment))
    }

    fn calendar_is_recursive(&self) -> bool {
        false
    }

    fn calendar_source(&self, axis: &AxisSpec) -> String {
        helpers::calendar_generate_series(
            &self.format_date_literal(&axis.start_date),
            &self.format_date_literal(&axis.end_date),
            axis.increment,
        )
    }
}
