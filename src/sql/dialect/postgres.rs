//! PostgreSQL dialect.
//!
//! - ANSI identifier quoting (`"`)
//! - No session variables: parameter values are inlined where they are used
//! - Calendars come from `generate_series`

use super::helpers;
use super::SqlDialect;
use crate::model::{AxisIncrement, AxisSpec};

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn date_bucket(&self, expr: &str, increment: AxisIncrement) -> String {
        format!(
            "CAST(date_trunc('{}', {}) AS date)",
            helpers::trunc_unit(increment),
            expr
        )
    }

    fn date_add(&self, expr: &str, increment: AxisIncrement) -> String {
        format!("CAST({} + {} AS date)", expr, helpers::interval_postgres(increment))
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
