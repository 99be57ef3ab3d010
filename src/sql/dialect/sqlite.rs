//! SQLite dialect.
//!
//! Dates are ISO-8601 text manipulated with `date(x, modifier...)`;
//! calendars are recursive CTEs. No session variables.

use super::helpers;
use super::SqlDialect;
use crate::model::AxisIncrement;

/// SQLite dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_date_literal(&self, date: &str) -> String {
        format!("'{}'", date)
    }

    fn date_bucket(&self, expr: &str, increment: AxisIncrement) -> String {
        match increment {
            AxisIncrement::Day => format!("date({})", expr),
            AxisIncrement::Month => format!("date({}, 'start of month')", expr),
            AxisIncrement::Quarter => format!(
                "date({e}, 'start of month', '-' || ((CAST(strftime('%m', {e}) AS INTEGER) - 1) % 3) || ' months')",
                e = expr
            ),
            AxisIncrement::Year => format!("date({}, 'start of year')", expr),
        }
    }

    fn date_add(&self, expr: &str, increment: AxisIncrement) -> String {
        let modifier = match increment {
            AxisIncrement::Day => "+1 day",
            AxisIncrement::Month => "+1 month",
            AxisIncrement::Quarter => "+3 months",
            AxisIncrement::Year => "+1 year",
        };
        format!("date({}, '{}')", expr, modifier)
    }
}
