//! SQL dialect definitions: the syntax helper every query passes through.
//!
//! Each engine implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (PG/DuckDB/SQLite), `` ` `` (MySQL), `[]` (T-SQL)
//! - Parameters: session variables (`DECLARE`/`SET`) vs values inlined at use
//! - Date bucketing and calendar generation for axis aggregates
//! - TopX: `TOP n` prefix vs `LIMIT n` postfix
//!
//! The aggregate builder never emits engine-specific tokens itself; it hands
//! its tagged lines to [`SqlDialect::build_aggregate`].
//!
//! # Usage
//!
//! ```ignore
//! use sieve::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::TSql;
//! let quoted = dialect.quote_identifier("chi");  // [chi]
//! ```
//!
//! | Feature | T-SQL | MySQL | PostgreSQL | DuckDB | SQLite |
//! |---------|-------|-------|------------|--------|--------|
//! | Session variables | ✓ | ✓ | ❌ | ❌ | ❌ |
//! | Calendar | recursive CTE | recursive CTE | generate_series | generate_series | recursive CTE |
//! | TopX | `TOP n` | `LIMIT n` | `LIMIT n` | `LIMIT n` | `LIMIT n` |

pub mod aggregate;
mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod sqlite;
mod tsql;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use tsql::TSql;

use serde::{Deserialize, Serialize};

use super::fragment::SqlFragment;
use super::line::QueryLine;
use crate::model::{AxisIncrement, AxisSpec, SqlParameter};
use crate::query::QueryResult;

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a date literal from `YYYY-MM-DD`.
    fn format_date_literal(&self, date: &str) -> String {
        format!("DATE '{}'", date)
    }

    // =========================================================================
    // Select List
    // =========================================================================

    /// Split `expr AS alias`.
    fn split_select_and_alias(&self, line: &str) -> (String, Option<String>) {
        helpers::split_select_and_alias(line)
    }

    /// Split `func(args)` into `("func", "args")`.
    fn split_outermost_function(&self, expr: &str) -> Option<(String, String)> {
        helpers::split_outermost_function(expr)
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Whether parameters are declared as session variables and referenced
    /// by marker. Without them the value is inlined at every usage.
    fn supports_session_variables(&self) -> bool {
        false
    }

    /// How a parameter is referenced inside a statement.
    fn parameter_marker(&self, name: &str) -> String {
        format!("@{}", name)
    }

    /// Text substituted for one parameter usage.
    fn render_parameter(&self, name: &str, parameter: Option<&SqlParameter>) -> String {
        match parameter {
            Some(p) if !self.supports_session_variables() => p.value.clone(),
            _ => self.parameter_marker(name),
        }
    }

    /// Declaration emitted at the top of a statement.
    fn declare_parameter(&self, parameter: &SqlParameter) -> String {
        helpers::declare_parameter_as_comment(parameter)
    }

    // =========================================================================
    // Dates and Calendars
    // =========================================================================

    /// Truncate a date expression to the start of its bucket.
    fn date_bucket(&self, expr: &str, increment: AxisIncrement) -> String;

    /// Add one increment to a date expression.
    fn date_add(&self, expr: &str, increment: AxisIncrement) -> String;

    /// Whether to emit the RECURSIVE keyword for recursive CTEs.
    fn emit_recursive_keyword(&self) -> bool {
        true
    }

    /// Whether `calendar_source` refers to itself.
    fn calendar_is_recursive(&self) -> bool {
        true
    }

    /// Query producing one `joinDt` row per bucket of the axis.
    fn calendar_source(&self, axis: &AxisSpec) -> String {
        let start = self.date_bucket(&self.format_date_literal(&axis.start_date), axis.increment);
        let end = self.date_bucket(&self.format_date_literal(&axis.end_date), axis.increment);
        let next = self.date_add("joinDt", axis.increment);
        format!(
            "SELECT {start} AS joinDt\nUNION ALL\nSELECT {next} FROM calendar WHERE {next} <= {end}"
        )
    }

    /// `WITH calendar AS (...)` prefix for axis aggregates.
    fn calendar_cte(&self, axis: &AxisSpec) -> String {
        let recursive = if self.calendar_is_recursive() && self.emit_recursive_keyword() {
            "RECURSIVE "
        } else {
            ""
        };
        format!("WITH {}calendar AS (\n{}\n)", recursive, self.calendar_source(axis))
    }

    /// Trailing statement option required by calendar queries.
    fn calendar_statement_suffix(&self) -> Option<&'static str> {
        None
    }

    // =========================================================================
    // TopX
    // =========================================================================

    /// Keyword placed after `SELECT` to keep the first `n` rows.
    fn top_x_prefix(&self, _n: u32) -> Option<String> {
        None
    }

    /// Clause placed at the end of a statement to keep the first `n` rows.
    fn top_x_postfix(&self, n: u32) -> Option<String> {
        Some(format!("LIMIT {}", n))
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Render an aggregate's tagged lines into one statement.
    ///
    /// Plain aggregates are the lines concatenated. Axis aggregates join a
    /// generated calendar; pivot aggregates need the pivot values up front.
    fn build_aggregate(
        &self,
        lines: &[QueryLine],
        axis: Option<&AxisSpec>,
        pivot_values: Option<&[String]>,
    ) -> QueryResult<SqlFragment> {
        aggregate::build_aggregate(self, lines, axis, pivot_values)
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    TSql,
    MySql,
    Postgres,
    DuckDb,
    Sqlite,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::TSql => &TSql,
            Dialect::MySql => &MySql,
            Dialect::Postgres => &Postgres,
            Dialect::DuckDb => &DuckDb,
            Dialect::Sqlite => &Sqlite,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_date_literal(&self, date: &str) -> String {
        self.dialect().format_date_literal(date)
    }

    fn split_select_and_alias(&self, line: &str) -> (String, Option<String>) {
        self.dialect().split_select_and_alias(line)
    }

    fn split_outermost_function(&self, expr: &str) -> Option<(String, String)> {
        self.dialect().split_outermost_function(expr)
    }

    fn supports_session_variables(&self) -> bool {
        self.dialect().supports_session_variables()
    }

    fn parameter_marker(&self, name: &str) -> String {
        self.dialect().parameter_marker(name)
    }

    fn render_parameter(&self, name: &str, parameter: Option<&SqlParameter>) -> String {
        self.dialect().render_parameter(name, parameter)
    }

    fn declare_parameter(&self, parameter: &SqlParameter) -> String {
        self.dialect().declare_parameter(parameter)
    }

    fn date_bucket(&self, expr: &str, increment: AxisIncrement) -> String {
        self.dialect().date_bucket(expr, increment)
    }

    fn date_add(&self, expr: &str, increment: AxisIncrement) -> String {
        self.dialect().date_add(expr, increment)
    }

    fn emit_recursive_keyword(&self) -> bool {
        self.dialect().emit_recursive_keyword()
    }

    fn calendar_is_recursive(&self) -> bool {
        self.dialect().calendar_is_recursive()
    }

    fn calendar_source(&self, axis: &AxisSpec) -> String {
        self.dialect().calendar_source(axis)
    }

    fn calendar_cte(&self, axis: &AxisSpec) -> String {
        self.dialect().calendar_cte(axis)
    }

    fn calendar_statement_suffix(&self) -> Option<&'static str> {
        self.dialect().calendar_statement_suffix()
    }

    fn top_x_prefix(&self, n: u32) -> Option<String> {
        self.dialect().top_x_prefix(n)
    }

    fn top_x_postfix(&self, n: u32) -> Option<String> {
        self.dialect().top_x_postfix(n)
    }

    fn build_aggregate(
        &self,
        lines: &[QueryLine],
        axis: Option<&AxisSpec>,
        pivot_values: Option<&[String]>,
    ) -> QueryResult<SqlFragment> {
        self.dialect().build_aggregate(lines, axis, pivot_values)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}
