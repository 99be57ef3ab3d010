//! T-SQL (SQL Server / Azure SQL) dialect.
//!
//! - Square bracket identifier quoting (`[name]`)
//! - Parameters as session variables: `DECLARE @x AS type; SET @x=value;`
//! - TOP for limiting
//! - N'...' prefix for Unicode strings
//! - No RECURSIVE keyword; recursive calendars need `OPTION (MAXRECURSION 0)`

use super::helpers;
use super::SqlDialect;
use crate::model::{AxisIncrement, SqlParameter};

/// T-SQL (SQL Server) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

fn datepart(increment: AxisIncrement) -> &'static str {
    match increment {
        AxisIncrement::Day => "day",
        AxisIncrement::Month => "month",
        AxisIncrement::Quarter => "quarter",
        AxisIncrement::Year => "year",
    }
}

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        if !s.is_ascii() {
            helpers::quote_string_unicode(s)
        } else {
            helpers::quote_string_single(s)
        }
    }

    fn format_date_literal(&self, date: &str) -> String {
        // no DATE 'YYYY-MM-DD' syntax
        format!("'{}'", date)
    }

    fn supports_session_variables(&self) -> bool {
        true
    }

    fn declare_parameter(&self, p: &SqlParameter) -> String {
        format!(
            "{}DECLARE @{} AS {};\nSET @{}={};",
            helpers::parameter_comment(p),
            p.name,
            p.data_type,
            p.name,
            p.value
        )
    }

    fn date_bucket(&self, expr: &str, increment: AxisIncrement) -> String {
        match increment {
            AxisIncrement::Day => format!("CAST({} AS date)", expr),
            other => {
                let part = datepart(other);
                format!("DATEADD({part}, DATEDIFF({part}, 0, {expr}), 0)")
            }
        }
    }

    fn date_add(&self, expr: &str, increment: AxisIncrement) -> String {
        format!("DATEADD({}, 1, {})", datepart(increment), expr)
    }

    fn emit_recursive_keyword(&self) -> bool {
        false
    }

    fn calendar_statement_suffix(&self) -> Option<&'static str> {
        Some("OPTION (MAXRECURSION 0)")
    }

    fn top_x_prefix(&self, n: u32) -> Option<String> {
        Some(format!("TOP {}", n))
    }

    fn top_x_postfix(&self, _n: u32) -> Option<String> {
        None
    }
}
