//! MySQL dialect.
//!
//! - Backtick identifier quoting
//! - User variables (`SET @x = value;`) referenced as `@x`
//! - `DATE_ADD(..., INTERVAL 1 MONTH)` date arithmetic

use super::helpers;
use super::SqlDialect;
use crate::model::{AxisIncrement, SqlParameter};

/// MySQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn supports_session_variables(&self) -> bool {
        true
    }

    fn declare_parameter(&self, p: &SqlParameter) -> String {
        format!("{}SET @{}={};", helpers::parameter_comment(p), p.name, p.value)
    }

    fn date_bucket(&self, expr: &str, increment: AxisIncrement) -> String {
        match increment {
            AxisIncrement::Day => format!("DATE({})", expr),
            AxisIncrement::Month => format!("CAST(DATE_FORMAT({}, '%Y-%m-01') AS DATE)", expr),
            AxisIncrement::Quarter => format!(
                "MAKEDATE(YEAR({e}), 1) + INTERVAL (QUARTER({e}) - 1) QUARTER",
                e = expr
            ),
            AxisIncrement::Year => format!("CAST(DATE_FORMAT({}, '%Y-01-01') AS DATE)", expr),
        }
    }

    fn date_add(&self, expr: &str, increment: AxisIncrement) -> String {
        let unit = match increment {
            AxisIncrement::Day => "DAY",
            AxisIncrement::Month => "MONTH",
            AxisIncrement::Quarter => "QUARTER",
            AxisIncrement::Year => "YEAR",
        };
        format!("DATE_ADD({}, INTERVAL 1 {})", expr, unit)
    }
}
