//! Shared helper functions for SQL dialect implementations.
//!
//! Reusable building blocks that dialects compose to implement `SqlDialect`
//! with minimal duplication.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{AxisIncrement, SqlParameter};

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: Postgres, DuckDB, SQLite
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: MySQL
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote identifier with square brackets.
/// Used by: T-SQL
pub fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// Remove one level of identifier quoting, if present.
pub fn unquote(ident: &str) -> &str {
    let ident = ident.trim();
    for (open, close) in [('[', ']'), ('"', '"'), ('`', '`')] {
        if ident.len() >= 2 && ident.starts_with(open) && ident.ends_with(close) {
            return &ident[1..ident.len() - 1];
        }
    }
    ident
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with N prefix for Unicode (T-SQL).
pub fn quote_string_unicode(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

// =============================================================================
// Select List Parsing
// =============================================================================

/// Byte offsets of every character outside quotes and brackets, paired with
/// the parenthesis depth at that point.
fn top_level_positions(sql: &str) -> Vec<(usize, char, usize)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (i, c) in sql.char_indices() {
        if let Some(close) = quote {
            if c == close {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => {
                out.push((i, c, depth));
                depth += 1;
                continue;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push((i, c, depth));
                continue;
            }
            _ => {}
        }
        out.push((i, c, depth));
    }
    out
}

/// Split `expr AS alias` into its parts.
///
/// Only a top-level `AS` counts, so `CAST(x AS int)` has no alias.
pub fn split_select_and_alias(line: &str) -> (String, Option<String>) {
    let line = line.trim();
    let upper = line.to_ascii_uppercase();
    let mut split_at = None;

    for (i, _, depth) in top_level_positions(line) {
        if depth == 0 && upper[i..].starts_with(" AS ") {
            split_at = Some(i);
        }
    }

    match split_at {
        Some(i) => {
            let expr = line[..i].trim().to_string();
            let alias = unquote(&line[i + 4..]).to_string();
            (expr, Some(alias))
        }
        None => (line.to_string(), None),
    }
}

/// Split a function call into its name and arguments.
///
/// `count(*)` gives `("count", "*")`; `LTRIM(RTRIM([Fish]))` gives
/// `("LTRIM", "RTRIM([Fish])")`. Anything that is not a single call
/// spanning the whole expression gives `None`.
pub fn split_outermost_function(expr: &str) -> Option<(String, String)> {
    let expr = expr.trim();
    let open = expr.find('(')?;
    let name = expr[..open].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return None;
    }

    let positions = top_level_positions(expr);
    let close = positions
        .iter()
        .find(|(i, c, depth)| *i > open && *c == ')' && *depth == 0)
        .map(|(i, _, _)| *i)?;
    if close != expr.len() - 1 {
        return None;
    }

    Some((name.to_string(), expr[open + 1..close].trim().to_string()))
}

/// Runtime column name for `expr [AS alias]`: the alias, or the last
/// dotted part of the expression without quoting.
pub fn column_name(expr: &str, alias: Option<&str>) -> String {
    match alias {
        Some(a) => a.to_string(),
        None => unquote(expr.rsplit('.').next().unwrap_or(expr)).to_string(),
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// `/* comment */` line for a parameter, if it has one.
pub fn parameter_comment(p: &SqlParameter) -> String {
    match &p.comment {
        Some(c) => format!("/*{}*/\n", c),
        None => String::new(),
    }
}

/// Declaration for dialects without session variables: values are inlined
/// at each usage, the declaration only documents them.
pub fn declare_parameter_as_comment(p: &SqlParameter) -> String {
    format!(
        "{}/* @{} {} = {} */",
        parameter_comment(p),
        p.name,
        p.data_type,
        p.value.replace("*/", "* /")
    )
}

// =============================================================================
// Pivot Aliases
// =============================================================================

static INVALID_ALIAS_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").unwrap());

/// Turn pivot values into unique, valid column aliases.
pub fn sanitize_pivot_aliases(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let mut alias = INVALID_ALIAS_CHARS
            .replace_all(value.trim(), "_")
            .trim_matches('_')
            .to_string();
        if alias.is_empty() {
            alias = "blank".to_string();
        }
        if alias.starts_with(|c: char| c.is_ascii_digit()) {
            alias.insert(0, '_');
        }

        let base = alias.clone();
        let mut n = 2;
        while out.contains(&alias) {
            alias = format!("{}_{}", base, n);
            n += 1;
        }
        out.push(alias);
    }
    out
}

// =============================================================================
// Calendars
// =============================================================================

/// `INTERVAL` literal text for one increment.
pub fn interval_postgres(increment: AxisIncrement) -> &'static str {
    match increment {
        AxisIncrement::Day => "INTERVAL '1 day'",
        AxisIncrement::Month => "INTERVAL '1 month'",
        AxisIncrement::Quarter => "INTERVAL '3 months'",
        AxisIncrement::Year => "INTERVAL '1 year'",
    }
}

/// `date_trunc` unit for one increment.
pub fn trunc_unit(increment: AxisIncrement) -> &'static str {
    match increment {
        AxisIncrement::Day => "day",
        AxisIncrement::Month => "month",
        AxisIncrement::Quarter => "quarter",
        AxisIncrement::Year => "year",
    }
}

/// Calendar rows from a `generate_series` table function.
/// Used by: Postgres, DuckDB
pub fn calendar_generate_series(start: &str, end: &str, increment: AxisIncrement) -> String {
    let unit = trunc_unit(increment);
    format!(
        "SELECT CAST(s.joinDt AS date) AS joinDt\nFROM generate_series(date_trunc('{unit}', {start}), date_trunc('{unit}', {end}), {}) AS s(joinDt)",
        interval_postgres(increment)
    )
}
