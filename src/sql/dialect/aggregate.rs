//! Rendering of aggregate lines into a final statement.
//!
//! Plain aggregates are their lines joined by newlines. An axis aggregate is
//! rewritten so that every bucket of the axis appears, even when no row falls
//! into it:
//!
//! ```text
//! WITH calendar AS (<one row per bucket>)
//! SELECT calendar.joinDt AS <axis>, dataset.<count>
//! FROM calendar
//! LEFT JOIN (
//!   SELECT <bucket(axis)> AS joinDt, <count> ... GROUP BY <bucket(axis)>
//! ) dataset ON dataset.joinDt = calendar.joinDt
//! ORDER BY calendar.joinDt
//! ```
//!
//! With a pivot, the count column becomes one conditional aggregate per pivot
//! value: `count(CASE WHEN <pivot> = 'v' THEN 1 END) AS v`.

use super::{helpers, SqlDialect};
use crate::model::AxisSpec;
use crate::query::{QueryBuildingError, QueryResult};
use crate::sql::fragment::SqlFragment;
use crate::sql::line::{LineRole, QueryComponent, QueryLine};

/// Alias given to a count column that has none.
pub const DEFAULT_COUNT_ALIAS: &str = "MyCount";

pub fn build_aggregate<D: SqlDialect + ?Sized>(
    dialect: &D,
    lines: &[QueryLine],
    axis: Option<&AxisSpec>,
    pivot_values: Option<&[String]>,
) -> QueryResult<SqlFragment> {
    let has_pivot = lines.iter().any(|l| l.role == LineRole::Pivot);
    match axis {
        Some(axis) => {
            if has_pivot && pivot_values.is_none() {
                return Err(QueryBuildingError::PivotValuesRequired);
            }
            render_axis(dialect, lines, axis, pivot_values.filter(|_| has_pivot))
        }
        None => Ok(concatenate(lines)),
    }
}

/// Non-blank lines joined by newlines.
pub fn concatenate(lines: &[QueryLine]) -> SqlFragment {
    SqlFragment::join(
        lines
            .iter()
            .filter(|l| !l.fragment.is_blank())
            .map(|l| &l.fragment),
        "\n",
    )
}

fn column_line(lines: &[QueryLine], role: LineRole) -> Option<&QueryLine> {
    lines
        .iter()
        .find(|l| l.component == QueryComponent::QueryTimeColumn && l.role == role)
}

fn lines_of(lines: &[QueryLine], component: QueryComponent) -> impl Iterator<Item = &QueryLine> {
    lines.iter().filter(move |l| l.component == component)
}

/// Parse rebuilt text back into a fragment, in the scope of the lines it
/// was derived from.
fn reparse(text: &str, sources: &[&QueryLine]) -> SqlFragment {
    let scope = sources
        .iter()
        .find_map(|l| l.fragment.placeholders().next().map(|p| p.scope))
        .unwrap_or(0);
    SqlFragment::parse(text, scope)
}

/// Select text without its trailing comma, split into expression and alias.
fn split_column<D: SqlDialect + ?Sized>(dialect: &D, line: &QueryLine) -> (String, Option<String>) {
    let text = line.text();
    dialect.split_select_and_alias(text.trim().trim_end_matches(','))
}

fn render_axis<D: SqlDialect + ?Sized>(
    dialect: &D,
    lines: &[QueryLine],
    axis: &AxisSpec,
    pivot_values: Option<&[String]>,
) -> QueryResult<SqlFragment> {
    let Some(axis_line) = column_line(lines, LineRole::Axis) else {
        return Ok(concatenate(lines));
    };

    let (axis_expr, axis_alias) = split_column(dialect, axis_line);
    let axis_name = helpers::column_name(&axis_expr, axis_alias.as_deref());
    let bucket = dialect.date_bucket(&axis_expr, axis.increment);

    let count_line = column_line(lines, LineRole::CountFunction).or_else(|| {
        lines.iter().find(|l| {
            l.component == QueryComponent::QueryTimeColumn
                && !matches!(l.role, LineRole::Axis | LineRole::Pivot)
        })
    });

    let mut columns = vec![reparse(&format!("{} AS joinDt", bucket), &[axis_line])];
    let mut outer_columns = vec![format!(
        "calendar.joinDt AS {}",
        dialect.quote_identifier(&axis_name)
    )];

    let pivot_line = column_line(lines, LineRole::Pivot);
    match (pivot_values, pivot_line, count_line) {
        (Some(values), Some(pivot_line), Some(count_line)) => {
            let (pivot_expr, _) = split_column(dialect, pivot_line);
            let (count_expr, _) = split_column(dialect, count_line);
            let (func, args) = dialect
                .split_outermost_function(&count_expr)
                .ok_or_else(|| QueryBuildingError::UnpivotableCount {
                    count_sql: count_expr.clone(),
                })?;

            let (distinct, arg) = match args.get(..9) {
                Some(prefix) if prefix.eq_ignore_ascii_case("distinct ") => {
                    ("DISTINCT ", args[9..].trim().to_string())
                }
                _ => ("", args.clone()),
            };
            let arg = if arg == "*" { "1".to_string() } else { arg };

            for (value, alias) in values.iter().zip(helpers::sanitize_pivot_aliases(values)) {
                let quoted = dialect.quote_identifier(&alias);
                columns.push(reparse(
                    &format!(
                        "{}({}CASE WHEN {} = {} THEN {} END) AS {}",
                        func,
                        distinct,
                        pivot_expr,
                        dialect.quote_string(value),
                        arg,
                        quoted
                    ),
                    &[pivot_line, count_line],
                ));
                outer_columns.push(format!("dataset.{}", quoted));
            }
        }
        (_, _, Some(count_line)) => {
            let (count_expr, count_alias) = split_column(dialect, count_line);
            let alias = dialect
                .quote_identifier(count_alias.as_deref().unwrap_or(DEFAULT_COUNT_ALIAS));
            columns.push(reparse(&format!("{} AS {}", count_expr, alias), &[count_line]));
            outer_columns.push(format!("dataset.{}", alias));
        }
        _ => {}
    }

    let mut inner: Vec<SqlFragment> = Vec::new();
    inner.extend(lines_of(lines, QueryComponent::Select).map(|l| l.fragment.clone()));
    inner.push(SqlFragment::join(columns.iter(), ",\n"));
    for component in [
        QueryComponent::From,
        QueryComponent::JoinInfoJoin,
        QueryComponent::Where,
    ] {
        inner.extend(lines_of(lines, component).map(|l| l.fragment.clone()));
    }
    inner.push(SqlFragment::text("GROUP BY"));
    inner.push(reparse(&bucket, &[axis_line]));
    inner.extend(lines_of(lines, QueryComponent::Having).map(|l| l.fragment.clone()));
    inner.extend(
        lines_of(lines, QueryComponent::Postfix)
            .filter(|l| l.role != LineRole::TopX)
            .map(|l| l.fragment.clone()),
    );

    let mut out: Vec<SqlFragment> = Vec::new();
    out.extend(
        lines_of(lines, QueryComponent::VariableDeclaration).map(|l| l.fragment.clone()),
    );
    out.push(SqlFragment::text(dialect.calendar_cte(axis)));
    out.push(SqlFragment::text("SELECT"));
    out.push(SqlFragment::text(outer_columns.join(",\n")));
    out.push(SqlFragment::text("FROM calendar"));
    out.push(SqlFragment::text("LEFT JOIN ("));
    out.push(SqlFragment::join(
        inner.iter().filter(|f| !f.is_blank()),
        "\n",
    ));
    out.push(SqlFragment::text(
        ") dataset ON dataset.joinDt = calendar.joinDt",
    ));
    out.push(SqlFragment::text("ORDER BY"));
    out.push(SqlFragment::text("calendar.joinDt"));
    if let Some(suffix) = dialect.calendar_statement_suffix() {
        out.push(SqlFragment::text(suffix));
    }

    Ok(SqlFragment::join(out.iter(), "\n"))
}
