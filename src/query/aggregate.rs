//! Aggregate Builder.
//!
//! An [`AggregateRequest`] gathers everything one GROUP BY query needs up
//! front; [`AggregateRequest::build`] validates it and produces an immutable
//! [`BuiltAggregate`] holding tagged [`QueryLine`]s in emission order:
//!
//! ```text
//! VariableDeclaration   DECLARE @code ...           (unless suppressed)
//! Select                /*name*/  SELECT  distinct  TOP n
//! QueryTimeColumn       columns..., count last      (roles: Axis, Pivot, CountFunction)
//! From / JoinInfoJoin   FROM t  INNER JOIN ...  custom joins
//! Where                 WHERE ( filters )
//! GroupBy               only with a grouped column
//! Having
//! OrderBy               not with a pivot
//! Postfix               LIMIT n, custom lines
//! ```
//!
//! Engine-specific rendering (calendar joins, pivots) happens in
//! [`SqlDialect::build_aggregate`].

use tracing::debug;

use super::error::{QueryBuildingError, QueryResult};
use super::filters;
use super::parameters::ParameterManager;
use super::tables::resolve_tables;
use crate::model::{
    AggregateConfiguration, AggregateDimension, AxisSpec, Catalogue, DimensionId,
    FilterContainer, ParameterLevel, SqlParameter, TableId, TopX,
};
use crate::sql::dialect::aggregate::DEFAULT_COUNT_ALIAS;
use crate::sql::{Dialect, LineRole, QueryComponent, QueryLine, SqlDialect, SqlFragment};

/// A column of the request.
#[derive(Debug, Clone)]
pub struct QueryColumn {
    pub dimension: AggregateDimension,
    /// Selected (and used to find tables) but left out of GROUP BY.
    pub skip_group_by: bool,
}

/// Everything needed to build one aggregate query.
#[derive(Debug, Clone)]
pub struct AggregateRequest<'a> {
    catalogue: &'a Catalogue,
    name: String,
    columns: Vec<QueryColumn>,
    count_sql: Option<String>,
    having_sql: Option<String>,
    pivot: Option<DimensionId>,
    root_filter: Option<FilterContainer>,
    top_x: Option<TopX>,
    forced_joins: Vec<TableId>,
    parameters: Vec<SqlParameter>,
    globals: Vec<SqlParameter>,
    limitation_sql: Option<String>,
    override_select_list: Option<String>,
    custom_lines: Vec<QueryLine>,
    parameter_manager: Option<ParameterManager>,
    write_parameters: bool,
    write_order_by: bool,
    is_cohort_identification: bool,
}

impl<'a> AggregateRequest<'a> {
    pub fn new(name: impl Into<String>, catalogue: &'a Catalogue) -> Self {
        Self {
            catalogue,
            name: name.into(),
            columns: Vec::new(),
            count_sql: None,
            having_sql: None,
            pivot: None,
            root_filter: None,
            top_x: None,
            forced_joins: Vec::new(),
            parameters: Vec::new(),
            globals: Vec::new(),
            limitation_sql: None,
            override_select_list: None,
            custom_lines: Vec::new(),
            parameter_manager: None,
            write_parameters: true,
            write_order_by: true,
            is_cohort_identification: false,
        }
    }

    /// A request for a configuration as authored: every dimension, its count,
    /// HAVING, pivot, filters, top x, forced joins and query parameters.
    pub fn for_configuration(config: &AggregateConfiguration, catalogue: &'a Catalogue) -> Self {
        let mut request = Self::new(config.name.clone(), catalogue);
        for d in &config.dimensions {
            request = request.with_column(d.clone());
        }
        request.count_sql = config.count_sql.clone();
        request.having_sql = config.having_sql.clone();
        request.pivot = config.pivot_dimension;
        request.root_filter = config.root_filter.clone();
        request.top_x = config.top_x.clone();
        request.forced_joins = config.forced_joins.clone();
        request.parameters = config.parameters.clone();
        request.is_cohort_identification = config.is_cohort_identification;
        request
    }

    pub fn with_column(mut self, dimension: AggregateDimension) -> Self {
        self.columns.push(QueryColumn {
            dimension,
            skip_group_by: false,
        });
        self
    }

    pub fn with_skipped_column(mut self, dimension: AggregateDimension) -> Self {
        self.columns.push(QueryColumn {
            dimension,
            skip_group_by: true,
        });
        self
    }

    pub fn with_count(mut self, count_sql: impl Into<String>) -> Self {
        self.count_sql = Some(count_sql.into());
        self
    }

    pub fn without_count(mut self) -> Self {
        self.count_sql = None;
        self
    }

    pub fn with_having(mut self, having_sql: impl Into<String>) -> Self {
        self.having_sql = Some(having_sql.into());
        self
    }

    pub fn with_pivot(mut self, dimension: DimensionId) -> Self {
        self.pivot = Some(dimension);
        self
    }

    pub fn with_filter(mut self, root: FilterContainer) -> Self {
        self.root_filter = Some(root);
        self
    }

    pub fn with_top_x(mut self, top_x: Option<TopX>) -> Self {
        self.top_x = top_x;
        self
    }

    pub fn with_forced_join(mut self, table: TableId) -> Self {
        self.forced_joins.push(table);
        self
    }

    pub fn with_parameter(mut self, parameter: SqlParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_globals(mut self, globals: &[SqlParameter]) -> Self {
        self.globals.extend(globals.iter().cloned());
        self
    }

    /// Text placed straight after `SELECT`, e.g. `distinct`.
    pub fn with_limitation(mut self, limitation_sql: impl Into<String>) -> Self {
        self.limitation_sql = Some(limitation_sql.into());
        self
    }

    /// Select this text instead of the columns. Columns still decide which
    /// tables are joined.
    pub fn with_select_list(mut self, select_list: impl Into<String>) -> Self {
        self.override_select_list = Some(select_list.into());
        self
    }

    /// Add a line owned by the caller, e.g. a join to a subquery.
    pub fn with_custom_line(mut self, line: QueryLine) -> Self {
        self.custom_lines.push(line);
        self
    }

    /// Register parameters into an existing manager instead of a fresh one,
    /// so placeholders parsed in its scope resolve against it.
    pub fn with_parameter_manager(mut self, manager: ParameterManager) -> Self {
        self.parameter_manager = Some(manager);
        self
    }

    /// Leave out the parameter declarations, for SQL nested in a parent.
    pub fn without_parameter_declarations(mut self) -> Self {
        self.write_parameters = false;
        self
    }

    pub fn without_order_by(mut self) -> Self {
        self.write_order_by = false;
        self
    }

    /// Cohort sets select only their columns; a count is only used by HAVING.
    pub fn cohort_identification(mut self) -> Self {
        self.is_cohort_identification = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !c.skip_group_by)
            .map(|c| c.dimension.runtime_name())
            .collect();
        if let Some(count) = &self.count_sql {
            names.push(count.clone());
        }
        names
    }

    fn error_axis_column_count(&self, with_pivot: bool) -> QueryBuildingError {
        let columns = self.column_names();
        if with_pivot {
            QueryBuildingError::PivotColumnCount {
                aggregate: self.name.clone(),
                found: columns.len(),
                columns,
            }
        } else {
            QueryBuildingError::AxisColumnCount {
                aggregate: self.name.clone(),
                found: columns.len(),
                columns,
            }
        }
    }

    /// Check the column set. Returns the axis and pivot column positions.
    fn validate(&self, columns: &[QueryColumn]) -> QueryResult<(Option<usize>, Option<usize>)> {
        let mut axis: Option<usize> = None;
        for (i, c) in columns.iter().enumerate() {
            // skipped columns are never aggregated
            if c.dimension.hash_on_data_release && !c.skip_group_by {
                return Err(QueryBuildingError::HashOnDataRelease {
                    aggregate: self.name.clone(),
                    column: c.dimension.runtime_name(),
                });
            }
            if c.dimension.axis.is_some() {
                if let Some(first) = axis {
                    return Err(QueryBuildingError::MultipleAxes {
                        aggregate: self.name.clone(),
                        first: columns[first].dimension.runtime_name(),
                        second: c.dimension.runtime_name(),
                    });
                }
                axis = Some(i);
            }
        }

        let pivot = match self.pivot {
            None => None,
            Some(id) => {
                let i = columns
                    .iter()
                    .position(|c| c.dimension.id == id)
                    .ok_or_else(|| QueryBuildingError::PivotNotFound {
                        aggregate: self.name.clone(),
                        dimension: id,
                    })?;
                let column = &columns[i];
                if axis == Some(i) {
                    return Err(QueryBuildingError::AxisIsPivot {
                        aggregate: self.name.clone(),
                        column: column.dimension.runtime_name(),
                    });
                }
                if column.skip_group_by {
                    return Err(QueryBuildingError::PivotOnSkippedColumn {
                        aggregate: self.name.clone(),
                        column: column.dimension.runtime_name(),
                    });
                }
                if axis.is_none() {
                    return Err(QueryBuildingError::PivotRequiresAxis {
                        aggregate: self.name.clone(),
                    });
                }
                Some(i)
            }
        };

        if let Some(TopX {
            order_by_dimension: Some(id),
            ..
        }) = &self.top_x
        {
            if !columns.iter().any(|c| c.dimension.id == *id) {
                return Err(QueryBuildingError::TopXOrderColumnMissing {
                    aggregate: self.name.clone(),
                    dimension: *id,
                });
            }
        }

        if axis.is_some() {
            let expected = if pivot.is_some() { 3 } else { 2 };
            if self.column_names().len() != expected {
                return Err(self.error_axis_column_count(pivot.is_some()));
            }
        }

        if self.override_select_list.is_some() && (self.count_sql.is_some() || self.having_sql.is_some()) {
            return Err(QueryBuildingError::OverrideSelectListWithCount {
                aggregate: self.name.clone(),
            });
        }

        Ok((axis, pivot))
    }

    pub fn build(&self) -> QueryResult<BuiltAggregate> {
        let mut columns = self.columns.clone();
        columns.sort_by_key(|c| c.dimension.order);

        let (axis_index, pivot_index) = self.validate(&columns)?;

        let mut params = self
            .parameter_manager
            .clone()
            .unwrap_or_default();
        let scope = params.scope();
        params.add_globals(&self.globals)?;
        params.add_parameters_for(&self.parameters, ParameterLevel::QueryLevel)?;

        let resolved = resolve_tables(
            self.catalogue,
            columns.iter().map(|c| c.dimension.table_id),
            &self.forced_joins,
            &self.name,
        )?;
        for table in &resolved.tables {
            params.add_parameters_for(&table.parameters, ParameterLevel::TableInfo)?;
        }
        if let Some(root) = &self.root_filter {
            for f in filters::all_filters_recursive(root) {
                params.add_parameters_for(&f.parameters, ParameterLevel::Filter)?;
            }
        }

        let dialect = resolved.dialect;
        let axis = axis_index.and_then(|i| columns[i].dimension.axis.clone());
        let top_x = self.top_x.clone().filter(|_| axis.is_none());

        let line = |text: &str, component: QueryComponent, role: LineRole| {
            QueryLine::new(SqlFragment::parse(text, scope), component).with_role(role)
        };
        let mut lines: Vec<QueryLine> = Vec::new();

        // SELECT
        lines.push(QueryLine::new(
            format!("/*{}*/", self.name.replace("*/", "* /")),
            QueryComponent::Select,
        ));
        lines.push(line("SELECT", QueryComponent::Select, LineRole::None));
        if let Some(limitation) = &self.limitation_sql {
            lines.push(line(limitation, QueryComponent::Select, LineRole::None));
        }
        if let Some(prefix) = top_x.as_ref().and_then(|t| dialect.top_x_prefix(t.top_x)) {
            lines.push(line(&prefix, QueryComponent::Select, LineRole::TopX));
        }

        let role_of = |i: usize| {
            if Some(i) == axis_index {
                LineRole::Axis
            } else if Some(i) == pivot_index {
                LineRole::Pivot
            } else {
                LineRole::None
            }
        };

        let mut select: Vec<QueryLine> = Vec::new();
        match &self.override_select_list {
            Some(list) => select.push(line(list, QueryComponent::QueryTimeColumn, LineRole::None)),
            None => {
                for (i, c) in columns.iter().enumerate() {
                    let text = match &c.dimension.alias {
                        Some(alias) => format!(
                            "{} AS {}",
                            c.dimension.select_sql,
                            dialect.quote_identifier(alias)
                        ),
                        None => c.dimension.select_sql.clone(),
                    };
                    select.push(line(&text, QueryComponent::QueryTimeColumn, role_of(i)));
                }
            }
        }
        let count_expr = self.count_sql.as_deref().map(|c| dialect.split_select_and_alias(c).0);
        if let (Some(count), false) = (&self.count_sql, self.is_cohort_identification) {
            let (_, alias) = dialect.split_select_and_alias(count);
            let text = match alias {
                Some(_) => count.clone(),
                None => format!("{} AS {}", count, DEFAULT_COUNT_ALIAS),
            };
            select.push(line(&text, QueryComponent::QueryTimeColumn, LineRole::CountFunction));
        }
        with_trailing_commas(&mut select);
        lines.extend(select);

        // FROM / WHERE
        lines.push(line(&resolved.from_sql(), QueryComponent::From, LineRole::None));
        if let Some(root) = &self.root_filter {
            if let Some(where_sql) = filters::where_fragment(root, scope) {
                lines.push(QueryLine::new(where_sql, QueryComponent::Where));
            }
        }

        // GROUP BY / HAVING / ORDER BY
        let grouped: Vec<(usize, &QueryColumn)> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.skip_group_by)
            .collect();
        let group_by = !grouped.is_empty();

        if group_by {
            lines.push(line("GROUP BY", QueryComponent::GroupBy, LineRole::None));
            let mut group_lines: Vec<QueryLine> = grouped
                .iter()
                .map(|(i, c)| line(&c.dimension.select_sql, QueryComponent::GroupBy, role_of(*i)))
                .collect();
            with_trailing_commas(&mut group_lines);
            lines.extend(group_lines);
        }

        if let Some(having) = &self.having_sql {
            lines.push(line("HAVING", QueryComponent::Having, LineRole::None));
            lines.push(line(having, QueryComponent::Having, LineRole::None));
        }

        if group_by && self.write_order_by && pivot_index.is_none() {
            lines.push(line("ORDER BY", QueryComponent::OrderBy, LineRole::None));
            match &top_x {
                Some(t) => {
                    let order_expr = t
                        .order_by_dimension
                        .and_then(|id| columns.iter().find(|c| c.dimension.id == id))
                        .map(|c| c.dimension.select_sql.clone())
                        .or_else(|| count_expr.clone());
                    if let Some(expr) = order_expr {
                        lines.push(line(
                            &format!("{} {}", expr, t.direction.keyword()),
                            QueryComponent::OrderBy,
                            LineRole::TopX,
                        ));
                    }
                }
                None => {
                    let mut order_lines: Vec<QueryLine> = grouped
                        .iter()
                        .map(|(i, c)| line(&c.dimension.select_sql, QueryComponent::OrderBy, role_of(*i)))
                        .collect();
                    with_trailing_commas(&mut order_lines);
                    lines.extend(order_lines);
                }
            }
        }

        if let Some(postfix) = top_x.as_ref().and_then(|t| dialect.top_x_postfix(t.top_x)) {
            lines.push(line(&postfix, QueryComponent::Postfix, LineRole::TopX));
        }

        // custom lines slot in after the builder's lines of the same clause
        lines.extend(self.custom_lines.iter().cloned());
        lines.sort_by_key(|l| l.component);

        if self.write_parameters {
            let declarations: Vec<QueryLine> = params
                .final_parameters()
                .iter()
                .map(|p| QueryLine::new(dialect.declare_parameter(p), QueryComponent::VariableDeclaration))
                .collect();
            lines.splice(0..0, declarations);
        }
        lines.retain(|l| !l.fragment.is_blank());

        let pivot = pivot_index.map(|i| PivotColumn {
            select_sql: columns[i].dimension.select_sql.clone(),
            count_sql: count_expr.clone().unwrap_or_else(|| "count(*)".to_string()),
            top_x: self.top_x.clone(),
        });

        debug!(aggregate = %self.name, dialect = %dialect, lines = lines.len(), "built aggregate");

        Ok(BuiltAggregate {
            name: self.name.clone(),
            lines,
            dialect,
            axis,
            pivot,
            parameters: params,
        })
    }
}

/// Every line but the last ends with a comma.
fn with_trailing_commas(lines: &mut [QueryLine]) {
    let n = lines.len();
    for l in lines.iter_mut().take(n.saturating_sub(1)) {
        l.fragment.push_str(",");
    }
}

#[derive(Debug, Clone)]
struct PivotColumn {
    select_sql: String,
    count_sql: String,
    top_x: Option<TopX>,
}

/// A validated aggregate: tagged lines plus the parameters they use.
#[derive(Debug, Clone)]
pub struct BuiltAggregate {
    name: String,
    lines: Vec<QueryLine>,
    dialect: Dialect,
    axis: Option<AxisSpec>,
    pivot: Option<PivotColumn>,
    parameters: ParameterManager,
}

impl BuiltAggregate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[QueryLine] {
        &self.lines
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn axis(&self) -> Option<&AxisSpec> {
        self.axis.as_ref()
    }

    pub fn has_pivot(&self) -> bool {
        self.pivot.is_some()
    }

    pub fn parameter_manager(&self) -> &ParameterManager {
        &self.parameters
    }

    pub fn into_parameter_manager(self) -> ParameterManager {
        self.parameters
    }

    /// Fold the parameters of a subquery embedded in a custom line into this
    /// aggregate, renaming its placeholders where names collide.
    pub fn import_subquery(&mut self, child: &ParameterManager) -> QueryResult<()> {
        let renames = self.parameters.import_and_elevate(child)?;
        for line in &mut self.lines {
            line.fragment.apply_renames(&renames);
        }
        Ok(())
    }

    /// The statement as a fragment. Pivot aggregates need their values; see
    /// [`Self::pivot_values_query`].
    pub fn fragment(&self) -> QueryResult<SqlFragment> {
        self.dialect.build_aggregate(&self.lines, self.axis.as_ref(), None)
    }

    pub fn fragment_with_pivot_values(&self, values: &[String]) -> QueryResult<SqlFragment> {
        self.dialect
            .build_aggregate(&self.lines, self.axis.as_ref(), Some(values))
    }

    /// Substitute parameter usages the way the dialect wants them.
    pub fn render(&self, fragment: &SqlFragment) -> String {
        render_fragment(self.dialect, &self.parameters, fragment)
    }

    pub fn sql(&self) -> QueryResult<String> {
        Ok(self.render(&self.fragment()?))
    }

    pub fn sql_with_pivot_values(&self, values: &[String]) -> QueryResult<String> {
        Ok(self.render(&self.fragment_with_pivot_values(values)?))
    }

    /// Query listing the distinct pivot values, most significant first when
    /// a top x applies. `None` without a pivot.
    pub fn pivot_values_query(&self) -> Option<String> {
        let pivot = self.pivot.as_ref()?;
        let dialect = self.dialect;
        let mut out: Vec<SqlFragment> = Vec::new();

        let of = |component: QueryComponent| {
            self.lines
                .iter()
                .filter(move |l| l.component == component)
                .map(|l| l.fragment.clone())
        };

        out.extend(of(QueryComponent::VariableDeclaration));
        out.push(SqlFragment::text("SELECT"));
        let top = pivot.top_x.as_ref();
        if let Some(prefix) = top.and_then(|t| dialect.top_x_prefix(t.top_x)) {
            out.push(SqlFragment::text(prefix));
        }
        out.push(SqlFragment::text(pivot.select_sql.clone()));
        out.extend(of(QueryComponent::From));
        out.extend(of(QueryComponent::JoinInfoJoin));
        out.extend(of(QueryComponent::Where));
        out.push(SqlFragment::text(format!("GROUP BY\n{}", pivot.select_sql)));
        match top {
            Some(t) => {
                out.push(SqlFragment::text(format!(
                    "ORDER BY\n{} {}",
                    pivot.count_sql,
                    t.direction.keyword()
                )));
                if let Some(postfix) = dialect.top_x_postfix(t.top_x) {
                    out.push(SqlFragment::text(postfix));
                }
            }
            None => out.push(SqlFragment::text(format!("ORDER BY\n{}", pivot.select_sql))),
        }

        let scope = self.parameters.scope();
        let fragment = SqlFragment::join(out.iter(), "\n");
        // pivot and count text was written literally; pick up their parameters
        let fragment = SqlFragment::parse(&fragment.to_string(), scope);
        Some(self.render(&fragment))
    }
}

/// Render a fragment, resolving parameters against `parameters` by name.
pub fn render_fragment(dialect: Dialect, parameters: &ParameterManager, fragment: &SqlFragment) -> String {
    fragment.render_with(|p| dialect.render_parameter(&p.name, parameters.resolve(&p.name)))
}
