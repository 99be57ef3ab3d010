//! Cohort SQL: one query per cohort set, combined with set operations.
//!
//! Each node produces two forms:
//!
//! - **nest-ready**: no declarations, placeholders still structured, ready to
//!   be folded into a parent UNION/INTERSECT/EXCEPT through
//!   [`CohortSql::nest_into`]
//! - **isolated**: declarations plus the rendered body; runnable on its own
//!   and the identity the result cache is keyed on
//!
//! ```text
//! /*Has diabetes*/                       <- leaf: SELECT distinct <identifier>
//! SELECT
//! distinct
//! results.chi
//! FROM ...
//! EXCEPT
//! /*Over 65*/
//! SELECT ...
//! LEFT JOIN (                            <- patient index table
//! /*Admissions*/ ...
//! ) ix3
//! ON results.chi = ix3."chi"
//! ```

use tracing::debug;

use super::aggregate::{render_fragment, AggregateRequest};
use super::error::{IdentifierProblem, QueryBuildingError, QueryResult};
use super::parameters::ParameterManager;
use crate::model::{
    AggregateConfiguration, AggregateDimension, Catalogue, CohortConfiguration, CohortContainer,
    CohortNode, JoinDirection, Joinable, NodeKey, SortDirection, SqlParameter, TopX,
};
use crate::results::IdentifierColumn;
use crate::sql::{Dialect, QueryComponent, QueryLine, SqlDialect, SqlFragment};

/// Adjustments to a cohort set's query.
#[derive(Debug, Clone, Default)]
pub struct CohortQueryArgs {
    /// Select this instead of the identifier, e.g. `count(*)`.
    pub override_select_list: Option<String>,
    /// Replaces `distinct`.
    pub override_limitation_sql: Option<String>,
    /// Keep only the first n rows.
    pub top_x: Option<u32>,
}

/// A patient index table to join a cohort set onto.
#[derive(Debug, Clone)]
pub struct JoinArgs {
    pub alias: String,
    pub direction: JoinDirection,
    /// Column of the patient index table to join on.
    pub join_on: String,
    pub sql: CohortSql,
}

/// SQL for one node of a cohort tree.
#[derive(Debug, Clone)]
pub struct CohortSql {
    pub nest_ready: SqlFragment,
    pub isolated_sql: String,
    pub parameters: ParameterManager,
    pub dialect: Dialect,
    pub identifier: Option<IdentifierColumn>,
}

impl CohortSql {
    fn new(
        nest_ready: SqlFragment,
        parameters: ParameterManager,
        dialect: Dialect,
        identifier: Option<IdentifierColumn>,
    ) -> Self {
        let isolated_sql = isolated(dialect, &parameters, &nest_ready);
        Self {
            nest_ready,
            isolated_sql,
            parameters,
            dialect,
            identifier,
        }
    }

    /// Fold this node's parameters into `parent` and return the body with
    /// its placeholders moved into the parent's scope.
    pub fn nest_into(&self, parent: &mut ParameterManager) -> QueryResult<SqlFragment> {
        let renames = parent.import_and_elevate(&self.parameters)?;
        Ok(self.nest_ready.with_renames(&renames))
    }

    /// Parameters the isolated SQL declares.
    pub fn parameter_values(&self) -> Vec<SqlParameter> {
        self.parameters.final_parameters()
    }
}

fn isolated(dialect: Dialect, parameters: &ParameterManager, body: &SqlFragment) -> String {
    let mut out = String::new();
    for p in parameters.final_parameters() {
        out.push_str(&dialect.declare_parameter(&p));
        out.push('\n');
    }
    out.push_str(&render_fragment(dialect, parameters, body));
    out
}

/// Builds nest-ready and isolated SQL for single cohort sets.
#[derive(Debug, Clone, Copy)]
pub struct CohortQueryBuilderHelper<'a> {
    catalogue: &'a Catalogue,
    globals: &'a [SqlParameter],
}

impl<'a> CohortQueryBuilderHelper<'a> {
    pub fn new(catalogue: &'a Catalogue, globals: &'a [SqlParameter]) -> Self {
        Self { catalogue, globals }
    }

    /// The single extraction identifier a cohort set selects.
    ///
    /// Patient index tables may carry further dimensions; ordinary cohort
    /// sets may not.
    pub fn check_acceptable(
        aggregate: &AggregateConfiguration,
        as_join_source: bool,
    ) -> QueryResult<&AggregateDimension> {
        let problem = |reason| QueryBuildingError::ExtractionIdentifier {
            aggregate: aggregate.name.clone(),
            reason,
        };

        let mut identifiers = aggregate.extraction_identifiers();
        let identifier = identifiers.next().ok_or_else(|| problem(IdentifierProblem::TooFew))?;
        if identifiers.next().is_some() {
            return Err(problem(IdentifierProblem::TooMany));
        }
        if !as_join_source && aggregate.dimensions.len() > 1 {
            return Err(problem(IdentifierProblem::TooManyDimensions));
        }
        Ok(identifier)
    }

    pub fn sql_for_aggregate(
        &self,
        aggregate: &AggregateConfiguration,
        as_join_source: bool,
        args: &CohortQueryArgs,
        join: Option<JoinArgs>,
    ) -> QueryResult<CohortSql> {
        let identifier = Self::check_acceptable(aggregate, as_join_source)?;

        let mut request = AggregateRequest::new(aggregate.name.clone(), self.catalogue)
            .with_globals(self.globals)
            .with_filter(aggregate.root_filter.clone().unwrap_or_default())
            .cohort_identification()
            .without_parameter_declarations()
            .without_order_by()
            .with_top_x(args.top_x.map(|n| TopX::by_count(n, SortDirection::Descending)));
        for p in &aggregate.parameters {
            request = request.with_parameter(p.clone());
        }
        for table in &aggregate.forced_joins {
            request = request.with_forced_join(*table);
        }

        let dimensions: Vec<&AggregateDimension> = if as_join_source {
            aggregate.dimensions.iter().collect()
        } else {
            vec![identifier]
        };

        match &aggregate.having_sql {
            Some(having) => {
                for d in dimensions {
                    request = request.with_column(d.clone());
                }
                request = request.with_having(having.clone());
                if let Some(count) = &aggregate.count_sql {
                    request = request.with_count(count.clone());
                }
            }
            None => {
                for d in dimensions {
                    request = request.with_skipped_column(d.clone());
                }
                request = request.with_limitation(
                    args.override_limitation_sql
                        .clone()
                        .unwrap_or_else(|| "distinct".to_string()),
                );
            }
        }
        if let Some(list) = &args.override_select_list {
            request = request.with_select_list(list.clone());
        }

        if let Some(join) = &join {
            // body stays structured; only the wrapper is literal text
            let mut fragment = SqlFragment::text(format!("{} JOIN (\n", join.direction.keyword()));
            fragment.append(&join.sql.nest_ready);
            fragment.push_str(&format!(
                "\n) {}\nON {} = {}.{}",
                join.alias,
                identifier.select_sql,
                join.alias,
                join.sql.dialect.quote_identifier(&join.join_on)
            ));
            debug!(aggregate = %aggregate.name, joinable = %join.alias, "joining patient index table");
            request = request.with_custom_line(QueryLine::new(fragment, QueryComponent::JoinInfoJoin));
        }

        let mut built = request.build()?;
        if let Some(join) = &join {
            if join.sql.dialect != built.dialect() {
                return Err(QueryBuildingError::MixedDialects {
                    name: aggregate.name.clone(),
                    dialects: vec![built.dialect().to_string(), join.sql.dialect.to_string()],
                });
            }
            built.import_subquery(&join.sql.parameters)?;
        }

        let nest_ready = built.fragment()?;
        let dialect = built.dialect();
        let identifier = IdentifierColumn::new(identifier.runtime_name(), identifier.data_type.clone());
        Ok(CohortSql::new(
            nest_ready,
            built.into_parameter_manager(),
            dialect,
            Some(identifier),
        ))
    }
}

/// SQL for the nodes of a whole cohort configuration.
#[derive(Debug, Clone, Copy)]
pub struct CohortQueryBuilder<'a> {
    config: &'a CohortConfiguration,
    helper: CohortQueryBuilderHelper<'a>,
}

impl<'a> CohortQueryBuilder<'a> {
    pub fn new(config: &'a CohortConfiguration) -> Self {
        Self {
            config,
            helper: CohortQueryBuilderHelper::new(&config.catalogue, &config.parameters),
        }
    }

    pub fn joinable_sql(&self, joinable: &Joinable) -> QueryResult<CohortSql> {
        self.helper
            .sql_for_aggregate(&joinable.aggregate, true, &CohortQueryArgs::default(), None)
    }

    pub fn aggregate_sql(
        &self,
        aggregate: &AggregateConfiguration,
        args: &CohortQueryArgs,
    ) -> QueryResult<CohortSql> {
        let join = match aggregate.join_to {
            None => None,
            Some(use_) => {
                let joinable = self.config.joinable(use_.joinable).ok_or_else(|| {
                    QueryBuildingError::UnknownJoinable {
                        aggregate: aggregate.name.clone(),
                        joinable: use_.joinable,
                    }
                })?;
                let join_on = joinable
                    .aggregate
                    .extraction_identifiers()
                    .next()
                    .ok_or_else(|| QueryBuildingError::JoinableWithoutIdentifier {
                        aggregate: joinable.aggregate.name.clone(),
                    })?
                    .runtime_name();
                Some(JoinArgs {
                    alias: joinable.alias(),
                    direction: use_.direction,
                    join_on,
                    sql: self.joinable_sql(joinable)?,
                })
            }
        };
        self.helper.sql_for_aggregate(aggregate, false, args, join)
    }

    /// UNION/INTERSECT/EXCEPT over a container's children in order.
    pub fn container_sql(&self, container: &CohortContainer) -> QueryResult<CohortSql> {
        let children = container.ordered_children();
        if children.is_empty() {
            return Err(QueryBuildingError::EmptyContainer {
                container: container.name.clone(),
            });
        }

        let mut manager = ParameterManager::with_globals(&self.config.parameters)?;
        let mut parts: Vec<SqlFragment> = Vec::new();
        let mut dialect: Option<Dialect> = None;
        let mut identifier: Option<IdentifierColumn> = None;

        for child in children {
            let (sql, part) = match child {
                CohortNode::Aggregate(a) => {
                    let sql = self.aggregate_sql(a, &CohortQueryArgs::default())?;
                    let part = sql.nest_into(&mut manager)?;
                    (sql, part)
                }
                CohortNode::Container(c) => {
                    let sql = self.container_sql(c)?;
                    let mut part = SqlFragment::text(format!(
                        "/*{}*/\nSELECT * FROM (\n",
                        c.name.replace("*/", "* /")
                    ));
                    part.append(&sql.nest_into(&mut manager)?);
                    part.push_str(&format!("\n) AS c{}", c.id));
                    (sql, part)
                }
            };

            match dialect {
                Some(d) if d != sql.dialect => {
                    return Err(QueryBuildingError::MixedDialects {
                        name: container.name.clone(),
                        dialects: vec![d.to_string(), sql.dialect.to_string()],
                    });
                }
                _ => dialect = Some(sql.dialect),
            }
            if identifier.is_none() {
                identifier = sql.identifier.clone();
            }
            parts.push(part);
        }

        let separator = format!("\n{}\n", container.operation.keyword());
        let body = SqlFragment::join(parts.iter(), &separator);
        Ok(CohortSql::new(
            body,
            manager,
            dialect.unwrap_or_default(),
            identifier,
        ))
    }

    /// SQL for any node of the tree.
    pub fn node_sql(&self, key: NodeKey) -> QueryResult<CohortSql> {
        let unknown = || QueryBuildingError::UnknownNode {
            node: key.to_string(),
        };
        match key {
            NodeKey::Leaf(id) => {
                let aggregate = self.config.aggregate(id).ok_or_else(unknown)?;
                self.aggregate_sql(aggregate, &CohortQueryArgs::default())
            }
            NodeKey::SetOp(id) => {
                let container = self.config.container(id).ok_or_else(unknown)?;
                self.container_sql(container)
            }
            NodeKey::JoinSource(id) => {
                let joinable = self.config.joinable(id).ok_or_else(unknown)?;
                self.joinable_sql(joinable)
            }
        }
    }

    /// The whole configuration as one runnable statement.
    pub fn final_sql(&self) -> QueryResult<String> {
        Ok(self.container_sql(&self.config.root)?.isolated_sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Filter, FilterContainer, JoinableUse, SetOperation, TableInfo,
    };

    fn config() -> CohortConfiguration {
        let catalogue = Catalogue {
            tables: vec![TableInfo::new(1, "people", Dialect::Sqlite).primary()],
            joins: Vec::new(),
        };
        let chi = |id| AggregateDimension::new(id, 1, "people.chi").identifier();
        let a = AggregateConfiguration::new(1, "A")
            .with_dimension(chi(1))
            .with_filter(FilterContainer::and().with_filter(
                Filter::new(1, "code", "people.code = @code")
                    .with_parameter(SqlParameter::new("code", "varchar(5)", "'a'")),
            ))
            .cohort_set();
        let b = AggregateConfiguration::new(2, "B")
            .with_order(1)
            .with_dimension(chi(2))
            .with_filter(FilterContainer::and().with_filter(
                Filter::new(2, "code", "people.code = @code")
                    .with_parameter(SqlParameter::new("code", "varchar(5)", "'b'")),
            ))
            .cohort_set();
        CohortConfiguration {
            id: 1,
            name: "cohort".into(),
            catalogue,
            root: CohortContainer::new(1, "root", SetOperation::Except)
                .with_aggregate(a)
                .with_aggregate(b),
            joinables: Vec::new(),
            parameters: Vec::new(),
        }
    }

    #[test]
    fn test_distinct_identifier() {
        let cfg = config();
        let builder = CohortQueryBuilder::new(&cfg);
        let sql = builder.node_sql(NodeKey::Leaf(1)).unwrap();
        assert_eq!(
            sql.isolated_sql,
            "/* @code varchar(5) = 'a' */\n/*A*/\nSELECT\ndistinct\npeople.chi\nFROM\npeople\nWHERE\n(\n/*code*/\npeople.code = 'a'\n)"
        );
        assert_eq!(sql.identifier.unwrap().name, "chi");
    }

    #[test]
    fn test_container_renames_colliding_parameters() {
        let cfg = config();
        let builder = CohortQueryBuilder::new(&cfg);
        let sql = builder.container_sql(&cfg.root).unwrap();

        let body = sql.nest_ready.to_string();
        assert!(body.contains("people.code = @code\n"));
        assert!(body.contains("people.code = @code_2\n"));
        assert!(body.contains("\nEXCEPT\n/*B*/"));
        assert!(sql.isolated_sql.contains("people.code = 'a'"));
        assert!(sql.isolated_sql.contains("people.code = 'b'"));
    }

    #[test]
    fn test_having_groups_by_identifier() {
        let mut cfg = config();
        cfg.root = CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(
            AggregateConfiguration::new(5, "repeat")
                .with_dimension(AggregateDimension::new(1, 1, "people.chi").identifier())
                .with_count("count(*)")
                .with_having("count(*) > 1")
                .cohort_set(),
        );
        let builder = CohortQueryBuilder::new(&cfg);
        let sql = builder.node_sql(NodeKey::Leaf(5)).unwrap().isolated_sql;
        assert_eq!(
            sql,
            "/*repeat*/\nSELECT\npeople.chi\nFROM\npeople\nGROUP BY\npeople.chi\nHAVING\ncount(*) > 1"
        );
    }

    #[test]
    fn test_join_to_patient_index_table() {
        let mut cfg = config();
        cfg.joinables.push(Joinable {
            id: 7,
            aggregate: AggregateConfiguration::new(70, "index")
                .with_dimension(AggregateDimension::new(9, 1, "people.chi").identifier())
                .with_dimension(AggregateDimension::new(10, 1, "people.dt"))
                .with_filter(FilterContainer::and().with_filter(
                    Filter::new(3, "code", "people.code = @code")
                        .with_parameter(SqlParameter::new("code", "varchar(5)", "'z'")),
                )),
        });
        cfg.root = CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(
            AggregateConfiguration::new(1, "A")
                .with_dimension(AggregateDimension::new(1, 1, "people.chi").identifier())
                .with_filter(FilterContainer::and().with_filter(
                    Filter::new(1, "code", "people.code = @code")
                        .with_parameter(SqlParameter::new("code", "varchar(5)", "'a'")),
                ))
                .joined_to(JoinableUse {
                    joinable: 7,
                    direction: JoinDirection::Left,
                }),
        );

        let builder = CohortQueryBuilder::new(&cfg);
        let sql = builder.node_sql(NodeKey::Leaf(1)).unwrap();
        let body = sql.nest_ready.to_string();
        assert!(body.contains("LEFT JOIN (\n/*index*/\nSELECT\ndistinct\npeople.chi,\npeople.dt\n"));
        assert!(body.contains(") ix7\nON people.chi = ix7.\"chi\""));
        assert!(body.contains("people.code = @code_2"));
        assert!(sql.isolated_sql.contains("people.code = 'z'"));
        assert!(sql.isolated_sql.contains("people.code = 'a'"));
    }

    #[test]
    fn test_identifier_problems() {
        let no_id = AggregateConfiguration::new(1, "x")
            .with_dimension(AggregateDimension::new(1, 1, "people.chi"));
        assert!(matches!(
            CohortQueryBuilderHelper::check_acceptable(&no_id, false),
            Err(QueryBuildingError::ExtractionIdentifier { reason: IdentifierProblem::TooFew, .. })
        ));

        let extra = AggregateConfiguration::new(2, "y")
            .with_dimension(AggregateDimension::new(1, 1, "people.chi").identifier())
            .with_dimension(AggregateDimension::new(2, 1, "people.dt"));
        assert!(matches!(
            CohortQueryBuilderHelper::check_acceptable(&extra, false),
            Err(QueryBuildingError::ExtractionIdentifier {
                reason: IdentifierProblem::TooManyDimensions,
                ..
            })
        ));
        assert!(CohortQueryBuilderHelper::check_acceptable(&extra, true).is_ok());
    }

    #[test]
    fn test_empty_container() {
        let mut cfg = config();
        cfg.root = CohortContainer::new(1, "empty", SetOperation::Union);
        let err = CohortQueryBuilder::new(&cfg).final_sql().unwrap_err();
        assert!(matches!(err, QueryBuildingError::EmptyContainer { .. }));
    }
}
