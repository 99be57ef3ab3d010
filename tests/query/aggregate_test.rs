use insta::assert_snapshot;
use sieve::model::{
    AggregateConfiguration, AggregateDimension, AxisIncrement, AxisSpec, Catalogue, ColumnKey,
    Filter, FilterContainer, JoinInfo, JoinKind, SortDirection, SqlParameter, TableInfo, TopX,
};
use sieve::query::{AggregateRequest, QueryBuildingError};
use sieve::sql::test_utils::validate_sql;
use sieve::sql::{Dialect, LineRole, QueryComponent};

fn catalogue(dialect: Dialect) -> Catalogue {
    Catalogue {
        tables: vec![
            TableInfo::new(1, "prescribing", dialect).primary(),
            TableInfo::new(2, "demography", dialect),
        ],
        joins: vec![JoinInfo {
            foreign_key: ColumnKey::new(1, "prescribing.chi"),
            primary_key: ColumnKey::new(2, "demography.chi"),
            join_type: JoinKind::Inner,
        }],
    }
}

fn month_axis() -> AxisSpec {
    AxisSpec::new("2001-01-01", "2001-12-31", AxisIncrement::Month)
}

#[test]
fn test_plain_aggregate_is_valid_sql() {
    let cat = catalogue(Dialect::Postgres);
    let built = AggregateRequest::new("drugs by year", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.drug").with_order(2))
        .with_column(AggregateDimension::new(2, 1, "prescribing.issue_year").with_order(1))
        .with_count("count(*)")
        .build()
        .unwrap();

    let sql = built.sql().unwrap();
    validate_sql(&sql, Dialect::Postgres).unwrap();
    assert_snapshot!(sql, @r"
    /*drugs by year*/
    SELECT
    prescribing.issue_year,
    prescribing.drug,
    count(*) AS MyCount
    FROM
    prescribing
    GROUP BY
    prescribing.issue_year,
    prescribing.drug
    ORDER BY
    prescribing.issue_year,
    prescribing.drug
    ");
}

#[test]
fn test_join_discovered_from_catalogue() {
    let cat = catalogue(Dialect::Postgres);
    let built = AggregateRequest::new("by sex", &cat)
        .with_column(AggregateDimension::new(1, 2, "demography.sex"))
        .with_count("count(*)")
        .with_forced_join(1)
        .build()
        .unwrap();

    let sql = built.sql().unwrap();
    validate_sql(&sql, Dialect::Postgres).unwrap();
    assert!(sql.contains(
        "FROM\nprescribing\nINNER JOIN demography ON prescribing.chi = demography.chi"
    ));
}

#[test]
fn test_having_is_rendered_after_group_by() {
    let cat = catalogue(Dialect::Postgres);
    let sql = AggregateRequest::new("frequent", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.drug"))
        .with_count("count(*)")
        .with_having("count(*) > 10")
        .build()
        .unwrap()
        .sql()
        .unwrap();

    let group_by = sql.find("GROUP BY").unwrap();
    let having = sql.find("HAVING").unwrap();
    assert!(group_by < having);
    validate_sql(&sql, Dialect::Postgres).unwrap();
}

#[test]
fn test_axis_groups_by_bucket_only() {
    let cat = catalogue(Dialect::Sqlite);
    let built = AggregateRequest::new("monthly", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_count("count(*)")
        .build()
        .unwrap();

    let sql = built.sql().unwrap();
    assert!(sql.starts_with("WITH RECURSIVE calendar AS ("));
    assert!(sql.contains(
        "GROUP BY\ndate(prescribing.dt, 'start of month')\n) dataset ON dataset.joinDt = calendar.joinDt"
    ));
    assert!(sql.ends_with("ORDER BY\ncalendar.joinDt"));
    assert_eq!(sql.matches("ORDER BY").count(), 1);

    // the count never reaches GROUP BY
    let group_by: Vec<_> = built
        .lines()
        .iter()
        .filter(|l| l.component == QueryComponent::GroupBy && l.role != LineRole::None)
        .collect();
    assert_eq!(group_by.len(), 1);
    assert_eq!(group_by[0].role, LineRole::Axis);
}

#[test]
fn test_axis_needs_exactly_two_columns() {
    let cat = catalogue(Dialect::Sqlite);
    let err = AggregateRequest::new("monthly", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_column(AggregateDimension::new(2, 1, "prescribing.drug"))
        .with_count("count(*)")
        .build()
        .unwrap_err();

    match err {
        QueryBuildingError::AxisColumnCount { aggregate, found, columns } => {
            assert_eq!(aggregate, "monthly");
            assert_eq!(found, 3);
            assert_eq!(columns.len(), 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_second_axis_is_rejected() {
    let cat = catalogue(Dialect::Sqlite);
    let err = AggregateRequest::new("monthly", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_column(AggregateDimension::new(2, 1, "prescribing.issued").with_axis(month_axis()))
        .with_count("count(*)")
        .build()
        .unwrap_err();

    let message = err.to_string();
    match err {
        QueryBuildingError::MultipleAxes { aggregate, first, second } => {
            assert_eq!(aggregate, "monthly");
            assert_eq!(first, "dt");
            assert_eq!(second, "issued");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(message.contains("'dt'"));
    assert!(message.contains("'issued'"));
}

#[test]
fn test_axis_and_pivot_need_exactly_three_columns() {
    let cat = catalogue(Dialect::Sqlite);
    let err = AggregateRequest::new("pivoted", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_column(AggregateDimension::new(2, 1, "prescribing.drug"))
        .with_pivot(2)
        .build()
        .unwrap_err();
    assert!(matches!(err, QueryBuildingError::PivotColumnCount { found: 2, .. }));
}

#[test]
fn test_pivot_without_axis_rejected() {
    let cat = catalogue(Dialect::Postgres);
    let err = AggregateRequest::new("pivot only", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.drug"))
        .with_count("count(*)")
        .with_pivot(1)
        .build()
        .unwrap_err();
    assert!(matches!(err, QueryBuildingError::PivotRequiresAxis { .. }));
}

#[test]
fn test_pivot_on_axis_rejected() {
    let cat = catalogue(Dialect::Postgres);
    let err = AggregateRequest::new("same column", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_count("count(*)")
        .with_pivot(1)
        .build()
        .unwrap_err();
    assert!(matches!(err, QueryBuildingError::AxisIsPivot { .. }));
}

#[test]
fn test_pivot_on_skipped_column_rejected() {
    let cat = catalogue(Dialect::Postgres);
    let err = AggregateRequest::new("skipped pivot", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_skipped_column(AggregateDimension::new(2, 1, "prescribing.drug"))
        .with_count("count(*)")
        .with_pivot(2)
        .build()
        .unwrap_err();

    match err {
        QueryBuildingError::PivotOnSkippedColumn { column, .. } => {
            assert_eq!(column, "drug");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_hashed_column_cannot_be_aggregated() {
    let cat = catalogue(Dialect::Postgres);
    let err = AggregateRequest::new("released", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.chi").hashed())
        .with_count("count(*)")
        .build()
        .unwrap_err();
    assert!(matches!(err, QueryBuildingError::HashOnDataRelease { .. }));
    assert!(err.to_string().contains("released"));
}

#[test]
fn test_pivot_renders_one_column_per_value() {
    let cat = catalogue(Dialect::Postgres);
    let built = AggregateRequest::new("by drug", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_column(AggregateDimension::new(2, 1, "prescribing.drug"))
        .with_count("count(*)")
        .with_pivot(2)
        .build()
        .unwrap();

    let values_query = built.pivot_values_query().unwrap();
    validate_sql(&values_query, Dialect::Postgres).unwrap();

    let sql = built
        .sql_with_pivot_values(&["aspirin".to_string(), "paracetamol".to_string()])
        .unwrap();
    assert!(sql.contains("count(CASE WHEN prescribing.drug = 'aspirin' THEN 1 END)"));
    assert!(sql.contains("count(CASE WHEN prescribing.drug = 'paracetamol' THEN 1 END)"));
}

#[test]
fn test_top_x_ignored_with_axis() {
    let cat = catalogue(Dialect::Postgres);
    let sql = AggregateRequest::new("monthly", &cat)
        .with_column(AggregateDimension::new(1, 1, "prescribing.dt").with_axis(month_axis()))
        .with_count("count(*)")
        .with_top_x(Some(TopX::by_count(5, SortDirection::Descending)))
        .build()
        .unwrap()
        .sql()
        .unwrap();
    assert!(!sql.contains("LIMIT"));
}

#[test]
fn test_configuration_round_trips_through_request() {
    let cat = catalogue(Dialect::Postgres);
    let config = AggregateConfiguration::new(4, "stored")
        .with_dimension(AggregateDimension::new(1, 1, "prescribing.drug"))
        .with_count("count(*)")
        .with_filter(FilterContainer::and().with_filter(
            Filter::new(1, "drug", "prescribing.drug = @drug")
                .with_parameter(SqlParameter::new("drug", "varchar(20)", "'aspirin'")),
        ));

    let sql = AggregateRequest::for_configuration(&config, &cat)
        .build()
        .unwrap()
        .sql()
        .unwrap();
    assert!(sql.starts_with("/* @drug varchar(20) = 'aspirin' */\n/*stored*/"));
    assert!(sql.contains("prescribing.drug = 'aspirin'"));
}
