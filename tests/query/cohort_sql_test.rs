use insta::assert_snapshot;
use sieve::model::{
    AggregateConfiguration, AggregateDimension, Catalogue, CohortConfiguration, CohortContainer,
    Filter, FilterContainer, JoinDirection, Joinable, JoinableUse, NodeKey, SetOperation,
    SqlParameter, TableInfo,
};
use sieve::query::{CohortQueryArgs, CohortQueryBuilder, QueryBuildingError};
use sieve::sql::test_utils::validate_sql;
use sieve::sql::Dialect;

fn people() -> Catalogue {
    Catalogue {
        tables: vec![
            TableInfo::new(1, "people", Dialect::Sqlite).primary(),
            TableInfo::new(2, "remote_people", Dialect::Postgres).primary(),
        ],
        joins: Vec::new(),
    }
}

fn cohort_set(id: u32, name: &str, order: i32, code: &str) -> AggregateConfiguration {
    AggregateConfiguration::new(id, name)
        .with_order(order)
        .with_dimension(AggregateDimension::new(id, 1, "people.chi").identifier())
        .with_filter(FilterContainer::and().with_filter(
            Filter::new(id, "code", "people.code = @code")
                .with_parameter(SqlParameter::new("code", "varchar(5)", format!("'{}'", code))),
        ))
        .cohort_set()
}

fn configuration(root: CohortContainer) -> CohortConfiguration {
    CohortConfiguration {
        id: 1,
        name: "study".into(),
        catalogue: people(),
        root,
        joinables: Vec::new(),
        parameters: Vec::new(),
    }
}

#[test]
fn test_leaf_selects_distinct_identifier() {
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(cohort_set(1, "A", 0, "a")),
    );
    let sql = CohortQueryBuilder::new(&cfg).node_sql(NodeKey::Leaf(1)).unwrap();
    validate_sql(&sql.isolated_sql, Dialect::Sqlite).unwrap();
    assert_snapshot!(sql.isolated_sql, @r"
    /* @code varchar(5) = 'a' */
    /*A*/
    SELECT
    distinct
    people.chi
    FROM
    people
    WHERE
    (
    /*code*/
    people.code = 'a'
    )
    ");
}

#[test]
fn test_nested_container_is_wrapped() {
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Except)
            .with_aggregate(cohort_set(1, "A", 0, "a"))
            .with_container(
                CohortContainer::new(2, "either", SetOperation::Union)
                    .with_order(1)
                    .with_aggregate(cohort_set(2, "B", 0, "b"))
                    .with_aggregate(cohort_set(3, "C", 1, "c")),
            ),
    );

    let sql = CohortQueryBuilder::new(&cfg).final_sql().unwrap();
    validate_sql(&sql, Dialect::Sqlite).unwrap();

    assert!(sql.contains("\nEXCEPT\n/*either*/\nSELECT * FROM (\n/*B*/"));
    assert!(sql.contains("\nUNION\n/*C*/"));
    assert!(sql.ends_with("\n) AS c2"));
    assert!(sql.contains("people.code = 'a'"));
    assert!(sql.contains("people.code = 'b'"));
    assert!(sql.contains("people.code = 'c'"));
}

#[test]
fn test_children_follow_order_not_position() {
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Except)
            .with_aggregate(cohort_set(1, "A", 2, "a"))
            .with_aggregate(cohort_set(2, "B", 1, "b")),
    );

    let sql = CohortQueryBuilder::new(&cfg).final_sql().unwrap();
    let b = sql.find("/*B*/").unwrap();
    let a = sql.find("/*A*/").unwrap();
    assert!(b < a);
}

#[test]
fn test_isolated_sql_declares_every_parameter() {
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Intersect)
            .with_aggregate(cohort_set(1, "A", 0, "a"))
            .with_aggregate(cohort_set(2, "B", 1, "b")),
    );

    let sql = CohortQueryBuilder::new(&cfg).node_sql(NodeKey::SetOp(1)).unwrap();
    assert!(sql
        .isolated_sql
        .starts_with("/* @code varchar(5) = 'a' */\n/* @code_2 varchar(5) = 'b' */\n"));

    let names: Vec<String> = sql.parameter_values().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["code", "code_2"]);
}

#[test]
fn test_global_parameter_wins() {
    let mut cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Union)
            .with_aggregate(cohort_set(1, "A", 0, "a"))
            .with_aggregate(cohort_set(2, "B", 1, "b")),
    );
    cfg.parameters = vec![SqlParameter::new("code", "varchar(5)", "'g'")];

    let sql = CohortQueryBuilder::new(&cfg).final_sql().unwrap();
    assert_eq!(sql.matches("people.code = 'g'").count(), 2);
    assert!(!sql.contains("code_2"));
}

#[test]
fn test_leaf_with_patient_index_table() {
    let mut cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(
            cohort_set(1, "A", 0, "a").joined_to(JoinableUse {
                joinable: 4,
                direction: JoinDirection::Right,
            }),
        ),
    );
    cfg.joinables.push(Joinable {
        id: 4,
        aggregate: AggregateConfiguration::new(40, "admissions")
            .with_dimension(AggregateDimension::new(41, 1, "people.chi").identifier())
            .with_dimension(AggregateDimension::new(42, 1, "people.admitted")),
    });

    let builder = CohortQueryBuilder::new(&cfg);
    let leaf = builder.node_sql(NodeKey::Leaf(1)).unwrap();
    validate_sql(&leaf.isolated_sql, Dialect::Sqlite).unwrap();
    assert!(leaf.isolated_sql.contains("RIGHT JOIN (\n/*admissions*/"));
    assert!(leaf.isolated_sql.contains(") ix4\nON people.chi = ix4.\"chi\""));

    let index = builder.node_sql(NodeKey::JoinSource(4)).unwrap();
    assert!(index.isolated_sql.contains("people.chi,\npeople.admitted"));
    assert_eq!(index.identifier.unwrap().name, "chi");
}

#[test]
fn test_unknown_joinable() {
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(
            cohort_set(1, "A", 0, "a").joined_to(JoinableUse {
                joinable: 9,
                direction: JoinDirection::Left,
            }),
        ),
    );
    let err = CohortQueryBuilder::new(&cfg).final_sql().unwrap_err();
    assert!(matches!(err, QueryBuildingError::UnknownJoinable { joinable: 9, .. }));
}

#[test]
fn test_mixed_dialects_in_container() {
    let remote = AggregateConfiguration::new(2, "remote")
        .with_order(1)
        .with_dimension(AggregateDimension::new(2, 2, "remote_people.chi").identifier())
        .cohort_set();
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Union)
            .with_aggregate(cohort_set(1, "A", 0, "a"))
            .with_aggregate(remote),
    );
    let err = CohortQueryBuilder::new(&cfg).final_sql().unwrap_err();
    assert!(matches!(err, QueryBuildingError::MixedDialects { ref name, .. } if name == "root"));
}

#[test]
fn test_unknown_node() {
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(cohort_set(1, "A", 0, "a")),
    );
    let err = CohortQueryBuilder::new(&cfg).node_sql(NodeKey::Leaf(5)).unwrap_err();
    assert_eq!(err, QueryBuildingError::UnknownNode { node: "aggregate:5".into() });
}

#[test]
fn test_override_select_list_counts() {
    let cfg = configuration(
        CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(cohort_set(1, "A", 0, "a")),
    );
    let args = CohortQueryArgs {
        override_select_list: Some("count(*)".into()),
        override_limitation_sql: Some(String::new()),
        top_x: None,
    };
    let aggregate = cfg.aggregate(1).unwrap();
    let sql = CohortQueryBuilder::new(&cfg).aggregate_sql(aggregate, &args).unwrap();
    assert!(sql.isolated_sql.contains("/*A*/\nSELECT\ncount(*)\nFROM\npeople"));
}

#[test]
fn test_hashed_identifier_is_a_valid_cohort_set() {
    let hashed = AggregateConfiguration::new(1, "A")
        .with_dimension(AggregateDimension::new(1, 1, "people.chi").identifier().hashed())
        .cohort_set();
    let cfg = configuration(CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(hashed));

    let sql = CohortQueryBuilder::new(&cfg).node_sql(NodeKey::Leaf(1)).unwrap();
    validate_sql(&sql.isolated_sql, Dialect::Sqlite).unwrap();
    assert_eq!(sql.isolated_sql, "/*A*/\nSELECT\ndistinct\npeople.chi\nFROM\npeople");
}
