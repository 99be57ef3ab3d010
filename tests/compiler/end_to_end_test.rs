use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;

use sieve::cache::{ResultCache, SqliteResultCache};
use sieve::compiler::{
    CacheHitPolicy, CohortCompiler, CompilationState, CompilerOptions, SqliteExecutor,
};
use sieve::model::{
    AggregateConfiguration, AggregateDimension, Catalogue, CohortConfiguration, CohortContainer,
    Filter, FilterContainer, JoinDirection, Joinable, JoinableUse, NodeKey, SetOperation,
    SqlParameter, TableInfo,
};
use sieve::results::{Identifier, IdentifierSet};
use sieve::sql::Dialect;

fn database() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("study.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE people (chi INTEGER, code TEXT);
         INSERT INTO people VALUES (1, 'a'), (2, 'a'), (3, 'a'), (2, 'b'), (4, 'c');
         CREATE TABLE admissions (chi INTEGER, ward TEXT);
         INSERT INTO admissions VALUES (1, 'icu'), (3, 'general');",
    )
    .unwrap();
    (dir, path)
}

fn ids(values: &[i64]) -> IdentifierSet {
    values.iter().map(|v| Identifier::Int(*v)).collect()
}

fn by_code(id: u32, name: &str, order: i32, code: &str) -> AggregateConfiguration {
    AggregateConfiguration::new(id, name)
        .with_order(order)
        .with_dimension(AggregateDimension::new(id, 1, "people.chi").identifier().with_data_type("int"))
        .with_filter(FilterContainer::and().with_filter(
            Filter::new(id, "code", "people.code = @code")
                .with_parameter(SqlParameter::new("code", "varchar(5)", format!("'{}'", code))),
        ))
        .cohort_set()
}

fn configuration(operation: SetOperation, first: &str, second: &str) -> Arc<CohortConfiguration> {
    Arc::new(CohortConfiguration {
        id: 1,
        name: "study".into(),
        catalogue: Catalogue {
            tables: vec![
                TableInfo::new(1, "people", Dialect::Sqlite).primary(),
                TableInfo::new(2, "admissions", Dialect::Sqlite),
            ],
            joins: Vec::new(),
        },
        root: CohortContainer::new(1, "root", operation)
            .with_aggregate(by_code(1, first, 0, &first.to_lowercase()))
            .with_aggregate(by_code(2, second, 1, &second.to_lowercase())),
        joinables: Vec::new(),
        parameters: Vec::new(),
    })
}

async fn root_identifiers(path: &Path, config: Arc<CohortConfiguration>) -> IdentifierSet {
    let compiler = CohortCompiler::new(config, Arc::new(SqliteExecutor::new(path)));
    let report = compiler.run_all().await.unwrap();
    let root = &report[&NodeKey::SetOp(1)];
    assert_eq!(root.state, CompilationState::Finished, "{:?}", root.error);
    root.identifiers.as_deref().cloned().unwrap()
}

#[tokio::test]
async fn test_except_removes_second_set() {
    let (_dir, path) = database();
    let compiler = CohortCompiler::new(
        configuration(SetOperation::Except, "A", "B"),
        Arc::new(SqliteExecutor::new(&path)),
    );
    let report = compiler.run_all().await.unwrap();

    assert_eq!(report[&NodeKey::Leaf(1)].identifiers.as_deref(), Some(&ids(&[1, 2, 3])));
    assert_eq!(report[&NodeKey::Leaf(2)].identifiers.as_deref(), Some(&ids(&[2])));
    assert_eq!(report[&NodeKey::SetOp(1)].identifiers.as_deref(), Some(&ids(&[1, 3])));
}

#[tokio::test]
async fn test_only_except_depends_on_operand_order() {
    let (_dir, path) = database();

    assert_eq!(
        root_identifiers(&path, configuration(SetOperation::Except, "B", "A")).await,
        IdentifierSet::new()
    );
    for operation in [SetOperation::Union, SetOperation::Intersect] {
        let forward = root_identifiers(&path, configuration(operation, "A", "B")).await;
        let reverse = root_identifiers(&path, configuration(operation, "B", "A")).await;
        assert_eq!(forward, reverse);
    }
    assert_eq!(
        root_identifiers(&path, configuration(SetOperation::Intersect, "A", "B")).await,
        ids(&[2])
    );
}

#[tokio::test]
async fn test_patient_index_table_restricts_cohort() {
    let (_dir, path) = database();
    let mut config = (*configuration(SetOperation::Union, "A", "C")).clone();
    config.joinables.push(Joinable {
        id: 7,
        aggregate: AggregateConfiguration::new(70, "admitted")
            .with_dimension(AggregateDimension::new(71, 2, "admissions.chi").identifier())
            .with_dimension(AggregateDimension::new(72, 2, "admissions.ward")),
    });
    config.root = CohortContainer::new(1, "root", SetOperation::Union).with_aggregate(
        AggregateConfiguration::new(1, "A admitted")
            .with_dimension(AggregateDimension::new(1, 1, "people.chi").identifier())
            .with_filter(
                FilterContainer::and()
                    .with_filter(
                        Filter::new(1, "code", "people.code = @code")
                            .with_parameter(SqlParameter::new("code", "varchar(5)", "'a'")),
                    )
                    .with_filter(Filter::new(9, "admitted", "ix7.\"chi\" IS NOT NULL")),
            )
            .cohort_set()
            .joined_to(JoinableUse {
                joinable: 7,
                direction: JoinDirection::Left,
            }),
    );

    let compiler = CohortCompiler::new(Arc::new(config), Arc::new(SqliteExecutor::new(&path)));
    let report = compiler.run_all().await.unwrap();

    assert_eq!(report[&NodeKey::JoinSource(7)].identifiers.as_deref(), Some(&ids(&[1, 3])));
    assert_eq!(report[&NodeKey::Leaf(1)].identifiers.as_deref(), Some(&ids(&[1, 3])));
}

#[tokio::test]
async fn test_bad_sql_crashes_only_its_branch() {
    let (_dir, path) = database();
    let mut config = (*configuration(SetOperation::Union, "A", "B")).clone();
    config.root = CohortContainer::new(1, "root", SetOperation::Union)
        .with_aggregate(by_code(1, "A", 0, "a"))
        .with_container(
            CohortContainer::new(2, "broken", SetOperation::Union)
                .with_order(1)
                .with_aggregate(
                    AggregateConfiguration::new(3, "missing")
                        .with_dimension(AggregateDimension::new(3, 1, "people.nope").identifier())
                        .cohort_set(),
                ),
        );

    let compiler = CohortCompiler::new(Arc::new(config), Arc::new(SqliteExecutor::new(&path)))
        .with_options(CompilerOptions {
            include_cumulative_totals: true,
            ..CompilerOptions::default()
        });
    let report = compiler.run_all().await.unwrap();

    assert_eq!(report[&NodeKey::Leaf(1)].state, CompilationState::Finished);
    assert_eq!(report[&NodeKey::Leaf(3)].state, CompilationState::Crashed);
    assert_eq!(report[&NodeKey::SetOp(2)].state, CompilationState::Crashed);
    assert_eq!(report[&NodeKey::SetOp(1)].state, CompilationState::Crashed);
}

#[tokio::test]
async fn test_results_survive_in_cache() {
    let (dir, path) = database();
    let cache_path = dir.path().join("results.db");
    let config = configuration(SetOperation::Except, "A", "B");

    {
        let cache = Arc::new(SqliteResultCache::open(&cache_path).unwrap());
        let compiler = CohortCompiler::new(config.clone(), Arc::new(SqliteExecutor::new(&path)))
            .with_cache(cache);
        compiler.run_all().await.unwrap();
    }

    // drop the source rows; cached cohort sets still answer
    Connection::open(&path)
        .unwrap()
        .execute("DELETE FROM people WHERE code = 'b'", [])
        .unwrap();

    let cache = Arc::new(SqliteResultCache::open(&cache_path).unwrap());
    let compiler = CohortCompiler::new(config, Arc::new(SqliteExecutor::new(&path)))
        .with_cache(cache.clone())
        .with_options(CompilerOptions {
            cache_hit_policy: CacheHitPolicy::WhenIdentical,
            ..CompilerOptions::default()
        });
    let report = compiler.run_all().await.unwrap();

    let b = &report[&NodeKey::Leaf(2)];
    assert!(b.from_cache);
    assert_eq!(b.identifiers.as_deref(), Some(&ids(&[2])));

    // the total runs against the live table
    assert_eq!(report[&NodeKey::SetOp(1)].identifiers.as_deref(), Some(&ids(&[1, 2, 3])));

    let sql = compiler.get_task(NodeKey::Leaf(2)).unwrap().sql().to_string();
    let cached = cache.cached_results(&sql).unwrap().unwrap();
    assert_eq!(cached.column.name, "chi");
    assert_eq!(cached.column.data_type, "int");
}
