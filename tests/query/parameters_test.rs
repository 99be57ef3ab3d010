use sieve::model::{ParameterLevel, SqlParameter};
use sieve::query::{ParameterManager, QueryBuildingError};
use sieve::sql::{Dialect, SqlDialect, SqlFragment};

fn varchar(name: &str, value: &str) -> SqlParameter {
    SqlParameter::new(name, "varchar(10)", value)
}

fn render(fragment: &SqlFragment, dialect: Dialect, manager: &ParameterManager) -> String {
    fragment.render_with(|p| dialect.render_parameter(&p.name, manager.resolve(&p.name)))
}

#[test]
fn test_nested_subquery_keeps_its_own_values() {
    let mut parent = ParameterManager::new();
    parent
        .add_parameter(varchar("code", "'a'"), ParameterLevel::QueryLevel)
        .unwrap();
    let parent_body = SqlFragment::parse("people.code = @code", parent.scope());

    let mut child = ParameterManager::new();
    child
        .add_parameter(varchar("code", "'b'"), ParameterLevel::Filter)
        .unwrap();
    let child_body = SqlFragment::parse("other.code = @code AND other.note <> '@code'", child.scope());

    let renames = parent.import_and_elevate(&child).unwrap();
    let nested = child_body.with_renames(&renames);

    let names: Vec<&str> = nested.placeholders().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["code_2"]);
    assert!(nested.placeholders().all(|p| p.scope == parent.scope()));

    let combined = SqlFragment::join([&parent_body, &nested], "\nAND\n");
    assert_eq!(
        render(&combined, Dialect::Sqlite, &parent),
        "people.code = 'a'\nAND\nother.code = 'b' AND other.note <> '@code'"
    );
    assert_eq!(
        render(&combined, Dialect::TSql, &parent),
        "people.code = @code\nAND\nother.code = @code_2 AND other.note <> '@code'"
    );
}

#[test]
fn test_renames_leave_other_scopes_alone() {
    let mut parent = ParameterManager::new();
    parent
        .add_parameter(varchar("code", "'a'"), ParameterLevel::QueryLevel)
        .unwrap();
    let mut child = ParameterManager::new();
    child
        .add_parameter(varchar("code", "'b'"), ParameterLevel::QueryLevel)
        .unwrap();

    let renames = parent.import_and_elevate(&child).unwrap();
    let unrelated = SqlFragment::parse("x = @code", parent.scope());
    assert_eq!(unrelated.with_renames(&renames).to_string(), "x = @code");
}

#[test]
fn test_rendered_text_reparses_to_same_placeholders() {
    let scope = ParameterManager::new().scope();
    let original = SqlFragment::parse(
        "/* @ignored */ t.a = @first -- @comment\nAND t.b IN (@second, @@ROWCOUNT)",
        scope,
    );
    let names: Vec<&str> = original.placeholders().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);

    let reparsed = SqlFragment::parse(&original.to_string(), scope);
    assert_eq!(reparsed, original);
}

#[test]
fn test_global_overrides_every_scope() {
    let mut manager = ParameterManager::with_globals(&[varchar("dt", "'2001-01-01'")]).unwrap();
    manager
        .add_parameter(varchar("dt", "'1999-01-01'"), ParameterLevel::QueryLevel)
        .unwrap();
    manager
        .add_parameter(varchar("dt", "'1998-01-01'"), ParameterLevel::Filter)
        .unwrap();

    let finals = manager.final_parameters();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].value, "'2001-01-01'");

    manager.clear_non_globals();
    assert_eq!(manager.resolve("dt").unwrap().value, "'2001-01-01'");
}

#[test]
fn test_conflict_names_both_definitions() {
    let mut manager = ParameterManager::new();
    manager
        .add_parameter(varchar("code", "'a'"), ParameterLevel::TableInfo)
        .unwrap();
    let err = manager
        .add_parameter(
            SqlParameter::new("code", "int", "1"),
            ParameterLevel::TableInfo,
        )
        .unwrap_err();

    match &err {
        QueryBuildingError::ParameterConflict { name, first, second } => {
            assert_eq!(name, "code");
            assert!(first.contains("varchar(10)"));
            assert!(second.contains("int"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("@code"));
}

#[test]
fn test_declarations_follow_dialect() {
    let p = varchar("code", "'a'");
    assert_eq!(Dialect::Sqlite.declare_parameter(&p), "/* @code varchar(10) = 'a' */");
    assert!(Dialect::TSql.declare_parameter(&p).starts_with("DECLARE @code"));
}
