use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use sieve::cache::{ResultCache, SqliteResultCache};
use sieve::compiler::{
    CacheHitPolicy, CohortCompiler, CompilationState, CompileError, CompilerOptions,
    ExecutionError, ExecutionResult, QueryExecutor, RunPhase,
};
use sieve::model::{
    AggregateConfiguration, AggregateDimension, Catalogue, CohortConfiguration, CohortContainer,
    JoinDirection, Joinable, JoinableUse, NodeKey, SetOperation, TableInfo,
};
use sieve::query::QueryBuildingError;
use sieve::results::{Identifier, IdentifierSet};
use sieve::sql::Dialect;

/// Answers with fixed identifiers. Statements starting with `fail` error,
/// statements starting with `gate` block until released, and `hang` waits
/// for cancellation or the timeout.
#[derive(Default)]
struct ScriptedExecutor {
    fail: Option<&'static str>,
    gate: Option<&'static str>,
    hang: bool,
    started: Arc<Notify>,
    release: Arc<Notify>,
    calls: AtomicUsize,
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn fetch_identifiers(
        &self,
        sql: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ExecutionResult<IdentifierSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.is_some_and(|m| sql.starts_with(m)) {
            return Err(ExecutionError::Database("syntax error".into()));
        }
        if self.gate.is_some_and(|m| sql.starts_with(m)) {
            self.started.notify_one();
            self.release.notified().await;
        }
        if self.hang {
            self.started.notify_one();
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                _ = tokio::time::sleep(timeout) => return Err(ExecutionError::Timeout(timeout)),
            }
        }
        Ok([Identifier::Int(1), Identifier::Int(2)].into_iter().collect())
    }
}

fn configuration() -> Arc<CohortConfiguration> {
    let chi = |id| AggregateDimension::new(id, 1, "people.chi").identifier();
    Arc::new(CohortConfiguration {
        id: 1,
        name: "study".into(),
        catalogue: Catalogue {
            tables: vec![TableInfo::new(1, "people", Dialect::Sqlite).primary()],
            joins: Vec::new(),
        },
        root: CohortContainer::new(1, "root", SetOperation::Union)
            .with_aggregate(
                AggregateConfiguration::new(1, "A")
                    .with_dimension(chi(1))
                    .joined_to(JoinableUse {
                        joinable: 4,
                        direction: JoinDirection::Left,
                    }),
            )
            .with_aggregate(AggregateConfiguration::new(2, "B").with_order(1).with_dimension(chi(2))),
        joinables: vec![Joinable {
            id: 4,
            aggregate: AggregateConfiguration::new(40, "index").with_dimension(chi(40)),
        }],
        parameters: Vec::new(),
    })
}

fn compiler(executor: ScriptedExecutor) -> (Arc<CohortCompiler>, Arc<ScriptedExecutor>) {
    let executor = Arc::new(executor);
    let compiler = CohortCompiler::new(configuration(), executor.clone());
    (Arc::new(compiler), executor)
}

const SECONDS: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_run_all_reports_every_node() {
    let (compiler, _) = compiler(ScriptedExecutor::default());
    let report = compiler.run_all().await.unwrap();

    assert_eq!(
        report.keys().copied().collect::<Vec<_>>(),
        vec![
            NodeKey::Leaf(1),
            NodeKey::Leaf(2),
            NodeKey::SetOp(1),
            NodeKey::JoinSource(4),
        ]
    );
    assert!(report.values().all(|s| s.state == CompilationState::Finished));
    assert_eq!(compiler.phase(), RunPhase::Finished);
    assert_eq!(compiler.alive_count(), 0);
}

#[tokio::test]
async fn test_dependent_waits_for_patient_index_table() {
    let (compiler, executor) = compiler(ScriptedExecutor {
        gate: Some("/*index*/"),
        ..ScriptedExecutor::default()
    });

    let run = {
        let compiler = compiler.clone();
        tokio::spawn(async move { compiler.launch_single_task(NodeKey::Leaf(1), SECONDS).await })
    };

    executor.started.notified().await;
    assert_eq!(compiler.state_of(NodeKey::JoinSource(4)), CompilationState::Executing);
    assert_eq!(compiler.state_of(NodeKey::Leaf(1)), CompilationState::NotScheduled);

    executor.release.notify_one();
    let status = run.await.unwrap().unwrap();
    assert_eq!(status.state, CompilationState::Finished);
    assert_eq!(compiler.state_of(NodeKey::JoinSource(4)), CompilationState::Finished);
}

#[tokio::test]
async fn test_crashed_patient_index_table_crashes_dependents() {
    let (compiler, _) = compiler(ScriptedExecutor {
        fail: Some("/*index*/"),
        ..ScriptedExecutor::default()
    });
    let report = compiler.run_all().await.unwrap();

    assert_eq!(report[&NodeKey::JoinSource(4)].state, CompilationState::Crashed);
    let leaf = &report[&NodeKey::Leaf(1)];
    assert_eq!(leaf.state, CompilationState::Crashed);
    assert!(matches!(
        leaf.error.as_deref(),
        Some(CompileError::DependencyFailed {
            node: NodeKey::Leaf(1),
            dependency: NodeKey::JoinSource(4),
        })
    ));
    assert_eq!(report[&NodeKey::Leaf(2)].state, CompilationState::Finished);
    assert_eq!(report[&NodeKey::SetOp(1)].state, CompilationState::Crashed);
}

#[tokio::test]
async fn test_second_run_is_rejected_while_running() {
    let (compiler, executor) = compiler(ScriptedExecutor {
        gate: Some("/*index*/"),
        ..ScriptedExecutor::default()
    });

    let first = {
        let compiler = compiler.clone();
        tokio::spawn(async move { compiler.run_all().await })
    };
    executor.started.notified().await;

    assert!(matches!(compiler.run_all().await, Err(CompileError::AlreadyRunning)));

    executor.release.notify_one();
    assert!(first.await.unwrap().is_ok());
    // the guard is released once the run ends
    executor.release.notify_one();
    assert!(compiler.run_all().await.is_ok());
}

#[tokio::test]
async fn test_cancel_all_stops_a_run() {
    let (compiler, executor) = compiler(ScriptedExecutor {
        hang: true,
        ..ScriptedExecutor::default()
    });

    let run = {
        let compiler = compiler.clone();
        tokio::spawn(async move { compiler.run_all().await })
    };
    executor.started.notified().await;

    assert!(compiler.cancel_all_tasks(false) >= 1);
    let result = run.await.unwrap();
    assert!(matches!(result, Err(CompileError::RunCancelled)));
    assert_eq!(compiler.phase(), RunPhase::Cancelled);

    let index = compiler.get_task(NodeKey::JoinSource(4)).unwrap().status();
    assert_eq!(index.state, CompilationState::Crashed);
    assert!(matches!(index.error.as_deref(), Some(CompileError::Cancelled(_))));
    assert_eq!(compiler.alive_count(), 0);
}

#[tokio::test]
async fn test_timeout_crashes_task() {
    let executor = Arc::new(ScriptedExecutor {
        hang: true,
        ..ScriptedExecutor::default()
    });
    let compiler = CohortCompiler::new(configuration(), executor);

    let status = compiler
        .launch_single_task(NodeKey::Leaf(2), Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(status.state, CompilationState::Crashed);
    assert!(matches!(
        status.error.as_deref(),
        Some(CompileError::TimedOut {
            node: NodeKey::Leaf(2),
            ..
        })
    ));
}

#[tokio::test]
async fn test_identical_statements_come_from_cache() {
    let cache = Arc::new(SqliteResultCache::open_in_memory().unwrap());
    let executor = Arc::new(ScriptedExecutor::default());
    let compiler = CohortCompiler::new(configuration(), executor.clone())
        .with_cache(cache.clone())
        .with_options(CompilerOptions {
            cache_hit_policy: CacheHitPolicy::WhenIdentical,
            ..CompilerOptions::default()
        });

    let report = compiler.run_all().await.unwrap();
    assert!(report[&NodeKey::Leaf(2)].cached);
    assert!(!report[&NodeKey::SetOp(1)].cached);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 4);

    let leaf_sql = compiler.get_task(NodeKey::Leaf(2)).unwrap().sql().to_string();
    assert!(cache.has_cached_results(&leaf_sql).unwrap());

    let report = compiler.run_all().await.unwrap();
    assert!(report[&NodeKey::Leaf(1)].from_cache);
    assert!(report[&NodeKey::Leaf(2)].from_cache);
    assert!(report[&NodeKey::JoinSource(4)].from_cache);
    assert!(!report[&NodeKey::SetOp(1)].from_cache);
    // only the root total ran again
    assert_eq!(executor.calls.load(Ordering::SeqCst), 5);

    assert!(compiler.clear_cache_for(NodeKey::Leaf(2)).unwrap());
    assert!(!cache.has_cached_results(&leaf_sql).unwrap());
    assert!(compiler.get_task(NodeKey::Leaf(2)).is_none());

    // the node runs again rather than reporting its old result
    let status = compiler
        .launch_single_task(NodeKey::Leaf(2), SECONDS)
        .await
        .unwrap();
    assert_eq!(status.state, CompilationState::Finished);
    assert!(!status.from_cache);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 6);
    assert!(cache.has_cached_results(&leaf_sql).unwrap());
}

#[tokio::test]
async fn test_cache_written_but_not_read_by_default() {
    let cache = Arc::new(SqliteResultCache::open_in_memory().unwrap());
    let executor = Arc::new(ScriptedExecutor::default());
    let compiler = CohortCompiler::new(configuration(), executor.clone()).with_cache(cache.clone());

    compiler.run_all().await.unwrap();
    let report = compiler.run_all().await.unwrap();

    assert!(report.values().all(|s| !s.from_cache));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 8);
    assert_eq!(cache.stats().unwrap().entry_count, 3);
}

#[tokio::test]
async fn test_misconfigured_node_crashes_alone() {
    let mut config = (*configuration()).clone();
    config.root = config.root.with_aggregate(
        AggregateConfiguration::new(3, "bad")
            .with_order(2)
            .with_dimension(AggregateDimension::new(3, 1, "people.chi")),
    );
    let executor = Arc::new(ScriptedExecutor::default());
    let compiler = CohortCompiler::new(Arc::new(config), executor);

    let report = compiler.run_all().await.unwrap();

    assert_eq!(report[&NodeKey::Leaf(1)].state, CompilationState::Finished);
    assert_eq!(report[&NodeKey::Leaf(2)].state, CompilationState::Finished);
    assert_eq!(report[&NodeKey::JoinSource(4)].state, CompilationState::Finished);

    let bad = &report[&NodeKey::Leaf(3)];
    assert_eq!(bad.state, CompilationState::Crashed);
    assert!(matches!(
        bad.error.as_deref(),
        Some(CompileError::Query(QueryBuildingError::ExtractionIdentifier { .. }))
    ));

    let root = &report[&NodeKey::SetOp(1)];
    assert_eq!(root.state, CompilationState::Crashed);
    assert!(matches!(
        root.error.as_deref(),
        Some(CompileError::DependencyFailed {
            node: NodeKey::SetOp(1),
            dependency: NodeKey::Leaf(3),
        })
    ));
    assert_eq!(compiler.phase(), RunPhase::Finished);
}
