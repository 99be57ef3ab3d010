//! Cohort compiler: runs every node of a cohort tree and tracks its state.
//!
//! One [`CompilationTask`] exists per node. Tasks are created the first
//! time a node is asked for and live until cancelled with removal, so a
//! crashed or finished node is only re-run after an explicit reset.
//!
//! A full run goes through fixed phases:
//!
//! ```text
//! RunningJoinableTasks  ─► CachingJoinableTasks      patient index tables
//! RunningAggregateTasks ─► CachingAggregateTasks     cohort sets
//! RunningFinalTotals                                 root (and sub-containers)
//! ```
//!
//! Each phase is a barrier: every task in it is Finished or Crashed before
//! the next phase starts. Tasks inside a phase run concurrently.

mod error;
mod executor;
mod state;
mod task;

pub use error::{CompileError, CompileResult};
pub use executor::{ExecutionError, ExecutionResult, QueryExecutor, SqliteExecutor};
pub use state::{CompilationState, RunPhase, TaskStatus};
pub use task::{CompilationTask, CompiledStatement};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::model::{CohortConfiguration, ContainerId, NodeKey};
use crate::query::CohortQueryBuilder;
use crate::results::IdentifierSet;

/// Extra wait past a query's own timeout before the compiler gives up on an
/// executor that ignored it.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// When a cached result may stand in for running a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHitPolicy {
    /// Always run; the cache is only written.
    #[default]
    Never,
    /// Use a cached result whose isolated SQL, parameter values included,
    /// is identical.
    WhenIdentical,
}

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Applied to every query.
    pub timeout: Duration,
    /// Execute every sub-container too, not only the root.
    pub include_cumulative_totals: bool,
    pub cache_hit_policy: CacheHitPolicy,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            include_cumulative_totals: false,
            cache_hit_policy: CacheHitPolicy::Never,
        }
    }
}

/// Resets the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CohortCompiler {
    config: Arc<CohortConfiguration>,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<Arc<dyn ResultCache>>,
    options: CompilerOptions,
    tasks: DashMap<NodeKey, Arc<CompilationTask>>,
    phase: watch::Sender<RunPhase>,
    running: AtomicBool,
    run_token: Mutex<Option<CancellationToken>>,
}

impl CohortCompiler {
    pub fn new(config: Arc<CohortConfiguration>, executor: Arc<dyn QueryExecutor>) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            config,
            executor,
            cache: None,
            options: CompilerOptions::default(),
            tasks: DashMap::new(),
            phase,
            running: AtomicBool::new(false),
            run_token: Mutex::new(None),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &CohortConfiguration {
        &self.config
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    // =========================================================================
    // Task registry
    // =========================================================================

    /// The existing task for `key`, if any.
    pub fn get_task(&self, key: NodeKey) -> Option<Arc<CompilationTask>> {
        self.tasks.get(&key).map(|t| Arc::clone(t.value()))
    }

    /// The task for `key`, building its SQL on first encounter.
    ///
    /// Configuration errors surface here, before anything runs.
    pub fn add_task(&self, key: NodeKey) -> CompileResult<Arc<CompilationTask>> {
        if let Some(task) = self.get_task(key) {
            return Ok(task);
        }
        let task = Arc::new(self.build_task(key)?);
        let entry = self.tasks.entry(key).or_insert(task);
        Ok(Arc::clone(entry.value()))
    }

    /// Like [`add_task`](Self::add_task), but a node whose SQL cannot be
    /// built gets a Crashed task carrying the error instead.
    fn add_task_or_crash(&self, key: NodeKey) -> Arc<CompilationTask> {
        match self.add_task(key) {
            Ok(task) => task,
            Err(e) => {
                // a node built over a crashed one is blamed on that one
                let dependencies = self.dependencies_of(key);
                let error = match dependencies
                    .iter()
                    .find(|d| self.state_of(**d) == CompilationState::Crashed)
                {
                    Some(dependency) => CompileError::DependencyFailed {
                        node: key,
                        dependency: *dependency,
                    },
                    None => e,
                };
                warn!(node = %key, error = %error, "node cannot be compiled");
                let task = Arc::new(CompilationTask::unbuildable(
                    key,
                    self.node_name(key),
                    self.parent_of(key),
                    dependencies,
                    error,
                ));
                let entry = self.tasks.entry(key).or_insert(task);
                Arc::clone(entry.value())
            }
        }
    }

    fn build_task(&self, key: NodeKey) -> CompileResult<CompilationTask> {
        let sql = CohortQueryBuilder::new(&self.config).node_sql(key)?;
        let name = self.node_name(key);
        debug!(node = %key, name = %name, "created compilation task");
        Ok(CompilationTask::new(
            key,
            name,
            sql.into(),
            self.parent_of(key),
            self.dependencies_of(key),
        ))
    }

    fn node_name(&self, key: NodeKey) -> String {
        self.config.node_name(key).unwrap_or_default().to_string()
    }

    fn parent_of(&self, key: NodeKey) -> Option<(ContainerId, bool)> {
        self.config
            .root
            .parent_of(key)
            .map(|(container, first)| (container.id, first))
    }

    fn dependencies_of(&self, key: NodeKey) -> Vec<NodeKey> {
        match key {
            NodeKey::Leaf(id) => self
                .config
                .aggregate(id)
                .and_then(|a| a.join_to)
                .map(|use_| vec![NodeKey::JoinSource(use_.joinable)])
                .unwrap_or_default(),
            NodeKey::SetOp(id) => self
                .config
                .container(id)
                .map(|c| {
                    c.aggregates_recursive()
                        .iter()
                        .map(|a| NodeKey::Leaf(a.id))
                        .collect()
                })
                .unwrap_or_default(),
            NodeKey::JoinSource(_) => Vec::new(),
        }
    }

    /// NotScheduled for nodes without a task.
    pub fn state_of(&self, key: NodeKey) -> CompilationState {
        self.get_task(key)
            .map(|t| t.state())
            .unwrap_or(CompilationState::NotScheduled)
    }

    /// Tasks currently scheduled or executing.
    pub fn alive_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.state().is_active()).count()
    }

    /// Status of every known task.
    pub fn snapshot(&self) -> BTreeMap<NodeKey, TaskStatus> {
        self.tasks
            .iter()
            .map(|t| (*t.key(), t.value().status()))
            .collect()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run one node, first running (or waiting for) the patient index table
    /// it joins to. The node stays NotScheduled while it waits.
    pub async fn launch_single_task(
        &self,
        key: NodeKey,
        timeout: Duration,
    ) -> CompileResult<TaskStatus> {
        let task = self.add_task(key)?;
        self.launch(&task, timeout).await;

        let mut ran = vec![Arc::clone(&task)];
        ran.extend(task.dependencies().iter().filter_map(|d| self.get_task(*d)));
        self.commit_finished(&ran);
        Ok(task.status())
    }

    /// Run `keys` concurrently and return once every one is Finished or
    /// Crashed, with cacheable results committed. A node whose SQL cannot
    /// be built is Crashed with the configuration error.
    pub async fn run_batch(&self, keys: &[NodeKey], timeout: Duration) -> Vec<Arc<CompilationTask>> {
        let tasks = self.execute_batch(keys, timeout).await;
        self.commit_finished(&tasks);
        tasks
    }

    async fn execute_batch(&self, keys: &[NodeKey], timeout: Duration) -> Vec<Arc<CompilationTask>> {
        let tasks: Vec<_> = keys.iter().map(|key| self.add_task_or_crash(*key)).collect();
        join_all(tasks.iter().map(|task| self.launch(task, timeout))).await;
        tasks
    }

    async fn launch(&self, task: &Arc<CompilationTask>, timeout: Duration) {
        if task.state().is_terminal() {
            return;
        }
        for dep_key in task.dependencies() {
            if !matches!(dep_key, NodeKey::JoinSource(_)) {
                continue;
            }
            let dep = self.add_task_or_crash(*dep_key);
            if dep.try_schedule() {
                self.execute(&dep, timeout).await;
            } else {
                dep.wait_terminal().await;
            }
        }

        if task.try_schedule() {
            self.execute(task, timeout).await;
        } else {
            task.wait_terminal().await;
        }
    }

    async fn execute(&self, task: &CompilationTask, timeout: Duration) {
        let started = Instant::now();
        if let Err(e) = task.begin() {
            warn!(node = %task.key(), error = %e, "task could not start");
            return;
        }
        debug!(node = %task.key(), "executing");

        let outcome = match self.run_statement(task, timeout).await {
            Ok((identifiers, from_cache)) => {
                info!(
                    node = %task.key(),
                    name = %task.name(),
                    rows = identifiers.len(),
                    from_cache,
                    "task finished"
                );
                task.finish(identifiers, from_cache, started.elapsed())
            }
            Err(e) => {
                warn!(node = %task.key(), name = %task.name(), error = %e, "task crashed");
                task.crash(e, started.elapsed())
            }
        };
        if let Err(e) = outcome {
            warn!(node = %task.key(), error = %e, "task state not updated");
        }
    }

    async fn run_statement(
        &self,
        task: &CompilationTask,
        timeout: Duration,
    ) -> CompileResult<(IdentifierSet, bool)> {
        let key = task.key();
        if task.is_cancelled() {
            return Err(CompileError::Cancelled(key));
        }

        for dep in task.dependencies() {
            let state = self.state_of(*dep);
            let failed = match dep {
                NodeKey::JoinSource(_) => state != CompilationState::Finished,
                _ => state == CompilationState::Crashed,
            };
            if failed {
                return Err(CompileError::DependencyFailed {
                    node: key,
                    dependency: *dep,
                });
            }
        }

        if let Some(identifiers) = self.cache_hit(task) {
            return Ok((identifiers, true));
        }

        let run = self
            .executor
            .fetch_identifiers(task.sql(), timeout, task.cancellation());
        match tokio::time::timeout(timeout + TIMEOUT_GRACE, run).await {
            Err(_) | Ok(Err(ExecutionError::Timeout(_))) => {
                Err(CompileError::TimedOut { node: key, timeout })
            }
            Ok(Err(ExecutionError::Cancelled)) => Err(CompileError::Cancelled(key)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(identifiers)) => Ok((identifiers, false)),
        }
    }

    fn cache_hit(&self, task: &CompilationTask) -> Option<IdentifierSet> {
        if self.options.cache_hit_policy != CacheHitPolicy::WhenIdentical || !task.is_cacheable() {
            return None;
        }
        let cache = self.cache.as_ref()?;
        match cache.cached_results(task.sql()) {
            Ok(Some(cached)) => {
                debug!(node = %task.key(), rows = cached.identifiers.len(), "cache hit");
                Some(cached.identifiers)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(node = %task.key(), error = %e, "cache lookup failed, running query");
                None
            }
        }
    }

    /// Write finished results to the cache. Failures are recorded on the
    /// task and do not change its state.
    fn commit_finished(&self, tasks: &[Arc<CompilationTask>]) {
        let Some(cache) = &self.cache else {
            return;
        };
        for task in tasks {
            if !task.is_cacheable() {
                continue;
            }
            let status = task.status();
            if status.state != CompilationState::Finished || status.from_cache || status.cached {
                continue;
            }
            let (Some(identifiers), Some(column)) =
                (status.identifiers, task.statement().identifier.as_ref())
            else {
                continue;
            };
            match cache.commit_results(task.sql(), column, &identifiers) {
                Ok(()) => task.mark_cached(),
                Err(e) => {
                    warn!(node = %task.key(), error = %e, "failed to cache results");
                    task.record_cache_error(e.to_string());
                }
            }
        }
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancel one task's execution. With `remove` the task is discarded so
    /// the next request for the node starts from NotScheduled; without it a
    /// task that has not yet run will crash as cancelled when launched.
    ///
    /// Returns whether the node had a task.
    pub fn cancel_task(&self, key: NodeKey, remove: bool) -> bool {
        let task = if remove {
            self.tasks.remove(&key).map(|(_, t)| t)
        } else {
            self.get_task(key)
        };
        match task {
            Some(task) => {
                task.cancel();
                info!(node = %key, remove, "cancelled task");
                true
            }
            None => false,
        }
    }

    /// Cancel whatever is running, including a [`run_all`](Self::run_all)
    /// between phases. Idle tasks are left alone unless `remove` discards
    /// them. Safe to call at any time; returns how many tasks were running.
    pub fn cancel_all_tasks(&self, remove: bool) -> usize {
        if let Some(token) = self
            .run_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            token.cancel();
        }

        let mut cancelled = 0;
        for task in self.tasks.iter() {
            if task.state().is_active() {
                task.cancel();
                cancelled += 1;
            }
        }
        if remove {
            self.tasks.clear();
        }
        if cancelled > 0 {
            info!(cancelled, remove, "cancelled running tasks");
        }
        cancelled
    }

    // =========================================================================
    // Full run
    // =========================================================================

    /// Discard all tasks and run the whole tree phase by phase.
    ///
    /// A crashed patient index table crashes its dependents; a crashed
    /// cohort set crashes the containers above it. Neither stops the run.
    pub async fn run_all(&self) -> CompileResult<BTreeMap<NodeKey, TaskStatus>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CompileError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        self.cancel_all_tasks(true);
        let token = CancellationToken::new();
        *self.run_token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        let result = self.run_phases(&token).await;

        *self.run_token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let end = match &result {
            Ok(_) => RunPhase::Finished,
            Err(_) if token.is_cancelled() => RunPhase::Cancelled,
            Err(_) => RunPhase::Idle,
        };
        self.set_phase(end);
        result
    }

    async fn run_phases(
        &self,
        token: &CancellationToken,
    ) -> CompileResult<BTreeMap<NodeKey, TaskStatus>> {
        let timeout = self.options.timeout;
        let root = &self.config.root;

        let joinables: Vec<NodeKey> = self
            .config
            .joinables
            .iter()
            .map(|j| NodeKey::JoinSource(j.id))
            .collect();
        let leaves: Vec<NodeKey> = root
            .aggregates_recursive()
            .iter()
            .map(|a| NodeKey::Leaf(a.id))
            .collect();
        let mut totals: Vec<NodeKey> = if self.options.include_cumulative_totals {
            root.subcontainers_recursive()
                .iter()
                .map(|c| NodeKey::SetOp(c.id))
                .collect()
        } else {
            Vec::new()
        };
        totals.push(NodeKey::SetOp(root.id));

        // in dependency order, so an unbuildable node's dependents can
        // name it
        for key in joinables.iter().chain(&leaves).chain(&totals) {
            self.add_task_or_crash(*key);
        }

        self.set_phase(RunPhase::RunningJoinableTasks);
        let done = self.execute_batch(&joinables, timeout).await;
        check_run(token)?;
        self.set_phase(RunPhase::CachingJoinableTasks);
        self.commit_finished(&done);

        self.set_phase(RunPhase::RunningAggregateTasks);
        let done = self.execute_batch(&leaves, timeout).await;
        check_run(token)?;
        self.set_phase(RunPhase::CachingAggregateTasks);
        self.commit_finished(&done);

        self.set_phase(RunPhase::RunningFinalTotals);
        self.execute_batch(&totals, timeout).await;
        check_run(token)?;

        Ok(self.snapshot())
    }

    fn set_phase(&self, phase: RunPhase) {
        info!(?phase, "compiler phase");
        self.phase.send_replace(phase);
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Drop the cached result for one node and discard its task, so the
    /// next request runs it afresh. Returns whether a cached result existed.
    pub fn clear_cache_for(&self, key: NodeKey) -> CompileResult<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        let sql = match self.get_task(key) {
            Some(task) => task.sql().to_string(),
            None => CohortQueryBuilder::new(&self.config).node_sql(key)?.isolated_sql,
        };
        self.cancel_task(key, true);
        Ok(cache.clear_results_for(&sql)?)
    }
}

fn check_run(token: &CancellationToken) -> CompileResult<()> {
    if token.is_cancelled() {
        Err(CompileError::RunCancelled)
    } else {
        Ok(())
    }
}
