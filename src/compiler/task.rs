//! One compilation task per cohort tree node.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::{CompileError, CompileResult};
use super::state::{CompilationState, TaskStatus};
use crate::model::{ContainerId, NodeKey, SqlParameter};
use crate::query::CohortSql;
use crate::results::{IdentifierColumn, IdentifierSet};
use crate::sql::Dialect;

/// The statement a task runs.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    /// Declarations plus body; also the result cache identity.
    pub sql: String,
    pub dialect: Dialect,
    pub identifier: Option<IdentifierColumn>,
    /// Parameter values the statement was built with.
    pub parameters: Vec<SqlParameter>,
}

impl From<CohortSql> for CompiledStatement {
    fn from(sql: CohortSql) -> Self {
        let parameters = sql.parameter_values();
        Self {
            sql: sql.isolated_sql,
            dialect: sql.dialect,
            identifier: sql.identifier,
            parameters,
        }
    }
}

/// A node's statement, its live status and its cancellation signal.
///
/// Status changes go through a watch channel: the executing future writes,
/// everyone else reads or waits.
#[derive(Debug)]
pub struct CompilationTask {
    key: NodeKey,
    name: String,
    statement: CompiledStatement,
    parent: Option<ContainerId>,
    is_first_in_container: bool,
    /// Nodes that must not have crashed for this one to run.
    dependencies: Vec<NodeKey>,
    status: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
}

impl CompilationTask {
    pub(crate) fn new(
        key: NodeKey,
        name: impl Into<String>,
        statement: CompiledStatement,
        parent: Option<(ContainerId, bool)>,
        dependencies: Vec<NodeKey>,
    ) -> Self {
        let (status, _) = watch::channel(TaskStatus::default());
        Self {
            key,
            name: name.into(),
            statement,
            parent: parent.map(|(id, _)| id),
            is_first_in_container: parent.map(|(_, first)| first).unwrap_or(false),
            dependencies,
            status,
            cancel: CancellationToken::new(),
        }
    }

    /// A task for a node whose SQL could not be built. It has no statement
    /// and is already Crashed with `error`.
    pub(crate) fn unbuildable(
        key: NodeKey,
        name: impl Into<String>,
        parent: Option<(ContainerId, bool)>,
        dependencies: Vec<NodeKey>,
        error: CompileError,
    ) -> Self {
        let statement = CompiledStatement {
            sql: String::new(),
            dialect: Dialect::default(),
            identifier: None,
            parameters: Vec::new(),
        };
        let task = Self::new(key, name, statement, parent, dependencies);
        let crashed = task.try_schedule()
            && task.begin().is_ok()
            && task.crash(error, Duration::ZERO).is_ok();
        debug_assert!(crashed, "fresh task must reach Crashed");
        task
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.statement.sql
    }

    pub fn statement(&self) -> &CompiledStatement {
        &self.statement
    }

    pub fn parent_container(&self) -> Option<ContainerId> {
        self.parent
    }

    /// First operand of its container; matters for EXCEPT.
    pub fn is_first_in_container(&self) -> bool {
        self.is_first_in_container
    }

    pub fn dependencies(&self) -> &[NodeKey] {
        &self.dependencies
    }

    /// Cohort sets and patient index tables are cached; container totals
    /// are not.
    pub fn is_cacheable(&self) -> bool {
        matches!(self.key, NodeKey::Leaf(_) | NodeKey::JoinSource(_))
            && self.statement.identifier.is_some()
    }

    pub fn state(&self) -> CompilationState {
        self.status.borrow().state
    }

    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    pub fn identifiers(&self) -> Option<Arc<IdentifierSet>> {
        self.status.borrow().identifiers.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    /// Wait until the task is Finished or Crashed.
    pub async fn wait_terminal(&self) -> TaskStatus {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(|s| s.state.is_terminal()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        status
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Move to `next`, applying `update` in the same step.
    fn advance(
        &self,
        next: CompilationState,
        update: impl FnOnce(&mut TaskStatus),
    ) -> CompileResult<()> {
        let mut result = Ok(());
        self.status.send_if_modified(|status| {
            if status.state.can_transition_to(next) {
                status.state = next;
                update(status);
                true
            } else {
                result = Err(CompileError::InvalidTransition {
                    node: self.key,
                    from: status.state,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Claim the task for execution. Only one caller wins.
    pub(crate) fn try_schedule(&self) -> bool {
        self.advance(CompilationState::Scheduled, |_| {}).is_ok()
    }

    pub(crate) fn begin(&self) -> CompileResult<()> {
        self.advance(CompilationState::Executing, |_| {})
    }

    pub(crate) fn finish(
        &self,
        identifiers: IdentifierSet,
        from_cache: bool,
        elapsed: Duration,
    ) -> CompileResult<()> {
        self.advance(CompilationState::Finished, |status| {
            status.identifiers = Some(Arc::new(identifiers));
            status.from_cache = from_cache;
            status.elapsed = Some(elapsed);
        })
    }

    pub(crate) fn crash(&self, error: CompileError, elapsed: Duration) -> CompileResult<()> {
        self.advance(CompilationState::Crashed, |status| {
            status.error = Some(Arc::new(error));
            status.elapsed = Some(elapsed);
        })
    }

    pub(crate) fn mark_cached(&self) {
        self.status.send_modify(|status| status.cached = true);
    }

    pub(crate) fn record_cache_error(&self, message: String) {
        self.status.send_modify(|status| status.cache_error = Some(message));
    }
}
