//! Compiler errors.

use std::time::Duration;

use super::executor::ExecutionError;
use super::state::CompilationState;
use crate::cache::CacheError;
use crate::model::NodeKey;
use crate::query::QueryBuildingError;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The node's configuration cannot be turned into SQL.
    #[error(transparent)]
    Query(#[from] QueryBuildingError),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("result cache: {0}")]
    Cache(#[from] CacheError),

    #[error("{node} not run: {dependency} did not finish")]
    DependencyFailed { node: NodeKey, dependency: NodeKey },

    #[error("{0} was cancelled")]
    Cancelled(NodeKey),

    #[error("run was cancelled")]
    RunCancelled,

    #[error("{node} timed out after {}s", timeout.as_secs())]
    TimedOut { node: NodeKey, timeout: Duration },

    #[error("{node} cannot move from {from} to {to}")]
    InvalidTransition {
        node: NodeKey,
        from: CompilationState,
        to: CompilationState,
    },

    #[error("a run is already in progress")]
    AlreadyRunning,
}

pub type CompileResult<T> = Result<T, CompileError>;
