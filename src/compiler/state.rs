//! Task and run states.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::error::CompileError;
use crate::results::IdentifierSet;

/// Where a compilation task is in its life.
///
/// ```text
/// NotScheduled ──► Scheduled ──► Executing ──┬──► Finished
///                                            └──► Crashed
/// ```
///
/// Finished and Crashed are terminal; a task leaves them only by being
/// removed from the compiler, after which a fresh task is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum CompilationState {
    #[default]
    NotScheduled,
    Scheduled,
    Executing,
    Finished,
    Crashed,
}

impl CompilationState {
    pub fn can_transition_to(self, next: CompilationState) -> bool {
        use CompilationState::*;
        matches!(
            (self, next),
            (NotScheduled, Scheduled)
                | (Scheduled, Executing)
                | (Executing, Finished)
                | (Executing, Crashed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CompilationState::Finished | CompilationState::Crashed)
    }

    /// Scheduled or executing.
    pub fn is_active(self) -> bool {
        matches!(self, CompilationState::Scheduled | CompilationState::Executing)
    }
}

impl fmt::Display for CompilationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompilationState::NotScheduled => "not scheduled",
            CompilationState::Scheduled => "scheduled",
            CompilationState::Executing => "executing",
            CompilationState::Finished => "finished",
            CompilationState::Crashed => "crashed",
        };
        f.pad(s)
    }
}

/// Observable status of one task.
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub state: CompilationState,
    /// Set once Finished.
    pub identifiers: Option<Arc<IdentifierSet>>,
    /// Set once Crashed.
    pub error: Option<Arc<CompileError>>,
    /// Finished from the result cache without running.
    pub from_cache: bool,
    pub elapsed: Option<Duration>,
    /// Committed to the result cache.
    pub cached: bool,
    /// A failed cache write; the result itself stands.
    pub cache_error: Option<String>,
}

impl TaskStatus {
    pub fn row_count(&self) -> Option<usize> {
        self.identifiers.as_ref().map(|ids| ids.len())
    }
}

/// Phase of [`CohortCompiler::run_all`](super::CohortCompiler::run_all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunPhase {
    #[default]
    Idle,
    RunningJoinableTasks,
    CachingJoinableTasks,
    RunningAggregateTasks,
    CachingAggregateTasks,
    RunningFinalTotals,
    Finished,
    Cancelled,
}
