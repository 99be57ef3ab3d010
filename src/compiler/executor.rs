//! Executing cohort SQL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::results::{Identifier, IdentifierSet};
use crate::worker::WorkerError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("database error: {0}")]
    Database(String),

    #[error("query timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("query cancelled")]
    Cancelled,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The blocking query thread panicked or was aborted.
    #[error("query task failed: {0}")]
    Join(String),
}

impl From<rusqlite::Error> for ExecutionError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Runs one cohort statement and returns the distinct values of its first
/// column.
///
/// Implementations must honour `cancel` and `timeout` by aborting the
/// database call, not only by dropping the future.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch_identifiers(
        &self,
        sql: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ExecutionResult<IdentifierSet>;
}

/// Executes against a SQLite database file, one connection per query.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    path: PathBuf,
}

impl SqliteExecutor {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn fetch_identifiers(
        &self,
        sql: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ExecutionResult<IdentifierSet> {
        let conn = Connection::open(&self.path)?;
        let interrupt = conn.get_interrupt_handle();
        let sql = sql.to_string();
        let query = tokio::task::spawn_blocking(move || query_identifiers(&conn, &sql));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(path = %self.path.display(), "interrupting cancelled query");
                interrupt.interrupt();
                Err(ExecutionError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                interrupt.interrupt();
                Err(ExecutionError::Timeout(timeout))
            }
            joined = query => joined.map_err(|e| ExecutionError::Join(e.to_string()))?,
        }
    }
}

fn query_identifiers(conn: &Connection, sql: &str) -> ExecutionResult<IdentifierSet> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut out = IdentifierSet::new();
    while let Some(row) = rows.next()? {
        let id = match row.get_ref(0)? {
            ValueRef::Null => continue,
            ValueRef::Integer(i) => Identifier::Int(i),
            ValueRef::Real(f) => Identifier::Text(f.to_string()),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Identifier::Text(String::from_utf8_lossy(t).into_owned())
            }
        };
        out.insert(id);
    }
    Ok(out)
}
