//! Running cohort SQL through the worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::WorkerClient;
use super::error::WorkerError;
use super::protocol::{ConnectionParams, ExecuteQueryResponse};
use crate::compiler::{ExecutionError, ExecutionResult, QueryExecutor};
use crate::results::{Identifier, IdentifierSet};

/// A [`QueryExecutor`] for databases only the worker can reach.
///
/// Many executors may share one client; each query gets its own request id.
pub struct WorkerExecutor {
    client: Arc<WorkerClient>,
    connection: ConnectionParams,
}

impl WorkerExecutor {
    pub fn new(client: Arc<WorkerClient>, connection: ConnectionParams) -> Self {
        Self { client, connection }
    }

    pub fn connection(&self) -> &ConnectionParams {
        &self.connection
    }
}

#[async_trait]
impl QueryExecutor for WorkerExecutor {
    async fn fetch_identifiers(
        &self,
        sql: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ExecutionResult<IdentifierSet> {
        let id = uuid::Uuid::new_v4().to_string();
        let run = self
            .client
            .execute_query_with_id(&id, &self.connection, sql, Some(timeout));

        tokio::select! {
            result = run => match result {
                Ok(response) => Ok(identifiers_from_response(&response)),
                Err(WorkerError::Timeout(_)) => Err(ExecutionError::Timeout(timeout)),
                Err(WorkerError::QueryCancelled(_)) => Err(ExecutionError::Cancelled),
                Err(e) => Err(e.into()),
            },
            _ = cancel.cancelled() => {
                debug!(request = %id, "cancelling worker query");
                if let Err(e) = self.client.cancel_query(&id).await {
                    warn!(request = %id, error = %e, "worker did not acknowledge cancel");
                }
                Err(ExecutionError::Cancelled)
            }
        }
    }
}

/// First column of every row; NULLs are dropped.
fn identifiers_from_response(response: &ExecuteQueryResponse) -> IdentifierSet {
    response
        .rows
        .iter()
        .filter_map(|row| row.first())
        .filter_map(Identifier::from_json)
        .collect()
}
