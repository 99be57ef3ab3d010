//! Wire types for talking to the database worker.
//!
//! One JSON object per line in each direction. Requests carry an `id`
//! that the worker echoes back so several queries can be in flight at once.

use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: String,
    /// Method name (e.g., "query.execute").
    pub method: String,
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub success: bool,
    /// Present when `success` is true.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Present when `success` is false.
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Parameters
// ============================================================================

/// Database connection parameters, flattened into every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Driver name (e.g., "mssql", "postgres").
    pub driver: String,
    pub connection_string: String,
}

/// Parameters for `query.execute`.
///
/// `sql` is a complete batch: parameter declarations first, then the query.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteQueryParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub sql: String,
    /// Server-side command timeout; omitted means the driver default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Parameters for `query.cancel`.
#[derive(Debug, Clone, Serialize)]
pub struct CancelQueryParams {
    /// Id of the `query.execute` request to abort.
    pub request_id: String,
}

// ============================================================================
// Responses
// ============================================================================

/// Column information in query results.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultColumn {
    pub name: String,
    /// Database-specific type.
    pub data_type: String,
}

/// Response from `query.execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteQueryResponse {
    pub columns: Vec<QueryResultColumn>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: i64,
}

/// Response from `query.cancel`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelQueryResponse {
    /// False when the query had already finished.
    pub cancelled: bool,
}

// ============================================================================
// Method Names
// ============================================================================

/// Worker method names.
pub mod methods {
    pub const EXECUTE_QUERY: &str = "query.execute";
    pub const CANCEL_QUERY: &str = "query.cancel";
}
