//! Async client for the database worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{
    methods, CancelQueryParams, CancelQueryResponse, ConnectionParams, ErrorInfo,
    ExecuteQueryParams, ExecuteQueryResponse, RequestEnvelope, ResponseEnvelope,
};
use crate::config::Settings;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Name of the worker binary searched for when no path is configured.
const WORKER_BINARY: &str = "sieve-worker";

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Async client for the database worker.
///
/// The worker runs as a child process speaking NDJSON over stdin/stdout.
/// Every request carries a fresh id so several queries can be outstanding at
/// once; a background task routes each response line to its caller.
///
/// ```ignore
/// let client = WorkerClient::spawn("./sieve-worker").await?;
/// let rows = client.execute_query(&connection, "SELECT chi FROM people", None).await?;
/// ```
pub struct WorkerClient {
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,
    pending: PendingMap,
    _child: Child,
    reader_task: tokio::task::JoinHandle<()>,
    timeout: Duration,
}

impl WorkerClient {
    pub async fn spawn<P: AsRef<Path>>(worker_path: P) -> WorkerResult<Self> {
        Self::spawn_with_timeout(worker_path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Spawn the worker named in `[worker]`, falling back to a search of
    /// the usual locations.
    pub async fn spawn_with_settings(settings: &Settings) -> WorkerResult<Self> {
        let worker_path = Self::resolve_worker_path(settings)?;
        Self::spawn_with_timeout(
            &worker_path,
            Duration::from_secs(settings.worker.timeout_seconds),
        )
        .await
    }

    fn resolve_worker_path(settings: &Settings) -> WorkerResult<PathBuf> {
        if let Some(path) = settings.worker_path() {
            return Ok(path);
        }

        let candidates = [
            WORKER_BINARY.to_string(),
            format!("./{}", WORKER_BINARY),
            format!("./worker/{}", WORKER_BINARY),
        ];
        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(output) = std::process::Command::new("which")
            .arg(WORKER_BINARY)
            .output()
        {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(PathBuf::from(path));
                }
            }
        }

        Err(WorkerError::SpawnFailed(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "worker binary not found; set worker.path in sieve.toml",
        )))
    }

    pub async fn spawn_with_timeout<P: AsRef<Path>>(
        worker_path: P,
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(WorkerError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker stdio was not captured",
            )));
        };
        debug!(path = %worker_path.as_ref().display(), "spawned worker");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = Self::spawn_reader_task(stdout, pending.clone());

        Ok(Self {
            stdin: Arc::new(Mutex::new(BufWriter::new(stdin))),
            pending,
            _child: child,
            reader_task,
            timeout,
        })
    }

    fn spawn_reader_task(stdout: ChildStdout, pending: PendingMap) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            if let Some(tx) = pending.lock().await.remove(&resp.id) {
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => warn!(error = %e, "unparseable worker response"),
                    },
                    Err(e) => {
                        warn!(error = %e, "worker read failed");
                        break;
                    }
                }
            }

            // fail everything still waiting
            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let _ = tx.send(ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(ErrorInfo {
                        code: "WORKER_EXITED".to_string(),
                        message: "worker process exited".to_string(),
                    }),
                });
            }
        })
    }

    /// Send a request and wait for its response.
    pub async fn request<P, R>(&self, method: &str, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.request_with_id(&id, method, params, self.timeout).await
    }

    /// Send a request under a caller-chosen id so it can be cancelled later.
    pub async fn request_with_id<P, R>(
        &self,
        id: &str,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = RequestEnvelope {
            id: id.to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params).map_err(WorkerError::SerializeFailed)?,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.to_string(), tx);

        {
            let line =
                serde_json::to_string(&request).map_err(WorkerError::SerializeFailed)? + "\n";
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(WorkerError::WriteFailed)?;
            stdin.flush().await.map_err(WorkerError::WriteFailed)?;
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(resp) => resp?,
            Err(_) => {
                self.pending.lock().await.remove(id);
                return Err(WorkerError::Timeout(timeout.as_secs()));
            }
        };

        if response.success {
            let result = response.result.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(result).map_err(WorkerError::DeserializeFailed)
        } else {
            let error = response.error.unwrap_or_else(|| ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "unknown error".to_string(),
            });
            Err(Self::classify_error(&error.code, &error.message))
        }
    }

    fn classify_error(code: &str, message: &str) -> WorkerError {
        match code {
            "DRIVER_NOT_FOUND" => WorkerError::DriverNotFound(message.to_string()),
            "CONNECTION_FAILED" => WorkerError::ConnectionFailed(message.to_string()),
            "QUERY_FAILED" => WorkerError::QueryFailed(message.to_string()),
            "QUERY_CANCELLED" => WorkerError::QueryCancelled(message.to_string()),
            "INVALID_REQUEST" => WorkerError::InvalidRequest(message.to_string()),
            "METHOD_NOT_FOUND" => WorkerError::MethodNotFound(message.to_string()),
            "WORKER_EXITED" => WorkerError::WorkerExited,
            _ => WorkerError::remote(code, message),
        }
    }

    /// False once the worker's stdout has closed.
    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl WorkerClient {
    /// Run a batch and return its rows.
    pub async fn execute_query(
        &self,
        connection: &ConnectionParams,
        sql: &str,
        timeout: Option<Duration>,
    ) -> WorkerResult<ExecuteQueryResponse> {
        let id = uuid::Uuid::new_v4().to_string();
        self.execute_query_with_id(&id, connection, sql, timeout).await
    }

    /// As [`execute_query`](Self::execute_query), under `id` so that
    /// [`cancel_query`](Self::cancel_query) can reach it.
    ///
    /// With a timeout the worker enforces it server-side and the client
    /// waits one extra second for the worker's own timeout error.
    pub async fn execute_query_with_id(
        &self,
        id: &str,
        connection: &ConnectionParams,
        sql: &str,
        timeout: Option<Duration>,
    ) -> WorkerResult<ExecuteQueryResponse> {
        let wait = timeout
            .map(|t| t + Duration::from_secs(1))
            .unwrap_or(self.timeout);
        self.request_with_id(
            id,
            methods::EXECUTE_QUERY,
            ExecuteQueryParams {
                connection: connection.clone(),
                sql: sql.to_string(),
                timeout_seconds: timeout.map(|t| t.as_secs().max(1)),
            },
            wait,
        )
        .await
    }

    /// Ask the worker to abort an in-flight `query.execute`.
    pub async fn cancel_query(&self, request_id: &str) -> WorkerResult<CancelQueryResponse> {
        self.request(
            methods::CANCEL_QUERY,
            CancelQueryParams {
                request_id: request_id.to_string(),
            },
        )
        .await
    }
}
