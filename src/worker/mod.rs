//! Database worker: a child process that talks to engines this crate has no
//! native driver for.
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ CohortCompiler                         │
//! │   └── WorkerExecutor (QueryExecutor)   │
//! │         └── WorkerClient               │
//! └──────────────┬─────────────────────────┘
//!   stdin NDJSON │ ▲ stdout NDJSON
//!                ▼ │
//! ┌────────────────────────────────────────┐
//! │ sieve-worker                           │
//! │   query.execute / query.cancel         │
//! └────────────────────────────────────────┘
//! ```
//!
//! Requests are correlated by id, so tasks of one batch can share a single
//! worker.

mod client;
mod error;
mod executor;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
pub use executor::WorkerExecutor;
