//! Crate-wide error types.
//!
//! Execution-path failures are converted into terminal task states at the
//! dispatcher/worker boundary; `GatewayError` covers everything that happens
//! before a task exists or outside a task's lifecycle (configuration,
//! process management, IPC plumbing).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("process pool error: {0}")]
    ProcessPool(String),

    #[error("worker protocol error: {0}")]
    WorkerProtocol(String),

    #[error("society execution error: {0}")]
    Society(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("shutdown already in progress")]
    ShuttingDown,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
