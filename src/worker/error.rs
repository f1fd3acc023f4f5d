//! Worker-specific error types.

use std::io;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur during worker communication.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Failed to write to worker stdin.
    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to serialize a request to JSON.
    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The worker is not currently accepting calls.
    #[error("worker is not ready")]
    NotReady,

    /// Request timed out waiting for a response.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Worker process exited while the call was pending.
    #[error("worker process crashed while request was pending")]
    WorkerCrashed,

    /// The supervisor consumed its restart budget and gave up.
    #[error("worker restart budget exhausted; manual reset required")]
    RestartBudgetExhausted,

    /// A line from the worker could not be decoded. Swallowed at the
    /// supervisor boundary; never returned from `invoke`.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The worker reported an application error (`success: false`).
    #[error("worker error: {message}")]
    Worker {
        /// Error message from the worker.
        message: String,
    },
}

impl WorkerError {
    /// Create a worker-reported error from a response envelope.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Check if this error indicates a retryable condition (the worker may
    /// come back, or the same call may succeed on a later attempt).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::Timeout(_) | Self::WorkerCrashed | Self::RestartBudgetExhausted
        )
    }
}

impl From<io::Error> for WorkerError {
    fn from(err: io::Error) -> Self {
        Self::WriteFailed(err)
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err)
    }
}
