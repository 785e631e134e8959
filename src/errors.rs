//! Typed failures that callers match on. Everything else travels as plain `anyhow` context.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad or conflicting options, detected before any worker starts.
    #[error("{0}")]
    TaskOptions(String),

    /// `push` on a queue that reports `full`. The orchestrator must check first.
    #[error("Queue `{queue}` is full")]
    QueueFull { queue: String },

    #[error("Errors exceeded threshold: {failed} vs {threshold}")]
    ErrorThresholdExceeded {
        failed: usize,
        threshold: usize,
        failed_dirs: Vec<PathBuf>,
    },

    #[error("Service `{0}` is not configured for this worker")]
    ServiceNotConfigured(String),

    #[error("Unknown task `{0}`")]
    UnknownTask(String),

    #[error("Unsupported worker config schema version {found} (expected {expected})")]
    UnsupportedSchemaVersion { found: u32, expected: u32 },

    /// Row-level or mapping failure inside the load subtask.
    #[error("{0}")]
    BulkData(String),
}

impl PipelineError {
    pub fn options(msg: impl Into<String>) -> Self {
        PipelineError::TaskOptions(msg.into())
    }
}
