//! Error types for media-archiver
//!
//! This module provides the error taxonomy used across the crate:
//! - Store errors (SQLite persistence, missing records)
//! - Task contract errors (operations invoked in a state that forbids them)
//! - Provider errors (handler lookup and remote resolution failures)
//! - Transfer errors (byte source or byte sink failures)

use crate::types::{Status, TaskId};
use thiserror::Error;

/// Result type alias for media-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-archiver
///
/// Instance-level failures (resolution, transfer) are recovered by the queue and
/// surface as a `Failed` status; only contract violations and construction errors
/// reach the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "status_batch_size")
        key: Option<String>,
    },

    /// Task store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Task operation rejected by the run-instance state machine
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Content provider error
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Byte transfer error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue has been shut down
    #[error("queue is shut down")]
    ShuttingDown,

    /// A pipeline stage worker panicked while handling an instance
    #[error("{stage} stage worker panicked: {message}")]
    StagePanicked {
        /// Name of the stage
        stage: &'static str,
        /// Panic payload, if it was a string
        message: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Task store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Run-instance contract errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task is not tracked by the queue
    #[error("task {id} is not in the task pool")]
    NotInPool {
        /// The task that was referenced
        id: TaskId,
    },

    /// The task is not known to the store
    #[error("task {id} not found")]
    NotFound {
        /// The task that was referenced
        id: TaskId,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current:?}")]
    InvalidState {
        /// The task in an invalid state for the operation
        id: TaskId,
        /// The operation that was attempted (e.g., "pause", "start")
        operation: &'static str,
        /// The status that prevents the operation
        current: Status,
    },

    /// Resource stage reached a task whose metadata was never resolved
    #[error("task {id} has no resolved works")]
    MissingWorks {
        /// The task without a works id
        id: TaskId,
    },
}

/// Content provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No provider registered for the site
    #[error("no provider registered for site '{0}'")]
    UnknownSite(String),

    /// Locator could not be interpreted by the provider
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator {
        /// The locator that was rejected
        locator: String,
        /// Why it was rejected
        reason: String,
    },

    /// Remote end answered with an unexpected HTTP status
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Provider-specific failure
    #[error("{provider}: {message}")]
    Failed {
        /// Provider name
        provider: &'static str,
        /// Failure description
        message: String,
    },
}

/// Byte pipe errors raised by the task writer
#[derive(Debug, Error)]
pub enum TransferError {
    /// Reading from the byte source failed
    #[error("source read failed: {0}")]
    Source(#[source] std::io::Error),

    /// Writing to the byte sink failed
    #[error("sink write failed: {0}")]
    Sink(#[source] std::io::Error),

    /// `do_write` called before a source was attached
    #[error("no byte source attached")]
    NoSource,

    /// `do_write` called before a sink was attached
    #[error("no byte sink attached")]
    NoSink,
}

impl Error {
    /// Build a configuration error for a given key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
