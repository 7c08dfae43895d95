//! # media-archiver
//!
//! Task queue for a personal media archive.
//!
//! ## Design Philosophy
//!
//! media-archiver is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Resumable** - Progress is persisted, paused transfers continue where they stopped
//! - **Pluggable** - Content sites are [`ContentProvider`](provider::ContentProvider) implementations
//!
//! Every import runs through three stages: metadata resolution, content
//! transfer (bounded by a live-adjustable parallelism limit) and batched
//! status persistence.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_archiver::{Config, Operation, TaskQueue};
//! use media_archiver::provider::{LocalFileProvider, ProviderRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ProviderRegistry::new().with_local(Arc::new(LocalFileProvider::new()));
//!     let queue = TaskQueue::open(Config::default(), registry).await?;
//!
//!     // Subscribe to events
//!     let mut events = queue.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let tasks = queue.create_tasks("/srv/photos/2024").await?;
//!     let ids: Vec<_> = tasks.iter().map(|task| task.id).collect();
//!     queue.push_batch(&ids, Operation::Start).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Content providers and the site registry
pub mod provider;
/// The task queue and its pipeline
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Task persistence
pub mod store;
/// Core types and events
pub mod types;
/// Resumable content writer
pub mod writer;

// Re-export commonly used types
pub use config::{Config, HttpConfig, PersistenceConfig, QueueConfig, RetryConfig};
pub use error::{Error, ProviderError, Result, StoreError, TaskError, TransferError};
pub use provider::{ContentProvider, ProviderRegistry};
pub use queue::TaskQueue;
pub use store::{SqliteTaskStore, TaskStore};
pub use types::{
    Event, Operation, ParentDto, Status, Task, TaskDto, TaskId, TaskSchedule, TaskTreeNode,
    WorksId,
};

/// Helper function to run the queue with graceful signal handling.
///
/// Waits for a termination signal and then calls the queue's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_archiver::{Config, TaskQueue, run_with_shutdown};
/// use media_archiver::provider::{LocalFileProvider, ProviderRegistry};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = ProviderRegistry::new().with_local(Arc::new(LocalFileProvider::new()));
///     let queue = TaskQueue::open(Config::default(), registry).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(queue).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(queue: TaskQueue) -> Result<()> {
    wait_for_signal().await;
    queue.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
