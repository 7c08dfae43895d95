//! Shutdown coordination, idleness and the live concurrency limit.

use super::TaskQueue;
use super::control::BatchErrors;
use crate::error::Result;
use crate::types::{Event, Operation, Status};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// How long shutdown waits for the pipeline to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl TaskQueue {
    /// Gracefully shut down the queue
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting batches (later calls to `push_batch` are no-ops)
    /// 2. Pauses every `Waiting` and `Processing` task
    /// 3. Closes the pipeline ingress and waits (up to 30 seconds) for every
    ///    stage and the event loop to drain
    /// 4. Refreshes all parents and emits [`Event::Shutdown`]
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while pausing tasks. The sequence is
    /// completed regardless.
    pub async fn shutdown(&self) -> Result<()> {
        if self.flags.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Task queue already shut down");
            return Ok(());
        }
        tracing::info!("Initiating graceful shutdown");

        // 1. Pause everything that may still run
        let targets: Vec<_> = self
            .pools
            .lock()
            .tasks
            .values()
            .filter(|instance| matches!(instance.status(), Status::Waiting | Status::Processing))
            .map(|instance| (Arc::clone(instance), true))
            .collect();
        let mut errors = BatchErrors::default();
        self.pause_instances(&targets, Operation::Pause, &mut errors)
            .await;
        tracing::info!(paused = targets.len(), "Signaled pause to all running tasks");

        // 2. Close the ingress; each stage stops once its input is drained
        self.pipeline.ingress.lock().take();
        let workers = std::mem::take(&mut *self.pipeline.workers.lock());

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Pipeline worker ended abnormally");
                    }
                }
                tracing::info!("Pipeline drained");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "Timeout waiting for the pipeline to drain, proceeding with shutdown"
                );
            }
        }

        // 3. Final parent statuses
        self.refresh_all_parents();

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        errors.into_result()
    }

    /// Whether no task or parent is `Waiting` or `Processing`
    pub fn is_idle(&self) -> bool {
        let pools = self.pools.lock();
        let busy = |status: Status| matches!(status, Status::Waiting | Status::Processing);

        !pools.tasks.values().any(|instance| busy(instance.status()))
            && !pools.parents.values().any(|parent| busy(parent.status))
    }

    /// Change how many transfers may run at once (clamped to at least 1)
    ///
    /// Takes effect for transfers scheduled afterwards; running transfers are
    /// not interrupted.
    pub fn update_max_parallel(&self, max_parallel: usize) {
        let previous = self.pipeline.limit.limit();
        self.pipeline.limit.set_limit(max_parallel);
        tracing::info!(
            previous,
            current = self.pipeline.limit.limit(),
            "Updated max parallel imports"
        );
    }

    /// Current limit on concurrent transfers
    pub fn max_parallel(&self) -> usize {
        self.pipeline.limit.limit()
    }
}
