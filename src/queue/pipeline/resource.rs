//! Resource stage: bounded-concurrency byte transfers.

use super::{PipelineEvent, StageContext, Step, supervise};
use crate::error::{Result, TaskError};
use crate::queue::run::RunInstance;
use crate::types::Status;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;

const STAGE: &str = "resource";

/// Concurrency limit that can be changed while transfers run
///
/// Raising the limit adds permits right away. Lowering it forgets idle permits
/// and records the rest as debt; permits held by running transfers are retired
/// as those transfers end, so in-flight work is never interrupted.
#[derive(Debug)]
pub(crate) struct ParallelLimit {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    debt: AtomicUsize,
}

/// Slot of the Resource stage, held for the duration of one transfer
#[derive(Debug)]
pub(crate) struct ParallelPermit {
    permit: Option<OwnedSemaphorePermit>,
    limit: Arc<ParallelLimit>,
}

impl ParallelLimit {
    pub(crate) fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
            debt: AtomicUsize::new(0),
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// Wait for a free slot
    pub(crate) async fn acquire(self: &Arc<Self>) -> Option<ParallelPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        Some(ParallelPermit {
            permit: Some(permit),
            limit: Arc::clone(self),
        })
    }

    /// Change the limit (clamped to at least 1)
    pub(crate) fn set_limit(&self, limit: usize) {
        let limit = limit.max(1);
        let previous = self.limit.swap(limit, Ordering::SeqCst);

        if limit > previous {
            let mut grow = limit - previous;
            // Cancel outstanding debt before minting new permits
            while grow > 0 {
                let paid = self
                    .debt
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
                if paid.is_err() {
                    break;
                }
                grow -= 1;
            }
            if grow > 0 {
                self.semaphore.add_permits(grow);
            }
        } else if limit < previous {
            let shrink = previous - limit;
            let forgotten = self.semaphore.forget_permits(shrink);
            if forgotten < shrink {
                self.debt.fetch_add(shrink - forgotten, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for ParallelPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let retired = self
            .limit
            .debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .is_ok();
        if retired {
            permit.forget();
        }
    }
}

pub(super) async fn run(
    ctx: StageContext,
    limit: Arc<ParallelLimit>,
    mut rx: mpsc::Receiver<Arc<RunInstance>>,
    tx: mpsc::Sender<Arc<RunInstance>>,
) {
    let mut transfers = JoinSet::new();

    loop {
        // A slot first: while all are busy nothing is taken off the channel
        let Some(permit) = limit.acquire().await else {
            break;
        };
        while let Some(joined) = transfers.try_join_next() {
            log_join_error(joined);
        }

        let Some(instance) = rx.recv().await else {
            break;
        };

        let ctx = ctx.clone();
        let tx = tx.clone();
        transfers.spawn(async move {
            let _permit = permit;
            handle(&ctx, instance, &tx).await;
        });
    }

    while let Some(joined) = transfers.join_next().await {
        log_join_error(joined);
    }
    tracing::debug!("Resource stage stopped");
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Transfer task ended abnormally");
    }
}

async fn handle(
    ctx: &StageContext,
    instance: Arc<RunInstance>,
    tx: &mpsc::Sender<Arc<RunInstance>>,
) {
    match supervise(STAGE, transfer(ctx, &instance)).await {
        Ok(Step::Advance) => {
            if let Err(mpsc::error::SendError(instance)) = tx.send(instance).await {
                tracing::warn!(task_id = %instance.id, "Status stage closed");
                instance.leave_stream();
            }
        }
        Ok(Step::Withdraw) => ctx.withdraw(instance),
        Err(error) => ctx.fail(instance, STAGE, error),
    }
}

async fn transfer(ctx: &StageContext, instance: &Arc<RunInstance>) -> Result<Step> {
    // Paused between stages: never begin the transfer
    let Some(plan) = instance.begin_transfer() else {
        return Ok(Step::Withdraw);
    };
    ctx.send(PipelineEvent::SaveStart(Arc::clone(instance)));

    let works_id = plan
        .works_id
        .ok_or(TaskError::MissingWorks { id: instance.id })?;

    let status = if plan.resume {
        ctx.store
            .resume_task(&plan.task, works_id, &ctx.registry, &plan.writer)
            .await?
    } else {
        ctx.store
            .start_task(&plan.task, works_id, &ctx.registry, &plan.writer)
            .await?
    };

    match status {
        Status::Pause => {
            instance.settle_pause();
            Ok(Step::Withdraw)
        }
        Status::Finished | Status::Failed => {
            instance.settle(status);
            Ok(Step::Advance)
        }
        other => {
            tracing::warn!(
                task_id = %instance.id,
                status = ?other,
                "Store returned a non-final transfer status"
            );
            instance.settle(Status::Failed);
            Ok(Step::Advance)
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_is_clamped_to_one() {
        let limit = Arc::new(ParallelLimit::new(0));
        assert_eq!(limit.limit(), 1);

        let first = limit.acquire().await.unwrap();
        assert!(limit.semaphore.try_acquire().is_err());
        drop(first);
        assert!(limit.semaphore.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_raising_limit_frees_slots_immediately() {
        let limit = Arc::new(ParallelLimit::new(1));
        let _held = limit.acquire().await.unwrap();

        limit.set_limit(3);

        let _a = limit.acquire().await.unwrap();
        let _b = limit.acquire().await.unwrap();
        assert_eq!(limit.semaphore.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_lowering_limit_retires_busy_permits_on_release() {
        let limit = Arc::new(ParallelLimit::new(3));
        let a = limit.acquire().await.unwrap();
        let b = limit.acquire().await.unwrap();

        // One idle permit is forgotten, one busy permit becomes debt
        limit.set_limit(1);
        assert_eq!(limit.semaphore.available_permits(), 0);

        drop(a);
        assert_eq!(limit.semaphore.available_permits(), 0, "retired");
        drop(b);
        assert_eq!(limit.semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_raising_limit_pays_debt_first() {
        let limit = Arc::new(ParallelLimit::new(2));
        let a = limit.acquire().await.unwrap();
        let b = limit.acquire().await.unwrap();

        limit.set_limit(1);
        limit.set_limit(2);

        drop(a);
        drop(b);
        assert_eq!(limit.semaphore.available_permits(), 2);
    }
}
