//! Info stage: resolve works metadata at most once per run instance.

use super::{StageContext, Step, supervise};
use crate::error::Result;
use crate::queue::run::RunInstance;
use crate::types::Status;
use std::sync::Arc;
use tokio::sync::mpsc;

const STAGE: &str = "info";

pub(super) async fn run(
    ctx: StageContext,
    mut rx: mpsc::Receiver<Arc<RunInstance>>,
    tx: mpsc::Sender<Arc<RunInstance>>,
) {
    while let Some(instance) = rx.recv().await {
        match supervise(STAGE, resolve(&ctx, &instance)).await {
            Ok(Step::Advance) => {
                if let Err(mpsc::error::SendError(instance)) = tx.send(instance).await {
                    tracing::warn!(task_id = %instance.id, "Resource stage closed");
                    ctx.withdraw(instance);
                }
            }
            Ok(Step::Withdraw) => ctx.withdraw(instance),
            Err(error) => {
                // Resolution did not complete, let the next run try again
                instance.rollback_info();
                ctx.fail(instance, STAGE, error);
            }
        }
    }
    tracing::debug!("Info stage stopped");
}

async fn resolve(ctx: &StageContext, instance: &Arc<RunInstance>) -> Result<Step> {
    if instance.status() == Status::Pause {
        return Ok(Step::Withdraw);
    }

    if instance.claim_info() {
        let task = instance.task();
        let works_id = ctx.store.save_works_info(&task, &ctx.registry).await?;
        instance.set_works_id(works_id);
        tracing::debug!(task_id = %instance.id, works_id = %works_id, "Works info saved");

        if instance.status() == Status::Pause {
            return Ok(Step::Withdraw);
        }
    }

    Ok(Step::Advance)
}
