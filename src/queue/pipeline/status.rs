//! Status stage: batched persistence of final statuses.

use super::{PipelineEvent, StageContext, supervise};
use crate::error::{Error, StoreError};
use crate::queue::run::RunInstance;
use crate::store::TaskUpdate;
use std::sync::Arc;
use tokio::sync::mpsc;

const STAGE: &str = "status";

pub(super) async fn run(
    ctx: StageContext,
    mut rx: mpsc::Receiver<Arc<RunInstance>>,
    batch_size: usize,
) {
    let batch_size = batch_size.max(1);

    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        // Flush at a full batch or as soon as there is no backlog
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(instance) => batch.push(instance),
                Err(_) => break,
            }
        }

        flush(&ctx, batch).await;
    }
    tracing::debug!("Status stage stopped");
}

async fn flush(ctx: &StageContext, batch: Vec<Arc<RunInstance>>) {
    let updates: Vec<_> = batch
        .iter()
        .map(|instance| (instance.id, TaskUpdate::settled(instance.status())))
        .collect();

    let result = supervise(STAGE, ctx.store.update_batch_by_id(&updates)).await;

    match result {
        Ok(()) => {
            tracing::debug!(count = batch.len(), "Recorded final statuses");
            for instance in &batch {
                instance.leave_stream();
            }
            ctx.send(PipelineEvent::Settled(batch));
        }
        Err(e) => {
            tracing::error!(count = batch.len(), error = %e, "Failed to record final statuses");
            let message = e.to_string();
            for instance in batch {
                ctx.fail(
                    instance,
                    STAGE,
                    Error::Store(StoreError::QueryFailed(message.clone())),
                );
            }
        }
    }
}
