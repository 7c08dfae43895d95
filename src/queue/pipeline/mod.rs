//! The three-stage import pipeline.
//!
//! ```text
//! ingress ──▶ Info ──▶ Resource (N workers) ──▶ Status
//!               │            │                     │
//!               └────────────┴── control events ───┴──▶ orchestrator
//! ```
//!
//! Stages are connected by bounded channels, so a saturated Resource stage
//! backpressures Info, which backpressures the ingress. Run instances travel
//! through the data channels; stages report back to the orchestrator only
//! through [`PipelineEvent`]s. An instance leaves the stream (`in_stream =
//! false`) before the event that releases it is sent.
//!
//! Each unit of work runs under [`supervise`]: a panic becomes that instance's
//! failure and the stage keeps consuming its channel.

mod info;
mod resource;
mod status;

pub(crate) use resource::ParallelLimit;

use super::run::RunInstance;
use crate::error::{Error, Result};
use crate::provider::ProviderRegistry;
use crate::store::TaskStore;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Control signal from a stage to the orchestrator
#[derive(Debug)]
pub(crate) enum PipelineEvent {
    /// Transfer is about to start; the instance is `Processing`
    SaveStart(Arc<RunInstance>),
    /// Left the stream without finishing (paused)
    Withdrawn(Arc<RunInstance>),
    /// Final statuses were persisted
    Settled(Vec<Arc<RunInstance>>),
    /// Resolution or transfer failed
    Failed {
        instance: Arc<RunInstance>,
        stage: &'static str,
        error: Error,
    },
}

/// Collaborators every stage needs
#[derive(Clone)]
pub(crate) struct StageContext {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) events: mpsc::UnboundedSender<PipelineEvent>,
}

impl StageContext {
    pub(crate) fn send(&self, event: PipelineEvent) {
        // Only fails once the orchestrator's event loop is gone
        self.events.send(event).ok();
    }

    /// Release an instance that will not advance
    pub(crate) fn withdraw(&self, instance: Arc<RunInstance>) {
        tracing::debug!(task_id = %instance.id, "Withdrawn from pipeline");
        instance.leave_stream();
        self.send(PipelineEvent::Withdrawn(instance));
    }

    /// Release an instance whose unit of work failed
    pub(crate) fn fail(&self, instance: Arc<RunInstance>, stage: &'static str, error: Error) {
        instance.leave_stream();
        self.send(PipelineEvent::Failed {
            instance,
            stage,
            error,
        });
    }
}

/// What a stage decided for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Advance,
    Withdraw,
}

/// Pipeline sizing
#[derive(Debug, Clone, Copy)]
pub(crate) struct PipelineOptions {
    pub(crate) stage_buffer: usize,
    pub(crate) status_batch_size: usize,
}

/// Running pipeline: its ingress and its worker handles
pub(crate) struct Pipeline {
    pub(crate) ingress: mpsc::Sender<Arc<RunInstance>>,
    pub(crate) workers: Vec<JoinHandle<()>>,
}

/// Wire the stages together and spawn their workers
pub(crate) fn spawn(
    ctx: StageContext,
    limit: Arc<ParallelLimit>,
    options: PipelineOptions,
) -> Pipeline {
    let (ingress, info_rx) = mpsc::channel(options.stage_buffer);
    let (resource_tx, resource_rx) = mpsc::channel(options.stage_buffer);
    let (status_tx, status_rx) = mpsc::channel(options.stage_buffer);

    let workers = vec![
        tokio::spawn(info::run(ctx.clone(), info_rx, resource_tx)),
        tokio::spawn(resource::run(ctx.clone(), limit, resource_rx, status_tx)),
        tokio::spawn(status::run(ctx, status_rx, options.status_batch_size)),
    ];

    Pipeline { ingress, workers }
}

/// Run one unit of stage work, turning a panic into an error
pub(crate) async fn supervise<F, T>(stage: &'static str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(stage, message = %message, "Stage worker panicked");
            Err(Error::StagePanicked { stage, message })
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supervise_passes_results_through() {
        let value = supervise("info", async { Ok::<_, Error>(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_supervise_turns_panic_into_error() {
        let explode = true;
        let result: Result<()> = supervise("resource", async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        })
        .await;

        match result {
            Err(Error::StagePanicked { stage, message }) => {
                assert_eq!(stage, "resource");
                assert_eq!(message, "boom");
            }
            other => panic!("expected StagePanicked, got {other:?}"),
        }
    }
}
