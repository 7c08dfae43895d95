//! Orchestrator side of the pipeline: control events and failure handling.

use super::TaskQueue;
use super::pipeline::PipelineEvent;
use super::run::RunInstance;
use crate::error::Error;
use crate::store::TaskUpdate;
use crate::types::{Event, Status};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Consume stage events until every stage has stopped
pub(super) async fn run_event_loop(
    queue: TaskQueue,
    mut events: mpsc::UnboundedReceiver<PipelineEvent>,
) {
    while let Some(event) = events.recv().await {
        queue.handle_pipeline_event(event).await;
    }
    tracing::debug!("Pipeline event loop stopped");
}

impl TaskQueue {
    async fn handle_pipeline_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::SaveStart(instance) => {
                if self.is_tracked(&instance) {
                    self.publish_update(&instance);
                }
            }
            PipelineEvent::Withdrawn(instance) => self.on_withdrawn(instance),
            PipelineEvent::Settled(batch) => self.on_settled(batch),
            PipelineEvent::Failed {
                instance,
                stage,
                error,
            } => self.on_failed(instance, stage, error).await,
        }
    }

    /// Emit `TaskUpdate` and refresh the instance's parent
    pub(crate) fn publish_update(&self, instance: &Arc<RunInstance>) {
        self.emit_event(Event::TaskUpdate {
            task: instance.dto(),
        });
        if let Some(parent_id) = instance.parent_id {
            self.refresh_parents([parent_id]);
        }
    }

    /// Re-admit an instance that was restarted while a stage still owned it
    fn readmit_if_waiting(&self, instance: &Arc<RunInstance>) -> bool {
        if instance.status() != Status::Waiting || self.is_closed() {
            return false;
        }
        tracing::debug!(task_id = %instance.id, "Re-admitting restarted task");
        let queue = self.clone();
        let instance = Arc::clone(instance);
        tokio::spawn(async move { queue.admit(instance).await });
        true
    }

    fn on_withdrawn(&self, instance: Arc<RunInstance>) {
        if !self.is_tracked(&instance) || self.readmit_if_waiting(&instance) {
            return;
        }
        self.publish_update(&instance);
    }

    fn on_settled(&self, batch: Vec<Arc<RunInstance>>) {
        let mut parent_ids = Vec::new();

        for instance in batch {
            if !self.is_tracked(&instance) || self.readmit_if_waiting(&instance) {
                continue;
            }

            self.emit_event(Event::TaskUpdate {
                task: instance.dto(),
            });
            if instance.status().is_terminal() {
                self.schedule_removal(&instance);
            }
            if let Some(parent_id) = instance.parent_id {
                parent_ids.push(parent_id);
            }
        }

        self.refresh_parents(parent_ids);
    }

    /// Mark a failed instance `Failed`, persist it and evict it
    ///
    /// Unparented instances leave the pool at once; parented ones stay for the
    /// grace delay so their parent can account for them.
    async fn on_failed(&self, instance: Arc<RunInstance>, stage: &'static str, error: Error) {
        tracing::error!(
            task_id = %instance.id,
            stage,
            error = %error,
            "Task failed"
        );

        // Re-admitted after the failure was raised; the new run owns it now
        if !self.is_tracked(&instance) || instance.is_in_stream() {
            return;
        }

        instance.settle(Status::Failed);
        if let Err(e) = self
            .store
            .update_by_id(instance.id, TaskUpdate::settled(Status::Failed))
            .await
        {
            tracing::error!(task_id = %instance.id, error = %e, "Failed to persist failed status");
        }

        self.emit_event(Event::TaskUpdate {
            task: instance.dto(),
        });

        match instance.parent_id {
            None => self.remove_now(&instance),
            Some(parent_id) => {
                self.schedule_removal(&instance);
                self.refresh_parents([parent_id]);
            }
        }
    }
}
