//! Batch operations: start, resume, pause and stop.

use super::TaskQueue;
use super::run::{ChildEntry, PauseRequest, RunInstance};
use crate::error::{Error, Result, TaskError};
use crate::store::TaskUpdate;
use crate::types::{Event, Operation, Status, Task, TaskId};
use std::collections::HashSet;
use std::collections::hash_map::Entry;
use std::sync::Arc;

/// Outcome of bringing one task into the pool for a run
enum Admission {
    New(Arc<RunInstance>),
    Restarted(Arc<RunInstance>),
    Rejected(TaskError),
}

/// Re-arm an instance already in the pool
///
/// Must be called with the pool locked so a pending removal cannot fire between
/// cancelling it and leaving the terminal status.
fn restart(instance: &Arc<RunInstance>, operation: Operation) -> Admission {
    instance.cancel_removal();
    match instance.pre_start(operation) {
        Ok(()) => Admission::Restarted(Arc::clone(instance)),
        Err(e) => Admission::Rejected(e),
    }
}

/// Keeps the first error of a batch; later ones are only logged
#[derive(Default)]
pub(crate) struct BatchErrors(Option<Error>);

impl BatchErrors {
    pub(crate) fn record(&mut self, error: impl Into<Error>) {
        let error = error.into();
        tracing::warn!(error = %error, "Skipping task in batch");
        if self.0.is_none() {
            self.0 = Some(error);
        }
    }

    pub(crate) fn into_result(self) -> Result<()> {
        self.0.map_or(Ok(()), Err)
    }
}

impl TaskQueue {
    /// Apply an operation to a batch of tasks
    ///
    /// - `Start`/`Resume`: bring the tasks into the pool (collections expand to
    ///   their children), mark them `Waiting` and feed them to the pipeline.
    ///   `Start` restarts a transfer from scratch, `Resume` continues it.
    /// - `Pause`: pause the tasks (a parent id pauses its live children).
    /// - `Stop`: pause, then drop unparented tasks from the pool at once.
    ///
    /// Tasks that cannot take the operation are skipped with a warning; the
    /// first such error is returned after the rest of the batch was applied.
    /// After [`shutdown`](Self::shutdown) this is a no-op.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] for an unknown id (start/resume)
    /// - [`TaskError::NotInPool`] for an untracked id (pause/stop)
    /// - [`TaskError::InvalidState`] when the task's status forbids the operation
    /// - Store errors
    pub async fn push_batch(&self, ids: &[TaskId], operation: Operation) -> Result<()> {
        if self.is_closed() {
            tracing::warn!(?operation, count = ids.len(), "Queue is shut down, batch ignored");
            return Ok(());
        }

        tracing::debug!(?operation, count = ids.len(), "Applying batch");
        match operation {
            Operation::Start | Operation::Resume => self.start_batch(ids, operation).await,
            Operation::Pause | Operation::Stop => self.pause_batch(ids, operation).await,
        }
    }

    async fn start_batch(&self, ids: &[TaskId], operation: Operation) -> Result<()> {
        let mut errors = BatchErrors::default();
        let tasks = self.expand(ids, &mut errors).await?;

        let mut created = Vec::new();
        let mut restarted = Vec::new();

        for task in tasks {
            let existing = {
                let pools = self.pools.lock();
                pools.tasks.get(&task.id).map(|i| restart(i, operation))
            };

            let admission = match existing {
                Some(admission) => admission,
                None => match self.instantiate(task, operation).await {
                    Ok(admission) => admission,
                    Err(e) => {
                        errors.record(e);
                        continue;
                    }
                },
            };

            match admission {
                Admission::New(instance) => created.push(instance),
                Admission::Restarted(instance) => restarted.push(instance),
                Admission::Rejected(e) => errors.record(e),
            }
        }

        let admitted: Vec<Arc<RunInstance>> =
            created.iter().chain(restarted.iter()).cloned().collect();
        if admitted.is_empty() {
            return errors.into_result();
        }

        let updates: Vec<_> = admitted
            .iter()
            .map(|i| (i.id, TaskUpdate::status(Status::Waiting)))
            .collect();
        if let Err(e) = self.store.update_batch_by_id(&updates).await {
            tracing::error!(error = %e, "Failed to mark tasks waiting");
            errors.record(e);
        }

        for instance in &created {
            self.emit_event(Event::TaskSet {
                task: instance.dto(),
            });
        }
        for instance in &restarted {
            self.emit_event(Event::TaskUpdate {
                task: instance.dto(),
            });
        }

        self.reconcile_parents(&admitted).await;

        tracing::info!(
            ?operation,
            created = created.len(),
            restarted = restarted.len(),
            "Tasks queued"
        );
        for instance in admitted {
            self.admit(instance).await;
        }

        self.push_task_schedule();
        self.push_parent_task_schedule();
        errors.into_result()
    }

    /// Load the referenced tasks, replacing collections by their children
    async fn expand(&self, ids: &[TaskId], errors: &mut BatchErrors) -> Result<Vec<Task>> {
        let found = self.store.list_by_ids(ids).await?;

        let known: HashSet<TaskId> = found.iter().map(|t| t.id).collect();
        for id in ids.iter().filter(|id| !known.contains(id)) {
            errors.record(TaskError::NotFound { id: *id });
        }

        let collections: Vec<TaskId> = found
            .iter()
            .filter(|t| t.is_collection)
            .map(|t| t.id)
            .collect();
        let children = if collections.is_empty() {
            Vec::new()
        } else {
            self.store.list_children_by_parents(&collections).await?
        };

        let mut seen = HashSet::new();
        Ok(found
            .into_iter()
            .filter(|t| !t.is_collection)
            .chain(children)
            .filter(|t| seen.insert(t.id))
            .collect())
    }

    /// Create a run instance with prior save state resolved from the store
    async fn instantiate(&self, task: Task, operation: Operation) -> Result<Admission> {
        let works_id = match &task.remote_id {
            Some(remote_id) => self.store.find_saved_works(&task.site, remote_id).await?,
            None => None,
        };

        let instance = Arc::new(RunInstance::new(task, works_id));
        let mut pools = self.pools.lock();
        Ok(match pools.tasks.entry(instance.id) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&instance));
                Admission::New(instance)
            }
            // Created by a concurrent batch while the store was queried
            Entry::Occupied(slot) => restart(slot.get(), operation),
        })
    }

    async fn pause_batch(&self, ids: &[TaskId], operation: Operation) -> Result<()> {
        let mut errors = BatchErrors::default();

        let mut targets = Vec::new();
        {
            let pools = self.pools.lock();
            for id in ids {
                if let Some(instance) = pools.tasks.get(id) {
                    targets.push((Arc::clone(instance), true));
                } else if let Some(parent) = pools.parents.get(id) {
                    targets.extend(parent.children.values().filter_map(|child| match child {
                        ChildEntry::Live(instance) => Some((Arc::clone(instance), false)),
                        ChildEntry::Stored(_) => None,
                    }));
                } else {
                    errors.record(TaskError::NotInPool { id: *id });
                }
            }
        }
        let mut seen = HashSet::new();
        targets.retain(|(instance, _)| seen.insert(instance.id));

        self.pause_instances(&targets, operation, &mut errors).await;

        let mut parent_ids = Vec::new();
        for (instance, _) in &targets {
            match instance.parent_id {
                Some(parent_id) => parent_ids.push(parent_id),
                None if operation == Operation::Stop && instance.status() == Status::Pause => {
                    self.remove_now(instance);
                }
                None => {}
            }
        }
        self.refresh_parents(parent_ids);

        errors.into_result()
    }

    /// Pause instances and write the newly paused ones in one batch
    ///
    /// `targets` pairs each instance with whether it was named directly; only
    /// direct targets report a settled status as an error.
    pub(crate) async fn pause_instances(
        &self,
        targets: &[(Arc<RunInstance>, bool)],
        operation: Operation,
        errors: &mut BatchErrors,
    ) {
        let mut paused = Vec::new();

        for (instance, direct) in targets {
            match instance.request_pause() {
                PauseRequest::Paused => paused.push(Arc::clone(instance)),
                PauseRequest::Transferring { task, writer } => {
                    match self.store.pause_task(&task, &self.registry, &writer).await {
                        Ok(true) => {
                            tracing::debug!(task_id = %instance.id, "Transfer completed before pause");
                        }
                        Ok(false) => {
                            if instance.mark_transfer_paused() {
                                paused.push(Arc::clone(instance));
                            }
                        }
                        Err(e) => errors.record(e),
                    }
                }
                PauseRequest::AlreadyPaused => {}
                PauseRequest::Settled(current) => {
                    if *direct {
                        errors.record(TaskError::InvalidState {
                            id: instance.id,
                            operation: if operation == Operation::Stop {
                                "stop"
                            } else {
                                "pause"
                            },
                            current,
                        });
                    }
                }
            }
        }

        if paused.is_empty() {
            return;
        }

        let updates: Vec<_> = paused
            .iter()
            .map(|i| (i.id, TaskUpdate::status(Status::Pause)))
            .collect();
        if let Err(e) = self.store.update_batch_by_id(&updates).await {
            tracing::error!(error = %e, "Failed to mark tasks paused");
            errors.record(e);
        }

        tracing::info!(?operation, count = paused.len(), "Tasks paused");
        for instance in &paused {
            self.emit_event(Event::TaskUpdate {
                task: instance.dto(),
            });
        }
    }
}
