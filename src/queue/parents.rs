//! Parent pool reconciliation and the parent status fold.

use super::run::{ChildEntry, ParentRunInstance, RunInstance};
use super::{Pools, TaskQueue};
use crate::error::Result;
use crate::types::{Event, Status, TaskId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Aggregate status of a parent from its children's statuses
///
/// Priority: any `Processing`, else any `Waiting`, else any `Pause`, else
/// `PartlyFinished` when both finished and failed children exist, else
/// `Finished`, else `Failed`. Returns `None` when nothing matches, which
/// includes a parent without children.
///
/// # Examples
///
/// ```
/// use media_archiver::queue::fold_parent_status;
/// use media_archiver::Status;
///
/// assert_eq!(
///     fold_parent_status([Status::Processing, Status::Finished]),
///     Some(Status::Processing)
/// );
/// assert_eq!(
///     fold_parent_status([Status::Finished, Status::Failed]),
///     Some(Status::PartlyFinished)
/// );
/// assert_eq!(fold_parent_status([]), None);
/// ```
pub fn fold_parent_status<I>(statuses: I) -> Option<Status>
where
    I: IntoIterator<Item = Status>,
{
    let mut processing = false;
    let mut waiting = false;
    let mut paused = false;
    let mut finished = false;
    let mut failed = false;

    for status in statuses {
        match status {
            Status::Processing => processing = true,
            Status::Waiting => waiting = true,
            Status::Pause => paused = true,
            Status::Finished => finished = true,
            Status::Failed => failed = true,
            // Parent-only status, never carried by a child
            Status::PartlyFinished => {}
        }
    }

    if processing {
        Some(Status::Processing)
    } else if waiting {
        Some(Status::Waiting)
    } else if paused {
        Some(Status::Pause)
    } else if finished && failed {
        Some(Status::PartlyFinished)
    } else if finished {
        Some(Status::Finished)
    } else if failed {
        Some(Status::Failed)
    } else {
        None
    }
}

fn dedup_ids(ids: impl IntoIterator<Item = TaskId>) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

impl TaskQueue {
    /// Make sure every parent of `instances` is in the parent pool and lists them as live
    ///
    /// Missing parents are filled from the store, then the aggregate statuses of
    /// all affected parents are recomputed.
    pub(crate) async fn reconcile_parents(&self, instances: &[Arc<RunInstance>]) {
        let parent_ids = dedup_ids(instances.iter().filter_map(|i| i.parent_id));
        if parent_ids.is_empty() {
            return;
        }

        if let Err(e) = self.fill_children(&parent_ids).await {
            tracing::error!(error = %e, "Failed to load parent tasks");
        }

        {
            let mut pools = self.pools.lock();
            for instance in instances {
                let Some(parent_id) = instance.parent_id else {
                    continue;
                };
                if let Some(parent) = pools.parents.get_mut(&parent_id) {
                    parent
                        .children
                        .insert(instance.id, ChildEntry::Live(Arc::clone(instance)));
                }
            }
        }

        self.refresh_parents(parent_ids);
    }

    /// Create parent run instances for parents not yet in the pool
    ///
    /// Children not in the task pool are projected from their stored status;
    /// a stored `Waiting` or `Processing` child is not running, so it counts as
    /// `Pause`.
    async fn fill_children(&self, parent_ids: &[TaskId]) -> Result<()> {
        let missing: Vec<TaskId> = {
            let pools = self.pools.lock();
            parent_ids
                .iter()
                .copied()
                .filter(|id| !pools.parents.contains_key(id))
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }

        let names: HashMap<TaskId, String> = self
            .store
            .list_by_ids(&missing)
            .await?
            .into_iter()
            .map(|task| (task.id, task.name))
            .collect();

        let mut stored: HashMap<TaskId, HashMap<TaskId, ChildEntry>> = HashMap::new();
        for child in self.store.list_children_by_parents(&missing).await? {
            let Some(parent_id) = child.parent_id else {
                continue;
            };
            let status = match child.status {
                Status::Waiting | Status::Processing => Status::Pause,
                other => other,
            };
            stored
                .entry(parent_id)
                .or_default()
                .insert(child.id, ChildEntry::Stored(status));
        }

        let mut created = Vec::new();
        {
            let mut pools = self.pools.lock();
            let Pools { tasks, parents } = &mut *pools;

            for id in missing {
                // Filled by a concurrent batch meanwhile
                if parents.contains_key(&id) {
                    continue;
                }

                let mut children = stored.remove(&id).unwrap_or_default();
                for instance in tasks.values().filter(|i| i.parent_id == Some(id)) {
                    children.insert(instance.id, ChildEntry::Live(Arc::clone(instance)));
                }

                let name = names.get(&id).cloned().unwrap_or_else(|| {
                    tracing::warn!(parent_id = %id, "Parent task record not found");
                    String::new()
                });
                let status = fold_parent_status(children.values().map(ChildEntry::status))
                    .unwrap_or(Status::Waiting);

                let parent = ParentRunInstance {
                    id,
                    name,
                    status,
                    children,
                    removal: None,
                };
                created.push(parent.dto());
                parents.insert(id, parent);
            }
        }

        for parent in created {
            tracing::debug!(parent_id = %parent.id, children = parent.total, "Parent entered pool");
            self.emit_event(Event::ParentSet { parent });
        }
        Ok(())
    }

    /// Recompute the aggregate status of the given parents
    ///
    /// Emits `ParentUpdate` on change. A parent without active children gets a
    /// removal timer; one with active children has its timer cancelled.
    pub(crate) fn refresh_parents(&self, parent_ids: impl IntoIterator<Item = TaskId>) {
        let mut updates = Vec::new();
        let mut timers = Vec::new();

        {
            let mut pools = self.pools.lock();
            for id in dedup_ids(parent_ids) {
                let Some(parent) = pools.parents.get_mut(&id) else {
                    continue;
                };

                let folded = fold_parent_status(parent.children.values().map(ChildEntry::status));
                let active = match folded {
                    Some(status) => {
                        if status != parent.status {
                            parent.status = status;
                            updates.push(parent.dto());
                        }
                        status.is_active()
                    }
                    None => {
                        tracing::error!(
                            parent_id = %id,
                            children = parent.children.len(),
                            "Parent status fold matched no child status"
                        );
                        false
                    }
                };

                if active {
                    parent.cancel_removal();
                } else if parent.removal.is_none() {
                    let token = CancellationToken::new();
                    parent.removal = Some(token.clone());
                    timers.push((id, token));
                }
            }
        }

        for parent in updates {
            self.emit_event(Event::ParentUpdate { parent });
        }
        for (id, token) in timers {
            self.schedule_parent_removal(id, token);
        }
    }

    /// Recompute every parent in the pool
    pub(crate) fn refresh_all_parents(&self) {
        let ids: Vec<TaskId> = self.pools.lock().parents.keys().copied().collect();
        self.refresh_parents(ids);
    }

    fn schedule_parent_removal(&self, id: TaskId, token: CancellationToken) {
        let queue = self.clone();
        let delay = self.config.removal_delay;

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.evict_parent(id, &token),
            }
        });
    }

    fn evict_parent(&self, id: TaskId, token: &CancellationToken) {
        let removed = {
            let mut pools = self.pools.lock();
            match pools.parents.get(&id) {
                // Timer cancellation happens under the pool lock
                Some(parent) if !token.is_cancelled() && !parent.has_active_child() => {
                    pools.parents.remove(&id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            tracing::debug!(parent_id = %id, "Parent left pool");
            self.emit_event(Event::ParentRemove { id });
        }
    }
}
