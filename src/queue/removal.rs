//! Grace-delayed eviction of settled tasks from the task pool.

use super::run::{ChildEntry, RunInstance};
use super::{Pools, TaskQueue};
use crate::types::Event;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl TaskQueue {
    /// Evict `instance` after the grace delay unless it is re-activated first
    pub(crate) fn schedule_removal(&self, instance: &Arc<RunInstance>) {
        let token = instance.arm_removal();
        let queue = self.clone();
        let instance = Arc::clone(instance);
        let delay = self.config.removal_delay;

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.evict(&instance, &token),
            }
        });
    }

    fn evict(&self, instance: &Arc<RunInstance>, token: &CancellationToken) {
        let removed = {
            let mut pools = self.pools.lock();
            // Re-activation cancels the token while holding the pool lock
            if token.is_cancelled() || !instance.status().is_terminal() || instance.is_in_stream()
            {
                false
            } else {
                detach(&mut pools, instance)
            }
        };

        if removed {
            self.removed(instance);
        }
    }

    /// Drop `instance` from the task pool right away
    pub(crate) fn remove_now(&self, instance: &Arc<RunInstance>) {
        let removed = {
            let mut pools = self.pools.lock();
            instance.cancel_removal();
            detach(&mut pools, instance)
        };

        if removed {
            self.removed(instance);
        }
    }

    fn removed(&self, instance: &Arc<RunInstance>) {
        tracing::debug!(task_id = %instance.id, status = ?instance.status(), "Task left pool");
        self.emit_event(Event::TaskRemove { id: instance.id });
        if let Some(parent_id) = instance.parent_id {
            self.refresh_parents([parent_id]);
        }
    }
}

/// Remove the pool entry if it is still this instance; its parent keeps the last status
fn detach(pools: &mut Pools, instance: &Arc<RunInstance>) -> bool {
    let tracked = pools
        .tasks
        .get(&instance.id)
        .is_some_and(|current| Arc::ptr_eq(current, instance));
    if !tracked {
        return false;
    }

    pools.tasks.remove(&instance.id);
    if let Some(parent) = instance
        .parent_id
        .and_then(|parent_id| pools.parents.get_mut(&parent_id))
    {
        parent
            .children
            .insert(instance.id, ChildEntry::Stored(instance.status()));
    }
    true
}
