//! Progress snapshots and the periodic push loops.

use super::TaskQueue;
use crate::types::{Event, TaskId, TaskSchedule};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

impl TaskQueue {
    /// Progress snapshot of a tracked parent or task
    ///
    /// Parents report finished and total child counts, leaf tasks report written
    /// and total bytes. Returns `None` for ids in neither pool.
    pub fn get_schedule(&self, id: TaskId) -> Option<TaskSchedule> {
        let pools = self.pools.lock();
        if let Some(parent) = pools.parents.get(&id) {
            return Some(parent.schedule());
        }
        pools.tasks.get(&id).map(|instance| instance.schedule())
    }

    fn task_schedules(&self) -> Vec<TaskSchedule> {
        let mut schedules: Vec<_> = self
            .pools
            .lock()
            .tasks
            .values()
            .map(|instance| instance.schedule())
            .collect();
        schedules.sort_by_key(|s| s.id);
        schedules
    }

    fn parent_schedules(&self) -> Vec<TaskSchedule> {
        let mut schedules: Vec<_> = self
            .pools
            .lock()
            .parents
            .values()
            .map(|parent| parent.schedule())
            .collect();
        schedules.sort_by_key(|s| s.id);
        schedules
    }

    /// Emit [`Event::TaskSchedules`] every `schedule_interval` while the task pool is non-empty
    ///
    /// At most one loop runs at a time; calling this while it runs does nothing.
    pub fn push_task_schedule(&self) {
        self.spawn_schedule_loop(
            Arc::clone(&self.flags.task_schedule_running),
            "task",
            |queue| {
                let schedules = queue.task_schedules();
                (!schedules.is_empty()).then_some(Event::TaskSchedules { schedules })
            },
        );
    }

    /// Emit [`Event::ParentSchedules`] every `schedule_interval` while the parent pool is non-empty
    pub fn push_parent_task_schedule(&self) {
        self.spawn_schedule_loop(
            Arc::clone(&self.flags.parent_schedule_running),
            "parent",
            |queue| {
                let schedules = queue.parent_schedules();
                (!schedules.is_empty()).then_some(Event::ParentSchedules { schedules })
            },
        );
    }

    /// Run `snapshot` on an interval until it comes back empty
    fn spawn_schedule_loop(
        &self,
        running: Arc<AtomicBool>,
        kind: &'static str,
        snapshot: fn(&TaskQueue) -> Option<Event>,
    ) {
        if running.swap(true, Ordering::SeqCst) {
            return;
        }

        let queue = self.clone();
        let interval = self.config.schedule_interval;
        tokio::spawn(async move {
            tracing::debug!(kind, "Schedule loop started");
            loop {
                match snapshot(&queue) {
                    Some(event) if !queue.is_closed() => {
                        queue.emit_event(event);
                        tokio::time::sleep(interval).await;
                    }
                    _ => {
                        running.store(false, Ordering::SeqCst);
                        // A batch may have filled the pool after the empty snapshot
                        let refilled = !queue.is_closed() && snapshot(&queue).is_some();
                        if refilled && !running.swap(true, Ordering::SeqCst) {
                            continue;
                        }
                        break;
                    }
                }
            }
            tracing::debug!(kind, "Schedule loop stopped");
        });
    }
}
