//! Task store: durable persistence of tasks, works and resources
//!
//! The queue only talks to persistence through the [`TaskStore`] trait. It reads
//! task records and writes back nothing but `status` and the pending-resource
//! link; resolving metadata and moving bytes into resource files are store
//! operations, so a store decides where and how artifacts land.
//!
//! [`SqliteTaskStore`] is the bundled implementation.

use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::types::{Status, Task, TaskDto, TaskId, TaskTreeNode, WorksId};
use crate::writer::TaskWriter;
use async_trait::async_trait;
use std::collections::HashMap;

mod sqlite;

pub use sqlite::SqliteTaskStore;

/// Status write for one task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskUpdate {
    /// New persisted status
    pub status: Status,
    /// Drop the link to the resource being written
    pub clear_pending_resource: bool,
}

impl TaskUpdate {
    /// Status-only update
    pub fn status(status: Status) -> Self {
        Self {
            status,
            clear_pending_resource: false,
        }
    }

    /// Update for a status a run settled on; terminal statuses clear the pending resource
    pub fn settled(status: Status) -> Self {
        Self {
            status,
            clear_pending_resource: status.is_terminal(),
        }
    }
}

/// Persistence collaborator of the task queue
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load one task
    async fn get_by_id(&self, id: TaskId) -> Result<Option<Task>>;

    /// Load several tasks; unknown ids are skipped
    async fn list_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>>;

    /// Load every child of the given collection tasks
    async fn list_children_by_parents(&self, parents: &[TaskId]) -> Result<Vec<Task>>;

    /// Write one task's status
    async fn update_by_id(&self, id: TaskId, update: TaskUpdate) -> Result<()>;

    /// Write many statuses in one batch
    async fn update_batch_by_id(&self, updates: &[(TaskId, TaskUpdate)]) -> Result<()>;

    /// Works already resolved for `(site, remote_id)`, if any
    async fn find_saved_works(&self, site: &str, remote_id: &str) -> Result<Option<WorksId>>;

    /// Resolve a task's metadata through its provider and persist it as a works
    async fn save_works_info(&self, task: &Task, registry: &ProviderRegistry) -> Result<WorksId>;

    /// Pause a running transfer
    ///
    /// Returns `true` if the transfer had already completed.
    async fn pause_task(
        &self,
        task: &Task,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<bool>;

    /// Transfer the task's resource from the beginning
    ///
    /// Resolves to `Finished` or `Pause`.
    async fn start_task(
        &self,
        task: &Task,
        works_id: WorksId,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<Status>;

    /// Continue a paused transfer where the partial resource ends
    async fn resume_task(
        &self,
        task: &Task,
        works_id: WorksId,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<Status>;

    /// Create the tasks a locator expands to
    ///
    /// A single item yields one task. Several items yield a collection task
    /// followed by its children.
    async fn create_tasks(&self, locator: &str, registry: &ProviderRegistry) -> Result<Vec<Task>>;

    /// Tasks with their children, as persisted
    async fn list_task_tree(&self, ids: &[TaskId]) -> Result<Vec<TaskTreeNode>> {
        let roots = self.list_by_ids(ids).await?;
        let collections: Vec<TaskId> = roots
            .iter()
            .filter(|t| t.is_collection)
            .map(|t| t.id)
            .collect();

        let mut children: HashMap<TaskId, Vec<TaskTreeNode>> = HashMap::new();
        if !collections.is_empty() {
            for child in self.list_children_by_parents(&collections).await? {
                if let Some(parent_id) = child.parent_id {
                    children.entry(parent_id).or_default().push(TaskTreeNode {
                        task: TaskDto::from(&child),
                        children: Vec::new(),
                    });
                }
            }
        }

        Ok(roots
            .iter()
            .map(|task| TaskTreeNode {
                task: TaskDto::from(task),
                children: children.remove(&task.id).unwrap_or_default(),
            })
            .collect())
    }
}
