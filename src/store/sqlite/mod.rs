//! SQLite task store
//!
//! ## Submodules
//!
//! Methods on [`SqliteTaskStore`] are organized by domain:
//! - [`migrations`] - Store lifecycle, schema migrations
//! - [`tasks`] - Task CRUD and batched status writes
//! - [`works`] - Works resolution and duplicate lookup
//! - [`transfer`] - Resource rows and the start/resume/pause byte transfers

use super::{TaskStore, TaskUpdate};
use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::types::{Status, Task, TaskId, WorksId};
use crate::writer::TaskWriter;
use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::{Path, PathBuf};

mod migrations;
mod tasks;
mod transfer;
mod works;

/// Task record from database
#[derive(Debug, Clone, FromRow)]
struct TaskRow {
    id: i64,
    /// 0 when the task has no parent
    parent_id: i64,
    site: String,
    locator: String,
    remote_id: Option<String>,
    name: String,
    is_collection: bool,
    status: i32,
    pending_resource_id: Option<i64>,
    continuable: bool,
    created_at: i64,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: TaskId(row.id),
            parent_id: (row.parent_id != 0).then_some(TaskId(row.parent_id)),
            site: row.site,
            locator: row.locator,
            remote_id: row.remote_id,
            name: row.name,
            is_collection: row.is_collection,
            status: Status::from_i32(row.status),
            pending_resource_id: row.pending_resource_id,
            continuable: row.continuable,
            created_at: row.created_at,
        }
    }
}

/// Column list shared by every task query
const TASK_COLUMNS: &str = "id, parent_id, site, locator, remote_id, name, is_collection, \
                            status, pending_resource_id, continuable, created_at";

/// SQLite-backed [`TaskStore`]
///
/// Resources are written to `resource_dir/<works id>/<file name>`.
pub struct SqliteTaskStore {
    pool: SqlitePool,
    resource_dir: PathBuf,
}

impl std::fmt::Debug for SqliteTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTaskStore")
            .field("resource_dir", &self.resource_dir)
            .finish_non_exhaustive()
    }
}

impl SqliteTaskStore {
    /// Open the store described by the persistence configuration
    pub async fn open(config: &PersistenceConfig) -> Result<Self> {
        Self::new(&config.database_path, config.resource_dir.clone()).await
    }

    /// Directory resource files are written to
    pub fn resource_dir(&self) -> &Path {
        &self.resource_dir
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get_by_id(&self, id: TaskId) -> Result<Option<Task>> {
        self.get_task(id).await
    }

    async fn list_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        self.list_tasks(ids).await
    }

    async fn list_children_by_parents(&self, parents: &[TaskId]) -> Result<Vec<Task>> {
        self.list_children(parents).await
    }

    async fn update_by_id(&self, id: TaskId, update: TaskUpdate) -> Result<()> {
        self.update_task(id, update).await
    }

    async fn update_batch_by_id(&self, updates: &[(TaskId, TaskUpdate)]) -> Result<()> {
        self.update_tasks_batch(updates).await
    }

    async fn find_saved_works(&self, site: &str, remote_id: &str) -> Result<Option<WorksId>> {
        self.find_works(site, remote_id).await
    }

    async fn save_works_info(&self, task: &Task, registry: &ProviderRegistry) -> Result<WorksId> {
        self.resolve_works(task, registry).await
    }

    async fn pause_task(
        &self,
        task: &Task,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<bool> {
        self.pause_transfer(task, registry, writer).await
    }

    async fn start_task(
        &self,
        task: &Task,
        works_id: WorksId,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<Status> {
        self.start_transfer(task, works_id, registry, writer).await
    }

    async fn resume_task(
        &self,
        task: &Task,
        works_id: WorksId,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<Status> {
        self.resume_transfer(task, works_id, registry, writer).await
    }

    async fn create_tasks(&self, locator: &str, registry: &ProviderRegistry) -> Result<Vec<Task>> {
        self.insert_tasks_for(locator, registry).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
