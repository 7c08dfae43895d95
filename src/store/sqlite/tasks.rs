//! Task CRUD operations.

use crate::error::{ProviderError, StoreError};
use crate::provider::{ProviderRegistry, TaskDescriptor};
use crate::store::TaskUpdate;
use crate::types::{Status, Task, TaskId};
use crate::{Error, Result};

use super::{SqliteTaskStore, TASK_COLUMNS, TaskRow};

/// SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999
const MAX_IDS_PER_QUERY: usize = 500;

/// Each update binds 5 variables
const MAX_UPDATES_PER_BATCH: usize = 100;

impl SqliteTaskStore {
    /// Get a task by ID
    pub(super) async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row.map(Task::from))
    }

    /// Get several tasks, in id order
    pub(super) async fn list_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        self.select_where_in("id", ids).await
    }

    /// Get all children of the given parents, in id order
    pub(super) async fn list_children(&self, parents: &[TaskId]) -> Result<Vec<Task>> {
        self.select_where_in("parent_id", parents).await
    }

    async fn select_where_in(&self, column: &str, ids: &[TaskId]) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();

        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut query_builder = sqlx::QueryBuilder::new(format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE {column} IN ("
            ));
            let mut separated = query_builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY id ASC");

            let rows = query_builder
                .build_query_as::<TaskRow>()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "Failed to list tasks by {}: {}",
                        column, e
                    )))
                })?;
            tasks.extend(rows.into_iter().map(Task::from));
        }

        Ok(tasks)
    }

    /// Update one task's status
    pub(super) async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?,
                pending_resource_id = CASE WHEN ? THEN NULL ELSE pending_resource_id END
            WHERE id = ?
            "#,
        )
        .bind(update.status.to_i32())
        .bind(update.clear_pending_resource)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to update task status: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Update many task statuses in a single transaction
    ///
    /// Uses CASE-WHEN statements chunked to stay under SQLite's variable limit.
    pub(super) async fn update_tasks_batch(&self, updates: &[(TaskId, TaskUpdate)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        for chunk in updates.chunks(MAX_UPDATES_PER_BATCH) {
            let mut query_builder = sqlx::QueryBuilder::new("UPDATE tasks SET status = CASE ");

            for (id, update) in chunk {
                query_builder.push("WHEN id = ");
                query_builder.push_bind(*id);
                query_builder.push(" THEN ");
                query_builder.push_bind(update.status.to_i32());
                query_builder.push(" ");
            }
            query_builder.push("END, pending_resource_id = CASE ");

            for (id, update) in chunk {
                query_builder.push("WHEN id = ");
                query_builder.push_bind(*id);
                if update.clear_pending_resource {
                    query_builder.push(" THEN NULL ");
                } else {
                    query_builder.push(" THEN pending_resource_id ");
                }
            }
            query_builder.push("END WHERE id IN (");

            let mut separated = query_builder.separated(", ");
            for (id, _) in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "Failed to update task status batch: {}",
                        e
                    )))
                })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to commit status batch: {}",
                e
            )))
        })?;

        tracing::debug!(count = updates.len(), "Wrote task status batch");
        Ok(())
    }

    /// Ask the locator's provider for task descriptors and insert them
    ///
    /// Returns the inserted tasks; for a collection the collection task comes first.
    pub(super) async fn insert_tasks_for(
        &self,
        locator: &str,
        registry: &ProviderRegistry,
    ) -> Result<Vec<Task>> {
        let (site, provider) = registry.resolve(locator)?;
        let descriptors = provider.create(locator).await?;

        if descriptors.is_empty() {
            return Err(ProviderError::InvalidLocator {
                locator: locator.to_string(),
                reason: format!("{} provider found nothing to import", provider.name()),
            }
            .into());
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut created = Vec::with_capacity(descriptors.len() + 1);
        let parent_id = if descriptors.len() > 1 {
            let collection = TaskDescriptor {
                name: collection_name(locator),
                locator: locator.to_string(),
                remote_id: None,
                continuable: false,
            };
            let task = insert_task(&mut tx, &site, &collection, None, true, now).await?;
            let id = task.id;
            created.push(task);
            Some(id)
        } else {
            None
        };

        for descriptor in &descriptors {
            created.push(insert_task(&mut tx, &site, descriptor, parent_id, false, now).await?);
        }

        tx.commit().await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to commit new tasks: {}",
                e
            )))
        })?;

        tracing::info!(
            locator = %locator,
            site = %site,
            tasks = created.len(),
            "Created tasks"
        );
        Ok(created)
    }
}

async fn insert_task(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    site: &str,
    descriptor: &TaskDescriptor,
    parent_id: Option<TaskId>,
    is_collection: bool,
    now: i64,
) -> Result<Task> {
    let result = sqlx::query(
        r#"
        INSERT INTO tasks (
            parent_id, site, locator, remote_id, name,
            is_collection, status, continuable, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(parent_id.map(|id| id.get()).unwrap_or(0))
    .bind(site)
    .bind(&descriptor.locator)
    .bind(&descriptor.remote_id)
    .bind(&descriptor.name)
    .bind(is_collection)
    .bind(Status::Waiting.to_i32())
    .bind(descriptor.continuable)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        Error::Store(StoreError::QueryFailed(format!(
            "Failed to insert task: {}",
            e
        )))
    })?;

    Ok(Task {
        id: TaskId(result.last_insert_rowid()),
        parent_id,
        site: site.to_string(),
        locator: descriptor.locator.clone(),
        remote_id: descriptor.remote_id.clone(),
        name: descriptor.name.clone(),
        is_collection,
        status: Status::Waiting,
        pending_resource_id: None,
        continuable: descriptor.continuable,
        created_at: now,
    })
}

/// Display name of a collection: the last component of its locator
fn collection_name(locator: &str) -> String {
    let trimmed = locator.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}
