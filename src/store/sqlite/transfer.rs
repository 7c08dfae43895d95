//! Resource rows and byte transfers.
//!
//! A transfer opens the provider's stream, links a resource row to the task
//! through `pending_resource_id`, and hands source and file sink to the task
//! writer. The link stays in place until the queue records a terminal status,
//! so a paused transfer can be continued from the partial file.

use crate::error::StoreError;
use crate::provider::ProviderRegistry;
use crate::types::{Status, Task, TaskId, WorksId};
use crate::writer::{TaskWriter, WriteOutcome};
use crate::{Error, Result};
use sqlx::FromRow;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::AsyncSeekExt;

use super::SqliteTaskStore;

/// Resource a task is still writing, joined with the task's continuable flag
#[derive(Debug, Clone, FromRow)]
struct PendingResource {
    id: i64,
    path: String,
    continuable: bool,
}

impl SqliteTaskStore {
    /// Provider pause hook, then disconnect the byte pipe
    pub(super) async fn pause_transfer(
        &self,
        task: &Task,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<bool> {
        match registry.get(&task.site) {
            Ok(provider) => {
                if let Err(e) = provider.pause(task).await {
                    tracing::warn!(task_id = %task.id, error = %e, "Provider pause hook failed");
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "No provider to notify of pause");
            }
        }

        let already_finished = writer.pause();
        tracing::debug!(
            task_id = %task.id,
            bytes_written = writer.bytes_written(),
            already_finished,
            "Paused transfer"
        );
        Ok(already_finished)
    }

    /// Transfer the resource from the first byte
    ///
    /// A task whose last run failed is opened with the provider's `retry`.
    pub(super) async fn start_transfer(
        &self,
        task: &Task,
        works_id: WorksId,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<Status> {
        let provider = registry.get(&task.site)?;
        let resource = if task.status == Status::Failed {
            tracing::debug!(task_id = %task.id, "Retrying previously failed transfer");
            provider.retry(task).await?
        } else {
            provider.start(task).await?
        };

        let pending = self.pending_resource(task.id).await?;
        let path = self.resource_path(works_id, &resource.suggested_name);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let file = tokio::fs::File::create(&path).await?;

        let resource_id = self
            .link_resource(
                task.id,
                works_id,
                pending.map(|p| p.id),
                &path,
                resource.size,
                resource.continuable,
            )
            .await?;

        tracing::info!(
            task_id = %task.id,
            path = %path.display(),
            size = resource.size,
            "Starting transfer"
        );

        writer.set_source(resource.stream, resource.size);
        writer.set_sink(Box::new(file), 0);
        self.run_transfer(task.id, resource_id, writer).await
    }

    /// Continue a partial resource
    ///
    /// The offset is the length of the partial file. If the task is not
    /// continuable, or the provider cannot honour the offset, the file is
    /// truncated and the transfer starts over.
    pub(super) async fn resume_transfer(
        &self,
        task: &Task,
        works_id: WorksId,
        registry: &ProviderRegistry,
        writer: &TaskWriter,
    ) -> Result<Status> {
        let Some(pending) = self.pending_resource(task.id).await? else {
            tracing::debug!(task_id = %task.id, "No partial resource, starting over");
            return self.start_transfer(task, works_id, registry, writer).await;
        };

        let path = PathBuf::from(&pending.path);
        let on_disk = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        let provider = registry.get(&task.site)?;
        let resource = if pending.continuable && on_disk > 0 {
            provider.resume(task, on_disk).await?
        } else {
            provider.start(task).await?
        };
        if resource.offset != on_disk {
            tracing::info!(
                task_id = %task.id,
                requested = on_disk,
                offset = resource.offset,
                "Partial resource not continuable, restarting"
            );
        }

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.set_len(resource.offset).await?;
        file.seek(SeekFrom::End(0)).await?;

        let resource_id = self
            .link_resource(
                task.id,
                works_id,
                Some(pending.id),
                &path,
                resource.size,
                resource.continuable,
            )
            .await?;

        tracing::info!(
            task_id = %task.id,
            offset = resource.offset,
            size = resource.size,
            "Resuming transfer"
        );

        writer.set_source(resource.stream, resource.size);
        writer.set_sink(Box::new(file), resource.offset);
        self.run_transfer(task.id, resource_id, writer).await
    }

    async fn run_transfer(
        &self,
        task_id: TaskId,
        resource_id: i64,
        writer: &TaskWriter,
    ) -> Result<Status> {
        match writer.do_write(None).await? {
            WriteOutcome::Finish => {
                sqlx::query("UPDATE resources SET saved = 1, size = ? WHERE id = ?")
                    .bind(writer.bytes_written() as i64)
                    .bind(resource_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        Error::Store(StoreError::QueryFailed(format!(
                            "Failed to mark resource saved: {}",
                            e
                        )))
                    })?;
                tracing::info!(
                    task_id = %task_id,
                    bytes = writer.bytes_written(),
                    "Transfer finished"
                );
                Ok(Status::Finished)
            }
            WriteOutcome::Pause => Ok(Status::Pause),
        }
    }

    async fn pending_resource(&self, task_id: TaskId) -> Result<Option<PendingResource>> {
        let row = sqlx::query_as::<_, PendingResource>(
            r#"
            SELECT r.id, r.path, t.continuable
            FROM tasks t
            JOIN resources r ON r.id = t.pending_resource_id
            WHERE t.id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to get pending resource: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Insert or refresh the resource row and link it as the task's pending resource
    async fn link_resource(
        &self,
        task_id: TaskId,
        works_id: WorksId,
        existing: Option<i64>,
        path: &Path,
        size: u64,
        continuable: bool,
    ) -> Result<i64> {
        let path = path.display().to_string();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let resource_id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE resources SET works_id = ?, path = ?, size = ?, saved = 0 WHERE id = ?",
                )
                .bind(works_id.0)
                .bind(&path)
                .bind(size as i64)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "Failed to update resource: {}",
                        e
                    )))
                })?;
                id
            }
            None => sqlx::query(
                r#"
                INSERT INTO resources (works_id, task_id, path, size, saved, created_at)
                VALUES (?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(works_id.0)
            .bind(task_id)
            .bind(&path)
            .bind(size as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to insert resource: {}",
                    e
                )))
            })?
            .last_insert_rowid(),
        };

        sqlx::query("UPDATE tasks SET pending_resource_id = ?, continuable = ? WHERE id = ?")
            .bind(resource_id)
            .bind(continuable)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to link pending resource: {}",
                    e
                )))
            })?;

        tx.commit().await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to commit resource link: {}",
                e
            )))
        })?;

        Ok(resource_id)
    }

    fn resource_path(&self, works_id: WorksId, suggested_name: &str) -> PathBuf {
        let name: String = suggested_name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
            .collect();
        let name = match name.trim() {
            "" | "." | ".." => "resource".to_string(),
            trimmed => trimmed.to_string(),
        };
        self.resource_dir.join(works_id.to_string()).join(name)
    }
}
