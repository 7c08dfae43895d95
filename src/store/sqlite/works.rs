//! Works resolution and duplicate lookup.

use crate::error::StoreError;
use crate::provider::ProviderRegistry;
use crate::types::{Task, WorksId};
use crate::{Error, Result};

use super::SqliteTaskStore;

impl SqliteTaskStore {
    /// Find an already resolved works by its remote identity
    pub(super) async fn find_works(&self, site: &str, remote_id: &str) -> Result<Option<WorksId>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM works WHERE site = ? AND remote_id = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(site)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to look up works: {}",
                e
            )))
        })?;

        Ok(id.map(WorksId))
    }

    /// Resolve metadata through the task's provider and persist it
    ///
    /// An existing works with the same `(site, remote_id)` is reused. The lookup
    /// and the insert are not atomic, so two tasks resolving the same item at the
    /// same time can both insert.
    pub(super) async fn resolve_works(
        &self,
        task: &Task,
        registry: &ProviderRegistry,
    ) -> Result<WorksId> {
        let provider = registry.get(&task.site)?;
        let info = provider.info(task).await?;

        let works_id = match self.find_works(&task.site, &info.remote_id).await? {
            Some(existing) => {
                tracing::debug!(
                    task_id = %task.id,
                    works_id = %existing,
                    "Works already resolved, reusing"
                );
                existing
            }
            None => {
                let metadata = serde_json::to_string(&info.metadata)?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO works (site, remote_id, title, metadata, created_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&task.site)
                .bind(&info.remote_id)
                .bind(&info.title)
                .bind(metadata)
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "Failed to insert works: {}",
                        e
                    )))
                })?;
                WorksId(result.last_insert_rowid())
            }
        };

        if task.remote_id.as_deref() != Some(info.remote_id.as_str()) {
            sqlx::query("UPDATE tasks SET remote_id = ? WHERE id = ?")
                .bind(&info.remote_id)
                .bind(task.id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "Failed to record remote id: {}",
                        e
                    )))
                })?;
        }

        tracing::info!(
            task_id = %task.id,
            works_id = %works_id,
            provider = provider.name(),
            "Resolved works info"
        );
        Ok(works_id)
    }
}
