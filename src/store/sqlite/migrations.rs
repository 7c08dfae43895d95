//! Store lifecycle and schema migrations.

use crate::error::StoreError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::{Path, PathBuf};

use super::SqliteTaskStore;

impl SqliteTaskStore {
    /// Open (or create) the database at `path`
    ///
    /// Creates the database file and the resource directory if they don't
    /// exist, then runs migrations.
    pub async fn new(path: &Path, resource_dir: impl Into<PathBuf>) -> Result<Self> {
        let resource_dir = resource_dir.into();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Store(StoreError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }
        tokio::fs::create_dir_all(&resource_dir).await.map_err(|e| {
            Error::Store(StoreError::ConnectionFailed(format!(
                "Failed to create resource directory {}: {}",
                resource_dir.display(),
                e
            )))
        })?;

        // Connect to database with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Store(StoreError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Store(StoreError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let store = Self { pool, resource_dir };

        store.run_migrations().await?;

        Ok(store)
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Store(StoreError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Store(StoreError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: tasks, works and resources
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying store migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Store(StoreError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_tasks_schema(conn).await?;
            Self::create_works_schema(conn).await?;
            Self::create_resources_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Store(StoreError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Store migration v1 complete");
        Ok(())
    }

    async fn execute_ddl(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Store(StoreError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    /// Create tasks table and its indexes
    async fn create_tasks_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER NOT NULL DEFAULT 0,
                site TEXT NOT NULL,
                locator TEXT NOT NULL,
                remote_id TEXT,
                name TEXT NOT NULL,
                is_collection INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                pending_resource_id INTEGER,
                continuable INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            "tasks table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "CREATE INDEX idx_tasks_parent ON tasks(parent_id)",
            "index",
        )
        .await?;
        Self::execute_ddl(conn, "CREATE INDEX idx_tasks_status ON tasks(status)", "index").await
    }

    /// Create works table
    ///
    /// `(site, remote_id)` is indexed but not unique: duplicate detection is best-effort.
    async fn create_works_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE works (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                title TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            )
            "#,
            "works table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "CREATE INDEX idx_works_remote ON works(site, remote_id)",
            "index",
        )
        .await
    }

    /// Create resources table
    async fn create_resources_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                works_id INTEGER NOT NULL REFERENCES works(id) ON DELETE CASCADE,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                saved INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            "resources table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "CREATE INDEX idx_resources_task ON resources(task_id)",
            "index",
        )
        .await
    }

    /// Record a migration as applied
    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Store(StoreError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    version, e
                )))
            })?;
        Ok(())
    }
}
