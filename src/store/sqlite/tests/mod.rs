use super::*;
use crate::Error;
use crate::provider::LocalFileProvider;
use std::sync::Arc;
use tempfile::TempDir;


/// Store backed by a temporary directory, plus a source directory for local imports
pub(super) struct Fixture {
    pub store: SqliteTaskStore,
    pub registry: ProviderRegistry,
    pub source_dir: TempDir,
    _data_dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(
            &data_dir.path().join("archive.db"),
            data_dir.path().join("resources"),
        )
        .await
        .unwrap();
        let registry = ProviderRegistry::new().with_local(Arc::new(LocalFileProvider::new()));

        Self {
            store,
            registry,
            source_dir,
            _data_dir: data_dir,
        }
    }

    /// Write a source file and return its path as a locator
    pub fn source_file(&self, name: &str, contents: &[u8]) -> String {
        let path = self.source_dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    /// Create a single task for a fresh source file
    pub async fn task_for(&self, name: &str, contents: &[u8]) -> Task {
        let locator = self.source_file(name, contents);
        let mut tasks = self
            .store
            .create_tasks(&locator, &self.registry)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        tasks.remove(0)
    }
}
