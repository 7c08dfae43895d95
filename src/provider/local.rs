//! Local file system provider

use super::{ContentProvider, ResourceDescriptor, TaskDescriptor, WorksInfo};
use crate::error::{ProviderError, Result};
use crate::types::Task;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::AsyncSeekExt;

/// Imports files from disk
///
/// A file locator yields one task; a directory locator yields one task per
/// regular file directly inside it, sorted by name. Transfers are always
/// continuable because the source can be seeked.
#[derive(Debug, Default)]
pub struct LocalFileProvider;

impl LocalFileProvider {
    /// Create a local file provider
    pub fn new() -> Self {
        Self
    }

    fn path_of(locator: &str) -> PathBuf {
        match url::Url::parse(locator) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(locator)),
            _ => PathBuf::from(locator),
        }
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    async fn remote_id(path: &Path) -> Result<String> {
        let canonical = tokio::fs::canonicalize(path).await?;
        Ok(canonical.display().to_string())
    }

    async fn descriptor(path: &Path) -> Result<TaskDescriptor> {
        Ok(TaskDescriptor {
            name: Self::file_name(path),
            locator: path.display().to_string(),
            remote_id: Some(Self::remote_id(path).await?),
            continuable: true,
        })
    }
}

#[async_trait]
impl ContentProvider for LocalFileProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create(&self, locator: &str) -> Result<Vec<TaskDescriptor>> {
        let path = Self::path_of(locator);
        let meta = tokio::fs::metadata(&path).await?;

        if meta.is_file() {
            return Ok(vec![Self::descriptor(&path).await?]);
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(ProviderError::InvalidLocator {
                locator: locator.to_string(),
                reason: "directory contains no files".to_string(),
            }
            .into());
        }

        let mut descriptors = Vec::with_capacity(files.len());
        for file in &files {
            descriptors.push(Self::descriptor(file).await?);
        }
        Ok(descriptors)
    }

    async fn info(&self, task: &Task) -> Result<WorksInfo> {
        let path = Self::path_of(&task.locator);
        let meta = tokio::fs::metadata(&path).await?;
        let modified = meta
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .map(|t| t.to_rfc3339());

        Ok(WorksInfo {
            remote_id: Self::remote_id(&path).await?,
            title: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| task.name.clone()),
            metadata: serde_json::json!({
                "path": path.display().to_string(),
                "size": meta.len(),
                "modified": modified,
            }),
        })
    }

    async fn start(&self, task: &Task) -> Result<ResourceDescriptor> {
        self.resume(task, 0).await
    }

    async fn resume(&self, task: &Task, offset: u64) -> Result<ResourceDescriptor> {
        let path = Self::path_of(&task.locator);
        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();

        // An offset past the end means the source changed; start over
        let offset = if offset <= size { offset } else { 0 };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        Ok(ResourceDescriptor {
            stream: Box::new(file),
            size,
            suggested_name: Self::file_name(&path),
            continuable: true,
            offset,
        })
    }
}
