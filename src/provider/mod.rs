//! Content providers
//!
//! A content provider turns a locator (URL or path) into task descriptors, works
//! metadata and byte streams. Providers are pluggable: the queue never talks to a
//! site directly, it asks the [`ProviderRegistry`] for the provider registered for
//! a task's site.
//!
//! ## Architecture
//!
//! The core abstraction is the [`ContentProvider`] trait. Two implementations
//! ship with the crate:
//!
//! - [`LocalFileProvider`]: imports files (or every file in a directory) from disk
//! - [`HttpProvider`]: downloads a single URL, resuming with `Range` requests
//!
//! ## Usage
//!
//! ```no_run
//! use media_archiver::provider::{HttpProvider, LocalFileProvider, ProviderRegistry};
//! use media_archiver::config::Config;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let registry = ProviderRegistry::new()
//!     .with_local(Arc::new(LocalFileProvider::new()))
//!     .with_fallback(Arc::new(HttpProvider::new(&config.http, config.retry.clone())?));
//!
//! assert_eq!(registry.site_for("https://www.example.com/a.jpg"), "example.com");
//! # Ok(())
//! # }
//! ```

mod http;
mod local;

pub use http::HttpProvider;
pub use local::LocalFileProvider;

use crate::error::{ProviderError, Result};
use crate::types::Task;
use crate::writer::ByteSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Site key of the local file system
pub const LOCAL_SITE: &str = "local";

/// A task a provider wants created for a locator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Display name
    pub name: String,
    /// Locator the new task will carry
    pub locator: String,
    /// Remote identity, when the provider knows it up front
    pub remote_id: Option<String>,
    /// Whether transfers for this task can continue from an offset
    pub continuable: bool,
}

/// Metadata resolved for a task
#[derive(Clone, Debug, PartialEq)]
pub struct WorksInfo {
    /// Identity of the item at its site; `(site, remote_id)` identifies a works
    pub remote_id: String,
    /// Human-readable title
    pub title: String,
    /// Provider-specific metadata
    pub metadata: serde_json::Value,
}

/// A byte stream ready to be written to a resource
pub struct ResourceDescriptor {
    /// Bytes of the resource, starting at `offset`
    pub stream: ByteSource,
    /// Total size of the resource in bytes (0 if unknown)
    pub size: u64,
    /// File name the provider suggests
    pub suggested_name: String,
    /// Whether a later transfer can continue from an offset
    pub continuable: bool,
    /// Position of the first streamed byte; 0 unless a resume was honoured
    pub offset: u64,
}

impl std::fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("size", &self.size)
            .field("suggested_name", &self.suggested_name)
            .field("continuable", &self.continuable)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Trait for site handlers
///
/// Implementations must be cheap to share (`Arc<dyn ContentProvider>`); each call
/// receives the full task record.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Describe the tasks a locator expands to (one for a single item, several for a collection)
    async fn create(&self, locator: &str) -> Result<Vec<TaskDescriptor>>;

    /// Resolve works metadata for a task
    async fn info(&self, task: &Task) -> Result<WorksInfo>;

    /// Open the resource from the beginning
    async fn start(&self, task: &Task) -> Result<ResourceDescriptor>;

    /// Open the resource from `offset`
    ///
    /// Providers that cannot honour the offset return a stream from the
    /// beginning with `offset: 0`.
    async fn resume(&self, task: &Task, offset: u64) -> Result<ResourceDescriptor>;

    /// Open the resource again after a failed run
    async fn retry(&self, task: &Task) -> Result<ResourceDescriptor> {
        self.start(task).await
    }

    /// Provider-level pause hook, called before the byte pipe is disconnected
    async fn pause(&self, _task: &Task) -> Result<()> {
        Ok(())
    }
}

/// Registry of content providers keyed by site
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ContentProvider>>,
    fallback: Option<Arc<dyn ContentProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sites: Vec<_> = self.providers.keys().collect();
        sites.sort();
        f.debug_struct("ProviderRegistry")
            .field("sites", &sites)
            .field("fallback", &self.fallback.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a site, replacing any previous one
    pub fn register(&mut self, site: impl Into<String>, provider: Arc<dyn ContentProvider>) {
        let site = site.into();
        tracing::debug!(site = %site, provider = provider.name(), "Registered content provider");
        self.providers.insert(site, provider);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, site: impl Into<String>, provider: Arc<dyn ContentProvider>) -> Self {
        self.register(site, provider);
        self
    }

    /// Register the provider for the local file system
    pub fn with_local(self, provider: Arc<dyn ContentProvider>) -> Self {
        self.with(LOCAL_SITE, provider)
    }

    /// Provider used for remote sites without a dedicated provider
    pub fn with_fallback(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Site key for a locator: the URL host without `www.`, or [`LOCAL_SITE`] for paths
    pub fn site_for(&self, locator: &str) -> String {
        match url::Url::parse(locator) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url
                .host_str()
                .map(|host| host.trim_start_matches("www.").to_ascii_lowercase())
                .unwrap_or_else(|| LOCAL_SITE.to_string()),
            _ => LOCAL_SITE.to_string(),
        }
    }

    /// Provider registered for a site
    pub fn get(&self, site: &str) -> Result<Arc<dyn ContentProvider>> {
        if let Some(provider) = self.providers.get(site) {
            return Ok(provider.clone());
        }
        match &self.fallback {
            Some(provider) if site != LOCAL_SITE => Ok(provider.clone()),
            _ => Err(ProviderError::UnknownSite(site.to_string()).into()),
        }
    }

    /// Site and provider for a locator
    pub fn resolve(&self, locator: &str) -> Result<(String, Arc<dyn ContentProvider>)> {
        let site = self.site_for(locator);
        let provider = self.get(&site)?;
        Ok((site, provider))
    }
}
