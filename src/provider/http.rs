//! HTTP provider: one task per URL, resumable through `Range` requests

use super::{ContentProvider, ResourceDescriptor, TaskDescriptor, WorksInfo};
use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, ProviderError, Result};
use crate::retry::with_retry;
use crate::types::Task;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{StatusCode, header};
use tokio_util::io::StreamReader;

/// Downloads plain HTTP(S) resources
///
/// Request setup is retried with the configured backoff; once bytes are flowing
/// a failure fails the transfer and the task can be resumed later.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpProvider {
    /// Build a provider with its own connection pool
    pub fn new(config: &HttpConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, retry })
    }

    fn parse(locator: &str) -> Result<url::Url> {
        let url = url::Url::parse(locator).map_err(|e| ProviderError::InvalidLocator {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProviderError::InvalidLocator {
                locator: locator.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }
            .into());
        }
        Ok(url)
    }

    /// Last non-empty path segment, or the host
    fn name_of(url: &url::Url) -> String {
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(str::to_string)
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "download".to_string())
    }

    /// The URL without its fragment identifies the remote item
    fn remote_id_of(url: &url::Url) -> String {
        let mut url = url.clone();
        url.set_fragment(None);
        url.to_string()
    }

    async fn get(&self, url: &url::Url, offset: u64) -> Result<reqwest::Response> {
        with_retry(&self.retry, || async {
            let mut request = self.client.get(url.clone());
            if offset > 0 {
                request = request.header(header::RANGE, format!("bytes={offset}-"));
            }
            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                Ok(response)
            } else {
                Err(Error::Provider(ProviderError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                }))
            }
        })
        .await
    }

    fn into_resource(response: reqwest::Response, offset: u64) -> ResourceDescriptor {
        let url = response.url().clone();
        let continuable = response
            .headers()
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let remaining = response.content_length().unwrap_or(0);
        let size = if remaining > 0 { offset + remaining } else { 0 };

        let stream = response.bytes_stream().map_err(std::io::Error::other);

        ResourceDescriptor {
            stream: Box::new(StreamReader::new(Box::pin(stream))),
            size,
            suggested_name: Self::name_of(&url),
            // A server that honoured a range request can do it again
            continuable: continuable || offset > 0,
            offset,
        }
    }
}

#[async_trait]
impl ContentProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(&self, locator: &str) -> Result<Vec<TaskDescriptor>> {
        let url = Self::parse(locator)?;
        Ok(vec![TaskDescriptor {
            name: Self::name_of(&url),
            locator: url.to_string(),
            remote_id: Some(Self::remote_id_of(&url)),
            continuable: false,
        }])
    }

    async fn info(&self, task: &Task) -> Result<WorksInfo> {
        let url = Self::parse(&task.locator)?;

        // HEAD is advisory; servers that reject it still get imported
        let head = with_retry(&self.retry, || async {
            Ok::<_, Error>(self.client.head(url.clone()).send().await?)
        })
        .await
        .ok()
        .filter(|response| response.status().is_success());

        let content_type = head.as_ref().and_then(|r| {
            r.headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
        let size = head.as_ref().and_then(|r| r.content_length());

        Ok(WorksInfo {
            remote_id: Self::remote_id_of(&url),
            title: Self::name_of(&url),
            metadata: serde_json::json!({
                "url": url.to_string(),
                "content_type": content_type,
                "size": size,
            }),
        })
    }

    async fn start(&self, task: &Task) -> Result<ResourceDescriptor> {
        let url = Self::parse(&task.locator)?;
        let response = self.get(&url, 0).await?;
        Ok(Self::into_resource(response, 0))
    }

    async fn resume(&self, task: &Task, offset: u64) -> Result<ResourceDescriptor> {
        let url = Self::parse(&task.locator)?;
        let response = self.get(&url, offset).await?;

        if offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT {
            Ok(Self::into_resource(response, offset))
        } else {
            if offset > 0 {
                tracing::debug!(
                    task_id = %task.id,
                    offset,
                    "Server ignored range request, restarting transfer"
                );
            }
            Ok(Self::into_resource(response, 0))
        }
    }
}
