//! Configuration types for media-archiver

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Task queue behavior (concurrency, buffering, timing)
///
/// Groups settings that shape the pipeline. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum concurrent resource transfers (default: 3, clamped to at least 1)
    #[serde(default = "default_max_parallel_import")]
    pub max_parallel_import: usize,

    /// Capacity of each stage-to-stage channel (default: 16)
    ///
    /// A full channel blocks the upstream stage, which is how the pipeline
    /// applies backpressure.
    #[serde(default = "default_stage_buffer")]
    pub stage_buffer: usize,

    /// Maximum number of instances written in one status batch (default: 100)
    #[serde(default = "default_status_batch_size")]
    pub status_batch_size: usize,

    /// Grace delay before a terminal task or parent leaves the pool (default: 5s)
    #[serde(default = "default_removal_delay", with = "millis_serde")]
    pub removal_delay: Duration,

    /// Interval between progress snapshot pushes (default: 500ms)
    #[serde(default = "default_schedule_interval", with = "millis_serde")]
    pub schedule_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_parallel_import: default_max_parallel_import(),
            stage_buffer: default_stage_buffer(),
            status_batch_size: default_status_batch_size(),
            removal_delay: default_removal_delay(),
            schedule_interval: default_schedule_interval(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./media-archiver.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory where transferred resources are written (default: "./resources")
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            resource_dir: default_resource_dir(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// HTTP provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Main configuration
///
/// Fields are organized into logical sub-configs:
/// - [`queue`](QueueConfig) - pipeline concurrency and timing
/// - [`persistence`](PersistenceConfig) - database and resource locations
/// - [`retry`](RetryConfig) - backoff for transient provider failures
/// - [`http`](HttpConfig) - HTTP provider settings
///
/// The queue settings are flattened so they sit at the top level of JSON configs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline settings
    #[serde(flatten)]
    pub queue: QueueConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP provider
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Reject settings the pipeline cannot be built with
    pub fn validate(&self) -> Result<()> {
        if self.queue.stage_buffer == 0 {
            return Err(Error::config(
                "stage_buffer",
                "stage buffer must be greater than zero",
            ));
        }
        if self.queue.status_batch_size == 0 {
            return Err(Error::config(
                "status_batch_size",
                "status batch size must be greater than zero",
            ));
        }
        if self.queue.schedule_interval.is_zero() {
            return Err(Error::config(
                "schedule_interval",
                "schedule interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_max_parallel_import() -> usize {
    3
}

fn default_stage_buffer() -> usize {
    16
}

fn default_status_batch_size() -> usize {
    100
}

fn default_removal_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_schedule_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("media-archiver.db")
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("media-archiver/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
