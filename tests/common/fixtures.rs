//! Queues on temporary directories and source files to import

use media_archiver::config::RetryConfig;
use media_archiver::provider::{HttpProvider, LocalFileProvider, ProviderRegistry};
use media_archiver::{Config, TaskQueue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A queue whose database and resources live in a temporary directory
pub struct TestEnv {
    pub queue: TaskQueue,
    pub config: Config,
    /// Keep alive for the duration of the test
    pub temp_dir: TempDir,
}

impl TestEnv {
    /// Directory holding imported resources
    pub fn resource_dir(&self) -> &Path {
        &self.config.persistence.resource_dir
    }

    /// Directory for source files to import
    pub fn source_dir(&self) -> PathBuf {
        self.temp_dir.path().join("source")
    }
}

/// Test config rooted at `dir` with short timings
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("archive.db");
    config.persistence.resource_dir = dir.join("resources");
    config.queue.removal_delay = Duration::from_millis(200);
    config.queue.schedule_interval = Duration::from_millis(50);
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Registry with the local provider and an HTTP fallback
pub fn test_registry(config: &Config) -> ProviderRegistry {
    ProviderRegistry::new()
        .with_local(Arc::new(LocalFileProvider::new()))
        .with_fallback(Arc::new(
            HttpProvider::new(&config.http, config.retry.clone()).unwrap(),
        ))
}

/// Open a queue in a fresh temporary directory
pub async fn create_test_env() -> TestEnv {
    create_test_env_with(|_| {}).await
}

/// Like [`create_test_env`], with a chance to adjust the config
pub async fn create_test_env_with(configure: impl FnOnce(&mut Config)) -> TestEnv {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);
    std::fs::create_dir_all(temp_dir.path().join("source")).unwrap();

    let queue = TaskQueue::open(config.clone(), test_registry(&config))
        .await
        .unwrap();

    TestEnv {
        queue,
        config,
        temp_dir,
    }
}

/// Open a second queue on an environment's database
pub async fn reopen(env: &TestEnv) -> TaskQueue {
    TaskQueue::open(env.config.clone(), test_registry(&env.config))
        .await
        .unwrap()
}

/// Deterministic file content of `len` bytes
pub fn sample_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Write a source file and return its path
pub fn write_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
