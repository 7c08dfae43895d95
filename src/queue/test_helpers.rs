//! Shared test helpers for creating TaskQueue instances in tests.

use crate::config::Config;
use crate::error::{Error, ProviderError, Result};
use crate::provider::{
    ContentProvider, ProviderRegistry, ResourceDescriptor, TaskDescriptor, WorksInfo,
};
use crate::queue::TaskQueue;
use crate::store::{SqliteTaskStore, TaskStore};
use crate::types::{Event, Status, Task, TaskId, TaskSchedule};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::sync::broadcast;

/// Site the mock provider is registered for
pub(crate) const MOCK_SITE: &str = "mock.test";

/// How long helpers wait before failing a test
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the mock provider serves one item (keyed by item name)
#[derive(Clone, Debug)]
pub(crate) enum Behavior {
    /// Stream these bytes and finish
    Bytes(Vec<u8>),
    /// Stream whatever the test writes into the feed (see [`MockProvider::take_feed`])
    Manual { size: u64 },
    /// Fail metadata resolution
    FailInfo,
    /// Fail opening the resource
    FailStart,
    /// Panic while opening the resource
    PanicStart,
}

/// Content provider scripted by tests
pub(crate) struct MockProvider {
    behaviors: Mutex<HashMap<String, Behavior>>,
    collections: Mutex<HashMap<String, Vec<String>>>,
    feeds: Mutex<HashMap<String, DuplexStream>>,
    pub(crate) info_calls: AtomicUsize,
    pub(crate) resume_offsets: Mutex<Vec<u64>>,
    /// Item names in the order their streams were opened
    pub(crate) opened: Mutex<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            collections: Mutex::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
            info_calls: AtomicUsize::new(0),
            resume_offsets: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn set_behavior(&self, name: &str, behavior: Behavior) {
        self.behaviors.lock().insert(name.to_string(), behavior);
    }

    pub(crate) fn add_collection(&self, name: &str, children: &[&str]) {
        self.collections.lock().insert(
            name.to_string(),
            children.iter().map(|c| c.to_string()).collect(),
        );
    }

    /// Highest number of streams open at the same time
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_max_in_flight(&self) {
        self.max_in_flight
            .store(self.in_flight(), Ordering::SeqCst);
    }

    /// Write end of a `Manual` item's current stream, once it was opened
    pub(crate) async fn take_feed(&self, name: &str) -> DuplexStream {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                if let Some(feed) = self.feeds.lock().remove(name) {
                    return feed;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream was never opened")
    }

    fn behavior(&self, name: &str) -> Behavior {
        self.behaviors
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Behavior::Bytes(vec![7u8; 1024]))
    }

    fn open(&self, task: &Task, offset: u64) -> Result<ResourceDescriptor> {
        let (stream, size): (Box<dyn AsyncRead + Send + Unpin>, u64) =
            match self.behavior(&task.name) {
                Behavior::Bytes(bytes) => {
                    let size = bytes.len() as u64;
                    let start = (offset as usize).min(bytes.len());
                    (Box::new(Cursor::new(bytes[start..].to_vec())), size)
                }
                Behavior::Manual { size } => {
                    let (read, write) = tokio::io::duplex(64 * 1024);
                    self.feeds.lock().insert(task.name.clone(), write);
                    (Box::new(read), size)
                }
                Behavior::FailStart => {
                    return Err(Error::Provider(ProviderError::Failed {
                        provider: "mock",
                        message: format!("cannot open {}", task.name),
                    }));
                }
                Behavior::PanicStart => panic!("provider exploded on {}", task.name),
                Behavior::FailInfo => (Box::new(Cursor::new(Vec::new())), 0),
            };

        self.opened.lock().push(task.name.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        Ok(ResourceDescriptor {
            stream: Box::new(TrackedReader {
                inner: stream,
                in_flight: Arc::clone(&self.in_flight),
            }),
            size,
            suggested_name: task.name.clone(),
            continuable: true,
            offset,
        })
    }
}

#[async_trait]
impl ContentProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create(&self, locator: &str) -> Result<Vec<TaskDescriptor>> {
        let name = locator.rsplit('/').next().unwrap_or(locator).to_string();
        let children = self.collections.lock().get(&name).cloned();

        let names = children.unwrap_or_else(|| vec![name]);
        Ok(names
            .into_iter()
            .map(|name| TaskDescriptor {
                locator: format!("https://{MOCK_SITE}/{name}"),
                remote_id: None,
                continuable: true,
                name,
            })
            .collect())
    }

    async fn info(&self, task: &Task) -> Result<WorksInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior(&task.name), Behavior::FailInfo) {
            return Err(Error::Provider(ProviderError::Failed {
                provider: "mock",
                message: format!("no metadata for {}", task.name),
            }));
        }
        Ok(WorksInfo {
            remote_id: task.locator.clone(),
            title: task.name.clone(),
            metadata: serde_json::json!({ "mock": true }),
        })
    }

    async fn start(&self, task: &Task) -> Result<ResourceDescriptor> {
        self.open(task, 0)
    }

    async fn resume(&self, task: &Task, offset: u64) -> Result<ResourceDescriptor> {
        self.resume_offsets.lock().push(offset);
        self.open(task, offset)
    }
}

/// Counts open streams; the count drops when the stream is dropped
struct TrackedReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    in_flight: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A queue on a temporary SQLite store with a mock provider
pub(crate) struct TestQueue {
    pub(crate) queue: TaskQueue,
    pub(crate) store: Arc<SqliteTaskStore>,
    pub(crate) provider: Arc<MockProvider>,
    pub(crate) events: broadcast::Receiver<Event>,
    pub(crate) _temp_dir: TempDir,
}

/// Helper to create a test queue with short timings
pub(crate) async fn create_test_queue() -> TestQueue {
    create_test_queue_with(|_| {}).await
}

/// Like [`create_test_queue`], with a chance to adjust the config
pub(crate) async fn create_test_queue_with(configure: impl FnOnce(&mut Config)) -> TestQueue {
    let temp_dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.persistence.resource_dir = temp_dir.path().join("resources");
    config.queue.max_parallel_import = 3;
    config.queue.removal_delay = Duration::from_millis(300);
    config.queue.schedule_interval = Duration::from_millis(20);
    configure(&mut config);

    let store = Arc::new(SqliteTaskStore::open(&config.persistence).await.unwrap());
    let provider = Arc::new(MockProvider::new());
    let registry = ProviderRegistry::new().with(MOCK_SITE, provider.clone());

    let queue = TaskQueue::new(config, store.clone() as Arc<dyn TaskStore>, registry).unwrap();
    let events = queue.subscribe();

    TestQueue {
        queue,
        store,
        provider,
        events,
        _temp_dir: temp_dir,
    }
}

impl TestQueue {
    /// Create one task for a mock item
    pub(crate) async fn create(&self, name: &str) -> Task {
        let mut tasks = self
            .queue
            .create_tasks(&format!("https://{MOCK_SITE}/{name}"))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        tasks.remove(0)
    }

    /// Create a collection; returns the collection task and its children
    pub(crate) async fn create_collection(&self, name: &str, children: &[&str]) -> (Task, Vec<Task>) {
        self.provider.add_collection(name, children);
        let mut tasks = self
            .queue
            .create_tasks(&format!("https://{MOCK_SITE}/{name}"))
            .await
            .unwrap();
        let collection = tasks.remove(0);
        assert!(collection.is_collection);
        (collection, tasks)
    }

    /// Wait until a tracked task or parent reports `status`
    pub(crate) async fn wait_for_status(&self, id: TaskId, status: Status) -> TaskSchedule {
        let schedule = wait_until(|| {
            self.queue
                .get_schedule(id)
                .filter(|schedule| schedule.status == status)
        })
        .await;
        schedule.unwrap_or_else(|| panic!("task {id} never reached {status:?}"))
    }

    /// Wait until `id` is in neither pool
    pub(crate) async fn wait_for_removal(&self, id: TaskId) {
        let gone = wait_until(|| self.queue.get_schedule(id).is_none().then_some(())).await;
        assert!(gone.is_some(), "task {id} was never removed");
    }

    /// Receive events until one matches
    pub(crate) async fn wait_for_event(&mut self, matches: impl Fn(&Event) -> bool) -> Event {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("expected event never arrived")
    }

    /// Persisted status of a task
    pub(crate) async fn stored_status(&self, id: TaskId) -> Status {
        self.store.get_by_id(id).await.unwrap().unwrap().status
    }

    /// Wait until the store has recorded `status` for a task
    pub(crate) async fn wait_for_stored_status(&self, id: TaskId, status: Status) {
        let recorded = tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.stored_status(id).await != status {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(recorded.is_ok(), "store never recorded {status:?} for task {id}");
    }
}

/// Poll `check` until it returns `Some`, or give up after the wait timeout
pub(crate) async fn wait_until<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Some(value) = check() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .ok()
}
