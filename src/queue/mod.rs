//! Task queue orchestrator split into focused submodules.
//!
//! The `TaskQueue` struct and its methods are organized by domain:
//! - [`control`] - Batch operations (start/resume/pause/stop)
//! - [`events`] - Pipeline event loop and failure handling
//! - [`parents`] - Parent pool reconciliation and the status fold
//! - [`removal`] - Grace-delayed eviction from the pools
//! - [`schedule`] - Progress snapshots and the periodic push loops
//! - [`tree`] - Task trees with live statuses
//! - [`lifecycle`] - Shutdown, idleness and the live concurrency limit
//! - [`pipeline`] - The Info → Resource → Status stages
//! - [`run`] - Run instances and parent run instances

mod control;
mod events;
mod lifecycle;
mod parents;
pub(crate) mod pipeline;
mod removal;
pub(crate) mod run;
mod schedule;
mod tree;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use parents::fold_parent_status;

use crate::config::{Config, QueueConfig};
use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::store::{SqliteTaskStore, TaskStore};
use crate::types::{Event, Task, TaskId};
use parking_lot::Mutex;
use pipeline::{ParallelLimit, Pipeline, PipelineOptions, StageContext};
use run::{ParentRunInstance, RunInstance};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Task pool and parent pool
#[derive(Debug, Default)]
pub(crate) struct Pools {
    /// Live tasks by id; at most one instance per id
    pub(crate) tasks: HashMap<TaskId, Arc<RunInstance>>,
    /// Live parents by id
    pub(crate) parents: HashMap<TaskId, ParentRunInstance>,
}

/// Pipeline ingress and worker handles
#[derive(Clone)]
pub(crate) struct PipelineState {
    /// Entry of the Info stage; `None` once shutdown closed it
    pub(crate) ingress: Arc<Mutex<Option<mpsc::Sender<Arc<RunInstance>>>>>,
    /// Resource stage concurrency limit
    pub(crate) limit: Arc<ParallelLimit>,
    /// Stage workers followed by the event loop, awaited on shutdown
    pub(crate) workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Queue-wide flags
#[derive(Clone, Default)]
pub(crate) struct QueueFlags {
    /// Set by shutdown; no new work is admitted afterwards
    pub(crate) closed: Arc<AtomicBool>,
    /// A task schedule loop is running
    pub(crate) task_schedule_running: Arc<AtomicBool>,
    /// A parent schedule loop is running
    pub(crate) parent_schedule_running: Arc<AtomicBool>,
}

/// The task queue (cloneable - all fields are Arc-wrapped)
///
/// Accepts batch operations on tasks, drives them through the import pipeline,
/// tracks parent/child status, and reports progress through [`Event`]s.
#[derive(Clone)]
pub struct TaskQueue {
    /// Persistence collaborator
    pub(crate) store: Arc<dyn TaskStore>,
    /// Content providers by site
    pub(crate) registry: Arc<ProviderRegistry>,
    /// Queue settings
    pub(crate) config: Arc<QueueConfig>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Task pool and parent pool, mutated only by the orchestrator
    pub(crate) pools: Arc<Mutex<Pools>>,
    /// Running pipeline
    pub(crate) pipeline: PipelineState,
    /// Shutdown and loop flags
    pub(crate) flags: QueueFlags,
}

impl TaskQueue {
    /// Open the SQLite store from configuration and start a queue on it
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_archiver::{Config, TaskQueue};
    /// use media_archiver::provider::{LocalFileProvider, ProviderRegistry};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let registry = ProviderRegistry::new().with_local(Arc::new(LocalFileProvider::new()));
    ///     let queue = TaskQueue::open(Config::default(), registry).await?;
    ///
    ///     let tasks = queue.create_tasks("/home/me/Pictures/trip").await?;
    ///     let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
    ///     queue.push_batch(&ids, media_archiver::Operation::Start).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn open(config: Config, registry: ProviderRegistry) -> Result<Self> {
        config.validate()?;
        let store = SqliteTaskStore::open(&config.persistence).await?;
        Self::new(config, Arc::new(store), registry)
    }

    /// Start a queue on any task store
    ///
    /// Spawns the pipeline stages and the event loop, so it must be called from
    /// within a Tokio runtime.
    pub fn new(
        config: Config,
        store: Arc<dyn TaskStore>,
        registry: ProviderRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let queue_config = config.queue;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let registry = Arc::new(registry);
        let limit = Arc::new(ParallelLimit::new(queue_config.max_parallel_import));
        let ctx = StageContext {
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            events: control_tx,
        };
        let Pipeline {
            ingress,
            mut workers,
        } = pipeline::spawn(
            ctx,
            Arc::clone(&limit),
            PipelineOptions {
                stage_buffer: queue_config.stage_buffer,
                status_batch_size: queue_config.status_batch_size,
            },
        );

        let queue = Self {
            store,
            registry,
            config: Arc::new(queue_config),
            event_tx,
            pools: Arc::new(Mutex::new(Pools::default())),
            pipeline: PipelineState {
                ingress: Arc::new(Mutex::new(Some(ingress))),
                limit,
                workers: Arc::new(Mutex::new(Vec::new())),
            },
            flags: QueueFlags::default(),
        };

        workers.push(tokio::spawn(events::run_event_loop(
            queue.clone(),
            control_rx,
        )));
        *queue.pipeline.workers.lock() = workers;

        tracing::info!(
            max_parallel_import = queue.pipeline.limit.limit(),
            stage_buffer = queue.config.stage_buffer,
            "Task queue started"
        );
        Ok(queue)
    }

    /// Subscribe to queue events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than 1000 events receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Create the tasks a locator expands to, through the matching provider
    ///
    /// Returns the new task records; a collection comes before its children.
    /// The tasks are not started.
    pub async fn create_tasks(&self, locator: &str) -> Result<Vec<Task>> {
        self.store.create_tasks(locator, &self.registry).await
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    /// Whether `instance` is the one the task pool holds for its id
    pub(crate) fn is_tracked(&self, instance: &Arc<RunInstance>) -> bool {
        self.pools
            .lock()
            .tasks
            .get(&instance.id)
            .is_some_and(|current| Arc::ptr_eq(current, instance))
    }

    /// Push an instance into the pipeline unless a stage already owns it
    pub(crate) async fn admit(&self, instance: Arc<RunInstance>) {
        if !instance.try_enter_stream() {
            tracing::debug!(task_id = %instance.id, "Already in pipeline, not re-admitted");
            return;
        }

        let ingress = self.pipeline.ingress.lock().clone();
        let Some(ingress) = ingress else {
            instance.leave_stream();
            tracing::warn!(task_id = %instance.id, "Pipeline closed, task not admitted");
            return;
        };

        if let Err(mpsc::error::SendError(instance)) = ingress.send(instance).await {
            instance.leave_stream();
            tracing::warn!(task_id = %instance.id, "Pipeline closed, task not admitted");
        }
    }
}
