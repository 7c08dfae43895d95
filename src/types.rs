//! Core types for media-archiver

use serde::{Deserialize, Serialize};

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Identifier of a resolved works (the artifact a task produces)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorksId(pub i64);

impl std::fmt::Display for WorksId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status
///
/// `PartlyFinished` only ever appears on parents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Queued and waiting for a pipeline stage
    Waiting,
    /// Resource transfer in progress
    Processing,
    /// Paused by the user or by shutdown
    Pause,
    /// Successfully completed
    Finished,
    /// Some children finished, some failed
    PartlyFinished,
    /// Failed with error
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Waiting,
            1 => Status::Processing,
            2 => Status::Pause,
            3 => Status::Finished,
            4 => Status::PartlyFinished,
            5 => Status::Failed,
            _ => Status::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Waiting => 0,
            Status::Processing => 1,
            Status::Pause => 2,
            Status::Finished => 3,
            Status::PartlyFinished => 4,
            Status::Failed => 5,
        }
    }

    /// Whether the status ends a run (eligible for eviction)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Finished | Status::PartlyFinished | Status::Failed
        )
    }

    /// Whether a task in this status keeps its parent alive
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Waiting | Status::Processing | Status::Pause)
    }
}

/// Batch operation accepted by [`TaskQueue::push_batch`](crate::TaskQueue::push_batch)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Start (or restart from scratch)
    Start,
    /// Continue where the last run paused
    Resume,
    /// Pause, keeping the instance in the pool
    Pause,
    /// Pause and drop unparented instances from the pool
    Stop,
}

/// Task record as persisted by the task store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task ID
    pub id: TaskId,
    /// Parent (collection) task, if any
    pub parent_id: Option<TaskId>,
    /// Site key used to select a content provider
    pub site: String,
    /// URL or path the provider resolves
    pub locator: String,
    /// Identity of the item at the remote site, once known
    pub remote_id: Option<String>,
    /// Display name
    pub name: String,
    /// Whether this task groups child tasks
    pub is_collection: bool,
    /// Persisted status
    pub status: Status,
    /// Resource record still being written, if any
    pub pending_resource_id: Option<i64>,
    /// Whether the pending resource can be continued from an offset
    pub continuable: bool,
    /// Unix timestamp when the task was created
    pub created_at: i64,
}

/// Task projection sent with lifecycle events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDto {
    /// Task ID
    pub id: TaskId,
    /// Parent task, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// Display name
    pub name: String,
    /// URL or path
    pub locator: String,
    /// Site key
    pub site: String,
    /// Whether this task groups child tasks
    pub is_collection: bool,
    /// Live status (pool status when tracked, store status otherwise)
    pub status: Status,
    /// Resolved works, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub works_id: Option<WorksId>,
}

impl TaskDto {
    /// Project a task record, overriding its status with the live one
    pub fn project(task: &Task, status: Status, works_id: Option<WorksId>) -> Self {
        Self {
            id: task.id,
            parent_id: task.parent_id,
            name: task.name.clone(),
            locator: task.locator.clone(),
            site: task.site.clone(),
            is_collection: task.is_collection,
            status,
            works_id,
        }
    }
}

impl From<&Task> for TaskDto {
    fn from(task: &Task) -> Self {
        Self::project(task, task.status, None)
    }
}

/// Parent projection sent with lifecycle events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParentDto {
    /// Parent task ID
    pub id: TaskId,
    /// Display name (empty if the parent record is gone)
    pub name: String,
    /// Aggregate status
    pub status: Status,
    /// Number of children
    pub total: u64,
    /// Number of finished children
    pub finished: u64,
}

/// Progress snapshot for a task or a parent
///
/// For leaves `total`/`finished` are bytes; for parents they are child counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedule {
    /// Task or parent ID
    pub id: TaskId,
    /// Parent of a leaf task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// Live status
    pub status: Status,
    /// Total bytes (leaf) or child count (parent)
    pub total: u64,
    /// Written bytes (leaf) or finished child count (parent)
    pub finished: u64,
}

/// Node of a task tree as returned by [`TaskQueue::list_task_tree`](crate::TaskQueue::list_task_tree)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskTreeNode {
    /// The task at this node
    pub task: TaskDto,
    /// Children (only collections have any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskTreeNode>,
}

/// Event emitted during task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task entered the task pool
    TaskSet {
        /// Task projection
        task: TaskDto,
    },

    /// Tracked task changed status
    TaskUpdate {
        /// Task projection
        task: TaskDto,
    },

    /// Task left the task pool
    TaskRemove {
        /// Task ID
        id: TaskId,
    },

    /// Parent entered the parent pool
    ParentSet {
        /// Parent projection
        parent: ParentDto,
    },

    /// Parent aggregate status changed
    ParentUpdate {
        /// Parent projection
        parent: ParentDto,
    },

    /// Parent left the parent pool
    ParentRemove {
        /// Parent ID
        id: TaskId,
    },

    /// Periodic progress snapshot of all tracked tasks
    TaskSchedules {
        /// One entry per tracked task
        schedules: Vec<TaskSchedule>,
    },

    /// Periodic progress snapshot of all tracked parents
    ParentSchedules {
        /// One entry per tracked parent
        schedules: Vec<TaskSchedule>,
    },

    /// Queue shut down
    Shutdown,
}
