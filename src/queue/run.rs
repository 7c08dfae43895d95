//! Run instances: the live, in-memory state of tracked tasks and parents.
//!
//! Lock order is pool first, instance second. Code holding an instance's state
//! lock never touches the pools.

use crate::error::TaskError;
use crate::types::{Operation, ParentDto, Status, Task, TaskDto, TaskId, TaskSchedule, WorksId};
use crate::writer::TaskWriter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Mutable part of a run instance
#[derive(Debug)]
struct RunState {
    /// Record as loaded, with `status` tracking the last settled status
    task: Task,
    status: Status,
    info_saved: bool,
    res_save_suspended: bool,
    in_stream: bool,
    writer: TaskWriter,
    works_id: Option<WorksId>,
}

/// What the Resource stage needs to run a transfer
#[derive(Debug)]
pub(crate) struct TransferPlan {
    pub(crate) task: Task,
    pub(crate) works_id: Option<WorksId>,
    pub(crate) writer: TaskWriter,
    pub(crate) resume: bool,
}

/// Result of asking an instance to pause
#[derive(Debug)]
pub(crate) enum PauseRequest {
    /// Was waiting; now paused
    Paused,
    /// Mid-transfer; the byte pipe must be disconnected through the store
    Transferring { task: Task, writer: TaskWriter },
    /// Already paused
    AlreadyPaused,
    /// Terminal status, nothing to pause
    Settled(Status),
}

/// Live state of one task in the task pool
#[derive(Debug)]
pub(crate) struct RunInstance {
    pub(crate) id: TaskId,
    pub(crate) parent_id: Option<TaskId>,
    state: Mutex<RunState>,
    removal: Mutex<Option<CancellationToken>>,
}

impl RunInstance {
    /// New `Waiting` instance with prior save state resolved from the store
    pub(crate) fn new(task: Task, works_id: Option<WorksId>) -> Self {
        Self {
            id: task.id,
            parent_id: task.parent_id,
            state: Mutex::new(RunState {
                info_saved: works_id.is_some(),
                res_save_suspended: task.pending_resource_id.is_some(),
                status: Status::Waiting,
                in_stream: false,
                writer: TaskWriter::new(),
                works_id,
                task,
            }),
            removal: Mutex::new(None),
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.state.lock().status
    }

    #[cfg(test)]
    pub(crate) fn set_status(&self, status: Status) {
        self.state.lock().status = status;
    }

    pub(crate) fn task(&self) -> Task {
        self.state.lock().task.clone()
    }

    pub(crate) fn works_id(&self) -> Option<WorksId> {
        self.state.lock().works_id
    }

    pub(crate) fn set_works_id(&self, works_id: WorksId) {
        self.state.lock().works_id = Some(works_id);
    }

    #[cfg(test)]
    pub(crate) fn is_info_saved(&self) -> bool {
        self.state.lock().info_saved
    }

    #[cfg(test)]
    pub(crate) fn is_res_save_suspended(&self) -> bool {
        self.state.lock().res_save_suspended
    }

    pub(crate) fn writer(&self) -> TaskWriter {
        self.state.lock().writer.clone()
    }

    pub(crate) fn dto(&self) -> TaskDto {
        let state = self.state.lock();
        TaskDto::project(&state.task, state.status, state.works_id)
    }

    /// Progress snapshot; bytes for a leaf
    pub(crate) fn schedule(&self) -> TaskSchedule {
        let state = self.state.lock();
        TaskSchedule {
            id: self.id,
            parent_id: self.parent_id,
            status: state.status,
            total: state.writer.bytes_sum(),
            finished: state.writer.progress(state.status == Status::Processing),
        }
    }

    /// Re-arm a settled or paused instance for another run
    ///
    /// `Resume` of a paused instance keeps the writer and the partial resource so
    /// the transfer continues where it stopped. Anything else (`Start`, or any
    /// restart of a settled instance) gets a fresh writer.
    pub(crate) fn pre_start(&self, operation: Operation) -> Result<(), TaskError> {
        let mut state = self.state.lock();
        match state.status {
            Status::Finished | Status::Failed | Status::Pause => {}
            current => {
                return Err(TaskError::InvalidState {
                    id: self.id,
                    operation: "start",
                    current,
                });
            }
        }

        if operation == Operation::Resume && state.status == Status::Pause {
            state.writer.rearm();
        } else {
            state.writer = TaskWriter::new();
            state.res_save_suspended = false;
        }
        state.status = Status::Waiting;
        Ok(())
    }

    /// First step of a pause, taken atomically with the status check
    pub(crate) fn request_pause(&self) -> PauseRequest {
        let mut state = self.state.lock();
        match state.status {
            Status::Waiting => {
                state.status = Status::Pause;
                PauseRequest::Paused
            }
            Status::Processing => PauseRequest::Transferring {
                task: state.task.clone(),
                writer: state.writer.clone(),
            },
            Status::Pause => PauseRequest::AlreadyPaused,
            settled => PauseRequest::Settled(settled),
        }
    }

    /// Record a disconnected transfer; returns false if the run settled meanwhile
    pub(crate) fn mark_transfer_paused(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(state.status, Status::Processing | Status::Waiting) {
            state.status = Status::Pause;
            state.res_save_suspended = true;
            true
        } else {
            false
        }
    }

    /// Claim metadata resolution; false if it already happened
    pub(crate) fn claim_info(&self) -> bool {
        let mut state = self.state.lock();
        if state.info_saved {
            false
        } else {
            state.info_saved = true;
            true
        }
    }

    pub(crate) fn rollback_info(&self) {
        self.state.lock().info_saved = false;
    }

    /// Flip to `Processing` unless paused, returning the transfer to run
    pub(crate) fn begin_transfer(&self) -> Option<TransferPlan> {
        let mut state = self.state.lock();
        if state.status == Status::Pause {
            return None;
        }
        state.status = Status::Processing;
        Some(TransferPlan {
            task: state.task.clone(),
            works_id: state.works_id,
            writer: state.writer.clone(),
            resume: state.res_save_suspended,
        })
    }

    /// Record the status a run ended with
    pub(crate) fn settle(&self, status: Status) {
        let mut state = self.state.lock();
        state.status = status;
        state.task.status = status;
        if status.is_terminal() {
            state.res_save_suspended = false;
        }
    }

    /// A transfer came back paused; only a running instance becomes `Pause`
    pub(crate) fn settle_pause(&self) {
        let mut state = self.state.lock();
        if state.status == Status::Processing {
            state.status = Status::Pause;
            state.res_save_suspended = true;
        }
    }

    /// Hand the instance to the pipeline; false if a stage already owns it
    pub(crate) fn try_enter_stream(&self) -> bool {
        let mut state = self.state.lock();
        if state.in_stream {
            false
        } else {
            state.in_stream = true;
            true
        }
    }

    pub(crate) fn leave_stream(&self) {
        self.state.lock().in_stream = false;
    }

    pub(crate) fn is_in_stream(&self) -> bool {
        self.state.lock().in_stream
    }

    /// Install a fresh removal timer token, cancelling any previous one
    pub(crate) fn arm_removal(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.removal.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    pub(crate) fn cancel_removal(&self) {
        if let Some(token) = self.removal.lock().take() {
            token.cancel();
        }
    }
}

/// A parent's view of one child
#[derive(Debug, Clone)]
pub(crate) enum ChildEntry {
    /// Child is in the task pool
    Live(Arc<RunInstance>),
    /// Child is not tracked; status as last known
    Stored(Status),
}

impl ChildEntry {
    pub(crate) fn status(&self) -> Status {
        match self {
            ChildEntry::Live(instance) => instance.status(),
            ChildEntry::Stored(status) => *status,
        }
    }
}

/// Live state of one collection in the parent pool
#[derive(Debug)]
pub(crate) struct ParentRunInstance {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) status: Status,
    pub(crate) children: HashMap<TaskId, ChildEntry>,
    pub(crate) removal: Option<CancellationToken>,
}

impl ParentRunInstance {
    fn finished(&self) -> u64 {
        self.children
            .values()
            .filter(|child| child.status() == Status::Finished)
            .count() as u64
    }

    pub(crate) fn has_active_child(&self) -> bool {
        self.children.values().any(|child| child.status().is_active())
    }

    pub(crate) fn dto(&self) -> ParentDto {
        ParentDto {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            total: self.children.len() as u64,
            finished: self.finished(),
        }
    }

    /// Progress snapshot; child counts for a parent
    pub(crate) fn schedule(&self) -> TaskSchedule {
        TaskSchedule {
            id: self.id,
            parent_id: None,
            status: self.status,
            total: self.children.len() as u64,
            finished: self.finished(),
        }
    }

    pub(crate) fn cancel_removal(&mut self) {
        if let Some(token) = self.removal.take() {
            token.cancel();
        }
    }
}
