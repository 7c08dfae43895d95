//! TaskQueue tests against a temporary SQLite store and a scripted provider.

use super::test_helpers::*;
use crate::error::{Error, TaskError};
use crate::types::{Event, Operation, Status, TaskId};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

mod control;

/// Write `len` bytes into a manual stream
async fn feed_bytes(feed: &mut tokio::io::DuplexStream, len: usize) {
    feed.write_all(&vec![1u8; len]).await.unwrap();
    feed.flush().await.unwrap();
}

/// Wait until a tracked task has written exactly `bytes`
async fn wait_for_progress(t: &TestQueue, id: TaskId, bytes: u64) {
    let reached = wait_until(|| {
        t.queue
            .get_schedule(id)
            .filter(|schedule| schedule.finished == bytes)
    })
    .await;
    assert!(reached.is_some(), "task {id} never reached {bytes} bytes");
}

fn is_update(event: &Event, id: TaskId, status: Status) -> bool {
    matches!(event, Event::TaskUpdate { task } if task.id == id && task.status == status)
}
