//! Waiting helpers and file checks for end-to-end tests

use media_archiver::{Status, TaskId, TaskQueue, TaskSchedule, TaskTreeNode};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a test waits for any expected state
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Wait until a tracked task or parent reports `status`
pub async fn wait_for_status(queue: &TaskQueue, id: TaskId, status: Status) -> TaskSchedule {
    let reached = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match queue.get_schedule(id) {
                Some(schedule) if schedule.status == status => return schedule,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await;
    reached.unwrap_or_else(|_| panic!("task {id} never reached {status:?}"))
}

/// Wait until `id` has left the queue's pools
pub async fn wait_for_removal(queue: &TaskQueue, id: TaskId) {
    let removed = tokio::time::timeout(WAIT_TIMEOUT, async {
        while queue.get_schedule(id).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(removed.is_ok(), "task {id} was never removed");
}

/// Tree node for a single task
pub async fn tree_node(queue: &TaskQueue, id: TaskId) -> TaskTreeNode {
    let mut tree = queue.list_task_tree(&[id], None).await.unwrap();
    assert_eq!(tree.len(), 1, "task {id} not found");
    tree.remove(0)
}

/// Every file below `dir`, sorted
pub fn files_below(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// The single imported resource with this file name
pub fn imported_file(resource_dir: &Path, name: &str) -> PathBuf {
    let mut matches: Vec<_> = files_below(resource_dir)
        .into_iter()
        .filter(|path| path.file_name().is_some_and(|n| n == name))
        .collect();
    assert_eq!(
        matches.len(),
        1,
        "expected one imported '{name}', found {matches:?}"
    );
    matches.remove(0)
}
