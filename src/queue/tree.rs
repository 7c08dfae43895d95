//! Task trees with live statuses.

use super::{Pools, TaskQueue};
use crate::error::Result;
use crate::types::{Status, TaskId, TaskTreeNode};

impl TaskQueue {
    /// The store's task tree for `ids`, with live statuses from the pools
    ///
    /// With `include_status`, leaves whose status is not listed are dropped,
    /// and so are collections left without children.
    pub async fn list_task_tree(
        &self,
        ids: &[TaskId],
        include_status: Option<&[Status]>,
    ) -> Result<Vec<TaskTreeNode>> {
        let mut tree = self.store.list_task_tree(ids).await?;

        {
            let pools = self.pools.lock();
            for node in &mut tree {
                overlay(&pools, node);
            }
        }

        Ok(match include_status {
            Some(statuses) => prune(tree, statuses),
            None => tree,
        })
    }
}

fn overlay(pools: &Pools, node: &mut TaskTreeNode) {
    if let Some(instance) = pools.tasks.get(&node.task.id) {
        node.task.status = instance.status();
        node.task.works_id = instance.works_id().or(node.task.works_id);
    } else if let Some(parent) = pools.parents.get(&node.task.id) {
        node.task.status = parent.status;
    }

    for child in &mut node.children {
        overlay(pools, child);
    }
}

fn prune(nodes: Vec<TaskTreeNode>, statuses: &[Status]) -> Vec<TaskTreeNode> {
    nodes
        .into_iter()
        .filter_map(|mut node| {
            if node.task.is_collection {
                node.children = prune(node.children, statuses);
                (!node.children.is_empty()).then_some(node)
            } else {
                statuses.contains(&node.task.status).then_some(node)
            }
        })
        .collect()
}
