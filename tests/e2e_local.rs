//! End-to-end imports from the local file system

mod common;

use common::*;
use media_archiver::{Event, Operation, Status};

#[tokio::test]
async fn test_import_single_file() {
    let env = create_test_env().await;
    let content = sample_bytes(64 * 1024, 7);
    let source = write_source(&env.source_dir(), "photo.jpg", &content);

    let tasks = env
        .queue
        .create_tasks(&source.display().to_string())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "photo.jpg");
    assert!(!tasks[0].is_collection);

    env.queue
        .push_batch(&[tasks[0].id], Operation::Start)
        .await
        .unwrap();

    let schedule = wait_for_status(&env.queue, tasks[0].id, Status::Finished).await;
    assert_eq!(schedule.finished, content.len() as u64);
    assert_eq!(schedule.total, content.len() as u64);

    let imported = imported_file(env.resource_dir(), "photo.jpg");
    assert_eq!(std::fs::read(imported).unwrap(), content);

    wait_for_removal(&env.queue, tasks[0].id).await;
    let node = tree_node(&env.queue, tasks[0].id).await;
    assert_eq!(node.task.status, Status::Finished);
}

#[tokio::test]
async fn test_import_directory_as_collection() {
    let env = create_test_env().await;
    let source_dir = env.source_dir();
    let a = sample_bytes(10_000, 1);
    let b = sample_bytes(20_000, 2);
    let c = sample_bytes(5, 3);
    write_source(&source_dir, "a.jpg", &a);
    write_source(&source_dir, "b.mp4", &b);
    write_source(&source_dir, "c.txt", &c);

    let mut events = env.queue.subscribe();
    let tasks = env
        .queue
        .create_tasks(&source_dir.display().to_string())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 4);
    let collection = &tasks[0];
    assert!(collection.is_collection);
    let names: Vec<_> = tasks[1..].iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["a.jpg", "b.mp4", "c.txt"]);

    env.queue
        .push_batch(&[collection.id], Operation::Start)
        .await
        .unwrap();

    let schedule = wait_for_status(&env.queue, collection.id, Status::Finished).await;
    assert_eq!(schedule.total, 3);
    assert_eq!(schedule.finished, 3);

    assert_eq!(std::fs::read(imported_file(env.resource_dir(), "a.jpg")).unwrap(), a);
    assert_eq!(std::fs::read(imported_file(env.resource_dir(), "b.mp4")).unwrap(), b);
    assert_eq!(std::fs::read(imported_file(env.resource_dir(), "c.txt")).unwrap(), c);

    wait_for_removal(&env.queue, collection.id).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let mut removed_tasks = 0;
    let mut removed_parent = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::TaskRemove { .. } => removed_tasks += 1,
            Event::ParentRemove { id } => removed_parent = id == collection.id,
            _ => {}
        }
    }
    assert_eq!(removed_tasks, 3);
    assert!(removed_parent);

    let tree = tree_node(&env.queue, collection.id).await;
    assert_eq!(tree.children.len(), 3);
    assert!(tree
        .children
        .iter()
        .all(|node| node.task.status == Status::Finished));
}

#[tokio::test]
async fn test_reimport_reuses_saved_works() {
    let env = create_test_env_with(|c| {
        c.queue.removal_delay = std::time::Duration::from_secs(30);
    })
    .await;
    let content = sample_bytes(4096, 9);
    let source = write_source(&env.source_dir(), "clip.mp4", &content);
    let locator = source.display().to_string();

    let first = env.queue.create_tasks(&locator).await.unwrap().remove(0);
    env.queue
        .push_batch(&[first.id], Operation::Start)
        .await
        .unwrap();
    wait_for_status(&env.queue, first.id, Status::Finished).await;

    let second = env.queue.create_tasks(&locator).await.unwrap().remove(0);
    assert_ne!(first.id, second.id);
    env.queue
        .push_batch(&[second.id], Operation::Start)
        .await
        .unwrap();
    wait_for_status(&env.queue, second.id, Status::Finished).await;

    // Both are still tracked, so the tree carries their live works
    let first_works = tree_node(&env.queue, first.id).await.task.works_id;
    let second_works = tree_node(&env.queue, second.id).await.task.works_id;
    assert!(first_works.is_some());
    assert_eq!(first_works, second_works);
    assert_eq!(
        std::fs::read(imported_file(env.resource_dir(), "clip.mp4")).unwrap(),
        content
    );
}

#[tokio::test]
async fn test_finished_tasks_survive_reopen() {
    let env = create_test_env().await;
    let source = write_source(&env.source_dir(), "doc.pdf", &sample_bytes(777, 4));

    let task = env
        .queue
        .create_tasks(&source.display().to_string())
        .await
        .unwrap()
        .remove(0);
    env.queue
        .push_batch(&[task.id], Operation::Start)
        .await
        .unwrap();
    wait_for_status(&env.queue, task.id, Status::Finished).await;
    wait_for_removal(&env.queue, task.id).await;
    env.queue.shutdown().await.unwrap();

    let queue = reopen(&env).await;
    let node = tree_node(&queue, task.id).await;
    assert_eq!(node.task.status, Status::Finished);
    assert!(queue.get_schedule(task.id).is_none());
    assert!(queue.is_idle());
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_source_fails_task() {
    let env = create_test_env().await;
    let source = write_source(&env.source_dir(), "gone.jpg", b"soon deleted");
    let task = env
        .queue
        .create_tasks(&source.display().to_string())
        .await
        .unwrap()
        .remove(0);
    std::fs::remove_file(&source).unwrap();

    env.queue
        .push_batch(&[task.id], Operation::Start)
        .await
        .unwrap();

    wait_for_removal(&env.queue, task.id).await;
    let node = tree_node(&env.queue, task.id).await;
    assert_eq!(node.task.status, Status::Failed);
}
