use super::*;

#[tokio::test]
async fn test_start_single_task_runs_to_finished_and_is_removed() {
    let mut t = create_test_queue().await;
    let task = t.create("a.jpg").await;

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();

    t.wait_for_event(|e| matches!(e, Event::TaskSet { task: dto } if dto.id == task.id))
        .await;
    t.wait_for_event(|e| is_update(e, task.id, Status::Finished))
        .await;

    // Still queryable during the grace delay
    let schedule = t.queue.get_schedule(task.id).unwrap();
    assert_eq!(schedule.status, Status::Finished);
    assert_eq!(schedule.total, 1024);
    assert_eq!(schedule.finished, 1024);
    t.wait_for_stored_status(task.id, Status::Finished).await;

    t.wait_for_event(|e| matches!(e, Event::TaskRemove { id } if *id == task.id))
        .await;
    assert!(t.queue.get_schedule(task.id).is_none());
}

#[tokio::test]
async fn test_start_unknown_id_reports_not_found_and_admits_the_rest() {
    let t = create_test_queue().await;
    let task = t.create("a.jpg").await;

    let result = t
        .queue
        .push_batch(&[TaskId(9999), task.id], Operation::Start)
        .await;

    match result {
        Err(Error::Task(TaskError::NotFound { id })) => assert_eq!(id, TaskId(9999)),
        other => panic!("expected NotFound, got {other:?}"),
    }
    t.wait_for_status(task.id, Status::Finished).await;
}

#[tokio::test]
async fn test_metadata_is_resolved_once_per_instance() {
    let t = create_test_queue_with(|c| c.queue.removal_delay = Duration::from_secs(30)).await;
    let task = t.create("a.jpg").await;

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    t.wait_for_status(task.id, Status::Finished).await;

    // Restart within the grace delay reuses the instance
    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    t.wait_for_status(task.id, Status::Finished).await;

    assert_eq!(t.provider.info_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(t.provider.opened.lock().len(), 2);
}

#[tokio::test]
async fn test_starting_running_task_is_invalid_state() {
    let t = create_test_queue().await;
    t.provider.set_behavior("slow.bin", Behavior::Manual { size: 10 });
    let task = t.create("slow.bin").await;

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    t.wait_for_status(task.id, Status::Processing).await;

    let result = t.queue.push_batch(&[task.id], Operation::Start).await;
    assert!(matches!(
        result,
        Err(Error::Task(TaskError::InvalidState {
            current: Status::Processing,
            ..
        }))
    ));
}

#[tokio::test]
async fn test_restart_cancels_pending_removal() {
    let t = create_test_queue().await;
    let task = t.create("a.bin").await;

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    t.wait_for_status(task.id, Status::Finished).await;

    // Second run stays in flight well past the first run's removal timer
    t.provider.set_behavior("a.bin", Behavior::Manual { size: 4 });
    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    let mut feed = t.provider.take_feed("a.bin").await;
    tokio::time::sleep(Duration::from_millis(900)).await;

    let schedule = t.queue.get_schedule(task.id).expect("evicted while running");
    assert_eq!(schedule.status, Status::Processing);

    feed_bytes(&mut feed, 4).await;
    drop(feed);
    let schedule = t.wait_for_status(task.id, Status::Finished).await;
    assert_eq!(schedule.finished, 4);
}

#[tokio::test]
async fn test_pause_mid_transfer_keeps_written_bytes_then_resume_finishes() {
    let t = create_test_queue().await;
    t.provider.set_behavior("video.mp4", Behavior::Manual { size: 100 });
    let task = t.create("video.mp4").await;

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    let mut feed = t.provider.take_feed("video.mp4").await;
    feed_bytes(&mut feed, 40).await;
    wait_for_progress(&t, task.id, 40).await;

    t.queue.push_batch(&[task.id], Operation::Pause).await.unwrap();

    let schedule = t.wait_for_status(task.id, Status::Pause).await;
    assert_eq!(schedule.finished, 40);
    assert_eq!(schedule.total, 100);
    assert_eq!(t.stored_status(task.id).await, Status::Pause);

    // Progress holds while paused
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(t.queue.get_schedule(task.id).unwrap().finished, 40);

    t.queue.push_batch(&[task.id], Operation::Resume).await.unwrap();
    let mut feed = t.provider.take_feed("video.mp4").await;
    assert_eq!(*t.provider.resume_offsets.lock(), vec![40]);

    feed_bytes(&mut feed, 60).await;
    drop(feed);

    let schedule = t.wait_for_status(task.id, Status::Finished).await;
    assert_eq!(schedule.finished, 100);
    assert_eq!(schedule.total, 100);
}

#[tokio::test]
async fn test_start_after_pause_transfers_from_scratch() {
    let t = create_test_queue().await;
    t.provider.set_behavior("video.mp4", Behavior::Manual { size: 100 });
    let task = t.create("video.mp4").await;

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    let mut feed = t.provider.take_feed("video.mp4").await;
    feed_bytes(&mut feed, 30).await;
    wait_for_progress(&t, task.id, 30).await;
    t.queue.push_batch(&[task.id], Operation::Pause).await.unwrap();
    t.wait_for_status(task.id, Status::Pause).await;

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    let mut feed = t.provider.take_feed("video.mp4").await;
    feed_bytes(&mut feed, 100).await;
    drop(feed);

    let schedule = t.wait_for_status(task.id, Status::Finished).await;
    assert_eq!(schedule.finished, 100);
    assert!(t.provider.resume_offsets.lock().is_empty());
}

#[tokio::test]
async fn test_pause_untracked_task_is_not_in_pool() {
    let t = create_test_queue().await;
    let task = t.create("a.jpg").await;

    let result = t.queue.push_batch(&[task.id], Operation::Pause).await;

    match result {
        Err(Error::Task(TaskError::NotInPool { id })) => assert_eq!(id, task.id),
        other => panic!("expected NotInPool, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pause_finished_task_is_invalid_state() {
    let t = create_test_queue_with(|c| c.queue.removal_delay = Duration::from_secs(30)).await;
    let task = t.create("a.jpg").await;
    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    t.wait_for_status(task.id, Status::Finished).await;

    let result = t.queue.push_batch(&[task.id], Operation::Pause).await;

    match result {
        Err(Error::Task(TaskError::InvalidState {
            operation, current, ..
        })) => {
            assert_eq!(operation, "pause");
            assert_eq!(current, Status::Finished);
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }
    t.wait_for_stored_status(task.id, Status::Finished).await;
}

#[tokio::test]
async fn test_pause_is_idempotent() {
    let t = create_test_queue().await;
    t.provider.set_behavior("slow.bin", Behavior::Manual { size: 10 });
    let task = t.create("slow.bin").await;
    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    t.wait_for_status(task.id, Status::Processing).await;

    t.queue.push_batch(&[task.id], Operation::Pause).await.unwrap();
    t.queue.push_batch(&[task.id], Operation::Pause).await.unwrap();

    t.wait_for_status(task.id, Status::Pause).await;
}

#[tokio::test]
async fn test_stop_removes_unparented_task_immediately() {
    let mut t = create_test_queue_with(|c| c.queue.removal_delay = Duration::from_secs(30)).await;
    t.provider.set_behavior("slow.bin", Behavior::Manual { size: 10 });
    let task = t.create("slow.bin").await;
    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();
    let mut feed = t.provider.take_feed("slow.bin").await;
    feed_bytes(&mut feed, 3).await;
    wait_for_progress(&t, task.id, 3).await;

    t.queue.push_batch(&[task.id], Operation::Stop).await.unwrap();

    assert!(t.queue.get_schedule(task.id).is_none());
    t.wait_for_event(|e| matches!(e, Event::TaskRemove { id } if *id == task.id))
        .await;
    assert_eq!(t.stored_status(task.id).await, Status::Pause);
}

#[tokio::test]
async fn test_waiting_task_paused_before_transfer_never_opens_its_stream() {
    let t = create_test_queue_with(|c| c.queue.max_parallel_import = 1).await;
    t.provider.set_behavior("first.bin", Behavior::Manual { size: 5 });
    let first = t.create("first.bin").await;
    let second = t.create("second.bin").await;

    t.queue
        .push_batch(&[first.id, second.id], Operation::Start)
        .await
        .unwrap();
    let mut feed = t.provider.take_feed("first.bin").await;

    t.queue.push_batch(&[second.id], Operation::Pause).await.unwrap();
    feed_bytes(&mut feed, 5).await;
    drop(feed);

    t.wait_for_status(first.id, Status::Finished).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(t.queue.get_schedule(second.id).unwrap().status, Status::Pause);
    assert_eq!(*t.provider.opened.lock(), vec!["first.bin".to_string()]);
    assert_eq!(t.stored_status(second.id).await, Status::Pause);
}

#[tokio::test]
async fn test_push_batch_after_shutdown_is_a_no_op() {
    let t = create_test_queue().await;
    let task = t.create("a.jpg").await;
    t.queue.shutdown().await.unwrap();

    t.queue.push_batch(&[task.id], Operation::Start).await.unwrap();

    assert!(t.queue.get_schedule(task.id).is_none());
    assert!(t.provider.opened.lock().is_empty());
}
