//! PostgreSQL task queue tests: dequeue exclusivity, state machine guards and
//! cancellation.
//!
//! Requires DATABASE_URL pointing at a migrated database:
//! `cargo test -p reviewq-db --test task_queue_test -- --ignored`

use futures::future::join_all;
use uuid::Uuid;

use reviewq_db::test_fixtures::{connect_test_database, review_task, unique_credential};
use reviewq_db::{
    log_pool_metrics, CancelOutcome, Error, FileMetadataRepository, NewFileMetadata, NewTask,
    PoolConfig, ProcessMode, TaskRepository, TaskStatus, TaskType,
};

fn upload(name: &str) -> NewFileMetadata {
    NewFileMetadata {
        id: Uuid::now_v7(),
        original_name: name.to_string(),
        mime_hint: Some("application/pdf".to_string()),
        size_bytes: 1024,
        process_mode: ProcessMode::Text,
        converted_image_count: 0,
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_enqueue_scenario_queue_length_and_order() {
    let db = connect_test_database().await;
    let h = unique_credential();

    let first = db.tasks.create(review_task(&h)).await.unwrap();
    let second = db.tasks.create(review_task(&h)).await.unwrap();
    db.tasks.create(review_task(&h)).await.unwrap();

    assert_eq!(db.tasks.queued_count(&h).await.unwrap(), 3);

    let a = db.tasks.dequeue_next(&h).await.unwrap().unwrap();
    let b = db.tasks.dequeue_next(&h).await.unwrap().unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(a.status, TaskStatus::Processing);
    assert!(a.started_at.is_some());
    assert_eq!(b.id, second.id);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_concurrent_dequeue_hands_out_each_row_once() {
    let db = connect_test_database().await;
    let h = unique_credential();
    const QUEUED: usize = 4;
    const WORKERS: usize = 8;

    for _ in 0..QUEUED {
        db.tasks.create(review_task(&h)).await.unwrap();
    }

    let results = join_all((0..WORKERS).map(|_| {
        let tasks = db.tasks.clone();
        let h = h.clone();
        tokio::spawn(async move { tasks.dequeue_next(&h).await })
    }))
    .await;

    let mut ids: Vec<Uuid> = results
        .into_iter()
        .filter_map(|r| r.unwrap().unwrap())
        .map(|t| t.id)
        .collect();
    assert_eq!(ids.len(), QUEUED.min(WORKERS));
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), QUEUED.min(WORKERS));
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_queued_task_cannot_complete_directly() {
    let db = connect_test_database().await;
    let task = db.tasks.create(review_task(&unique_credential())).await.unwrap();

    let err = db.tasks.complete(task.id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: TaskStatus::Queued,
            to: TaskStatus::Completed
        }
    ));
    let err = db.tasks.fail(task.id, "boom").await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let unchanged = db.tasks.get(task.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, TaskStatus::Queued);
    assert!(unchanged.timestamps_consistent());
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_cancel_queued_removes_file_metadata() {
    let db = connect_test_database().await;
    let task = db
        .tasks
        .create(review_task(&unique_credential()).with_files(vec![upload("a.pdf"), upload("b.pdf")]))
        .await
        .unwrap();

    let outcome = db.tasks.cancel_queued(task.id).await.unwrap();
    match outcome {
        CancelOutcome::Cancelled { files, .. } => assert_eq!(files.len(), 2),
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert!(db.tasks.get(task.id).await.unwrap().is_none());
    assert!(db.files.list_for_task(task.id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_cancel_processing_is_refused_and_task_unchanged() {
    let db = connect_test_database().await;
    let h = unique_credential();
    let task = db
        .tasks
        .create(review_task(&h).with_files(vec![upload("a.pdf")]))
        .await
        .unwrap();
    db.tasks.dequeue_next(&h).await.unwrap();

    let outcome = db.tasks.cancel_queued(task.id).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::NotQueued(ref t) if t.status == TaskStatus::Processing));

    let still = db.tasks.get(task.id).await.unwrap().unwrap();
    assert_eq!(still.status, TaskStatus::Processing);
    assert_eq!(db.files.list_for_task(task.id).await.unwrap().len(), 1);

    db.tasks.complete(task.id).await.unwrap();
    let done = db.tasks.get(task.id).await.unwrap().unwrap();
    assert!(done.timestamps_consistent());
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_priority_beats_age() {
    let db = connect_test_database().await;
    let h = unique_credential();
    db.tasks.create(review_task(&h)).await.unwrap();
    let urgent = db.tasks.create(review_task(&h).with_priority(5)).await.unwrap();

    let next = db.tasks.dequeue_next(&h).await.unwrap().unwrap();
    assert_eq!(next.id, urgent.id);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_concurrent_creates_for_one_target_admit_one() {
    let db = connect_test_database().await;
    let h = unique_credential();
    let target_id = Uuid::now_v7();

    let attempts = (0..4).map(|_| {
        let task = NewTask::new(
            TaskType::Review,
            h.clone(),
            target_id,
            "test-user",
            &serde_json::json!({}),
        )
        .unwrap();
        db.tasks.create(task)
    });
    let outcomes = join_all(attempts).await;

    let created = outcomes.iter().filter(|o| o.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|o| matches!(o, Err(Error::Conflict(_))))
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 3);
    assert_eq!(db.tasks.queued_count(&h).await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_pool_health_reports_configured_size() {
    let db = connect_test_database().await;
    db.tasks.queued_count(&unique_credential()).await.unwrap();

    let health = log_pool_metrics(db.pool());
    assert_eq!(health.max_connections, PoolConfig::for_workers(4).max_connections);
    assert!(health.size >= 1);
    assert!(!health.is_saturated());
}
