//! PostgreSQL review aggregate and result cache tests.
//!
//! Requires DATABASE_URL pointing at a migrated database.

use uuid::Uuid;

use reviewq_db::test_fixtures::{connect_test_database, seed_review_target};
use reviewq_db::{
    FileMetadata, NewResultCacheEntry, NewReviewResult, ProcessMode, ResultCacheRepository,
    ReviewRepository,
};

fn file(name: &str) -> FileMetadata {
    FileMetadata {
        id: Uuid::now_v7(),
        task_id: Uuid::now_v7(),
        original_name: name.to_string(),
        mime_hint: None,
        size_bytes: 10,
        process_mode: ProcessMode::Text,
        converted_image_count: 0,
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_upsert_keeps_one_row_per_item() {
    let db = connect_test_database().await;
    let seeded = seed_review_target(&db.reviews, 2).await;
    let (first, second) = (seeded.items[0].id, seeded.items[1].id);

    db.reviews
        .upsert_results(
            seeded.target.id,
            vec![
                NewReviewResult::error(first, "timeout"),
                NewReviewResult::success(second, "A".into(), "fine".into()),
            ],
        )
        .await
        .unwrap();
    db.reviews
        .upsert_results(
            seeded.target.id,
            vec![NewReviewResult::success(first, "C".into(), "missing clause".into())],
        )
        .await
        .unwrap();

    let results = db.reviews.list_results(seeded.target.id).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].checklist_item_id, first);
    assert_eq!(results[0].evaluation.as_deref(), Some("C"));
    assert!(results[0].error_message.is_none());
    assert_eq!(results[1].comment.as_deref(), Some("fine"));
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_cache_reassembles_chunks_and_tracks_max() {
    let db = connect_test_database().await;
    let seeded = seed_review_target(&db.reviews, 1).await;
    let item = seeded.items[0].id;
    let results = db
        .reviews
        .upsert_results(
            seeded.target.id,
            vec![NewReviewResult::success(item, "B".into(), "agg".into())],
        )
        .await
        .unwrap();
    let document = db
        .reviews
        .save_document(seeded.target.id, &file("contract.pdf"), "text")
        .await
        .unwrap();

    let entries = (0..3)
        .rev()
        .map(|i| NewResultCacheEntry {
            document_snapshot_id: document.id,
            result_id: results[0].id,
            comment: format!("part {i}"),
            total_chunks: 3,
            chunk_index: i,
            per_chunk_label: Some("B".into()),
        })
        .collect();
    db.result_cache.save_many(entries).await.unwrap();

    let comments = db.result_cache.find_comments_for_items(&[item]).await.unwrap();
    let order: Vec<i32> = comments.iter().map(|c| c.chunk_index).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(comments[0].document_name, "contract.pdf");
    assert_eq!(
        db.result_cache.max_total_chunks(document.id).await.unwrap(),
        Some(3)
    );

    db.result_cache
        .replace_for_results(
            &[results[0].id],
            vec![NewResultCacheEntry {
                document_snapshot_id: document.id,
                result_id: results[0].id,
                comment: "whole".into(),
                total_chunks: 1,
                chunk_index: 0,
                per_chunk_label: Some("A".into()),
            }],
        )
        .await
        .unwrap();
    let comments = db.result_cache.find_comments_for_items(&[item]).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].comment, "whole");
    // The coarser pass does not lower the recorded split.
    assert_eq!(
        db.result_cache.max_total_chunks(document.id).await.unwrap(),
        Some(3)
    );

    // Nor does a new checklist snapshot, which drops results and cache rows.
    let checklist = db.reviews.list_checklist_items(seeded.target.space_id).await.unwrap();
    db.reviews
        .replace_target_items(seeded.target.id, &checklist)
        .await
        .unwrap();
    assert!(db.result_cache.find_comments_for_items(&[item]).await.unwrap().is_empty());
    assert_eq!(
        db.result_cache.max_total_chunks(document.id).await.unwrap(),
        Some(3)
    );
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated schema
async fn test_generation_error_annotation_round_trip() {
    let db = connect_test_database().await;
    let space = db.reviews.create_space("Annotated").await.unwrap();

    db.reviews
        .set_generation_error(space.id, Some("model unavailable"))
        .await
        .unwrap();
    let annotated = db.reviews.get_space(space.id).await.unwrap().unwrap();
    assert_eq!(
        annotated.checklist_generation_error.as_deref(),
        Some("model unavailable")
    );

    db.reviews.set_generation_error(space.id, None).await.unwrap();
    let cleared = db.reviews.get_space(space.id).await.unwrap().unwrap();
    assert!(cleared.checklist_generation_error.is_none());
}
