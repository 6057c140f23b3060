use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use tiered_review::db::sqlite_schema::SCHEMA_VERSION;
use tiered_review::db::{DbConfig, ProgressStore, SqliteStore, StoreError};
use tiered_review::review::types::{MemoryState, ReviewEvent, TierProgress};
use tiered_review::review::{
    ChangeSet, LearningSettings, Rating, ReviewEngine, ReviewError, ReviewSubmission,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 10, 7, 15, 0).unwrap()
}

async fn create_test_store() -> (TempDir, SqliteStore) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config = DbConfig::at_path(temp_dir.path().join("nested").join("review.db"));
    let store = SqliteStore::connect(&config)
        .await
        .expect("failed to open store");
    store.migrate().await.expect("migration failed");
    (temp_dir, store)
}

#[tokio::test]
async fn test_migration_records_schema_version_once() {
    let (temp_dir, store) = create_test_store().await;

    assert!(temp_dir.path().join("nested").join("review.db").exists());
    assert_eq!(
        store.schema_version().await.unwrap(),
        Some(SCHEMA_VERSION.to_string())
    );

    store.migrate().await.expect("second migration should be a no-op");

    for table in ["learning_settings", "item_tiers", "tier_progress", "review_events"] {
        let exists: Option<String> = sqlx::query_scalar(
            r#"SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?"#,
        )
        .bind(table)
        .fetch_optional(store.pool())
        .await
        .unwrap();
        assert!(exists.is_some(), "table {table} should exist after migration");
    }
}

#[tokio::test]
async fn test_item_catalog_round_trip() {
    let (_temp_dir, store) = create_test_store().await;
    let item_id = Uuid::new_v4();

    assert_eq!(store.item_tiers(item_id).await.unwrap(), None);

    let tiers = store.insert_item(item_id, 3).await.unwrap();
    let loaded = store.item_tiers(item_id).await.unwrap().unwrap();
    assert_eq!(loaded, tiers);
}

#[tokio::test]
async fn test_rating_persists_state_and_event() {
    let (_temp_dir, store) = create_test_store().await;
    let item_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    store.insert_item(item_id, 2).await.unwrap();
    let engine = ReviewEngine::new(Arc::new(store.clone()));

    let submission = ReviewSubmission {
        rating: Rating::Easy,
        shown_at: t0() - Duration::seconds(12),
        revealed_at: None,
        rated_at: t0(),
    };
    let outcome = engine.record_rating(user_id, item_id, submission).await.unwrap();

    let progress = store.load_progress(user_id, item_id).await.unwrap();
    let row = progress.active().unwrap();
    assert_eq!(row.id, outcome.progress_id);
    assert!((row.stability - 1.35).abs() < 1e-9);
    assert!((row.difficulty - 4.85).abs() < 1e-9);
    assert_eq!(row.last_reviewed, Some(t0()));
    assert_eq!(row.next_review, Some(t0() + Duration::milliseconds(116_640_000)));

    let events = store.review_events(user_id, item_id).await.unwrap();
    assert_eq!(events, vec![outcome.event]);
}

#[tokio::test]
async fn test_promote_demote_persist_single_active_tier() {
    let (_temp_dir, store) = create_test_store().await;
    let item_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    store.insert_item(item_id, 3).await.unwrap();
    let engine = ReviewEngine::new(Arc::new(store.clone()));

    engine
        .record_rating(user_id, item_id, ReviewSubmission::at(Rating::Good, t0()))
        .await
        .unwrap();
    let base = store.load_progress(user_id, item_id).await.unwrap().active().cloned().unwrap();

    engine.promote(user_id, item_id, t0()).await.unwrap();
    let top = engine.promote(user_id, item_id, t0()).await.unwrap();
    assert_eq!(top.tier_index, 2);
    let err = engine.promote(user_id, item_id, t0()).await.unwrap_err();
    assert!(matches!(err, ReviewError::NoNextTier { current: 2, .. }));

    engine.demote(user_id, item_id, t0()).await.unwrap();
    let back = engine.demote(user_id, item_id, t0()).await.unwrap();
    assert_eq!(back.progress_id, base.id);

    let progress = store.load_progress(user_id, item_id).await.unwrap();
    assert_eq!(progress.rows().len(), 3);
    assert_eq!(progress.active_count(), 1);
    assert_eq!(progress.active().unwrap().memory_state(), base.memory_state());
}

#[tokio::test]
async fn test_due_orders_by_time_then_item_and_honours_limit() {
    let (_temp_dir, store) = create_test_store().await;
    let user_id = Uuid::new_v4();
    let engine = ReviewEngine::new(Arc::new(store.clone()));
    let now = t0();

    let earliest = Uuid::new_v4();
    store.insert_item(earliest, 1).await.unwrap();
    engine
        .ensure_active_progress(user_id, earliest, now - Duration::hours(2))
        .await
        .unwrap();

    let mut tied = Vec::new();
    for _ in 0..4 {
        let item_id = Uuid::new_v4();
        store.insert_item(item_id, 1).await.unwrap();
        engine
            .ensure_active_progress(user_id, item_id, now - Duration::minutes(30))
            .await
            .unwrap();
        tied.push(item_id);
    }
    tied.sort();

    let future = Uuid::new_v4();
    store.insert_item(future, 1).await.unwrap();
    engine
        .ensure_active_progress(user_id, future, now + Duration::minutes(1))
        .await
        .unwrap();

    let due = engine.select_due(user_id, now, None).await.unwrap();
    let order: Vec<Uuid> = due.iter().map(|item| item.item_id).collect();
    let mut expected = vec![earliest];
    expected.extend(&tied);
    assert_eq!(order, expected);

    let limited = engine.select_due(user_id, now, Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[1].item_id, tied[0]);

    assert!(engine.select_due(user_id, now, Some(0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inactive_tier_is_never_due() {
    let (_temp_dir, store) = create_test_store().await;
    let user_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    store.insert_item(item_id, 2).await.unwrap();
    let engine = ReviewEngine::new(Arc::new(store.clone()));

    engine
        .ensure_active_progress(user_id, item_id, t0() - Duration::days(1))
        .await
        .unwrap();
    engine
        .promote(user_id, item_id, t0() + Duration::days(1))
        .await
        .unwrap();

    assert!(store.due(user_id, t0(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_commit_is_rejected_as_a_whole() {
    let (_temp_dir, store) = create_test_store().await;
    let user_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let tiers = store.insert_item(item_id, 1).await.unwrap();

    let row = TierProgress::new_active(
        user_id,
        &tiers[0],
        MemoryState {
            stability: 1.0,
            difficulty: 5.0,
            last_reviewed: None,
            next_review: Some(t0()),
        },
    );
    let mut create = ChangeSet::new(user_id, item_id);
    create.inserts.push(row.clone());
    store.commit(create).await.unwrap();

    let mut stale_row = row.clone();
    stale_row.stability = 9.0;
    stale_row.version = 3;
    let mut stale = ChangeSet::new(user_id, item_id);
    stale
        .events
        .push(ReviewEvent::for_rating(&stale_row, &ReviewSubmission::at(Rating::Easy, t0())));
    stale.updates.push(stale_row);

    let err = store.commit(stale).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let progress = store.load_progress(user_id, item_id).await.unwrap();
    assert_eq!(progress.rows(), &[row][..]);
    assert!(store.review_events(user_id, item_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_active_row_is_a_conflict() {
    let (_temp_dir, store) = create_test_store().await;
    let user_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let tiers = store.insert_item(item_id, 2).await.unwrap();
    let state = MemoryState {
        stability: 1.0,
        difficulty: 5.0,
        last_reviewed: None,
        next_review: Some(t0()),
    };

    let mut first = ChangeSet::new(user_id, item_id);
    first.inserts.push(TierProgress::new_active(user_id, &tiers[0], state));
    store.commit(first).await.unwrap();

    let mut second = ChangeSet::new(user_id, item_id);
    second.inserts.push(TierProgress::new_active(user_id, &tiers[1], state));
    let err = store.commit(second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let progress = store.load_progress(user_id, item_id).await.unwrap();
    assert_eq!(progress.rows().len(), 1);
}

#[tokio::test]
async fn test_settings_created_lazily_and_validated_on_save() {
    let (_temp_dir, store) = create_test_store().await;
    let defaults = LearningSettings {
        initial_stability: 3.0,
        ..LearningSettings::default()
    };
    let store = store.with_default_settings(defaults);
    let user_id = Uuid::new_v4();

    assert_eq!(store.settings_for(user_id).await.unwrap(), defaults);

    let updated = LearningSettings {
        desired_retention: 0.8,
        promote_difficulty_delta: -0.25,
        ..defaults
    };
    store.save_settings(user_id, &updated).await.unwrap();
    assert_eq!(store.settings_for(user_id).await.unwrap(), updated);

    let invalid = LearningSettings {
        desired_retention: 1.5,
        ..updated
    };
    let err = store.save_settings(user_id, &invalid).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidSettings(_)));
    assert_eq!(store.settings_for(user_id).await.unwrap(), updated);
}

#[tokio::test]
async fn test_schema_version_distinguishes_fresh_file_from_failure() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config = DbConfig::at_path(temp_dir.path().join("fresh.db"));
    let store = SqliteStore::connect(&config).await.unwrap();

    assert_eq!(store.schema_version().await.unwrap(), None);

    store.pool().close().await;
    let err = store.schema_version().await.unwrap_err();
    assert!(matches!(err, StoreError::Sqlx(_)));
    assert!(store.migrate().await.is_err());
}

#[tokio::test]
async fn test_due_compares_at_stored_millisecond_resolution() {
    let (_temp_dir, store) = create_test_store().await;
    let user_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let tiers = store.insert_item(item_id, 1).await.unwrap();

    let next_review = t0() + Duration::microseconds(600);
    let row = TierProgress::new_active(
        user_id,
        &tiers[0],
        MemoryState {
            stability: 1.0,
            difficulty: 5.0,
            last_reviewed: None,
            next_review: Some(next_review),
        },
    );
    let mut create = ChangeSet::new(user_id, item_id);
    create.inserts.push(row);
    store.commit(create).await.unwrap();

    let stored = store.load_progress(user_id, item_id).await.unwrap();
    assert_eq!(stored.active().unwrap().next_review, Some(t0()));

    let now = t0() + Duration::microseconds(300);
    let due = store.due(user_id, now, None).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].next_review, t0());
    assert!(due[0].next_review <= now);

    let just_before = t0() - Duration::microseconds(1);
    assert!(store.due(user_id, just_before, None).await.unwrap().is_empty());
}
