//! Postgres-backed repository and key-value store tests.
//!
//! Need Docker for the shared Postgres container:
//! `cargo test --test postgres_repository_tests -- --ignored`

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use server_core::domains::account_merge::models::{NewMergeRequest, StatusUpdate};
use server_core::domains::account_merge::{
    IdentityStore, MergeRequestRepository, MergeRequestStatus, PostgresIdentityStore,
    PostgresMergeRequestRepository,
};
use server_core::kernel::{BaseKeyValueStore, PostgresKeyValueStore};
use test_context::test_context;
use uuid::Uuid;

use crate::common::{insert_identity_link, insert_user, unique_email, TestHarness};

async fn new_request(ctx: &TestHarness) -> (PostgresMergeRequestRepository, NewMergeRequest) {
    let target = insert_user(&ctx.db_pool, &unique_email("target")).await.unwrap();
    let source = insert_user(&ctx.db_pool, &unique_email("source")).await.unwrap();
    let new = NewMergeRequest::builder()
        .target_user_id(target)
        .source_user_id(source)
        .provider("github")
        .provider_id(format!("gh-{}", Uuid::new_v4().simple()))
        .created_at(Utc::now())
        .build();
    (PostgresMergeRequestRepository::new(ctx.db_pool.clone()), new)
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_and_find_merge_request(ctx: &TestHarness) {
    let (repo, new) = new_request(ctx).await;

    let created = repo.create(&new).await.unwrap();
    let found = repo.find_by_id(created.id).await.unwrap().unwrap();

    assert_eq!(found.status, MergeRequestStatus::PendingEmailVerification);
    assert_eq!(found.source_user_id, new.source_user_id);
    assert_eq!(found.retry_count, 0);
    assert!(repo.find_by_id(created.id + 1_000_000).await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_find_pending_duplicate_respects_window(ctx: &TestHarness) {
    let (repo, new) = new_request(ctx).await;
    let created = repo.create(&new).await.unwrap();

    let found = repo
        .find_pending_duplicate(
            new.source_user_id,
            new.target_user_id,
            "github",
            created.created_at - ChronoDuration::hours(24),
        )
        .await
        .unwrap();
    assert_eq!(found.map(|r| r.id), Some(created.id));

    let on_boundary = repo
        .find_pending_duplicate(
            new.source_user_id,
            new.target_user_id,
            "github",
            created.created_at,
        )
        .await
        .unwrap();
    assert_eq!(on_boundary.map(|r| r.id), Some(created.id));

    let too_old = repo
        .find_pending_duplicate(
            new.source_user_id,
            new.target_user_id,
            "github",
            created.created_at + ChronoDuration::seconds(1),
        )
        .await
        .unwrap();
    assert!(too_old.is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_update_status_is_compare_and_swap(ctx: &TestHarness) {
    let (repo, new) = new_request(ctx).await;
    let created = repo.create(&new).await.unwrap();
    let update = StatusUpdate::InProgress {
        email_verified_at: Utc::now(),
    };

    let first = repo
        .update_status(created.id, MergeRequestStatus::PendingEmailVerification, &update)
        .await
        .unwrap();
    let second = repo
        .update_status(created.id, MergeRequestStatus::PendingEmailVerification, &update)
        .await
        .unwrap();

    assert_eq!(first.unwrap().status, MergeRequestStatus::InProgress);
    assert!(second.is_none());

    let failed = repo
        .update_status(
            created.id,
            MergeRequestStatus::InProgress,
            &StatusUpdate::Failed {
                error_message: "step failed".to_string(),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.error_message.as_deref(), Some("step failed"));
    assert!(failed.email_verified_at.is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_delete_merge_request(ctx: &TestHarness) {
    let (repo, new) = new_request(ctx).await;
    let created = repo.create(&new).await.unwrap();

    repo.delete(created.id).await.unwrap();

    assert!(repo.find_by_id(created.id).await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_identity_links_reassign_and_soft_delete(ctx: &TestHarness) {
    let store = PostgresIdentityStore::new(ctx.db_pool.clone());
    let email = unique_email("owner");
    let target = insert_user(&ctx.db_pool, &email).await.unwrap();
    let source = insert_user(&ctx.db_pool, &unique_email("source")).await.unwrap();
    let provider_id = format!("gh-{}", Uuid::new_v4().simple());
    insert_identity_link(&ctx.db_pool, source, "github", &provider_id)
        .await
        .unwrap();

    let found = store
        .find_user_by_email(&email.to_uppercase())
        .await
        .unwrap();
    assert_eq!(found.map(|u| u.id), Some(target));

    store
        .update_identity_link("github", &provider_id, target)
        .await
        .unwrap();
    assert!(store.find_identity_links(source).await.unwrap().is_empty());
    assert_eq!(store.find_identity_links(target).await.unwrap().len(), 1);
    assert!(store
        .update_identity_link("github", "missing", target)
        .await
        .is_err());

    store.soft_delete(target).await.unwrap();
    assert!(store.find_user_by_email(&email).await.unwrap().is_none());
    assert!(store
        .find_user_by_id(target)
        .await
        .unwrap()
        .unwrap()
        .is_deleted());

    store.restore(target).await.unwrap();
    assert!(store.find_user_by_email(&email).await.unwrap().is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_key_value_entries_expire(ctx: &TestHarness) {
    let kv = PostgresKeyValueStore::new(ctx.db_pool.clone());
    let key = format!("test:{}", Uuid::new_v4());

    kv.set(&key, "first", Duration::from_secs(60)).await.unwrap();
    kv.set(&key, "second", Duration::from_secs(60)).await.unwrap();
    assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("second"));

    kv.delete(&key).await.unwrap();
    assert!(kv.get(&key).await.unwrap().is_none());
}
