//! Persistence seams for the merge domain.
//!
//! The Postgres implementations delegate to the SQL in `models/`; tests use
//! the in-memory versions in `kernel::test_dependencies`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::account_merge::models::{
    IdentityLink, MergeRequest, MergeRequestStatus, NewMergeRequest, StatusUpdate, User,
};

#[async_trait]
pub trait MergeRequestRepository: Send + Sync {
    async fn create(&self, new: &NewMergeRequest) -> Result<MergeRequest>;

    async fn find_by_id(&self, id: i64) -> Result<Option<MergeRequest>>;

    /// Newest pending request for (source, target, provider) created at or after `created_after`
    async fn find_pending_duplicate(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        provider: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Option<MergeRequest>>;

    /// Compare-and-swap: applies only if the row is still `expected`.
    /// Returns None when it was not.
    async fn update_status(
        &self,
        id: i64,
        expected: MergeRequestStatus,
        update: &StatusUpdate,
    ) -> Result<Option<MergeRequest>>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// IN_PROGRESS requests last updated before `updated_before`
    async fn find_stale_in_progress(&self, updated_before: DateTime<Utc>)
        -> Result<Vec<MergeRequest>>;
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Live accounts only
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_identity_links(&self, user_id: Uuid) -> Result<Vec<IdentityLink>>;

    async fn find_identity_link(&self, provider: &str, provider_id: &str)
        -> Result<Option<IdentityLink>>;

    /// Re-point the (provider, provider_id) link at `user_id`
    async fn update_identity_link(
        &self,
        provider: &str,
        provider_id: &str,
        user_id: Uuid,
    ) -> Result<()>;

    async fn soft_delete(&self, user_id: Uuid) -> Result<()>;

    async fn restore(&self, user_id: Uuid) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresMergeRequestRepository {
    pool: PgPool,
}

impl PostgresMergeRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MergeRequestRepository for PostgresMergeRequestRepository {
    async fn create(&self, new: &NewMergeRequest) -> Result<MergeRequest> {
        MergeRequest::create(new, &self.pool).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<MergeRequest>> {
        MergeRequest::find_by_id(id, &self.pool).await
    }

    async fn find_pending_duplicate(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        provider: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Option<MergeRequest>> {
        MergeRequest::find_pending_duplicate(
            source_user_id,
            target_user_id,
            provider,
            created_after,
            &self.pool,
        )
        .await
    }

    async fn update_status(
        &self,
        id: i64,
        expected: MergeRequestStatus,
        update: &StatusUpdate,
    ) -> Result<Option<MergeRequest>> {
        MergeRequest::update_status(id, expected, update, &self.pool).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        MergeRequest::delete(id, &self.pool).await
    }

    async fn find_stale_in_progress(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<MergeRequest>> {
        MergeRequest::find_stale_in_progress(updated_before, &self.pool).await
    }
}

#[derive(Clone)]
pub struct PostgresIdentityStore {
    pool: PgPool,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        User::find_by_id(id, &self.pool).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        User::find_by_email(email, &self.pool).await
    }

    async fn find_identity_links(&self, user_id: Uuid) -> Result<Vec<IdentityLink>> {
        IdentityLink::find_by_user(user_id, &self.pool).await
    }

    async fn find_identity_link(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<IdentityLink>> {
        IdentityLink::find(provider, provider_id, &self.pool).await
    }

    async fn update_identity_link(
        &self,
        provider: &str,
        provider_id: &str,
        user_id: Uuid,
    ) -> Result<()> {
        if !IdentityLink::reassign(provider, provider_id, user_id, &self.pool).await? {
            anyhow::bail!("no {} identity link with id {}", provider, provider_id);
        }
        Ok(())
    }

    async fn soft_delete(&self, user_id: Uuid) -> Result<()> {
        User::soft_delete(user_id, &self.pool).await
    }

    async fn restore(&self, user_id: Uuid) -> Result<()> {
        User::restore(user_id, &self.pool).await
    }
}
