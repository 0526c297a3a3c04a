use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Merge request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "merge_request_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeRequestStatus {
    PendingEmailVerification,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl MergeRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeRequestStatus::PendingEmailVerification => "PENDING_EMAIL_VERIFICATION",
            MergeRequestStatus::InProgress => "IN_PROGRESS",
            MergeRequestStatus::Completed => "COMPLETED",
            MergeRequestStatus::Failed => "FAILED",
            MergeRequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for MergeRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MergeRequest - folds the source account into the target account
///
/// `target_user_id` is the account kept, `source_user_id` the one retired.
/// Rows move through `MergeRequestStatus` only via `update_status`, and are
/// never deleted once a saga has run (terminal states are the audit trail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub id: i64,
    pub target_user_id: Uuid,
    pub source_user_id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub status: MergeRequestStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a merge is first requested
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewMergeRequest {
    pub target_user_id: Uuid,
    pub source_user_id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
}

/// A status change together with the columns that change with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    InProgress { email_verified_at: DateTime<Utc> },
    Completed { completed_at: DateTime<Utc> },
    /// Also increments `retry_count`
    Failed { error_message: String },
    Cancelled,
}

impl StatusUpdate {
    pub fn status(&self) -> MergeRequestStatus {
        match self {
            StatusUpdate::InProgress { .. } => MergeRequestStatus::InProgress,
            StatusUpdate::Completed { .. } => MergeRequestStatus::Completed,
            StatusUpdate::Failed { .. } => MergeRequestStatus::Failed,
            StatusUpdate::Cancelled => MergeRequestStatus::Cancelled,
        }
    }

    fn email_verified_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StatusUpdate::InProgress { email_verified_at } => Some(*email_verified_at),
            _ => None,
        }
    }

    fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StatusUpdate::Completed { completed_at } => Some(*completed_at),
            _ => None,
        }
    }

    fn error_message(&self) -> Option<&str> {
        match self {
            StatusUpdate::Failed { error_message } => Some(error_message),
            _ => None,
        }
    }

    fn retry_increment(&self) -> i32 {
        matches!(self, StatusUpdate::Failed { .. }) as i32
    }

    /// Apply to an in-memory copy the same way `update_status` changes the row.
    pub fn apply(&self, request: &mut MergeRequest, now: DateTime<Utc>) {
        request.status = self.status();
        if let Some(at) = self.email_verified_at() {
            request.email_verified_at = Some(at);
        }
        if let Some(at) = self.completed_at() {
            request.completed_at = Some(at);
        }
        if let Some(message) = self.error_message() {
            request.error_message = Some(message.to_string());
        }
        request.retry_count += self.retry_increment();
        request.updated_at = now;
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl MergeRequest {
    pub async fn find_by_id(id: i64, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM merge_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Pending request for the same account pair and provider created after `created_after`
    pub async fn find_pending_duplicate(
        source_user_id: Uuid,
        target_user_id: Uuid,
        provider: &str,
        created_after: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM merge_requests
            WHERE source_user_id = $1
              AND target_user_id = $2
              AND provider = $3
              AND status = 'PENDING_EMAIL_VERIFICATION'
              AND created_at >= $4
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(source_user_id)
        .bind(target_user_id)
        .bind(provider)
        .bind(created_after)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// IN_PROGRESS rows nobody has touched since `updated_before`
    pub async fn find_stale_in_progress(
        updated_before: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM merge_requests
            WHERE status = 'IN_PROGRESS'
              AND updated_at < $1
            ORDER BY updated_at
            "#,
        )
        .bind(updated_before)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn create(new: &NewMergeRequest, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO merge_requests (
                target_user_id,
                source_user_id,
                provider,
                provider_id,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, 'PENDING_EMAIL_VERIFICATION', $5, $5)
            RETURNING *
            "#,
        )
        .bind(new.target_user_id)
        .bind(new.source_user_id)
        .bind(&new.provider)
        .bind(&new.provider_id)
        .bind(new.created_at)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Conditional status write: only applies while the row is still in `expected`.
    ///
    /// Returns None when another writer moved the row first.
    pub async fn update_status(
        id: i64,
        expected: MergeRequestStatus,
        update: &StatusUpdate,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE merge_requests
            SET status = $3,
                email_verified_at = COALESCE($4, email_verified_at),
                completed_at = COALESCE($5, completed_at),
                error_message = COALESCE($6, error_message),
                retry_count = retry_count + $7,
                updated_at = NOW()
            WHERE id = $1
              AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(update.status())
        .bind(update.email_verified_at())
        .bind(update.completed_at())
        .bind(update.error_message())
        .bind(update.retry_increment())
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Only used to undo a creation whose confirmation mail could not be sent
    pub async fn delete(id: i64, pool: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM merge_requests WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
