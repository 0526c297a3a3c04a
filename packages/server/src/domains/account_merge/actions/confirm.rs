//! Confirm merge action - runs the merge saga for a verified request

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{load, transition};
use crate::domains::account_merge::confirmation_token;
use crate::domains::account_merge::errors::MergeError;
use crate::domains::account_merge::machines::validate_confirm;
use crate::domains::account_merge::models::{MergeRequest, StatusUpdate};
use crate::kernel::ServerDeps;

/// Confirm a merge on behalf of `actor_id` and run it to completion.
///
/// An expired request is cancelled and reported as `TokenInvalidOrExpired`.
/// A saga failure marks the request FAILED and is returned as `Saga`.
/// Dropping the returned future after the request went IN_PROGRESS does not
/// stop the saga; it still finishes and records COMPLETED or FAILED.
pub async fn confirm_merge(
    merge_request_id: i64,
    actor_id: Uuid,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    run_confirm(merge_request_id, actor_id, None, deps).await
}

/// Same as [`confirm_merge`], additionally requiring the token from the
/// confirmation mail. The token is checked after expiry so stale links still
/// cancel their request.
pub async fn confirm_merge_with_token(
    merge_request_id: i64,
    actor_id: Uuid,
    token: &str,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    run_confirm(merge_request_id, actor_id, Some(token), deps).await
}

async fn run_confirm(
    merge_request_id: i64,
    actor_id: Uuid,
    token: Option<&str>,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    let request = load(merge_request_id, deps).await?;
    let now = deps.clock.now();

    match validate_confirm(&request, actor_id, now) {
        Ok(()) => {}
        Err(MergeError::Expired) => {
            info!(merge_request_id, "merge request expired, cancelling");
            transition(&request, StatusUpdate::Cancelled, deps).await?;
            revoke_token(merge_request_id, deps).await;
            return Err(MergeError::TokenInvalidOrExpired);
        }
        Err(e) => return Err(e),
    }

    if let Some(token) = token {
        if !confirmation_token::matches(deps.kv_store.as_ref(), merge_request_id, token).await? {
            return Err(MergeError::TokenInvalidOrExpired);
        }
    }

    let in_progress = transition(
        &request,
        StatusUpdate::InProgress {
            email_verified_at: now,
        },
        deps,
    )
    .await?;
    revoke_token(merge_request_id, deps).await;

    // Once IN_PROGRESS the saga must reach COMPLETED or FAILED even if the
    // caller goes away, so it runs on its own task.
    let saga_deps = deps.clone();
    let saga_task = tokio::spawn(
        async move { run_saga(in_progress, &saga_deps).await }
            .instrument(info_span!("merge_saga", merge_request_id)),
    );

    match saga_task.await {
        Ok(result) => result,
        Err(join_error) => {
            error!(merge_request_id, error = %join_error, "merge saga task aborted");
            Err(MergeError::Internal(anyhow::anyhow!(
                "merge saga task aborted: {}",
                join_error
            )))
        }
    }
}

/// Run the saga and record its outcome on the request
async fn run_saga(
    in_progress: MergeRequest,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    let merge_request_id = in_progress.id;

    match deps.merge_saga.execute(&in_progress).await {
        Ok(steps) => {
            let completed = transition(
                &in_progress,
                StatusUpdate::Completed {
                    completed_at: deps.clock.now(),
                },
                deps,
            )
            .await?;
            info!(merge_request_id, steps = steps.len(), "account merge completed");
            Ok(completed)
        }
        Err(saga_error) => {
            let failed = StatusUpdate::Failed {
                error_message: saga_error.to_string(),
            };
            if let Err(e) = transition(&in_progress, failed, deps).await {
                error!(
                    merge_request_id,
                    error = %e,
                    "could not record merge failure"
                );
            }
            Err(MergeError::Saga(saga_error))
        }
    }
}

async fn revoke_token(merge_request_id: i64, deps: &ServerDeps) {
    if let Err(e) = confirmation_token::revoke(deps.kv_store.as_ref(), merge_request_id).await {
        warn!(merge_request_id, error = %e, "failed to revoke confirmation token");
    }
}
