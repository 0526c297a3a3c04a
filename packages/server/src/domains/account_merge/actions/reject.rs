//! Reject merge action

use tracing::warn;
use uuid::Uuid;

use super::{load, transition};
use crate::domains::account_merge::confirmation_token;
use crate::domains::account_merge::errors::MergeError;
use crate::domains::account_merge::machines::validate_reject;
use crate::domains::account_merge::models::{MergeRequest, StatusUpdate};
use crate::kernel::ServerDeps;

/// Cancel a pending merge. Only the target account owner may reject, and
/// expiry does not matter.
pub async fn reject_merge(
    merge_request_id: i64,
    actor_id: Uuid,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    let request = load(merge_request_id, deps).await?;
    validate_reject(&request, actor_id)?;

    let cancelled = transition(&request, StatusUpdate::Cancelled, deps).await?;

    if let Err(e) = confirmation_token::revoke(deps.kv_store.as_ref(), merge_request_id).await {
        warn!(merge_request_id, error = %e, "failed to revoke confirmation token");
    }

    Ok(cancelled)
}
