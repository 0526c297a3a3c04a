//! Read-only merge queries

use super::load;
use crate::domains::account_merge::confirmation_token;
use crate::domains::account_merge::errors::MergeError;
use crate::domains::account_merge::models::MergeRequest;
use crate::kernel::ServerDeps;

pub async fn get_merge_request(
    merge_request_id: i64,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    load(merge_request_id, deps).await
}

/// Check a confirmation link's token without consuming it
pub async fn verify_confirmation_token(
    merge_request_id: i64,
    token: &str,
    deps: &ServerDeps,
) -> Result<(), MergeError> {
    if confirmation_token::matches(deps.kv_store.as_ref(), merge_request_id, token).await? {
        Ok(())
    } else {
        Err(MergeError::TokenInvalidOrExpired)
    }
}
