//! Account merge actions - the only code allowed to move a merge request
//! between statuses.

pub mod confirm;
pub mod initiate;
pub mod queries;
pub mod recover;
pub mod reject;

pub use confirm::{confirm_merge, confirm_merge_with_token};
pub use initiate::{initiate_merge, InitiateMerge};
pub use queries::{get_merge_request, verify_confirmation_token};
pub use recover::{
    recover_interrupted_merge, recover_stale_merges, stale_in_progress_after,
    STALE_IN_PROGRESS_AFTER_SECS,
};
pub use reject::reject_merge;

use tracing::info;

use crate::domains::account_merge::errors::MergeError;
use crate::domains::account_merge::machines::can_transition;
use crate::domains::account_merge::models::{MergeRequest, StatusUpdate};
use crate::kernel::ServerDeps;

/// Apply `update` if the state machine allows it and nobody changed the row
/// since `request` was read.
pub(crate) async fn transition(
    request: &MergeRequest,
    update: StatusUpdate,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    let to = update.status();
    if !can_transition(request.status, to) {
        return Err(MergeError::InvalidState {
            status: request.status,
        });
    }

    match deps
        .merge_requests
        .update_status(request.id, request.status, &update)
        .await?
    {
        Some(updated) => {
            info!(
                merge_request_id = request.id,
                from = %request.status,
                to = %to,
                "merge request status changed"
            );
            Ok(updated)
        }
        None => {
            // Lost a race with another writer
            let current = deps
                .merge_requests
                .find_by_id(request.id)
                .await?
                .map(|r| r.status)
                .unwrap_or(request.status);
            Err(MergeError::InvalidState { status: current })
        }
    }
}

pub(crate) async fn load(merge_request_id: i64, deps: &ServerDeps) -> Result<MergeRequest, MergeError> {
    deps.merge_requests
        .find_by_id(merge_request_id)
        .await?
        .ok_or(MergeError::RequestNotFound(merge_request_id))
}
