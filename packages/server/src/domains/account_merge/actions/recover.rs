//! Recover merges whose process died mid-saga.
//!
//! A request stuck IN_PROGRESS long past any saga's retry budget lost its
//! in-memory completed-step list. The persisted snapshot still describes the
//! source account, so every compensation is replayed (newest step first) and
//! the request is marked FAILED.

use anyhow::Result;
use chrono::Duration;
use tracing::{error, info, warn};

use super::{load, transition};
use crate::domains::account_merge::errors::MergeError;
use crate::domains::account_merge::models::{MergeRequest, MergeRequestStatus, StatusUpdate};
use crate::domains::account_merge::snapshot::SnapshotStore;
use crate::kernel::ServerDeps;

/// IN_PROGRESS rows untouched for longer than this are considered interrupted
pub const STALE_IN_PROGRESS_AFTER_SECS: i64 = 3_600;

pub fn stale_in_progress_after() -> Duration {
    Duration::seconds(STALE_IN_PROGRESS_AFTER_SECS)
}

pub async fn recover_interrupted_merge(
    merge_request_id: i64,
    deps: &ServerDeps,
) -> Result<MergeRequest, MergeError> {
    let request = load(merge_request_id, deps).await?;
    if request.status != MergeRequestStatus::InProgress {
        return Err(MergeError::InvalidState {
            status: request.status,
        });
    }

    let snapshot = SnapshotStore::new(deps.kv_store.clone())
        .load(merge_request_id)
        .await?;

    let error_message = match snapshot {
        Some(snapshot) => {
            let steps: Vec<String> = deps
                .merge_saga
                .step_names()
                .into_iter()
                .map(String::from)
                .collect();
            let failures = deps
                .merge_saga
                .compensate(&steps, &request, &snapshot)
                .await;

            if failures.is_empty() {
                "Merge interrupted; rolled back from snapshot".to_string()
            } else {
                format!(
                    "Merge interrupted; rollback failed for {}",
                    failures.join(", ")
                )
            }
        }
        None => {
            error!(
                merge_request_id,
                "interrupted merge has no snapshot, manual intervention required"
            );
            "Merge interrupted; no snapshot to roll back from".to_string()
        }
    };

    transition(&request, StatusUpdate::Failed { error_message }, deps).await
}

/// Recover every stale IN_PROGRESS request, returning how many were closed
pub async fn recover_stale_merges(deps: &ServerDeps) -> Result<usize> {
    let cutoff = deps.clock.now() - stale_in_progress_after();
    let stale = deps.merge_requests.find_stale_in_progress(cutoff).await?;

    let mut recovered = 0;
    for request in stale {
        warn!(merge_request_id = request.id, "recovering interrupted merge");
        match recover_interrupted_merge(request.id, deps).await {
            Ok(_) => recovered += 1,
            Err(e) => error!(merge_request_id = request.id, error = %e, "merge recovery failed"),
        }
    }

    if recovered > 0 {
        info!(recovered, "interrupted merges recovered");
    }
    Ok(recovered)
}
