//! Initiate merge action - records a merge request and mails the target owner

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domains::account_merge::confirmation_token;
use crate::domains::account_merge::errors::MergeError;
use crate::domains::account_merge::machines::validity_window;
use crate::domains::account_merge::models::NewMergeRequest;
use crate::kernel::{MergeConfirmationEmail, ServerDeps};

/// A sign-in through `provider` whose email already belongs to another account
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateMerge {
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    /// Account created for the new identity, to be folded into the email's owner
    pub source_user_id: Uuid,
}

/// Start a merge of `source_user_id` into the account owning `email`.
///
/// This action:
/// 1. Resolves the target account by email
/// 2. Rejects self-merges and providers the target already has
/// 3. Returns the existing request id for a pending duplicate under 24h old
/// 4. Creates the request, issues a confirmation token and mails the link
///
/// A failed mail removes the token and the just-created row before the error
/// is returned.
pub async fn initiate_merge(input: InitiateMerge, deps: &ServerDeps) -> Result<i64, MergeError> {
    let target = deps
        .identities
        .find_user_by_email(&input.email)
        .await?
        .ok_or_else(|| MergeError::UserNotFound(input.email.clone()))?;

    if target.id == input.source_user_id {
        return Err(MergeError::SameAccountMerge);
    }

    match deps.identities.find_user_by_id(input.source_user_id).await? {
        Some(source) if !source.is_deleted() => {}
        _ => return Err(MergeError::UserNotFound(input.source_user_id.to_string())),
    }

    if let Some(link) = deps
        .identities
        .find_identity_link(&input.provider, &input.provider_id)
        .await?
    {
        if link.user_id == target.id {
            return Err(MergeError::ProviderAlreadyLinked {
                provider: input.provider,
            });
        }
    }

    let now = deps.clock.now();
    // Same boundary as `is_expired`: a request exactly one window old is still live
    if let Some(existing) = deps
        .merge_requests
        .find_pending_duplicate(
            input.source_user_id,
            target.id,
            &input.provider,
            now - validity_window(),
        )
        .await?
    {
        debug!(
            merge_request_id = existing.id,
            "pending merge request already exists, reusing"
        );
        return Ok(existing.id);
    }

    let request = deps
        .merge_requests
        .create(
            &NewMergeRequest::builder()
                .target_user_id(target.id)
                .source_user_id(input.source_user_id)
                .provider(input.provider.clone())
                .provider_id(input.provider_id.clone())
                .created_at(now)
                .build(),
        )
        .await?;

    let token = match confirmation_token::issue(deps.kv_store.as_ref(), request.id).await {
        Ok(token) => token,
        Err(e) => {
            discard(request.id, deps).await;
            return Err(e.into());
        }
    };

    let email = MergeConfirmationEmail {
        to: target.email.clone(),
        confirm_url: format!(
            "{}?id={}&token={}",
            deps.confirm_base_url, request.id, token
        ),
        expires_at: request.created_at + validity_window(),
        provider: input.provider,
        merge_request_id: request.id,
    };

    if let Err(e) = deps.notifications.send_merge_confirmation(&email).await {
        warn!(
            merge_request_id = request.id,
            error = %e,
            "merge confirmation mail failed, discarding request"
        );
        discard(request.id, deps).await;
        return Err(MergeError::NotificationFailed(e));
    }

    info!(
        merge_request_id = request.id,
        source_user_id = %request.source_user_id,
        target_user_id = %request.target_user_id,
        "merge request created"
    );
    Ok(request.id)
}

/// Undo the creation of a request nobody was told about
async fn discard(merge_request_id: i64, deps: &ServerDeps) {
    if let Err(e) = confirmation_token::revoke(deps.kv_store.as_ref(), merge_request_id).await {
        warn!(merge_request_id, error = %e, "failed to revoke confirmation token");
    }
    if let Err(e) = deps.merge_requests.delete(merge_request_id).await {
        tracing::error!(merge_request_id, error = %e, "failed to delete unconfirmed merge request");
    }
}
