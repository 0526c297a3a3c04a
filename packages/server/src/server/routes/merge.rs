use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domains::account_merge::{
    confirm_merge_with_token, get_merge_request, initiate_merge, reject_merge, InitiateMerge,
    MergeError, MergeRequest,
};
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

/// Body of `POST /merge-requests`. The source account is the caller.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMergeRequestBody {
    pub provider: String,
    pub provider_id: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMergeRequestResponse {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmMergeRequestBody {
    pub token: String,
}

pub async fn create_merge_request_handler(
    Extension(state): Extension<AppState>,
    user: AuthUser,
    Json(body): Json<CreateMergeRequestBody>,
) -> Result<(StatusCode, Json<CreateMergeRequestResponse>), MergeError> {
    let input = InitiateMerge {
        provider: body.provider,
        provider_id: body.provider_id,
        email: body.email,
        source_user_id: user.user_id,
    };

    let id = initiate_merge(input, &state.deps).await?;
    Ok((StatusCode::CREATED, Json(CreateMergeRequestResponse { id })))
}

/// Visible to the two accounts involved only
pub async fn get_merge_request_handler(
    Extension(state): Extension<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MergeRequest>, MergeError> {
    let request = get_merge_request(id, &state.deps).await?;
    if request.source_user_id != user.user_id && request.target_user_id != user.user_id {
        return Err(MergeError::Forbidden);
    }
    Ok(Json(request))
}

pub async fn confirm_merge_request_handler(
    Extension(state): Extension<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ConfirmMergeRequestBody>,
) -> Result<Json<MergeRequest>, MergeError> {
    let request = confirm_merge_with_token(id, user.user_id, &body.token, &state.deps).await?;
    Ok(Json(request))
}

pub async fn reject_merge_request_handler(
    Extension(state): Extension<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MergeRequest>, MergeError> {
    let request = reject_merge(id, user.user_id, &state.deps).await?;
    Ok(Json(request))
}
