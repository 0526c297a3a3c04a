use axum::http::StatusCode;
use thiserror::Error;

use crate::domains::account_merge::models::MergeRequestStatus;
use crate::kernel::SagaError;

/// Errors surfaced by the account-merge entry points
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Cannot merge an account into itself")]
    SameAccountMerge,

    #[error("Target account already has a {provider} identity linked")]
    ProviderAlreadyLinked { provider: String },

    #[error("Merge request {0} not found")]
    RequestNotFound(i64),

    #[error("No account found for {0}")]
    UserNotFound(String),

    #[error("Only the target account owner may act on this merge request")]
    Forbidden,

    #[error("Merge request is {status}, not awaiting confirmation")]
    InvalidState { status: MergeRequestStatus },

    #[error("Merge request has expired")]
    Expired,

    #[error("Confirmation token is invalid or has expired")]
    TokenInvalidOrExpired,

    #[error("Failed to send merge confirmation: {0}")]
    NotificationFailed(#[source] anyhow::Error),

    #[error("Account merge failed: {0}")]
    Saga(#[from] SagaError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MergeError {
    /// Stable code clients switch on to pick a message
    pub fn code(&self) -> &'static str {
        match self {
            MergeError::SameAccountMerge => "SAME_ACCOUNT_MERGE",
            MergeError::ProviderAlreadyLinked { .. } => "PROVIDER_ALREADY_LINKED",
            MergeError::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            MergeError::UserNotFound(_) => "USER_NOT_FOUND",
            MergeError::Forbidden => "FORBIDDEN",
            MergeError::InvalidState { .. } => "ALREADY_PROCESSED",
            MergeError::Expired => "EXPIRED",
            MergeError::TokenInvalidOrExpired => "TOKEN_INVALID_OR_EXPIRED",
            MergeError::NotificationFailed(_) => "NOTIFICATION_FAILED",
            MergeError::Saga(_) => "MERGE_FAILED",
            MergeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            MergeError::SameAccountMerge | MergeError::TokenInvalidOrExpired => {
                StatusCode::BAD_REQUEST
            }
            MergeError::Forbidden => StatusCode::FORBIDDEN,
            MergeError::RequestNotFound(_) | MergeError::UserNotFound(_) => StatusCode::NOT_FOUND,
            MergeError::ProviderAlreadyLinked { .. } | MergeError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            MergeError::Expired => StatusCode::GONE,
            MergeError::NotificationFailed(_) => StatusCode::BAD_GATEWAY,
            MergeError::Saga(_) | MergeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
