//! Merge request state machine - pure decision logic
//!
//! ```text
//! PENDING_EMAIL_VERIFICATION ──► IN_PROGRESS ──► COMPLETED
//!            │                        │
//!            └──► CANCELLED           └──► FAILED
//! ```
//!
//! COMPLETED, FAILED and CANCELLED are terminal.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domains::account_merge::errors::MergeError;
use crate::domains::account_merge::models::{MergeRequest, MergeRequestStatus};

/// How long a pending merge request may be confirmed
pub const MERGE_REQUEST_VALIDITY_SECS: i64 = 86_400;

pub fn validity_window() -> Duration {
    Duration::seconds(MERGE_REQUEST_VALIDITY_SECS)
}

const TRANSITIONS: &[(MergeRequestStatus, MergeRequestStatus)] = &[
    (
        MergeRequestStatus::PendingEmailVerification,
        MergeRequestStatus::InProgress,
    ),
    (
        MergeRequestStatus::PendingEmailVerification,
        MergeRequestStatus::Cancelled,
    ),
    (MergeRequestStatus::InProgress, MergeRequestStatus::Completed),
    (MergeRequestStatus::InProgress, MergeRequestStatus::Failed),
];

pub fn can_transition(from: MergeRequestStatus, to: MergeRequestStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

pub fn validate_actor_is_target(request: &MergeRequest, actor_id: Uuid) -> Result<(), MergeError> {
    if request.target_user_id != actor_id {
        return Err(MergeError::Forbidden);
    }
    Ok(())
}

/// Strictly older than the validity window
pub fn is_expired(request: &MergeRequest, now: DateTime<Utc>) -> bool {
    now - request.created_at > validity_window()
}

pub fn validate_not_expired(request: &MergeRequest, now: DateTime<Utc>) -> Result<(), MergeError> {
    if is_expired(request, now) {
        return Err(MergeError::Expired);
    }
    Ok(())
}

pub fn validate_pending(request: &MergeRequest) -> Result<(), MergeError> {
    if request.status != MergeRequestStatus::PendingEmailVerification {
        return Err(MergeError::InvalidState {
            status: request.status,
        });
    }
    Ok(())
}

/// Actor, then pending, then expiry; callers cancel on `Expired`.
pub fn validate_confirm(
    request: &MergeRequest,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), MergeError> {
    validate_actor_is_target(request, actor_id)?;
    validate_pending(request)?;
    validate_not_expired(request, now)
}

/// Rejection stays allowed past expiry while the request is pending.
pub fn validate_reject(request: &MergeRequest, actor_id: Uuid) -> Result<(), MergeError> {
    validate_actor_is_target(request, actor_id)?;
    validate_pending(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use MergeRequestStatus::*;

    const ALL: [MergeRequestStatus; 5] =
        [PendingEmailVerification, InProgress, Completed, Failed, Cancelled];

    fn request(status: MergeRequestStatus, created_at: DateTime<Utc>) -> MergeRequest {
        MergeRequest {
            id: 9,
            target_user_id: Uuid::from_u128(1),
            source_user_id: Uuid::from_u128(2),
            provider: "google".to_string(),
            provider_id: "g-123".to_string(),
            status,
            error_message: None,
            retry_count: 0,
            email_verified_at: None,
            completed_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_only_listed_edges_are_legal() {
        let mut legal = Vec::new();
        for from in ALL {
            for to in ALL {
                if can_transition(from, to) {
                    legal.push((from, to));
                }
            }
        }

        assert_eq!(
            legal,
            vec![
                (PendingEmailVerification, InProgress),
                (PendingEmailVerification, Cancelled),
                (InProgress, Completed),
                (InProgress, Failed),
            ]
        );
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        for from in [Completed, Failed, Cancelled] {
            assert!(ALL.iter().all(|to| !can_transition(from, *to)));
        }
    }

    #[test]
    fn test_confirm_rejects_other_actor_first() {
        let now = Utc::now();
        // Also expired and not pending: the actor check still wins
        let req = request(Completed, now - Duration::hours(48));

        let err = validate_confirm(&req, Uuid::from_u128(2), now).unwrap_err();
        assert!(matches!(err, MergeError::Forbidden));
    }

    #[test]
    fn test_confirm_reports_processed_before_expired() {
        let now = Utc::now();
        let req = request(Completed, now - Duration::hours(48));

        let err = validate_confirm(&req, Uuid::from_u128(1), now).unwrap_err();
        assert!(matches!(err, MergeError::InvalidState { status: Completed }));
    }

    #[test]
    fn test_confirm_expires_after_24_hours() {
        let now = Utc::now();
        let target = Uuid::from_u128(1);

        let fresh = request(PendingEmailVerification, now - Duration::hours(1));
        assert!(validate_confirm(&fresh, target, now).is_ok());

        let boundary = request(PendingEmailVerification, now - Duration::hours(24));
        assert!(validate_confirm(&boundary, target, now).is_ok());

        let stale = request(PendingEmailVerification, now - Duration::hours(25));
        assert!(matches!(
            validate_confirm(&stale, target, now),
            Err(MergeError::Expired)
        ));
    }

    #[test]
    fn test_reject_ignores_expiry() {
        let now = Utc::now();
        let stale = request(PendingEmailVerification, now - Duration::days(3));

        assert!(validate_reject(&stale, Uuid::from_u128(1)).is_ok());
        assert!(matches!(
            validate_reject(&stale, Uuid::from_u128(3)),
            Err(MergeError::Forbidden)
        ));
    }

    #[test]
    fn test_reject_requires_pending() {
        let req = request(InProgress, Utc::now());
        assert!(matches!(
            validate_reject(&req, Uuid::from_u128(1)),
            Err(MergeError::InvalidState { status: InProgress })
        ));
    }
}
