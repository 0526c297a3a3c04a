use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grants the authorization service reports for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationState {
    pub user_id: Uuid,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRolesRequest {
    pub source_user_id: Uuid,
    pub target_user_id: Uuid,
}

/// Undo a role merge: strip from the target whatever it gained, and restore
/// `source_state` on the source account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRoleMergeRequest {
    pub source_user_id: Uuid,
    pub target_user_id: Uuid,
    pub source_state: AuthorizationState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeUserDataRequest {
    pub source_user_id: Uuid,
    pub target_user_id: Uuid,
}

/// The secondary-data service snapshots its own records; the caller only
/// hands back the pair it merged plus whatever handle it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackUserDataRequest {
    pub source_user_id: Uuid,
    pub target_user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfirmationEmail {
    pub to: String,
    pub confirm_url: String,
    pub expires_at: DateTime<Utc>,
    pub provider: String,
    pub merge_request_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_state_tolerates_missing_lists() {
        let user_id = Uuid::new_v4();
        let json = format!(r#"{{"userId":"{}","roles":["editor"]}}"#, user_id);

        let state: AuthorizationState = serde_json::from_str(&json).unwrap();

        assert_eq!(state.user_id, user_id);
        assert_eq!(state.roles, vec!["editor".to_string()]);
        assert!(state.permissions.is_empty());
    }

    #[test]
    fn test_rollback_request_omits_empty_handle() {
        let request = RollbackUserDataRequest {
            source_user_id: Uuid::nil(),
            target_user_id: Uuid::nil(),
            handle: None,
        };

        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("handle").is_none());
        assert!(json.get("sourceUserId").is_some());
    }
}
