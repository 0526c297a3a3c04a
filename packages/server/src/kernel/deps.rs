//! Server dependencies for the merge domain (using traits for testability)
//!
//! This module provides the central dependency container used by all merge
//! actions. All external services use trait abstractions to enable testing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use service_clients::models::{MergeRolesRequest, MergeUserDataRequest};
use service_clients::{AuthorizationClient, NotificationClient, SecondaryDataClient};
use uuid::Uuid;

use crate::domains::account_merge::repository::{IdentityStore, MergeRequestRepository};
use crate::domains::account_merge::saga::{build_merge_saga, MergeSaga, MergeSagaDeps};
use crate::kernel::{
    AuthorizationState, BaseAuthorizationService, BaseCacheService, BaseKeyValueStore,
    BaseNotificationService, BaseSecondaryDataService, Clock, MergeConfirmationEmail,
    RollbackRoleMergeRequest, RollbackUserDataRequest,
};

const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Service client adapters (implement the Base* traits)
// =============================================================================

/// Wrapper around AuthorizationClient that implements BaseAuthorizationService
pub struct AuthorizationAdapter(pub Arc<AuthorizationClient>);

impl AuthorizationAdapter {
    pub fn new(client: Arc<AuthorizationClient>) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseAuthorizationService for AuthorizationAdapter {
    async fn fetch_authorization_state(
        &self,
        user_id: Uuid,
        timeout: Duration,
    ) -> Result<AuthorizationState> {
        Ok(self.0.get_authorization_state(user_id, timeout).await?)
    }

    async fn merge_roles(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        timeout: Duration,
    ) -> Result<()> {
        let request = MergeRolesRequest {
            source_user_id,
            target_user_id,
        };
        Ok(self.0.merge_roles(&request, timeout).await?)
    }

    async fn rollback_role_merge(
        &self,
        rollback: &RollbackRoleMergeRequest,
        timeout: Duration,
    ) -> Result<()> {
        Ok(self.0.rollback_role_merge(rollback, timeout).await?)
    }
}

/// Wrapper around SecondaryDataClient that implements BaseSecondaryDataService
pub struct SecondaryDataAdapter(pub Arc<SecondaryDataClient>);

impl SecondaryDataAdapter {
    pub fn new(client: Arc<SecondaryDataClient>) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseSecondaryDataService for SecondaryDataAdapter {
    async fn merge_user_data(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        timeout: Duration,
    ) -> Result<()> {
        let request = MergeUserDataRequest {
            source_user_id,
            target_user_id,
        };
        Ok(self.0.merge_user_data(&request, timeout).await?)
    }

    async fn rollback_merge(
        &self,
        rollback: &RollbackUserDataRequest,
        timeout: Duration,
    ) -> Result<()> {
        Ok(self.0.rollback_merge(rollback, timeout).await?)
    }
}

/// Wrapper around NotificationClient that implements BaseNotificationService
pub struct NotificationAdapter(pub Arc<NotificationClient>);

impl NotificationAdapter {
    pub fn new(client: Arc<NotificationClient>) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseNotificationService for NotificationAdapter {
    async fn send_merge_confirmation(&self, email: &MergeConfirmationEmail) -> Result<()> {
        Ok(self
            .0
            .send_merge_confirmation(email, NOTIFICATION_TIMEOUT)
            .await?)
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Dependencies accessible to merge actions (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub merge_requests: Arc<dyn MergeRequestRepository>,
    pub identities: Arc<dyn IdentityStore>,
    /// Confirmation tokens and merge snapshots
    pub kv_store: Arc<dyn BaseKeyValueStore>,
    pub authorization: Arc<dyn BaseAuthorizationService>,
    pub secondary_data: Arc<dyn BaseSecondaryDataService>,
    pub notifications: Arc<dyn BaseNotificationService>,
    pub cache: Arc<dyn BaseCacheService>,
    pub clock: Arc<dyn Clock>,
    pub merge_saga: Arc<MergeSaga>,
    /// Link target for confirmation mails; `?id=..&token=..` is appended
    pub confirm_base_url: String,
}

impl ServerDeps {
    /// Create new ServerDeps, assembling the merge saga from the same collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        merge_requests: Arc<dyn MergeRequestRepository>,
        identities: Arc<dyn IdentityStore>,
        kv_store: Arc<dyn BaseKeyValueStore>,
        authorization: Arc<dyn BaseAuthorizationService>,
        secondary_data: Arc<dyn BaseSecondaryDataService>,
        notifications: Arc<dyn BaseNotificationService>,
        cache: Arc<dyn BaseCacheService>,
        clock: Arc<dyn Clock>,
        confirm_base_url: String,
    ) -> Self {
        let merge_saga = Arc::new(build_merge_saga(MergeSagaDeps {
            identities: identities.clone(),
            authorization: authorization.clone(),
            secondary_data: secondary_data.clone(),
            cache: cache.clone(),
            kv_store: kv_store.clone(),
            clock: clock.clone(),
        }));

        Self {
            merge_requests,
            identities,
            kv_store,
            authorization,
            secondary_data,
            notifications,
            cache,
            clock,
            merge_saga,
            confirm_base_url,
        }
    }
}
