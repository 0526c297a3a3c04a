//! The five-step account merge saga and its compensations.
//!
//! Steps run strictly in order; each assumes the previous one's side effects:
//!
//! | Step                    | Forward                              | Inverse                          |
//! |-------------------------|--------------------------------------|----------------------------------|
//! | `TRANSFER_IDENTITY`     | re-point source links at target      | re-point snapshot links at source|
//! | `MERGE_AUTHORIZATION`   | authorization service merge          | rollback with source grants      |
//! | `MERGE_SECONDARY_DATA`  | secondary-data service merge         | rollback with snapshot handle    |
//! | `RETIRE_SOURCE_ACCOUNT` | soft-delete source                   | restore source                   |
//! | `INVALIDATE_CACHES`     | drop both permission caches          | none                             |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domains::account_merge::models::MergeRequest;
use crate::domains::account_merge::repository::IdentityStore;
use crate::domains::account_merge::snapshot::{MergeSnapshot, MergeSnapshotter, SnapshotStore};
use crate::kernel::{
    BaseAuthorizationService, BaseCacheService, BaseKeyValueStore, BaseSecondaryDataService, Clock,
    Compensation, RetryPolicy, RollbackRoleMergeRequest, RollbackUserDataRequest, SagaAction,
    SagaOrchestrator, SagaStep,
};

pub type MergeSaga = SagaOrchestrator<MergeRequest, MergeSnapshot>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStep {
    TransferIdentity,
    MergeAuthorization,
    MergeSecondaryData,
    RetireSourceAccount,
    InvalidateCaches,
}

impl MergeStep {
    /// Execution order
    pub const ALL: [MergeStep; 5] = [
        MergeStep::TransferIdentity,
        MergeStep::MergeAuthorization,
        MergeStep::MergeSecondaryData,
        MergeStep::RetireSourceAccount,
        MergeStep::InvalidateCaches,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStep::TransferIdentity => "TRANSFER_IDENTITY",
            MergeStep::MergeAuthorization => "MERGE_AUTHORIZATION",
            MergeStep::MergeSecondaryData => "MERGE_SECONDARY_DATA",
            MergeStep::RetireSourceAccount => "RETIRE_SOURCE_ACCOUNT",
            MergeStep::InvalidateCaches => "INVALIDATE_CACHES",
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        match self {
            MergeStep::TransferIdentity | MergeStep::RetireSourceAccount => RetryPolicy::new(
                3,
                Duration::from_millis(100),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ),
            MergeStep::MergeAuthorization => RetryPolicy::new(
                3,
                Duration::from_millis(200),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ),
            // Touches far more records than the other steps
            MergeStep::MergeSecondaryData => RetryPolicy::new(
                3,
                Duration::from_millis(500),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ),
            MergeStep::InvalidateCaches => RetryPolicy::once(Duration::from_secs(2)),
        }
    }
}

impl fmt::Display for MergeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn permissions_cache_key(user_id: uuid::Uuid) -> String {
    format!("permissions:{}", user_id)
}

// =============================================================================
// TRANSFER_IDENTITY
// =============================================================================

pub struct TransferIdentity {
    identities: Arc<dyn IdentityStore>,
}

#[async_trait]
impl SagaAction<MergeRequest> for TransferIdentity {
    async fn execute(&self, request: &MergeRequest) -> Result<()> {
        // Links already moved by an earlier attempt no longer show up here
        let links = self
            .identities
            .find_identity_links(request.source_user_id)
            .await?;

        for link in &links {
            self.identities
                .update_identity_link(&link.provider, &link.provider_id, request.target_user_id)
                .await?;
        }

        let moved = self
            .identities
            .find_identity_link(&request.provider, &request.provider_id)
            .await?;
        match moved {
            Some(link) if link.user_id == request.target_user_id => {
                debug!(moved = links.len(), "identity links transferred");
                Ok(())
            }
            Some(link) => anyhow::bail!(
                "{} identity {} belongs to {}, expected {}",
                request.provider,
                request.provider_id,
                link.user_id,
                request.target_user_id
            ),
            None => anyhow::bail!(
                "{} identity {} no longer exists",
                request.provider,
                request.provider_id
            ),
        }
    }
}

#[async_trait]
impl Compensation<MergeRequest, MergeSnapshot> for TransferIdentity {
    async fn compensate(&self, _request: &MergeRequest, snapshot: &MergeSnapshot) -> Result<()> {
        let source_user_id = snapshot.source_user.id;
        let mut failed = Vec::new();

        for link in &snapshot.source_linked_identities {
            if let Err(e) = self
                .identities
                .update_identity_link(&link.provider, &link.provider_id, source_user_id)
                .await
            {
                warn!(
                    provider = %link.provider,
                    provider_id = %link.provider_id,
                    error = %e,
                    "failed to re-link identity to source account"
                );
                failed.push(format!("{}:{}", link.provider, link.provider_id));
            }
        }

        if !failed.is_empty() {
            anyhow::bail!("could not re-link identities: {}", failed.join(", "));
        }
        Ok(())
    }
}

// =============================================================================
// MERGE_AUTHORIZATION
// =============================================================================

pub struct MergeAuthorization {
    authorization: Arc<dyn BaseAuthorizationService>,
    timeout: Duration,
}

#[async_trait]
impl SagaAction<MergeRequest> for MergeAuthorization {
    async fn execute(&self, request: &MergeRequest) -> Result<()> {
        self.authorization
            .merge_roles(request.source_user_id, request.target_user_id, self.timeout)
            .await
    }
}

#[async_trait]
impl Compensation<MergeRequest, MergeSnapshot> for MergeAuthorization {
    async fn compensate(&self, request: &MergeRequest, snapshot: &MergeSnapshot) -> Result<()> {
        let rollback = RollbackRoleMergeRequest {
            source_user_id: request.source_user_id,
            target_user_id: request.target_user_id,
            source_state: snapshot.source_authorization_state.clone(),
        };
        self.authorization
            .rollback_role_merge(&rollback, self.timeout)
            .await
    }
}

// =============================================================================
// MERGE_SECONDARY_DATA
// =============================================================================

pub struct MergeSecondaryData {
    secondary_data: Arc<dyn BaseSecondaryDataService>,
    timeout: Duration,
}

#[async_trait]
impl SagaAction<MergeRequest> for MergeSecondaryData {
    async fn execute(&self, request: &MergeRequest) -> Result<()> {
        self.secondary_data
            .merge_user_data(request.source_user_id, request.target_user_id, self.timeout)
            .await
    }
}

#[async_trait]
impl Compensation<MergeRequest, MergeSnapshot> for MergeSecondaryData {
    async fn compensate(&self, request: &MergeRequest, snapshot: &MergeSnapshot) -> Result<()> {
        let rollback = RollbackUserDataRequest {
            source_user_id: request.source_user_id,
            target_user_id: request.target_user_id,
            handle: snapshot.source_secondary_data.clone(),
        };
        self.secondary_data
            .rollback_merge(&rollback, self.timeout)
            .await
    }
}

// =============================================================================
// RETIRE_SOURCE_ACCOUNT
// =============================================================================

pub struct RetireSourceAccount {
    identities: Arc<dyn IdentityStore>,
}

#[async_trait]
impl SagaAction<MergeRequest> for RetireSourceAccount {
    async fn execute(&self, request: &MergeRequest) -> Result<()> {
        self.identities.soft_delete(request.source_user_id).await
    }
}

#[async_trait]
impl Compensation<MergeRequest, MergeSnapshot> for RetireSourceAccount {
    async fn compensate(&self, _request: &MergeRequest, snapshot: &MergeSnapshot) -> Result<()> {
        self.identities.restore(snapshot.source_user.id).await
    }
}

// =============================================================================
// INVALIDATE_CACHES
// =============================================================================

/// Stale permission caches expire on their own, so failures only warn.
pub struct InvalidateCaches {
    cache: Arc<dyn BaseCacheService>,
}

#[async_trait]
impl SagaAction<MergeRequest> for InvalidateCaches {
    async fn execute(&self, request: &MergeRequest) -> Result<()> {
        for user_id in [request.source_user_id, request.target_user_id] {
            let key = permissions_cache_key(user_id);
            if let Err(e) = self.cache.invalidate(&key).await {
                warn!(key = %key, error = %e, "permission cache invalidation failed");
            }
        }
        Ok(())
    }
}

fn saga_step(step: MergeStep, action: Arc<dyn SagaAction<MergeRequest>>) -> SagaStep<MergeRequest> {
    SagaStep::new(step.as_str(), step.policy(), action)
}

/// Collaborators the merge saga drives
#[derive(Clone)]
pub struct MergeSagaDeps {
    pub identities: Arc<dyn IdentityStore>,
    pub authorization: Arc<dyn BaseAuthorizationService>,
    pub secondary_data: Arc<dyn BaseSecondaryDataService>,
    pub cache: Arc<dyn BaseCacheService>,
    pub kv_store: Arc<dyn BaseKeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

/// Assemble the merge saga: five ordered steps, four compensations, and a
/// snapshotter persisting to the key-value store.
pub fn build_merge_saga(deps: MergeSagaDeps) -> MergeSaga {
    let transfer = Arc::new(TransferIdentity {
        identities: deps.identities.clone(),
    });
    let authorization = Arc::new(MergeAuthorization {
        authorization: deps.authorization.clone(),
        timeout: MergeStep::MergeAuthorization.policy().per_attempt_timeout,
    });
    let secondary = Arc::new(MergeSecondaryData {
        secondary_data: deps.secondary_data.clone(),
        timeout: MergeStep::MergeSecondaryData.policy().per_attempt_timeout,
    });
    let retire = Arc::new(RetireSourceAccount {
        identities: deps.identities.clone(),
    });
    let invalidate = Arc::new(InvalidateCaches {
        cache: deps.cache.clone(),
    });

    let steps = vec![
        saga_step(MergeStep::TransferIdentity, transfer.clone()),
        saga_step(MergeStep::MergeAuthorization, authorization.clone()),
        saga_step(MergeStep::MergeSecondaryData, secondary.clone()),
        saga_step(MergeStep::RetireSourceAccount, retire.clone()),
        saga_step(MergeStep::InvalidateCaches, invalidate),
    ];

    let mut compensations: HashMap<String, Arc<dyn Compensation<MergeRequest, MergeSnapshot>>> =
        HashMap::new();
    compensations.insert(MergeStep::TransferIdentity.to_string(), transfer);
    compensations.insert(MergeStep::MergeAuthorization.to_string(), authorization);
    compensations.insert(MergeStep::MergeSecondaryData.to_string(), secondary);
    compensations.insert(MergeStep::RetireSourceAccount.to_string(), retire);

    let snapshotter = MergeSnapshotter::new(
        deps.identities,
        deps.authorization,
        SnapshotStore::new(deps.kv_store),
        deps.clock,
    );

    SagaOrchestrator::new(steps, compensations, Arc::new(snapshotter))
}
