// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The merge domain consumes them; production adapters live in deps.rs and
// kv_store.rs, test doubles in test_dependencies.rs.
//
// Naming convention: Base* for trait names (e.g., BaseAuthorizationService)

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use service_clients::models::{
    AuthorizationState, MergeConfirmationEmail, RollbackRoleMergeRequest, RollbackUserDataRequest,
};

// =============================================================================
// Authorization Service Trait (remote)
// =============================================================================

#[async_trait]
pub trait BaseAuthorizationService: Send + Sync {
    /// Roles/permissions currently granted to a user
    async fn fetch_authorization_state(
        &self,
        user_id: Uuid,
        timeout: Duration,
    ) -> Result<AuthorizationState>;

    /// Merge role/permission grants from source onto target
    async fn merge_roles(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        timeout: Duration,
    ) -> Result<()>;

    async fn rollback_role_merge(
        &self,
        rollback: &RollbackRoleMergeRequest,
        timeout: Duration,
    ) -> Result<()>;
}

// =============================================================================
// Secondary Data Service Trait (remote)
// =============================================================================

#[async_trait]
pub trait BaseSecondaryDataService: Send + Sync {
    async fn merge_user_data(
        &self,
        source_user_id: Uuid,
        target_user_id: Uuid,
        timeout: Duration,
    ) -> Result<()>;

    async fn rollback_merge(
        &self,
        rollback: &RollbackUserDataRequest,
        timeout: Duration,
    ) -> Result<()>;
}

// =============================================================================
// Notification Service Trait
// =============================================================================

#[async_trait]
pub trait BaseNotificationService: Send + Sync {
    /// Send the "confirm this merge" mail to the target account's owner
    async fn send_merge_confirmation(&self, email: &MergeConfirmationEmail) -> Result<()>;
}

// =============================================================================
// Cache Trait (best-effort)
// =============================================================================

#[async_trait]
pub trait BaseCacheService: Send + Sync {
    async fn invalidate(&self, key: &str) -> Result<()>;
}

// =============================================================================
// Key-Value Store Trait (TTL-bounded)
// =============================================================================

#[async_trait]
pub trait BaseKeyValueStore: Send + Sync {
    /// Insert or overwrite `key`, visible for `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns None for missing or expired keys
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Physically remove expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64>;
}

// =============================================================================
// Clock
// =============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
