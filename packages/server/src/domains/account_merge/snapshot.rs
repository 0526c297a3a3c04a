//! Pre-merge backups used to drive compensation.
//!
//! Snapshots are versioned JSON documents in the key-value store at
//! `merge:snapshot:{id}` and live for seven days, long enough to roll back a
//! saga interrupted by a process restart.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domains::account_merge::models::{IdentityLink, MergeRequest, User};
use crate::domains::account_merge::repository::IdentityStore;
use crate::kernel::{
    AuthorizationState, BaseAuthorizationService, BaseKeyValueStore, Clock, SnapshotProvider,
};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(604_800);

/// Timeout for reading the source account's grants at backup time
const AUTHORIZATION_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub fn snapshot_key(merge_request_id: i64) -> String {
    format!("merge:snapshot:{}", merge_request_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSnapshot {
    pub schema_version: u32,
    pub merge_request_id: i64,
    pub source_user: User,
    pub source_linked_identities: Vec<IdentityLink>,
    pub source_authorization_state: AuthorizationState,
    /// Whatever the secondary-data service needs to find its own backup
    #[serde(default)]
    pub source_secondary_data: Option<serde_json::Value>,
    pub backup_timestamp: DateTime<Utc>,
}

/// Handle the secondary-data service keys its internal snapshot by
pub fn secondary_data_handle(source_user_id: Uuid, target_user_id: Uuid) -> serde_json::Value {
    serde_json::json!({
        "sourceUserId": source_user_id,
        "targetUserId": target_user_id,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaHeader {
    schema_version: u32,
}

#[derive(Clone)]
pub struct SnapshotStore {
    kv: Arc<dyn BaseKeyValueStore>,
}

impl SnapshotStore {
    pub fn new(kv: Arc<dyn BaseKeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn save(&self, snapshot: &MergeSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize merge snapshot")?;
        self.kv
            .set(&snapshot_key(snapshot.merge_request_id), &json, SNAPSHOT_TTL)
            .await
    }

    /// None when no snapshot exists or it has expired.
    pub async fn load(&self, merge_request_id: i64) -> Result<Option<MergeSnapshot>> {
        let Some(json) = self.kv.get(&snapshot_key(merge_request_id)).await? else {
            return Ok(None);
        };

        let header: SchemaHeader =
            serde_json::from_str(&json).context("Merge snapshot has no schema version")?;
        if header.schema_version > SNAPSHOT_SCHEMA_VERSION {
            anyhow::bail!(
                "Merge snapshot {} has schema version {}, newest supported is {}",
                merge_request_id,
                header.schema_version,
                SNAPSHOT_SCHEMA_VERSION
            );
        }

        let snapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse merge snapshot {}", merge_request_id))?;
        Ok(Some(snapshot))
    }
}

/// Captures the source account's state and persists it before any step runs
pub struct MergeSnapshotter {
    identities: Arc<dyn IdentityStore>,
    authorization: Arc<dyn BaseAuthorizationService>,
    store: SnapshotStore,
    clock: Arc<dyn Clock>,
}

impl MergeSnapshotter {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        authorization: Arc<dyn BaseAuthorizationService>,
        store: SnapshotStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identities,
            authorization,
            store,
            clock,
        }
    }
}

#[async_trait]
impl SnapshotProvider<MergeRequest, MergeSnapshot> for MergeSnapshotter {
    async fn capture(&self, request: &MergeRequest) -> Result<MergeSnapshot> {
        let source_user = self
            .identities
            .find_user_by_id(request.source_user_id)
            .await?
            .with_context(|| format!("Source account {} not found", request.source_user_id))?;

        let source_linked_identities = self
            .identities
            .find_identity_links(request.source_user_id)
            .await?;

        let source_authorization_state = self
            .authorization
            .fetch_authorization_state(request.source_user_id, AUTHORIZATION_FETCH_TIMEOUT)
            .await
            .context("Failed to read source authorization state")?;

        debug!(
            merge_request_id = request.id,
            links = source_linked_identities.len(),
            roles = source_authorization_state.roles.len(),
            "captured source account state"
        );

        let snapshot = MergeSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            merge_request_id: request.id,
            source_user,
            source_linked_identities,
            source_authorization_state,
            source_secondary_data: Some(secondary_data_handle(
                request.source_user_id,
                request.target_user_id,
            )),
            backup_timestamp: self.clock.now(),
        };

        self.store.save(&snapshot).await?;
        info!(merge_request_id = request.id, "saved merge snapshot");

        Ok(snapshot)
    }
}
