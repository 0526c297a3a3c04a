//! One-time tokens embedded in the merge confirmation link.
//!
//! Only the SHA-256 of the token is stored, at `merge:token:{id}`, for the
//! merge request's validity window.

use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domains::account_merge::machines::MERGE_REQUEST_VALIDITY_SECS;
use crate::kernel::BaseKeyValueStore;

pub const TOKEN_TTL: Duration = Duration::from_secs(MERGE_REQUEST_VALIDITY_SECS as u64);

pub fn token_key(merge_request_id: i64) -> String {
    format!("merge:token:{}", merge_request_id)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate and store a fresh token, returning the raw value for the mail link.
pub async fn issue(kv: &dyn BaseKeyValueStore, merge_request_id: i64) -> Result<String> {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    kv.set(&token_key(merge_request_id), &hash_token(&token), TOKEN_TTL)
        .await?;
    Ok(token)
}

/// False for a missing, expired or different token.
pub async fn matches(kv: &dyn BaseKeyValueStore, merge_request_id: i64, token: &str) -> Result<bool> {
    let stored = kv.get(&token_key(merge_request_id)).await?;
    Ok(stored.is_some_and(|hash| hash == hash_token(token)))
}

pub async fn revoke(kv: &dyn BaseKeyValueStore, merge_request_id: i64) -> Result<()> {
    kv.delete(&token_key(merge_request_id)).await
}
