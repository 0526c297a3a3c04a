//! Postgres-backed key-value store with per-key TTL.
//!
//! Expired rows stay invisible to reads; `purge_expired` removes them and is
//! run hourly by the scheduler (see `scheduled_tasks.rs`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::{BaseCacheService, BaseKeyValueStore};

#[derive(Clone)]
pub struct PostgresKeyValueStore {
    pool: PgPool,
}

impl PostgresKeyValueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseKeyValueStore for PostgresKeyValueStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO key_value_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT value FROM key_value_entries WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM key_value_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM key_value_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Permission caches kept in the key-value store; invalidation is a delete.
#[derive(Clone)]
pub struct KeyValueCache {
    store: Arc<dyn BaseKeyValueStore>,
}

impl KeyValueCache {
    pub fn new(store: Arc<dyn BaseKeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BaseCacheService for KeyValueCache {
    async fn invalidate(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{InMemoryKeyValueStore, MockClock};

    #[tokio::test]
    async fn test_cache_invalidation_deletes_key() {
        let store = Arc::new(InMemoryKeyValueStore::new(Arc::new(MockClock::default())));
        store
            .set("permissions:abc", "[\"admin\"]", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = KeyValueCache::new(store.clone());

        cache.invalidate("permissions:abc").await.unwrap();

        assert_eq!(store.get("permissions:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidating_missing_key_is_ok() {
        let store = Arc::new(InMemoryKeyValueStore::new(Arc::new(MockClock::default())));
        let cache = KeyValueCache::new(store);

        assert!(cache.invalidate("permissions:missing").await.is_ok());
    }
}
