//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (every hour)
//!     │
//!     └─► purge_expired()
//!             └─► drops expired snapshots, confirmation tokens and cache entries
//!
//! Scheduler (every 15 minutes)
//!     │
//!     └─► recover_stale_merges()
//!             └─► compensates merges left IN_PROGRESS by a crashed process
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::account_merge::recover_stale_merges;
use crate::kernel::{BaseKeyValueStore, ServerDeps};

/// Start all scheduled tasks
pub async fn start_scheduler(deps: Arc<ServerDeps>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let kv_store = deps.kv_store.clone();

    // Key-value purge - runs every hour
    let purge_job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let kv_store = kv_store.clone();
        Box::pin(async move {
            if let Err(e) = run_kv_purge(kv_store.as_ref()).await {
                tracing::error!(error = %e, "Key-value purge task failed");
            }
        })
    })?;

    // Stale merge recovery - runs every 15 minutes
    let recovery_job = Job::new_async("0 */15 * * * *", move |_uuid, _lock| {
        let deps = deps.clone();
        Box::pin(async move {
            if let Err(e) = recover_stale_merges(&deps).await {
                tracing::error!(error = %e, "Stale merge recovery failed");
            }
        })
    })?;

    scheduler.add(purge_job).await?;
    scheduler.add(recovery_job).await?;
    scheduler.start().await?;

    tracing::info!("Scheduled tasks started (key-value purge hourly, merge recovery every 15 minutes)");
    Ok(scheduler)
}

/// Remove expired key-value entries, returning how many were dropped
pub async fn run_kv_purge(kv_store: &dyn BaseKeyValueStore) -> Result<u64> {
    let removed = kv_store.purge_expired().await?;
    if removed > 0 {
        tracing::info!(removed, "Purged expired key-value entries");
    } else {
        tracing::debug!("No expired key-value entries");
    }
    Ok(removed)
}
