//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod kv_store;
pub mod retry;
pub mod saga;
pub mod scheduled_tasks;
pub mod test_dependencies;
pub mod traits;

pub use deps::{AuthorizationAdapter, NotificationAdapter, SecondaryDataAdapter, ServerDeps};
pub use kv_store::{KeyValueCache, PostgresKeyValueStore};
pub use retry::{run_with_retry, AttemptTimedOut, RetryPolicy};
pub use saga::{
    Compensation, RetryObserver, SagaAction, SagaError, SagaOrchestrator, SagaStep,
    SnapshotProvider,
};
pub use test_dependencies::TestDependencies;
pub use traits::*;
