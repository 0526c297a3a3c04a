//! Saga orchestration for multi-service transactions.
//!
//! A [`SagaOrchestrator`] is assembled from parts rather than subclassed:
//! an ordered list of [`SagaStep`]s, a map from step name to its
//! [`Compensation`], and a [`SnapshotProvider`] that backs up pre-saga state.
//!
//! ```text
//! execute(request)
//!     │
//!     ├─► snapshots.capture(request)        (before any step)
//!     ├─► step 1 ─► run_with_retry ─► ok ─► completed = [1]
//!     ├─► step 2 ─► run_with_retry ─► ok ─► completed = [1, 2]
//!     └─► step 3 ─► run_with_retry ─► exhausted
//!             └─► compensate(completed, snapshot): 2, then 1
//! ```
//!
//! Compensation is best-effort: a failing compensation is logged and the
//! remaining completed steps are still rolled back. Step 3 above is never
//! compensated because it never completed.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::retry::{run_with_retry, RetryPolicy};

/// Forward action of one saga step.
#[async_trait]
pub trait SagaAction<R>: Send + Sync {
    async fn execute(&self, request: &R) -> Result<()>;
}

/// Inverse of a completed step, driven by the pre-saga snapshot.
#[async_trait]
pub trait Compensation<R, S>: Send + Sync {
    async fn compensate(&self, request: &R, snapshot: &S) -> Result<()>;
}

/// Captures and durably persists the state compensation needs.
#[async_trait]
pub trait SnapshotProvider<R, S>: Send + Sync {
    async fn capture(&self, request: &R) -> Result<S>;
}

/// Called with (1-based failed attempt, error) before each backoff wait.
pub type RetryObserver = Arc<dyn Fn(u32, &anyhow::Error) + Send + Sync>;

pub struct SagaStep<R> {
    name: String,
    policy: RetryPolicy,
    action: Arc<dyn SagaAction<R>>,
    on_retry: RetryObserver,
}

impl<R> SagaStep<R> {
    /// Create a step whose retries are logged at `warn`.
    pub fn new(name: impl Into<String>, policy: RetryPolicy, action: Arc<dyn SagaAction<R>>) -> Self {
        let name = name.into();
        let step_name = name.clone();
        let on_retry: RetryObserver = Arc::new(move |attempt: u32, error: &anyhow::Error| {
            warn!(step = %step_name, attempt, error = %error, "saga step failed, retrying");
        });

        Self {
            name,
            policy,
            action,
            on_retry,
        }
    }

    /// Replace the default retry observer.
    pub fn on_retry(mut self, observer: RetryObserver) -> Self {
        self.on_retry = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("failed to back up pre-saga state: {0}")]
    Snapshot(#[source] anyhow::Error),

    #[error("saga step {step} failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
        /// Completed steps whose compensation also failed
        compensation_failures: Vec<String>,
    },
}

impl SagaError {
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            SagaError::StepFailed { step, .. } => Some(step),
            SagaError::Snapshot(_) => None,
        }
    }
}

pub struct SagaOrchestrator<R, S> {
    steps: Vec<SagaStep<R>>,
    compensations: HashMap<String, Arc<dyn Compensation<R, S>>>,
    snapshots: Arc<dyn SnapshotProvider<R, S>>,
}

impl<R, S> SagaOrchestrator<R, S>
where
    R: Send + Sync,
    S: Send + Sync,
{
    /// Steps without an entry in `compensations` are not rolled back.
    pub fn new(
        steps: Vec<SagaStep<R>>,
        compensations: HashMap<String, Arc<dyn Compensation<R, S>>>,
        snapshots: Arc<dyn SnapshotProvider<R, S>>,
    ) -> Self {
        Self {
            steps,
            compensations,
            snapshots,
        }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Snapshot, then run every step in order.
    ///
    /// Returns the names of the completed steps. On a step that exhausts its
    /// retries, compensates the steps that completed before it (newest first)
    /// and returns that step's last error.
    pub async fn execute(&self, request: &R) -> Result<Vec<String>, SagaError> {
        let snapshot = self
            .snapshots
            .capture(request)
            .await
            .map_err(SagaError::Snapshot)?;

        let mut completed: Vec<String> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            debug!(step = %step.name, "running saga step");

            let observer = Arc::clone(&step.on_retry);
            let result = run_with_retry(
                || step.action.execute(request),
                &step.policy,
                |attempt, error| observer(attempt, error),
            )
            .await;

            match result {
                Ok(()) => {
                    info!(step = %step.name, "saga step completed");
                    completed.push(step.name.clone());
                }
                Err(source) => {
                    let attempts = step.policy.max_attempts();
                    error!(
                        step = %step.name,
                        attempts,
                        error = %source,
                        completed = ?completed,
                        "saga step exhausted retries, compensating"
                    );

                    let compensation_failures =
                        self.compensate(&completed, request, &snapshot).await;

                    return Err(SagaError::StepFailed {
                        step: step.name.clone(),
                        attempts,
                        source,
                        compensation_failures,
                    });
                }
            }
        }

        Ok(completed)
    }

    /// Run the registered inverse of each completed step, newest first.
    ///
    /// Never fails: returns the names of steps whose compensation errored.
    pub async fn compensate(&self, completed_steps: &[String], request: &R, snapshot: &S) -> Vec<String> {
        let mut failures = Vec::new();

        for name in completed_steps.iter().rev() {
            let Some(compensation) = self.compensations.get(name) else {
                debug!(step = %name, "no compensation registered, skipping");
                continue;
            };

            match compensation.compensate(request, snapshot).await {
                Ok(()) => info!(step = %name, "compensated saga step"),
                Err(e) => {
                    error!(
                        step = %name,
                        error = %e,
                        "compensation failed, manual intervention required"
                    );
                    failures.push(name.clone());
                }
            }
        }

        failures
    }
}
