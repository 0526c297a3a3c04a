//! Bounded retry with exponential backoff and a per-attempt timeout.
//!
//! ```text
//! attempt 1 ──fail──► on_retry(1, err) ─► sleep(min(base * 2^0, max))
//! attempt 2 ──fail──► on_retry(2, err) ─► sleep(min(base * 2^1, max))
//! ...
//! attempt N ──fail──► return Err(last error)
//! ```
//!
//! Backoff and timeouts go through `tokio::time`, so tests drive them with a
//! paused clock (`#[tokio::test(start_paused = true)]`).

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

/// Retry and timeout budget for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before giving up. Zero is treated as one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub per_attempt_timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        per_attempt_timeout: Duration,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            per_attempt_timeout,
        }
    }

    /// A single attempt with no backoff.
    pub const fn once(per_attempt_timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, per_attempt_timeout)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait after the failed attempt with zero-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
    }
}

/// An attempt that did not finish within `per_attempt_timeout`.
#[derive(Debug, Error)]
#[error("attempt timed out after {timeout:?}")]
pub struct AttemptTimedOut {
    pub timeout: Duration,
}

/// Run `operation` until it succeeds or the policy's attempts are spent.
///
/// `on_retry` receives the 1-based number of the attempt that just failed and
/// its error, before the backoff wait. It is not called after the final attempt.
pub async fn run_with_retry<T, F, Fut, R>(
    mut operation: F,
    policy: &RetryPolicy,
    mut on_retry: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &anyhow::Error),
{
    let attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        let error = match tokio::time::timeout(policy.per_attempt_timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => anyhow::Error::new(AttemptTimedOut {
                timeout: policy.per_attempt_timeout,
            }),
        };

        if attempt + 1 >= attempts {
            return Err(error);
        }

        on_retry(attempt + 1, &error);
        tokio::time::sleep(policy.delay_for(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(100),
            Duration::from_millis(250),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let policy = policy(5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
        assert_eq!(policy.delay_for(40), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_retries_still_runs_once() {
        assert_eq!(policy(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::once(Duration::from_secs(1)).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success_without_retrying() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let value = run_with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
            &policy(3),
            |attempt, _| retries.push(attempt),
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(retries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result = run_with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    anyhow::bail!("transient failure {}", n)
                }
                Ok(())
            },
            &policy(3),
            |attempt, _| retries.push(attempt),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let err = run_with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("failure {}", n))
            },
            &policy(3),
            |attempt, _| retries.push(attempt),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "failure 2");
        // No observer call after the final attempt
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_with_exponential_backoff() {
        let started = Instant::now();

        let _ = run_with_retry(
            || async { Err::<(), _>(anyhow::anyhow!("down")) },
            &policy(4),
            |_, _| {},
        )
        .await;

        // 100ms + 200ms + 250ms (capped)
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(550), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_counts_as_failure() {
        let calls = AtomicU32::new(0);

        let err = run_with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
            &policy(2),
            |_, error| assert!(error.downcast_ref::<AttemptTimedOut>().is_some()),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let timed_out = err.downcast_ref::<AttemptTimedOut>().unwrap();
        assert_eq!(timed_out.timeout, Duration::from_secs(1));
    }
}
