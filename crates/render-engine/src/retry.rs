//! Bounded exponential backoff for transient engine failures.

use std::future::Future;
use std::time::Duration;

use reelsmith_common::config::RenderDefaults;
use reelsmith_common::error::ReelsmithResult;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn from_config(render: &RenderDefaults) -> Self {
        Self {
            max_attempts: render.retry_attempts.max(1),
            base_delay: render.retry_base_delay(),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> ReelsmithResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ReelsmithResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind().is_retryable() && attempt + 1 < attempts => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsmith_common::error::{ErrorKind, ReelsmithError};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("init", |_| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ReelsmithError::engine_init("not yet"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ReelsmithResult<()> = RetryPolicy::default()
            .run("trim", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ReelsmithError::corrupted("moov atom not found"))
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::CorruptedFile);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: ReelsmithResult<()> = RetryPolicy::default()
            .run("init", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ReelsmithError::timeout("init", Duration::from_secs(30)))
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
