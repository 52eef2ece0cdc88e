// src/pipeline/retry.rs

//! Bounded retry with a fixed delay.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::models::CrawlerConfig;
use crate::utils::log;

/// Retry schedule for whole-walk failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_secs(config.retry_delay_secs),
        )
    }
}

/// Run `op` until it succeeds or the policy is exhausted; returns the last error.
pub async fn retry_with_backoff<T, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                log::warn!(
                    "{label} failed: {e}. Retrying in {:?} ({attempt}/{})",
                    policy.delay,
                    policy.retries
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                log::error!("{label} failed after {} attempt(s): {e}", attempt + 1);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = retry_with_backoff("walk", policy, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::session("crashed"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result: Result<()> = retry_with_backoff("walk", policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::session("crashed"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_policy_from_defaults() {
        let policy = RetryPolicy::from_config(&CrawlerConfig::default());
        assert_eq!(policy, RetryPolicy::new(3, Duration::from_secs(5)));
    }
}
