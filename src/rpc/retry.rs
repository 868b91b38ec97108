//! Backoff around rate-limited external calls
//!
//! Only rate-limit failures are retried here. Everything else returns on the
//! first error so callers see the real cause immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::RpcManagerError;
use crate::metrics::metrics;

/// Errors that can tell whether the remote side asked us to slow down
pub trait RateLimited {
    fn is_rate_limited(&self) -> bool;
}

impl RateLimited for RpcManagerError {
    fn is_rate_limited(&self) -> bool {
        RpcManagerError::is_rate_limited(self)
    }
}

/// Retry policy for rate-limited operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }

        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

        let delay_ms = if self.jitter_factor > 0.0 {
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor;
            ((delay_ms as f64) * (1.0 + jitter)).max(0.0) as u64
        } else {
            delay_ms
        };

        Some(Duration::from_millis(delay_ms))
    }

    /// Run `op`, backing off while it reports a rate limit
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: RateLimited + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => {
                    metrics().rpc_rate_limited.inc();
                    match self.calculate_delay(attempt) {
                        Some(delay) => {
                            debug!(
                                operation,
                                attempt = attempt + 1,
                                delay_ms = delay.as_millis() as u64,
                                "Rate limited, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            warn!(operation, attempts = attempt + 1, error = %err, "Rate limit retries exhausted");
                            return Err(err);
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limited() -> RpcManagerError {
        RpcManagerError::RateLimitExceeded {
            endpoint: "test".to_string(),
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, 100);
        assert_eq!(policy.calculate_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.calculate_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.calculate_delay(3), Some(Duration::from_millis(800)));
        assert_eq!(policy.calculate_delay(4), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 100);

        let result: Result<u32, RpcManagerError> = policy
            .run("test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(limited())
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 100);

        let result: Result<(), RpcManagerError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(limited())
            })
            .await;

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 100);

        let result: Result<(), RpcManagerError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RpcManagerError::Internal("boom".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
