//! Uniform retry policy for provider calls.
//!
//! Every call to the document store, the embedder, and the vector index
//! goes through [`RetryPolicy::call`], which bounds each attempt with a
//! timeout and retries failures that [`ProviderError::is_retryable`]
//! accepts, backing off exponentially with jitter. A `Retry-After` hint
//! from the provider raises the delay to at least that long.

use std::future::Future;
use std::time::Duration;

use docsync_core::ProviderError;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay randomized, in `[0.0, 1.0]`.
    pub jitter: f64,
    /// Bound on a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// A policy that never waits between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            call_timeout: Duration::from_secs(10),
        }
    }

    /// Delay before retry number `retry` (0-based), before any provider hint.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(retry.min(30) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        Duration::from_millis((capped * factor) as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn call<F, Fut, T>(&self, op_name: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.call_timeout)),
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                if err.is_retryable() {
                    warn!(op = op_name, attempts = attempt, error = %err, "giving up");
                }
                return Err(err);
            }

            let mut delay = self.backoff(attempt - 1);
            if let Some(hint) = err.retry_after() {
                delay = delay.max(hint);
            }
            warn!(
                op = op_name,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let policy = RetryPolicy::immediate(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let result = policy
            .call("op", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProviderError>(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let policy = RetryPolicy::immediate(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let result = policy
            .call("op", || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProviderError::Transport("reset".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::immediate(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = policy
            .call("op", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Server {
                        status: 503,
                        message: "busy".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let policy = RetryPolicy::immediate(5);
        let attempts = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = policy
            .call("op", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Auth("bad secret".into()))
                }
            })
            .await;
        assert!(result.unwrap_err().is_auth());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let mut policy = RetryPolicy::immediate(2);
        policy.call_timeout = Duration::from_millis(20);
        let result: Result<(), _> = policy
            .call("op", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: 0.0,
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(8), Duration::from_millis(1000));
    }
}
