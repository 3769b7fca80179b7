//! Rate-Limit Coordinator (component E, §4.4).
//!
//! Wraps an async thunk in retry-after-aware exponential backoff with
//! jitter. Non-`rate_limit` errors are rethrown immediately; `rate_limit`
//! errors are retried up to `max_attempts`, preferring the provider's
//! `retry-after` hint over the computed backoff when present.

use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy. Defaults match §4.4.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(32_000),
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// `min(cap, base * 2^attempt) +- jitter`, per §4.4 and testable
    /// property 4 (§8).
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exp = base_ms * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range - (jitter_range / 2.0);
        let delay_ms = (capped + jitter).max(0.0);

        Duration::from_millis(delay_ms as u64)
    }
}

/// The Rate-Limit Coordinator. Stateless beyond its configuration; one
/// instance can be shared across every provider adapter call.
#[derive(Debug, Clone, Default)]
pub struct RateLimitCoordinator {
    config: RetryConfig,
}

impl RateLimitCoordinator {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// `executeWithRetry(thunk, label)`. Retries only `rate_limit` errors;
    /// every other kind is rethrown on first occurrence. After exhausting
    /// `max_attempts`, re-raises the last rate-limit error marked
    /// non-retryable with attempt-count and label context (§4.4
    /// Termination).
    pub async fn execute_with_retry<F, Fut, T>(&self, label: &str, mut thunk: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match thunk().await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind == ErrorKind::RateLimit => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        warn!(label, attempt, "rate limit retries exhausted");
                        return Err(err
                            .with_retryable(false)
                            .with_context("attempt", attempt)
                            .with_context("label", label));
                    }

                    let wait = err
                        .rate_limit
                        .as_ref()
                        .and_then(|hint| hint.retry_after_secs)
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.config.backoff_for_attempt(attempt - 1));

                    warn!(label, attempt, wait_ms = wait.as_millis() as u64, "retrying after rate limit");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Standalone helper exposed for non-rate-limit callers that still want the
/// coordinator's exponential-backoff math (e.g. repository retries).
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    config.backoff_for_attempt(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let d0 = config.backoff_for_attempt(0);
        let d1 = config.backoff_for_attempt(1);
        let d2 = config.backoff_for_attempt(2);
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            max_delay: Duration::from_millis(5000),
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff_for_attempt(10), Duration::from_millis(5000));
    }

    #[test]
    fn backoff_kth_retry_within_jitter_bounds() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(32_000),
            jitter_factor: 0.1,
            ..RetryConfig::default()
        };
        for attempt in 0..5 {
            let base = (1000f64 * 2f64.powi(attempt as i32)).min(32_000.0);
            let lower = base * 0.95;
            let upper = base * 1.05;
            let observed = config.backoff_for_attempt(attempt).as_millis() as f64;
            assert!(observed >= lower - 1.0 && observed <= upper + 1.0, "attempt {attempt}: {observed} not in [{lower},{upper}]");
        }
    }

    #[tokio::test]
    async fn non_rate_limit_errors_are_not_retried() {
        let coordinator = RateLimitCoordinator::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<()> = coordinator
            .execute_with_retry("op", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::internal("boom"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_hint_is_preferred_over_backoff() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_secs(30),
            ..RetryConfig::default()
        };
        let coordinator = RateLimitCoordinator::new(config);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let start = tokio::time::Instant::now();
        let result: Result<i32> = coordinator
            .execute_with_retry("op", move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        let mut err = Error::rate_limit("slow down");
                        err = err.with_rate_limit(crate::error::RateLimitInfo {
                            retry_after_secs: Some(0),
                            ..Default::default()
                        });
                        Err(err)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausting_attempts_surfaces_non_retryable_rate_limit() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        };
        let coordinator = RateLimitCoordinator::new(config);

        let result: Result<()> = coordinator
            .execute_with_retry("op", || async { Err(Error::rate_limit("nope")) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(!err.retryable);
        assert_eq!(err.context.get("attempt").unwrap(), &serde_json::json!(2));
    }
}
