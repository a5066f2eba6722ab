//! Retry with exponential backoff.
//!
//! # Responsibilities
//! - Re-run a fallible async operation until it succeeds or retries run out
//! - Stop immediately on errors the caller classifies as non-retryable
//! - Return the last observed error unchanged once retries are exhausted

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Backoff parameters for [`RetryPolicy::retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Retry every error.
    pub async fn retry<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry_if(f, |_| true).await
    }

    /// Retry errors for which `retryable` returns true.
    pub async fn retry_if<F, Fut, T, E, P>(&self, mut f: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let mut retries = 0u32;

        loop {
            match f().await {
                Ok(value) => {
                    if retries > 0 {
                        tracing::debug!(attempt = retries + 1, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !retryable(&error) {
                        tracing::debug!(attempt = retries + 1, error = %error, "Error is not retryable");
                        return Err(error);
                    }

                    if retries >= self.max_retries {
                        tracing::warn!(attempts = retries + 1, error = %error, "Retries exhausted");
                        return Err(error);
                    }

                    let delay = calculate_backoff(
                        retries,
                        self.initial_delay,
                        self.backoff_multiplier,
                        self.max_delay,
                    );
                    tracing::debug!(attempt = retries + 1, delay = ?delay, error = %error, "Attempt failed, retrying");
                    metrics::record_retry();

                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result: Result<&str, String> = fast_policy(2)
            .retry(move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("failure {}", n))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff between the first and third attempt.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), String> = fast_policy(3)
            .retry(move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(format!("failure {}", n))
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result: Result<(), String> = fast_policy(5)
            .retry_if(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("bad request".to_string())
                },
                |e| !e.starts_with("bad"),
            )
            .await;

        assert_eq!(result, Err("bad request".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_are_clamped_to_max() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        let start = Instant::now();

        let _: Result<(), String> = policy.retry(|| async { Err("down".to_string()) }).await;

        // 400 + 500 + 500
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1400));
        assert!(elapsed < Duration::from_millis(1600));
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 250,
            max_delay_ms: 4000,
            backoff_multiplier: 3.0,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_millis(4000));
        assert_eq!(policy.backoff_multiplier, 3.0);
    }
}
