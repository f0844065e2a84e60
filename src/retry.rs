use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Configuration for retry logic with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::store_read()
    }
}

impl RetryConfig {
    /// §7 — idempotent Coordination Store reads: 3 attempts, 100/300/900ms backoff.
    #[must_use]
    pub fn store_read() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(900),
            backoff_multiplier: 3.0,
            jitter_factor: 0.1,
        }
    }
}

/// Errors a [`RetryExecutor`] will retry.
#[derive(Debug, Clone)]
pub enum RetryableError {
    ConnectionError(String),
    ResourceUnavailable(String),
    Generic(String),
}

impl std::fmt::Display for RetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionError(msg) => write!(f, "connection error: {msg}"),
            Self::ResourceUnavailable(msg) => write!(f, "resource unavailable: {msg}"),
            Self::Generic(msg) => write!(f, "retryable error: {msg}"),
        }
    }
}

impl std::error::Error for RetryableError {}

/// Retry executor with exponential backoff and jitter, slimmed to the
/// store-read policy (§7).
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation, retrying while `is_retryable` returns true for
    /// the error and attempts remain.
    pub async fn execute<T, F, Fut, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        let mut attempt = 1;
        let mut delay = self.config.initial_delay;

        loop {
            debug!(operation = operation_name, attempt, "executing operation attempt");

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if attempt >= self.config.max_attempts {
                        error!(operation = operation_name, attempt, error = ?error, "operation failed after all retry attempts");
                        return Err(error);
                    }

                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = ?error,
                        delay_ms = delay.as_millis(),
                        "operation failed, retrying after delay"
                    );

                    sleep(delay).await;

                    let next_delay = Duration::from_millis(
                        (delay.as_millis() as f64 * self.config.backoff_multiplier) as u64,
                    );
                    delay = std::cmp::min(next_delay, self.config.max_delay);

                    if self.config.jitter_factor > 0.0 {
                        let jitter_ms = (delay.as_millis() as f64 * self.config.jitter_factor) as u64;
                        let jitter_amount = rand::thread_rng().gen_range(0..=jitter_ms.max(1));
                        delay += Duration::from_millis(jitter_amount);
                    }

                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let executor = RetryExecutor::new(RetryConfig::store_read());
        let result = executor
            .execute("test", || async { Ok::<i32, RetryableError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryConfig::store_read());

        let counter_clone = counter.clone();
        let result = executor
            .execute("test_retry", move || {
                let counter = counter_clone.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempt < 3 {
                        Err(RetryableError::ConnectionError("not yet".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 2,
            ..RetryConfig::store_read()
        });

        let result = executor
            .execute("test_fail", || async {
                Err::<i32, RetryableError>(RetryableError::Generic("persistent".into()))
            })
            .await;

        assert!(result.is_err());
    }
}
