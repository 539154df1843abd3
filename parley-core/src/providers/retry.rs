//! Retry policy for transient transport failures
//!
//! Implements configurable exponential backoff with jitter. Transport uses it
//! to repeat a single provider call on rate limits, 5xx responses and dropped
//! connections; it never moves a request to another provider.

use crate::providers::error::ProviderError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial delay before first retry (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,

    /// Base for exponential backoff (e.g., 2.0 for doubling)
    pub exponential_base: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays
    pub jitter_factor: f64,

    /// Whether to respect Retry-After hints
    pub respect_retry_after: bool,

    /// Maximum total time to spend retrying (milliseconds)
    pub timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
            jitter_factor: 0.1,
            respect_retry_after: true,
            timeout_ms: Some(30_000),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom configuration
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given retry attempt
    pub fn calculate_delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        if self.respect_retry_after {
            if let Some(retry_after) = error.retry_delay() {
                return retry_after.min(Duration::from_millis(self.max_delay_ms));
            }
        }

        let base_delay = self.initial_delay_ms as f64 * self.exponential_base.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let delay_with_jitter = if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(delay_with_jitter as u64)
    }

    /// Check if we should retry based on the error and attempt count
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        error.is_retryable()
    }
}

/// Result of a retry operation
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    /// The successful result (if any)
    pub result: Option<T>,

    /// Number of retries made after the initial attempt
    pub attempts: u32,

    /// Total time spent sleeping between attempts
    pub total_delay_ms: u64,

    /// The final error (if failed)
    pub final_error: Option<ProviderError>,
}

impl<T> RetryResult<T> {
    /// Collapse into a plain result
    pub fn into_result(self) -> Result<T, ProviderError> {
        match (self.result, self.final_error) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(err),
            (None, None) => Err(ProviderError::Network(
                "retry loop ended without a result".to_string(),
            )),
        }
    }
}

/// Executor for retry operations
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
}

impl<'a> RetryExecutor<'a> {
    /// Create a new retry executor with the given policy
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, T, Fut>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = 0;
        let mut total_delay_ms = 0;
        let start_time = Instant::now();

        loop {
            match operation().await {
                Ok(result) => {
                    return RetryResult {
                        result: Some(result),
                        attempts,
                        total_delay_ms,
                        final_error: None,
                    };
                }
                Err(error) => {
                    let out_of_time = self
                        .policy
                        .timeout_ms
                        .is_some_and(|limit| start_time.elapsed().as_millis() > limit as u128);

                    if out_of_time || !self.policy.should_retry(&error, attempts) {
                        return RetryResult {
                            result: None,
                            attempts,
                            total_delay_ms,
                            final_error: Some(error),
                        };
                    }

                    let delay = self.policy.calculate_delay(attempts, &error);
                    debug!(attempt = attempts + 1, delay_ms = delay.as_millis() as u64, error = %error, "retrying");
                    total_delay_ms += delay.as_millis() as u64;

                    tokio::time::sleep(delay).await;
                    attempts += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::HttpError;

    fn server_error(status: u16, retry_after: Option<Duration>) -> ProviderError {
        ProviderError::Http(HttpError {
            status,
            status_text: String::new(),
            body: None,
            message: "boom".to_string(),
            retry_after,
        })
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_ms, 100);
        assert_eq!(policy.exponential_base, 2.0);
        assert_eq!(RetryPolicy::no_retry().max_retries, 0);
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            exponential_base: 2.0,
            jitter_factor: 0.0,
            respect_retry_after: false,
            timeout_ms: None,
        };

        let error = server_error(503, None);

        assert_eq!(policy.calculate_delay(0, &error).as_millis(), 100);
        assert_eq!(policy.calculate_delay(1, &error).as_millis(), 200);
        assert_eq!(policy.calculate_delay(2, &error).as_millis(), 400);
        assert_eq!(policy.calculate_delay(3, &error).as_millis(), 800);
        // capped
        assert_eq!(policy.calculate_delay(4, &error).as_millis(), 1000);
    }

    #[test]
    fn test_retry_after_respected() {
        let policy = RetryPolicy::default();
        let error = server_error(429, Some(Duration::from_secs(5)));
        assert_eq!(policy.calculate_delay(0, &error).as_secs(), 5);
    }

    #[test]
    fn test_should_retry_logic() {
        let policy = RetryPolicy::new(2);

        let unavailable = server_error(503, None);
        assert!(policy.should_retry(&unavailable, 0));
        assert!(policy.should_retry(&unavailable, 1));
        assert!(!policy.should_retry(&unavailable, 2));

        let bad_request = server_error(400, None);
        assert!(!policy.should_retry(&bad_request, 0));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 1}"#).unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.initial_delay_ms, 100);
    }

    #[tokio::test]
    async fn test_executor_retries_until_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
            ..Default::default()
        };
        let executor = RetryExecutor::new(&policy);

        let mut calls = 0;
        let result = executor
            .execute(|| {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(ProviderError::Network("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.attempts, 2);
        assert_eq!(result.into_result().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_executor_stops_on_non_retryable() {
        let policy = RetryPolicy::new(5);
        let executor = RetryExecutor::new(&policy);

        let result: RetryResult<()> = executor
            .execute(|| async { Err(server_error(401, None)) })
            .await;

        assert_eq!(result.attempts, 0);
        assert!(result.into_result().is_err());
    }
}
