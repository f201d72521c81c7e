use crate::error::{BinkitError, Result};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Default intervals with a custom retry count.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create an exponential backoff from this configuration
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: self.max_elapsed_time,
            ..Default::default()
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Only errors for which [`BinkitError::is_retryable`] holds are retried; anything
/// else is returned after the first failure.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let backoff = config.to_backoff();
    let mut attempt = 0;

    retry(backoff, || {
        attempt += 1;
        let op = operation();

        async move {
            match op.await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", operation_name, attempt);
                    }
                    Ok(result)
                }
                Err(e) if attempt <= config.max_retries && e.is_retryable() => {
                    warn!(
                        "{} failed on attempt {} of {}: {}. Retrying...",
                        operation_name,
                        attempt,
                        config.max_retries + 1,
                        e
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    if config.max_retries > 0 {
                        warn!("{} failed after {} attempts: {}", operation_name, attempt, e);
                    }
                    Err(backoff::Error::<BinkitError>::permanent(e))
                }
            }
        }
    })
    .await
}
