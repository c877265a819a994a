//! Retry policy for upstream calls
//!
//! Exponential backoff with deterministic jitter, applied to any operation
//! whose failures classify as retriable (see [`FeedError::is_retriable`]).
//! Non-retriable failures propagate on the first attempt; retriable ones
//! are re-attempted up to the configured cap before surfacing fatally.

use crate::error::{FeedError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Configuration for retry behavior.
///
/// # Example
///
/// ```rust
/// use convoy_feed::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::builder()
///     .max_retries(5)
///     .retry_delay(Duration::from_secs(1))
///     .max_delay(Duration::from_secs(30))
///     .jitter(0.25)
///     .build();
///
/// assert_eq!(config.max_retries(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts.
    /// - `-1` = infinite retries (use with caution)
    /// - `0` = retries disabled
    /// - `n` = retry up to n times
    max_retries: i32,
    /// Base delay between retries (before exponential backoff).
    retry_delay: Duration,
    /// Maximum delay cap (prevents excessive backoff).
    max_delay: Duration,
    /// Jitter factor (0.0 - 1.0) to randomize delays.
    jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Create a builder for RetryConfig.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Create a disabled retry config (no retries).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Get maximum retries (-1 = infinite, 0 = disabled).
    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Get base retry delay.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Get maximum delay cap.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Check if we should retry given the current attempt.
    pub fn should_retry(&self, attempt: u32) -> bool {
        if self.max_retries == -1 {
            true
        } else if self.max_retries == 0 {
            false
        } else {
            attempt < self.max_retries as u32
        }
    }

    /// Calculate delay for a given attempt (exponential backoff with jitter).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.retry_delay.saturating_mul(2u32.saturating_pow(attempt));
        let capped = base.min(self.max_delay);

        if self.jitter > 0.0 {
            let jitter_range = capped.as_secs_f64() * self.jitter;
            // Deterministic jitter based on attempt (for reproducibility)
            let jitter_offset = (attempt as f64 * 0.618033988749895) % 1.0;
            let jitter_amount = jitter_range * (jitter_offset * 2.0 - 1.0);
            let adjusted = capped.as_secs_f64() + jitter_amount;
            Duration::from_secs_f64(adjusted.max(0.0))
        } else {
            capped
        }
    }
}

/// Builder for RetryConfig.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    max_retries: Option<i32>,
    retry_delay: Option<Duration>,
    max_delay: Option<Duration>,
    jitter: Option<f64>,
}

impl RetryConfigBuilder {
    /// Set maximum retry attempts.
    pub fn max_retries(mut self, value: i32) -> Self {
        self.max_retries = Some(value);
        self
    }

    /// Set base retry delay.
    pub fn retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = Some(value);
        self
    }

    /// Set maximum delay cap.
    pub fn max_delay(mut self, value: Duration) -> Self {
        self.max_delay = Some(value);
        self
    }

    /// Set jitter factor (0.0 - 1.0).
    pub fn jitter(mut self, value: f64) -> Self {
        self.jitter = Some(value.clamp(0.0, 1.0));
        self
    }

    /// Build the RetryConfig.
    pub fn build(self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}

/// Run an operation, retrying retriable failures with backoff.
///
/// The classification lives on [`FeedError`]: 5xx / 409 / 412 / 429 from
/// the upstream status family retry, everything else surfaces immediately.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && config.should_retry(attempt) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} failed on attempt {}: {} - retrying in {:?}",
                    op,
                    attempt + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: i32) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .retry_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(0.0)
            .build()
    }

    #[test]
    fn test_should_retry() {
        let config = fast_config(3);
        assert!(config.should_retry(0));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));

        assert!(!RetryConfig::disabled().should_retry(0));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::builder()
            .retry_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(8))
            .jitter(0.0)
            .build();

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_positive() {
        let config = RetryConfig::builder().jitter(1.0).build();
        for attempt in 0..10 {
            assert!(config.delay_for_attempt(attempt) >= Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_config(5), "poll", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FeedError::api(503, "unavailable"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_fast_on_permanent_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_config(5), "fetch", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(FeedError::api(404, "not found")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_surfaces_after_cap() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_config(2), "poll", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(FeedError::api(502, "bad gateway")) }
        })
        .await;

        match result {
            Err(FeedError::Api { status: 502, .. }) => {}
            other => panic!("expected 502 to surface, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
