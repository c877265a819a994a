//! Error types for feed operations
//!
//! Includes the retryability classification consulted by the retry policy
//! wrapping upstream API calls and the changes-feed poll.

use thiserror::Error;

/// Errors surfaced by the feed consumer and its collaborators.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Configuration error - fatal, the process should not start
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream API returned an error status
    #[error("upstream API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Document store error outside the HTTP status family
    #[error("document store error: {0}")]
    Store(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Dedup cache error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new upstream API error
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a new document store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Get the upstream status code, if this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this error is retriable.
    ///
    /// Retriable means the error belongs to the upstream API status family
    /// and the status is either a server failure (5xx) or one of the
    /// transient client statuses: 409 (conflict), 412 (precondition failed),
    /// 429 (rate limited). Everything else propagates immediately.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500 || matches!(status, 409 | 412 | 429),
            _ => false,
        }
    }
}

/// Result type for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeedError::api(503, "service unavailable");
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("service unavailable"));

        let err = FeedError::config("missing db section");
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn test_retriable_statuses() {
        for status in [500, 502, 503, 409, 412, 429] {
            assert!(
                FeedError::api(status, "x").is_retriable(),
                "status {} should be retriable",
                status
            );
        }
    }

    #[test]
    fn test_non_retriable_statuses() {
        for status in [400, 403, 404] {
            assert!(
                !FeedError::api(status, "x").is_retriable(),
                "status {} should not be retriable",
                status
            );
        }
    }

    #[test]
    fn test_non_api_errors_never_retriable() {
        assert!(!FeedError::config("bad config").is_retriable());
        assert!(!FeedError::store("compaction in progress").is_retriable());
        assert!(!FeedError::Io(std::io::Error::other("disk gone")).is_retriable());
    }

    #[test]
    fn test_status_code() {
        assert_eq!(FeedError::api(429, "slow down").status_code(), Some(429));
        assert_eq!(FeedError::config("x").status_code(), None);
    }
}
