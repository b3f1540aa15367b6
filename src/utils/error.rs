//! Error handling for fastprefetch

use thiserror::Error;

/// Main error type for fastprefetch
#[derive(Debug, Error)]
pub enum PrefetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Queue {queue} needs a concurrency bound above zero")]
    InvalidConcurrency { queue: String },

    #[error("Queue {queue} is busy ({in_flight} in flight, {pending} pending)")]
    Busy {
        queue: String,
        in_flight: usize,
        pending: usize,
    },

    #[error("Queue name {0} is reserved")]
    ReservedQueueName(String),

    #[error("No Tokio runtime available to run prefetch tasks")]
    NoRuntime,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Failure reported by a fetch primitive for a single task
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Body is not a decodable image: {0}")]
    Decode(String),

    #[error("Fetcher panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    /// Returns true if another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::Decode(_) | FetchError::Panicked(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PrefetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_fetch_errors() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Timeout(30).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Decode("not an image".into()).is_retryable());
        assert!(!FetchError::Panicked("boom".into()).is_retryable());
    }

    #[test]
    fn test_busy_message_names_queue() {
        let err = PrefetchError::Busy {
            queue: "thumbnails".into(),
            in_flight: 2,
            pending: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("thumbnails"));
        assert!(msg.contains("2 in flight"));
        assert!(msg.contains("3 pending"));
    }
}
