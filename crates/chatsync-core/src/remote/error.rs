//! Remote store errors
//!
//! Every remote failure is classified so callers can tell a transient
//! condition (retry later, keep messages pending) from a permanent one.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a remote message store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Could not reach the server
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out
    #[error("Request to remote store timed out")]
    Timeout,

    /// Server asked us to slow down
    #[error("Rate limited by remote store")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials missing or rejected
    #[error("Not authorized by remote store (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Unexpected HTTP status
    #[error("Remote store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body could not be decoded
    #[error("Invalid response from remote store: {0}")]
    Decode(String),

    /// No remote store is configured or reachable for this session
    #[error("Remote store is offline")]
    Offline,
}

impl RemoteError {
    /// Classify an HTTP status code
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 | 403 => RemoteError::Unauthorized { status },
            408 | 504 => RemoteError::Timeout,
            429 => RemoteError::RateLimited { retry_after: None },
            _ => RemoteError::Http {
                status,
                body: body.into(),
            },
        }
    }

    /// Whether a later attempt may succeed without user action
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_)
            | RemoteError::Timeout
            | RemoteError::RateLimited { .. }
            | RemoteError::Offline => true,
            RemoteError::Http { status, .. } => (500..600).contains(status),
            RemoteError::Unauthorized { .. } | RemoteError::Decode(_) => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RemoteError::from_status(429, "").is_rate_limited());
        assert!(matches!(
            RemoteError::from_status(401, ""),
            RemoteError::Unauthorized { status: 401 }
        ));
        assert_eq!(RemoteError::from_status(504, ""), RemoteError::Timeout);
        assert!(matches!(
            RemoteError::from_status(500, "oops"),
            RemoteError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn test_transient() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::from_status(503, "").is_transient());
        assert!(!RemoteError::from_status(400, "bad").is_transient());
        assert!(!RemoteError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn test_display() {
        let err = RemoteError::from_status(500, "internal");
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("internal"));
    }
}
