//! Error types for the souq-link client.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SouqLinkError>;

/// Errors surfaced by the chat transport client.
///
/// Connection-lifecycle errors are additionally reported through the status
/// channel (`error` / `reconnecting` transitions); per-call errors such as
/// [`PublishError`](SouqLinkError::PublishError) are returned to the
/// immediate caller as well.
#[derive(Debug, Clone, Error)]
pub enum SouqLinkError {
    /// The broker rejected the session as unauthorized. Never retried
    /// automatically — the host application is expected to re-authenticate
    /// and call `connect()` again.
    #[error("authentication failed: {0}")]
    AuthenticationError(String),

    /// Socket-level failure. Triggers bounded reconnection with exponential
    /// backoff when it interrupts an established session.
    #[error("transport error: {0}")]
    TransportError(String),

    /// A malformed inbound frame. The frame is dropped and never delivered
    /// to handlers.
    #[error("malformed frame: {0}")]
    ParseError(String),

    /// A send failed while the underlying socket was unexpectedly closed.
    #[error("publish failed: {0}")]
    PublishError(String),

    /// Invalid client configuration (bad base URL, missing required field).
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// An operation did not complete within its configured timeout.
    #[error("timeout: {0}")]
    TimeoutError(String),
}

impl SouqLinkError {
    /// Returns `true` for authentication failures, which require the host
    /// application to obtain fresh credentials before reconnecting.
    pub fn is_authentication(&self) -> bool {
        matches!(self, SouqLinkError::AuthenticationError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = SouqLinkError::AuthenticationError("bad token".to_string());
        assert!(err.to_string().contains("bad token"));

        let err = SouqLinkError::PublishError("socket closed".to_string());
        assert!(err.to_string().starts_with("publish failed"));
    }

    #[test]
    fn test_is_authentication() {
        assert!(SouqLinkError::AuthenticationError("x".into()).is_authentication());
        assert!(!SouqLinkError::TransportError("x".into()).is_authentication());
    }
}
