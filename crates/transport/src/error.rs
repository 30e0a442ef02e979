//! Transport-level error types

/// Errors raised while exchanging bytes with a remote endpoint.
///
/// Only failures in the connection phase are retryable: once a response has
/// started arriving the exchange is no longer idempotent from our side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("body read failed: {0}")]
    Body(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether re-sending the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_phase_errors_are_retryable() {
        assert!(TransportError::Connect("reset".into()).is_retryable());
        assert!(TransportError::Timeout("connect".into()).is_retryable());
    }

    #[test]
    fn other_errors_are_not_retryable() {
        assert!(!TransportError::Body("eof".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad url".into()).is_retryable());
        assert!(!TransportError::Other("tls".into()).is_retryable());
    }
}
