//! Retry policy and outcome classification
//!
//! Each attempt is classified into exactly one family. Only transport
//! failures in the connection phase are retried; HTTP statuses never are,
//! apart from the single refresh-and-retry that follows a 401.

use std::time::Duration;

use transport::TransportError;

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// The server rejected the credential; a refresh may fix it
    AuthenticationFailure,
    TransientIo,
    /// A status or failure that neither retry nor refresh can fix
    Permanent,
    Cancelled,
}

/// Classify a response status.
///
/// 2xx is success and 401 an authentication failure. Every other status,
/// 403 and 5xx included, is permanent.
pub fn classify_status(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Success,
        401 => Classification::AuthenticationFailure,
        _ => Classification::Permanent,
    }
}

/// Classify a failure raised by the transport before any response.
pub fn classify_transport_error(err: &TransportError) -> Classification {
    match err {
        TransportError::InvalidRequest(_) => Classification::Permanent,
        _ => Classification::TransientIo,
    }
}

/// Bound on transport-level retries.
///
/// Default: 2 retries (3 attempts) with a fixed 100ms pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Every failure surfaces on the first attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Whether `err` may be retried after `retries` retries already made.
    pub fn allows_retry(&self, err: &TransportError, retries: u32) -> bool {
        err.is_retryable() && retries < self.max_retries
    }
}
