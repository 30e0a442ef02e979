//! Error types for token lifecycle operations

/// Errors from token lifecycle operations.
///
/// `Clone` so one refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("not signed in")]
    NotSignedIn,

    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The refresh task was aborted before finishing, e.g. its runtime shut down
    #[error("token refresh interrupted: {0}")]
    RefreshInterrupted(String),

    #[error("sign-in failed: {0}")]
    SignIn(String),

    #[error("credential store error: {0}")]
    Credential(String),
}

/// Result alias for token lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn store_error(err: docs_auth::Error) -> Error {
    Error::Credential(err.to_string())
}
