//! Error taxonomy for request execution

/// Tag of an [`Error`], for callers that branch on the failure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    HttpResponse,
    TransientIo,
    Decode,
    Encode,
    Cancelled,
    NotSignedIn,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::HttpResponse => "http_response",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Decode => "decode",
            ErrorKind::Encode => "encode",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotSignedIn => "not_signed_in",
        }
    }
}

/// Why a request did not produce a response.
///
/// Every variant carries enough context to report without the request at
/// hand. `Clone` because outcomes may be fanned out to several observers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Refresh failed, or the server rejected the refreshed credential
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("HTTP {status} from {url}")]
    HttpResponse {
        status: u16,
        url: String,
        body: String,
    },

    /// Connection, timeout or body stream failure, after any retries
    #[error("I/O failure for {url}: {message}")]
    TransientIo { url: String, message: String },

    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The request could not be built (body producer, header or URL)
    #[error("could not encode request: {0}")]
    Encode(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("not signed in")]
    NotSignedIn,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::HttpResponse { .. } => ErrorKind::HttpResponse,
            Error::TransientIo { .. } => ErrorKind::TransientIo,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Encode(_) => ErrorKind::Encode,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::NotSignedIn => ErrorKind::NotSignedIn,
        }
    }

    /// HTTP status for `HttpResponse` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<docs_session::Error> for Error {
    fn from(err: docs_session::Error) -> Self {
        match err {
            docs_session::Error::NotSignedIn => Error::NotSignedIn,
            other => Error::Authentication(other.to_string()),
        }
    }
}

/// Result alias for request execution
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_keeps_status_and_url() {
        let err = Error::HttpResponse {
            status: 404,
            url: "https://api.test/documents/9".into(),
            body: r#"{"error":"not found"}"#.into(),
        };
        assert_eq!(err.kind(), ErrorKind::HttpResponse);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404 from https://api.test/documents/9");
    }

    #[test]
    fn session_errors_map_to_authentication_except_signed_out() {
        assert_eq!(
            Error::from(docs_session::Error::NotSignedIn),
            Error::NotSignedIn
        );
        let err = Error::from(docs_session::Error::RefreshRejected("invalid_grant".into()));
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.to_string().contains("invalid_grant"));
        let err = Error::from(docs_session::Error::RefreshFailed("timeout".into()));
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn kind_labels_are_distinct() {
        let kinds = [
            ErrorKind::Authentication,
            ErrorKind::HttpResponse,
            ErrorKind::TransientIo,
            ErrorKind::Decode,
            ErrorKind::Encode,
            ErrorKind::Cancelled,
            ErrorKind::NotSignedIn,
        ];
        let labels: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(labels.len(), kinds.len());
    }
}
