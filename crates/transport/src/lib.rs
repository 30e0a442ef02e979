//! HTTP transport abstraction for the document API client
//!
//! Defines the `Transport` trait that decouples request execution from the
//! HTTP stack. `ReqwestTransport` is the production implementation; the
//! `mock` feature adds a scripted in-memory transport for tests.
//!
//! Response bodies are exposed as a stream of chunks so callers can poll a
//! cancellation flag between chunks. Dropping the send future or the body
//! stream aborts the exchange.

pub mod error;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{Result, TransportError};
pub use http::{ReqwestTransport, TransportConfig};

pub use reqwest::Method;
pub use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;

/// Streamed response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A fully described outbound exchange.
///
/// The body is already materialised so the same request can be re-sent
/// verbatim on a retry.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// Status, headers and a not-yet-consumed body.
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body without cancellation checks.
    ///
    /// Meant for short exchanges such as the token endpoint; request
    /// execution reads chunk by chunk instead.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Abstraction over the byte-level HTTP exchange.
///
/// Uses a `Pin<Box<dyn Future>>` return type so it can be shared as
/// `Arc<dyn Transport>` across requests and the token manager.
pub trait Transport: Send + Sync {
    /// Open a connection, write the request and return once the status line
    /// and headers have arrived.
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>>;
}
