//! reqwest-backed transport
//!
//! Maps reqwest failures onto `TransportError` kinds: timeouts and connect
//! failures are retryable, builder failures are invalid requests, anything
//! else is surfaced as-is. The response body is streamed, not buffered.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::{Transport, TransportRequest, TransportResponse};

/// Timeouts and identity for the reqwest client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for establishing the TCP/TLS connection
    pub connect_timeout: Duration,
    /// Upper bound for the whole exchange, body included
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

/// Production transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Other(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client, keeping its connection pool and settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let TransportRequest {
                method,
                url,
                headers,
                body,
            } = request;

            let mut builder = self.client.request(method.clone(), &url).headers(headers);
            if let Some(body) = body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(map_send_error)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            debug!(%method, %url, status, "response headers received");

            let body = response.bytes_stream().map(|chunk| chunk.map_err(map_body_error));
            Ok(TransportResponse {
                status,
                headers,
                body: Box::pin(body),
            })
        })
    }
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

fn map_body_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Body(err.to_string())
    }
}
