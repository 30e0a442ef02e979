//! Client context shared by every request

use std::sync::Arc;

use docs_session::TokenManager;
use parking_lot::Mutex;
use tracing::debug;
use transport::{HeaderMap, HeaderName, HeaderValue, Method, Transport};

use crate::error::{Error, Result};
use crate::executor::{Executor, SerialExecutor};
use crate::pagination::PageLinks;
use crate::request::{Request, RequestBuilder, RequestParts};
use crate::response::Page;
use crate::retry::RetryPolicy;

pub(crate) struct ClientInner {
    pub(crate) base_url: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) retry: RetryPolicy,
    pub(crate) page_links: PageLinks,
    pub(crate) default_headers: HeaderMap,
    /// Created on first asynchronous run unless supplied
    executor: Mutex<Option<Arc<dyn Executor>>>,
}

/// Entry point for building requests against the document API.
///
/// Cheap to clone; clones share the transport, token manager and default
/// worker.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenManager>,
    ) -> ClientBuilder {
        ClientBuilder {
            base_url: base_url.into(),
            transport,
            tokens,
            retry: RetryPolicy::default(),
            page_links: PageLinks::default(),
            default_headers: HeaderMap::new(),
            executor: None,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// `path` is joined to the base URL unless it is already absolute.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let parts = RequestParts::new(
            method,
            self.url(path),
            self.inner.default_headers.clone(),
            self.inner.page_links,
        );
        RequestBuilder::new(self.clone(), parts)
    }

    /// The request for the page a previous response pointed at.
    pub fn next_page<T>(&self, page: Page<T>) -> Request<T> {
        let Page {
            url,
            headers,
            links,
            decoder,
        } = page;
        Request::new(
            self.clone(),
            RequestParts::new(Method::GET, url, headers, links),
            decoder,
        )
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.inner.tokens
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The worker used by `run_async` and `submit`.
    pub fn default_executor(&self) -> Result<Arc<dyn Executor>> {
        let mut slot = self.inner.executor.lock();
        if let Some(executor) = slot.as_ref() {
            return Ok(Arc::clone(executor));
        }
        let executor: Arc<dyn Executor> =
            Arc::new(SerialExecutor::new().map_err(|e| Error::TransientIo {
                url: self.inner.base_url.clone(),
                message: format!("could not start request worker: {e}"),
            })?);
        debug!("started default serial executor");
        *slot = Some(Arc::clone(&executor));
        Ok(executor)
    }

    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.inner.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Configures a [`Client`].
pub struct ClientBuilder {
    base_url: String,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    page_links: PageLinks,
    default_headers: HeaderMap,
    executor: Option<Arc<dyn Executor>>,
}

impl ClientBuilder {
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Default pagination source for requests built by this client.
    pub fn page_links(mut self, links: PageLinks) -> Self {
        self.page_links = links;
        self
    }

    /// Worker for `run_async`/`submit` instead of the lazily started
    /// serial worker.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Header sent with every request. Invalid names or values are an
    /// `Encode` error.
    pub fn default_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Encode(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Encode(format!("invalid value for header {name}: {e}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                transport: self.transport,
                tokens: self.tokens,
                retry: self.retry,
                page_links: self.page_links,
                default_headers: self.default_headers,
                executor: Mutex::new(self.executor),
            }),
        }
    }
}
