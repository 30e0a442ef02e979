//! Typed, cancellable units of work
//!
//! A `Request<T>` is single-use: every way of running it consumes it.
//! Lifecycle moves one way, `Pending -> Running -> Done | Cancelled`, or
//! straight from `Pending` to `Cancelled` when cancelled before dispatch.
//!
//! Asynchronous runs report through a completion slot that fires exactly
//! once, whichever of the worker or a cancelling thread gets there first.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use transport::{HeaderMap, HeaderName, HeaderValue, Method, header};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::exchange;
use crate::executor::Executor;
use crate::pagination::PageLinks;
use crate::response::{Decoder, Response};

/// Produces the request body. Invoked again for every attempt.
pub(crate) type BodyProducer = Arc<dyn Fn() -> std::result::Result<Bytes, String> + Send + Sync>;

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Running,
    Done,
    Cancelled,
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            PENDING => State::Pending,
            RUNNING => State::Running,
            DONE => State::Done,
            _ => State::Cancelled,
        }
    }
}

/// How a request ended.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(Response<T>),
    Failure(Error),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// `Cancelled` becomes `Err(Error::Cancelled)`.
    pub fn into_result(self) -> Result<Response<T>> {
        match self {
            Outcome::Success(response) => Ok(response),
            Outcome::Failure(err) => Err(err),
            Outcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

type CancelHook = Box<dyn FnOnce() + Send>;

struct HandleInner {
    state: AtomicU8,
    token: CancellationToken,
    on_cancel: Mutex<Option<CancelHook>>,
}

/// Cancellation and status handle for one request.
///
/// Cloneable and usable from any thread, before or after submission.
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<HandleInner>,
}

impl RequestHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: AtomicU8::new(PENDING),
                token: CancellationToken::new(),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    /// Request cancellation.
    ///
    /// A pending request never starts and an asynchronous caller is told
    /// `Cancelled` right away. A running request stops at its next check
    /// point. No effect once the request has finished.
    pub fn cancel(&self) {
        let inner = &self.inner;
        match inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                inner.token.cancel();
                let hook = inner.on_cancel.lock().take();
                if let Some(hook) = hook {
                    hook();
                }
            }
            Err(RUNNING) => inner.token.cancel(),
            Err(_) => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self.state() {
            State::Cancelled => true,
            State::Done => false,
            _ => self.inner.token.is_cancelled(),
        }
    }

    /// True once the request has finished, including by cancellation.
    pub fn is_done(&self) -> bool {
        matches!(self.state(), State::Done | State::Cancelled)
    }

    pub fn state(&self) -> State {
        State::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Run `hook` when the request is cancelled before it starts. Runs it
    /// immediately if that already happened.
    fn on_cancel(&self, hook: CancelHook) {
        let mut slot = self.inner.on_cancel.lock();
        if self.state() == State::Cancelled {
            drop(slot);
            hook();
        } else {
            *slot = Some(hook);
        }
    }

    /// `Pending -> Running`. False if cancelled first.
    fn start(&self) -> bool {
        let started = self
            .inner
            .state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            self.inner.on_cancel.lock().take();
        }
        started
    }

    fn finish<T>(&self, result: Result<Response<T>>) -> Outcome<T> {
        if self.inner.token.is_cancelled() || matches!(result, Err(Error::Cancelled)) {
            self.inner.state.store(CANCELLED, Ordering::Release);
            return Outcome::Cancelled;
        }
        self.inner.state.store(DONE, Ordering::Release);
        match result {
            Ok(response) => Outcome::Success(response),
            Err(err) => Outcome::Failure(err),
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("state", &self.state())
            .field("cancel_requested", &self.inner.token.is_cancelled())
            .finish()
    }
}

type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

/// Holds the completion callback until its single invocation.
struct CompletionSlot<T> {
    callback: Arc<Mutex<Option<Callback<T>>>>,
}

impl<T> Clone for CompletionSlot<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> CompletionSlot<T> {
    fn new(callback: Callback<T>) -> Self {
        Self {
            callback: Arc::new(Mutex::new(Some(callback))),
        }
    }

    fn fire(&self, outcome: Outcome<T>) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}

/// Reports an outcome if a job is dropped before it fired its slot, e.g.
/// when its executor shut down. No-op once the slot has fired.
struct CompletionGuard<T> {
    slot: CompletionSlot<T>,
    handle: RequestHandle,
    url: String,
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        let outcome = if self.handle.token().is_cancelled() {
            Outcome::Cancelled
        } else {
            Outcome::Failure(abandoned(&self.url))
        };
        self.slot.fire(outcome);
    }
}

fn abandoned(url: &str) -> Error {
    Error::TransientIo {
        url: url.to_string(),
        message: "request was dropped by its executor before completing".into(),
    }
}

/// Everything about a request except its decoder.
pub(crate) struct RequestParts {
    pub(crate) id: String,
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<BodyProducer>,
    pub(crate) links: PageLinks,
    /// Set when building failed; surfaced when the request runs
    pub(crate) error: Option<Error>,
}

impl RequestParts {
    pub(crate) fn new(method: Method, url: String, headers: HeaderMap, links: PageLinks) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            method,
            url,
            headers,
            body: None,
            links,
            error: None,
        }
    }
}

/// Builds a request: headers, body, pagination source, then a decoder.
pub struct RequestBuilder {
    client: Client,
    parts: RequestParts,
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, parts: RequestParts) -> Self {
        Self { client, parts }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.parts.headers.insert(name, value);
            }
            _ => self.fail(Error::Encode(format!("invalid header {name}"))),
        }
        self
    }

    /// JSON body, serialised afresh for every attempt.
    pub fn json<B>(mut self, body: B) -> Self
    where
        B: Serialize + Send + Sync + 'static,
    {
        self.parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.parts.body = Some(Arc::new(move || {
            serde_json::to_vec(&body)
                .map(Bytes::from)
                .map_err(|e| e.to_string())
        }));
        self
    }

    /// Custom body producer. It must be able to run more than once.
    pub fn body_with<F, E>(mut self, content_type: &str, produce: F) -> Self
    where
        F: Fn() -> std::result::Result<Bytes, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        match HeaderValue::from_str(content_type) {
            Ok(value) => {
                self.parts.headers.insert(header::CONTENT_TYPE, value);
            }
            Err(_) => self.fail(Error::Encode(format!("invalid content type {content_type}"))),
        }
        self.parts.body = Some(Arc::new(move || produce().map_err(|e| e.to_string())));
        self
    }

    /// Where the next-page cursor is read from (default: `Link` header).
    pub fn page_links(mut self, links: PageLinks) -> Self {
        self.parts.links = links;
        self
    }

    /// Decode a JSON body into `T`.
    pub fn decode_json<T>(mut self) -> Request<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.parts
            .headers
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        self.decode_with(|body: &[u8]| serde_json::from_slice::<T>(body))
    }

    pub fn decode_with<T, F, E>(self, decode: F) -> Request<T>
    where
        F: Fn(&[u8]) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let decoder: Decoder<T> = Arc::new(move |body| decode(body).map_err(|e| e.to_string()));
        Request::new(self.client, self.parts, decoder)
    }

    /// Ignore the response body.
    pub fn no_content(self) -> Request<()> {
        self.decode_with(|_| Ok::<(), std::convert::Infallible>(()))
    }

    fn fail(&mut self, err: Error) {
        self.parts.error.get_or_insert(err);
    }
}

/// A single-use request producing a `Response<T>`.
pub struct Request<T> {
    client: Client,
    parts: RequestParts,
    decoder: Decoder<T>,
    handle: RequestHandle,
}

impl<T> Request<T> {
    pub(crate) fn new(client: Client, parts: RequestParts, decoder: Decoder<T>) -> Self {
        Self {
            client,
            parts,
            decoder,
            handle: RequestHandle::new(),
        }
    }

    /// Handle for cancelling or observing this request after it is moved.
    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> &str {
        &self.parts.id
    }

    pub fn url(&self) -> &str {
        &self.parts.url
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Execute on the calling task.
    pub async fn run(self) -> Result<Response<T>> {
        self.drive().await.into_result()
    }

    /// Execute on a private current-thread runtime, blocking the caller.
    ///
    /// # Panics
    ///
    /// When called from within an async runtime.
    pub fn run_blocking(self) -> Result<Response<T>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::TransientIo {
                url: self.parts.url.clone(),
                message: format!("could not start runtime: {e}"),
            })?;
        runtime.block_on(self.run())
    }

    async fn drive(self) -> Outcome<T> {
        let Request {
            client,
            parts,
            decoder,
            handle,
        } = self;

        if !handle.start() {
            debug!(request_id = %parts.id, "request cancelled before dispatch");
            record_outcome("cancelled");
            return Outcome::Cancelled;
        }

        let result = match parts.error.clone() {
            Some(err) => Err(err),
            None => exchange::execute(client.inner(), &parts, &decoder, handle.token()).await,
        };
        let outcome = handle.finish(result);
        record_outcome(match &outcome {
            Outcome::Success(_) => "success",
            Outcome::Failure(err) => err.kind().as_str(),
            Outcome::Cancelled => "cancelled",
        });
        outcome
    }
}

impl<T: Send + 'static> Request<T> {
    /// Run on the client's default serial worker; `callback` gets the
    /// outcome exactly once.
    pub fn run_async<F>(self, callback: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        match self.client.default_executor() {
            Ok(executor) => self.run_async_on(executor.as_ref(), callback),
            Err(err) => {
                let outcome = self.handle.finish(Err(err));
                callback(outcome);
            }
        }
    }

    /// Run on `executor`; `callback` gets the outcome exactly once.
    pub fn run_async_on<F>(self, executor: &dyn Executor, callback: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let slot = CompletionSlot::new(Box::new(callback));
        let cancelled = slot.clone();
        self.handle
            .on_cancel(Box::new(move || cancelled.fire(Outcome::Cancelled)));

        // Captured by the job so it also reports when the job is dropped unpolled
        let guard = CompletionGuard {
            slot,
            handle: self.handle.clone(),
            url: self.parts.url.clone(),
        };
        executor.execute(Box::pin(async move {
            let outcome = self.drive().await;
            guard.slot.fire(outcome);
        }));
    }

    /// Run on the default worker and get the outcome as a future.
    pub fn submit(self) -> Submission<T> {
        let (tx, rx) = oneshot::channel();
        let handle = self.handle();
        let url = self.parts.url.clone();
        self.run_async(move |outcome| {
            let _ = tx.send(outcome);
        });
        Submission { handle, url, rx }
    }

    /// Run on `executor` and get the outcome as a future.
    pub fn submit_on(self, executor: &dyn Executor) -> Submission<T> {
        let (tx, rx) = oneshot::channel();
        let handle = self.handle();
        let url = self.parts.url.clone();
        self.run_async_on(executor, move |outcome| {
            let _ = tx.send(outcome);
        });
        Submission { handle, url, rx }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.parts.id)
            .field("method", &self.parts.method)
            .field("url", &self.parts.url)
            .field("state", &self.handle.state())
            .finish()
    }
}

/// A submitted request whose outcome can be awaited.
pub struct Submission<T> {
    handle: RequestHandle,
    url: String,
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Submission<T> {
    pub fn handle(&self) -> &RequestHandle {
        &self.handle
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub async fn outcome(self) -> Outcome<T> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failure(abandoned(&self.url)),
        }
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("docs_requests_total", "outcome" => outcome).increment(1);
}
