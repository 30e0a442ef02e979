//! Scripted in-memory transport
//!
//! Replies are keyed by exact URL. Queued replies are consumed first-in
//! first-out; once a URL's queue is empty its sticky reply (if any) is used,
//! otherwise the transport answers 501. Every call is recorded before the
//! configured latency elapses, so a call counts as soon as it is dispatched.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, stream};
use parking_lot::Mutex;

use crate::error::{Result, TransportError};
use crate::{HeaderMap, HeaderName, HeaderValue, Method, Transport, TransportRequest, TransportResponse};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        chunks: Vec<Bytes>,
        /// Body never terminates after the last chunk
        stall: bool,
    },
    Fail(TransportError),
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        MockReply::Response {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
            stall: false,
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200).body(body)
    }

    pub fn fail(err: TransportError) -> Self {
        MockReply::Fail(err)
    }

    /// Replace the body with a single chunk.
    pub fn body(self, body: impl Into<Bytes>) -> Self {
        self.chunks(vec![body.into()])
    }

    pub fn chunks(mut self, body: Vec<Bytes>) -> Self {
        if let MockReply::Response { chunks, .. } = &mut self {
            *chunks = body;
        }
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let MockReply::Response { headers, .. } = &mut self {
            headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    /// Deliver the chunks, then leave the body pending forever.
    pub fn stalling(mut self) -> Self {
        if let MockReply::Response { stall, .. } = &mut self {
            *stall = true;
        }
        self
    }
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_str(&self) -> &str {
        self.body
            .as_ref()
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or("")
    }
}

#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<MockReply>>>,
    sticky: Mutex<HashMap<String, MockReply>>,
    latency: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `url`.
    pub fn enqueue(&self, url: &str, reply: MockReply) {
        self.queued
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Reply used whenever the queue for `url` is empty.
    pub fn always(&self, url: &str, reply: MockReply) {
        self.sticky.lock().insert(url.to_string(), reply);
    }

    /// Delay between dispatch and the response headers for `url`.
    pub fn set_latency(&self, url: &str, latency: Duration) {
        self.latency.lock().insert(url.to_string(), latency);
    }

    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url == url)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.url == url).count()
    }

    /// Poll until `url` has been called `count` times. Returns false after 5s.
    pub async fn wait_for_calls(&self, url: &str, count: usize) -> bool {
        for _ in 0..5000 {
            if self.call_count(url) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }

    fn next_reply(&self, url: &str) -> MockReply {
        if let Some(reply) = self.queued.lock().get_mut(url).and_then(|q| q.pop_front()) {
            return reply;
        }
        self.sticky
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| MockReply::status(501).body(format!("no scripted reply for {url}")))
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let url = request.url.clone();
            self.calls.lock().push(RecordedRequest {
                method: request.method,
                url: request.url,
                headers: request.headers,
                body: request.body,
            });

            let latency = self.latency.lock().get(&url).copied();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            match self.next_reply(&url) {
                MockReply::Fail(err) => Err(err),
                MockReply::Response {
                    status,
                    headers,
                    chunks,
                    stall,
                } => {
                    let mut map = HeaderMap::new();
                    for (name, value) in headers {
                        let name = HeaderName::from_bytes(name.as_bytes())
                            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                        let value = HeaderValue::from_str(&value)
                            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                        map.append(name, value);
                    }
                    let delivered = stream::iter(chunks.into_iter().map(Ok));
                    let body = if stall {
                        delivered.chain(stream::pending()).boxed()
                    } else {
                        delivered.boxed()
                    };
                    Ok(TransportResponse {
                        status,
                        headers: map,
                        body,
                    })
                }
            }
        })
    }
}
