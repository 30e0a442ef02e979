//! Request execution engine for the document API
//!
//! Every call to the API is a `Request<T>`: a single-use, cancellable unit
//! of work pairing a method, URL and optional body producer with a decoder
//! for the response. Running one:
//! 1. Obtains a usable credential from the `TokenManager` (refreshing
//!    proactively, coalesced with any refresh already in flight)
//! 2. Dispatches through the `Transport`, retrying connection-phase
//!    failures per the `RetryPolicy`
//! 3. On 401, refreshes once past the rejected token and re-sends
//! 4. Streams and decodes the body, reads the server date and the
//!    next-page cursor
//!
//! Requests run inline (`run`, `run_blocking`) or on a worker
//! (`run_async`, `submit`), the latter reporting a tagged `Outcome`
//! exactly once.

pub mod client;
pub mod error;
mod exchange;
pub mod executor;
pub mod pagination;
pub mod request;
pub mod response;
pub mod retry;
#[cfg(test)]
mod testing;

pub use client::{Client, ClientBuilder};
pub use error::{Error, ErrorKind, Result};
pub use executor::{Executor, Job, SerialExecutor, TaskExecutor};
pub use pagination::{PageLinks, next_link};
pub use request::{Outcome, Request, RequestBuilder, RequestHandle, State, Submission};
pub use response::{Page, Response};
pub use retry::{Classification, RetryPolicy, classify_status, classify_transport_error};
