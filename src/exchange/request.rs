//! Outbound request description and the call future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::address::Destinations;
use crate::envelope::RequestId;
use crate::error::Result;
use crate::pipeline::BoxFuture;

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Give up waiting for a response after this long.
    ///
    /// `None` falls back to the node default, which itself defaults to
    /// waiting indefinitely.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options with a response timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// An outbound request.
///
/// # Example
///
/// ```
/// use netrpc::Request;
/// use serde_json::json;
///
/// let req = Request::new("node-2", "/users/1").with("fields", json!(["name"]));
/// assert_eq!(req.path(), "/users/1");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) destinations: Destinations,
    pub(crate) path: String,
    pub(crate) query: Map<String, Value>,
    pub(crate) options: RequestOptions,
}

impl Request {
    /// Create a request for `path` with an empty query and default options.
    pub fn new(destinations: impl Into<Destinations>, path: impl Into<String>) -> Self {
        Self {
            destinations: destinations.into(),
            path: path.into(),
            query: Map::new(),
            options: RequestOptions::default(),
        }
    }

    /// Replace the query object.
    pub fn query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    /// Set a single query entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Set the request options.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Set a response timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Get the request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the destinations.
    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }
}

/// A request awaiting its response.
///
/// The request is already queued for sending when the call is created; the
/// call only waits for the outcome. It resolves exactly once. Dropping an
/// unresolved call forgets its pending entry, so a late response is dropped.
#[must_use = "the response is dropped unless the call is awaited"]
pub struct Call {
    request_id: RequestId,
    fut: BoxFuture<'static, Result<Value>>,
}

impl Call {
    pub(crate) fn new(request_id: RequestId, fut: BoxFuture<'static, Result<Value>>) -> Self {
        Self { request_id, fut }
    }

    /// ID assigned to this request.
    #[inline]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for Call {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().fut.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
