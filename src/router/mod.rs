//! Router module - path-based request routing.
//!
//! Provides:
//! - [`Router`] - the seam the dispatcher routes inbound requests through
//! - [`PathRouter`] - default implementation with `:param` patterns
//! - [`RouteContext`] - query, params, and origin of the request being served

mod context;
mod registry;

pub use context::RouteContext;
pub use registry::{FnHandler, PathRouter, RouteHandler, TypedHandler, INVALID_QUERY};

use crate::envelope::RouteResult;
use crate::pipeline::BoxFuture;

/// Route namespace used for inbound requests.
pub const REQUEST_KIND: &str = "request";

/// Result of routing a path.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// A handler matched and produced a result.
    Matched(RouteResult),
    /// No handler is registered for the path.
    NoMatch,
}

/// Maps a path to a handler and runs it.
///
/// Implementations report exactly one outcome per call.
pub trait Router: Send + Sync + 'static {
    /// Route `path` within the `kind` namespace.
    fn route<'a>(
        &'a self,
        kind: &'a str,
        path: &'a str,
        context: RouteContext,
    ) -> BoxFuture<'a, RouteOutcome>;
}
