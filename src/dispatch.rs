//! Inbound request dispatch.
//!
//! Turns an inbound request envelope into the response envelope owed to its
//! sender: the path and query go to the router, and the handler's result
//! (or `not_found`) is packaged for the request's source address.

use std::sync::Arc;

use crate::address::Address;
use crate::envelope::{RequestEnvelope, ResponseEnvelope, RouteResult};
use crate::router::{RouteContext, RouteOutcome, Router, REQUEST_KIND};

/// A response and the address it must be delivered to.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Return address taken from the request.
    pub destination: Address,
    /// Packaged response.
    pub envelope: ResponseEnvelope,
}

/// Routes inbound requests and packages their results.
#[derive(Clone)]
pub struct RequestDispatcher {
    router: Arc<dyn Router>,
}

impl RequestDispatcher {
    /// Create a dispatcher over a router.
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self { router }
    }

    /// Route a request and build the reply.
    pub async fn dispatch(&self, request: RequestEnvelope) -> Reply {
        let RequestEnvelope {
            request_id,
            path,
            query,
            src_address,
        } = request;

        let ctx = RouteContext::new(request_id, src_address.clone(), query);
        let result = match self.router.route(REQUEST_KIND, &path, ctx).await {
            RouteOutcome::Matched(result) => result,
            RouteOutcome::NoMatch => {
                tracing::debug!("No route for {} (request {})", path, request_id);
                RouteResult::not_found()
            }
        };

        Reply {
            destination: src_address,
            envelope: ResponseEnvelope::new(request_id, result),
        }
    }
}
