//! # netrpc
//!
//! Path-addressed request/response exchange over a pluggable
//! point-to-multipoint transport.
//!
//! A [`Node`] sends requests to one or more peer addresses and correlates
//! their responses by request ID, serves inbound requests through a
//! [`Router`](router::Router), and runs every envelope through a four-stage
//! interceptor pipeline that can observe, rewrite, or reject it.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): delivers envelopes and reports address
//!   changes, membership and inbound envelopes as events
//! - **Pipeline** ([`pipeline`]): `outgoingRequest`, `incomingRequest`,
//!   `outgoingResponse` and `incomingResponse` interceptor chains
//! - **Exchange** ([`exchange`]): request IDs, pending calls, inbound routing
//!
//! ## Example
//!
//! ```ignore
//! use netrpc::router::PathRouter;
//! use netrpc::transport::{MemoryLink, MemoryNetwork};
//! use netrpc::{NodeBuilder, Request, RouteResult};
//!
//! let network = MemoryNetwork::new();
//! let mut router = PathRouter::new();
//! router.handle("/ping", |_ctx| async { RouteResult::ok(serde_json::json!({"pong": true})) });
//!
//! let (transport, events) = network.join();
//! let node = NodeBuilder::new(transport, events).router(router).start();
//! node.add_connection(MemoryLink::Join("node-1".into()))?;
//!
//! let pong = node.request(Request::new("node-1", "/ping"))?.await?;
//! ```

pub mod address;
pub mod codec;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod events;
pub mod exchange;
pub mod pipeline;
pub mod router;
pub mod transport;

mod node;

pub use address::{Address, Destinations};
pub use envelope::{Envelope, RequestEnvelope, RequestId, ResponseEnvelope, RouteResult, NOT_FOUND};
pub use error::{Result, RpcError};
pub use events::{NodeEvent, Subscription};
pub use exchange::{Call, Request, RequestOptions};
pub use node::{
    Node, NodeBuilder, NodeConfig, DEFAULT_MAX_CONCURRENT_HANDLERS, DEFAULT_REQUEST_TIMEOUT,
};
pub use pipeline::{InterceptorId, Rejection, Stage, Verdict};
