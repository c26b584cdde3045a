//! Interceptor pipeline - observe, modify, or veto envelopes.
//!
//! Every envelope crossing the node boundary passes through one [`Stage`]:
//!
//! ```text
//! request() ─► OutgoingRequest ─► transport ─► IncomingRequest ─► router
//!                                                                   │
//! callback ◄─ IncomingResponse ◄─ transport ◄─ OutgoingResponse ◄───┘
//! ```
//!
//! Each stage holds an ordered chain of [`Interceptor`]s, run sequentially.
//! A rejection aborts the chain and the envelope is not processed further.

mod chain;
mod interceptor;

pub use chain::{InterceptorId, InterceptorPipeline};
pub use interceptor::{BoxFuture, FnInterceptor, Interceptor, Rejection, Verdict};

/// Point in the envelope lifecycle where interceptors run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Before a request is handed to the transport.
    OutgoingRequest,
    /// Before an inbound request reaches the router.
    IncomingRequest,
    /// Before a response is sent back to the requester.
    OutgoingResponse,
    /// Before an inbound response resolves its pending request.
    IncomingResponse,
}

impl Stage {
    /// All stages, in lifecycle order.
    pub const ALL: [Stage; 4] = [
        Stage::OutgoingRequest,
        Stage::IncomingRequest,
        Stage::OutgoingResponse,
        Stage::IncomingResponse,
    ];

    /// Stage name as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::OutgoingRequest => "outgoingRequest",
            Stage::IncomingRequest => "incomingRequest",
            Stage::OutgoingResponse => "outgoingResponse",
            Stage::IncomingResponse => "incomingResponse",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
