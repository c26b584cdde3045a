//! Envelope types exchanged between nodes.
//!
//! An [`Envelope`] is either a request or a response, discriminated by an
//! explicit tag:
//!
//! ```text
//! Request  { request_id, path, query, src_address }
//! Response { request_id, error, response }
//! ```
//!
//! The `response` field of a response envelope carries the packaged route
//! result `{ "error": ..., "response": ... }` produced by the remote
//! dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::address::Address;
use crate::error::{Result, RpcError};

/// Error value sent back when no route matches a request path.
pub const NOT_FOUND: &str = "not_found";

/// Identifier correlating a response with its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message unit crossing the transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Envelope {
    /// A path-addressed request.
    Request(RequestEnvelope),
    /// A response to an earlier request.
    Response(ResponseEnvelope),
}

impl Envelope {
    /// Get the request ID.
    pub fn request_id(&self) -> RequestId {
        match self {
            Envelope::Request(r) => r.request_id,
            Envelope::Response(r) => r.request_id,
        }
    }

    /// Check if this envelope is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        matches!(self, Envelope::Response(_))
    }

    /// Get the request path, if this is a request.
    pub fn path(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.path),
            Envelope::Response(_) => None,
        }
    }
}

impl From<RequestEnvelope> for Envelope {
    fn from(r: RequestEnvelope) -> Self {
        Envelope::Request(r)
    }
}

impl From<ResponseEnvelope> for Envelope {
    fn from(r: ResponseEnvelope) -> Self {
        Envelope::Response(r)
    }
}

/// Outbound or inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Fresh identifier assigned by the sending exchange.
    pub request_id: RequestId,
    /// Route path, e.g. `/users/1`.
    pub path: String,
    /// Query object handed to the route handler.
    #[serde(default)]
    pub query: Map<String, Value>,
    /// Return address for the response.
    pub src_address: Address,
}

/// Response to a request, routed by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// ID of the request being answered.
    pub request_id: RequestId,
    /// Exchange-level error, if the request could not be answered at all.
    #[serde(default)]
    pub error: Option<Value>,
    /// Packaged route result.
    #[serde(default)]
    pub response: Value,
}

impl ResponseEnvelope {
    /// Build a response packaging a route result.
    pub fn new(request_id: RequestId, result: RouteResult) -> Self {
        Self {
            request_id,
            error: None,
            response: result.pack(),
        }
    }

    /// Decode this response into the value handed to the waiting caller.
    ///
    /// A response payload that is not an object (including `null`) yields
    /// [`RpcError::ResponseNotObject`].
    pub fn into_outcome(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(RpcError::Remote {
                error,
                response: Value::Null,
            });
        }

        let mut packed = match self.response {
            Value::Object(map) => map,
            _ => return Err(RpcError::ResponseNotObject),
        };

        let response = packed.remove("response").unwrap_or(Value::Null);
        match packed.remove("error") {
            None | Some(Value::Null) => Ok(response),
            Some(error) => Err(RpcError::Remote { error, response }),
        }
    }
}

/// Result produced by a route handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    /// Error value reported to the remote caller.
    pub error: Option<Value>,
    /// Response value reported to the remote caller.
    pub response: Value,
}

impl RouteResult {
    /// Successful result.
    pub fn ok(response: impl Into<Value>) -> Self {
        Self {
            error: None,
            response: response.into(),
        }
    }

    /// Failed result with a null response.
    pub fn err(error: impl Into<Value>) -> Self {
        Self {
            error: Some(error.into()),
            response: Value::Null,
        }
    }

    /// Result for a path with no matching route.
    pub fn not_found() -> Self {
        Self::err(NOT_FOUND)
    }

    /// Package as the `{ error, response }` object carried in a response envelope.
    pub fn pack(self) -> Value {
        json!({
            "error": self.error.unwrap_or(Value::Null),
            "response": self.response,
        })
    }
}
