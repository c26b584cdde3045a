//! Error types for netrpc.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::RequestId;
use crate::pipeline::Rejection;

/// Main error type for all netrpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// A request was issued while the node has no address.
    #[error("No address set")]
    NoAddress,

    /// Request paths must start with `/`.
    #[error("Invalid request path: {0}")]
    InvalidPath(String),

    /// The request named no destination address.
    #[error("No destination address")]
    NoDestination,

    /// A request with this ID is already awaiting a response.
    #[error("Duplicate request ID: {0}")]
    DuplicateRequestId(RequestId),

    /// The peer answered with a response payload that is not an object.
    #[error("Response is not an object")]
    ResponseNotObject,

    /// The peer answered with an error value (e.g. `"not_found"`).
    ///
    /// `response` carries whatever response value the handler reported
    /// alongside the error, `null` if none.
    #[error("Remote error: {error}")]
    Remote { error: Value, response: Value },

    /// An interceptor aborted the request.
    #[error("Rejected by interceptor: {0}")]
    Rejected(#[from] Rejection),

    /// No response arrived within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// The node lost its address while the request was outstanding.
    #[error("Disconnected")]
    Disconnected,

    /// The transport failed to hand off an envelope.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node's event loop has stopped.
    #[error("Connection closed")]
    ConnectionClosed,

    /// JSON conversion error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl RpcError {
    /// True if the peer reported that no route matched the request path.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RpcError::Remote { error: Value::String(s), .. } if s == crate::envelope::NOT_FOUND
        )
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let remote = |error: &str| RpcError::Remote {
            error: Value::from(error),
            response: Value::Null,
        };
        assert!(remote("not_found").is_not_found());
        assert!(!remote("forbidden").is_not_found());
        assert!(!RpcError::ResponseNotObject.is_not_found());
    }

    #[test]
    fn test_rejection_converts() {
        let err: RpcError = Rejection::new("rate limited").into();
        assert!(matches!(err, RpcError::Rejected(_)));
        assert_eq!(err.to_string(), "Rejected by interceptor: rate limited");
    }
}
