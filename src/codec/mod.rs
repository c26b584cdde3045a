//! Codec module - envelope serialization for transports.
//!
//! [`EnvelopeCodec`] encodes envelopes as MessagePack maps (field names kept)
//! into [`bytes::Bytes`], so one encoding can be shared by every destination
//! of a multicast send.
//!
//! # Example
//!
//! ```
//! use netrpc::codec::EnvelopeCodec;
//! use netrpc::{Envelope, RequestId, ResponseEnvelope, RouteResult};
//!
//! let env = Envelope::Response(ResponseEnvelope::new(RequestId(1), RouteResult::ok("pong")));
//! let bytes = EnvelopeCodec::encode(&env).unwrap();
//! assert_eq!(EnvelopeCodec::decode(&bytes).unwrap(), env);
//! ```

mod msgpack;

pub use msgpack::EnvelopeCodec;
