//! MessagePack envelope codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named`: envelopes are internally tagged, and
//! the tag lookup on decode needs struct-as-map output.

use bytes::Bytes;

use crate::envelope::Envelope;
use crate::error::Result;

/// MessagePack codec for envelopes.
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Encode an envelope to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the envelope cannot be serialized.
    #[inline]
    pub fn encode(envelope: &Envelope) -> Result<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec_named(envelope)?))
    }

    /// Decode MsgPack bytes to an envelope.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid envelope.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
