//! Framing of protocol values.
//!
//! Incoming bytes are decoded to a `serde_json::Value` first: the router
//! checks the schema on the raw value and only then builds a [`Message`](crate::Message).

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Bytes on the link to values and back. One codec is shared by every
/// connection task of a peer.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Fails with [`ProtocolError::Decode`] on malformed input or a shape
    /// mismatch.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// Compact JSON, one message per frame.
///
/// ```rust
/// use boardsync_protocol::{Codec, JsonCodec, Message};
///
/// let bytes = JsonCodec.encode(&Message::Heartbeat { timestamp: 5000 }).unwrap();
/// assert_eq!(bytes, br#"{"type":"HEARTBEAT","timestamp":5000}"#);
///
/// let back: Message = JsonCodec.decode(&bytes).unwrap();
/// assert_eq!(back, Message::Heartbeat { timestamp: 5000 });
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
