//! Error types for the protocol layer.
//!
//! Protocol errors are never fatal to a connection: the router logs them
//! and drops the offending message, and the connection stays open.

use crate::MessageType;

/// Errors that can occur while encoding, validating, or routing messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, wrong
    /// data types, or truncated messages.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message has no string `type` field.
    #[error("message has no type")]
    MissingType,

    /// The `type` field names a message this protocol does not know.
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// A required field is absent.
    #[error("{message_type}: missing required field `{field}`")]
    MissingField {
        message_type: MessageType,
        field: &'static str,
    },

    /// A field is present but has the wrong primitive type.
    #[error("{message_type}: field `{field}` must be {expected}")]
    WrongFieldType {
        message_type: MessageType,
        field: &'static str,
        expected: &'static str,
    },

    /// The type is known but nothing is registered to handle it.
    #[error("no handler registered for {0}")]
    NoHandler(MessageType),

    /// A middleware stopped the message before it reached its handlers.
    #[error("{0} halted by middleware")]
    Halted(MessageType),

    /// A handler reported a failure.
    #[error("{message_type} handler failed: {reason}")]
    Handler {
        message_type: MessageType,
        reason: String,
    },

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
