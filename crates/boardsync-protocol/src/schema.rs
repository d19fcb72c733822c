//! Static structural schema for every message type.
//!
//! Validation is purely structural: a field is present and has the right
//! primitive JSON type. Whether `playerId` names an existing player is the
//! handler's business, not the schema's.

use serde_json::Value;

use crate::{MessageType, ProtocolError};

/// Primitive JSON kinds a field can be required to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
            Self::Array => "an array",
            Self::Object => "an object",
        }
    }
}

/// One entry of a message schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind, required: true }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind, required: false }
}

// Tables are `const` items so the slices returned by `fields` are
// `'static`. A `const fn` call inside a `&[..]` expression is not promoted.
const GAME_STATE: &[FieldSpec] = &[required("gameState", FieldKind::Object)];
const CONNECTION_PACKAGE: &[FieldSpec] = &[
    required("gameState", FieldKind::Object),
    required("peerId", FieldKind::String),
];
const JOIN: &[FieldSpec] = &[
    required("peerId", FieldKind::String),
    required("players", FieldKind::Array),
];
const REASON: &[FieldSpec] = &[required("reason", FieldKind::String)];
const OPTIONAL_REASON: &[FieldSpec] = &[optional("reason", FieldKind::String)];
const DELTA: &[FieldSpec] = &[required("delta", FieldKind::Object)];
const PLAYER: &[FieldSpec] = &[required("player", FieldKind::Object)];
const ADD_PLAYER_REJECTED: &[FieldSpec] = &[
    required("reason", FieldKind::String),
    optional("player", FieldKind::Object),
];
const NAME_CHANGE: &[FieldSpec] = &[
    required("playerId", FieldKind::String),
    required("nickname", FieldKind::String),
];
const COLOR_CHANGE: &[FieldSpec] = &[
    required("playerId", FieldKind::String),
    required("playerColor", FieldKind::String),
];
const PEER_COLOR_CHANGE: &[FieldSpec] = &[
    required("playerId", FieldKind::String),
    required("peerColor", FieldKind::String),
];
const PLAYER_ID: &[FieldSpec] = &[required("playerId", FieldKind::String)];
const TIMESTAMP: &[FieldSpec] = &[required("timestamp", FieldKind::Number)];

/// Returns the field table for a message type.
pub fn fields(message_type: MessageType) -> &'static [FieldSpec] {
    use MessageType as T;

    match message_type {
        T::ConnectionPackage => CONNECTION_PACKAGE,
        T::Join => JOIN,
        T::JoinRejected => REASON,
        T::GameState | T::ProposeGameState => GAME_STATE,
        T::GameStateDelta => DELTA,
        T::RequestFullState | T::Kick => OPTIONAL_REASON,
        T::ProposeAddPlayer => PLAYER,
        T::AddPlayerRejected => ADD_PLAYER_REJECTED,
        T::NameChange => NAME_CHANGE,
        T::ColorChange => COLOR_CHANGE,
        T::PeerColorChange => PEER_COLOR_CHANGE,
        T::RemovePlayer => PLAYER_ID,
        T::StartGame => &[],
        T::Heartbeat | T::HeartbeatAck => TIMESTAMP,
    }
}

/// Reads the `type` tag of a raw message.
pub fn message_type_of(raw: &Value) -> Result<MessageType, ProtocolError> {
    raw.get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .parse()
}

/// Validates a raw message against its schema and returns its type.
///
/// Optional fields may be absent or `null`; when present they must still
/// have the declared kind.
pub fn validate(raw: &Value) -> Result<MessageType, ProtocolError> {
    let message_type = message_type_of(raw)?;

    for field in fields(message_type) {
        match raw.get(field.name) {
            None | Some(Value::Null) if field.required => {
                return Err(ProtocolError::MissingField {
                    message_type,
                    field: field.name,
                });
            }
            None | Some(Value::Null) => {}
            Some(value) if !field.kind.matches(value) => {
                return Err(ProtocolError::WrongFieldType {
                    message_type,
                    field: field.name,
                    expected: field.kind.describe(),
                });
            }
            Some(_) => {}
        }
    }

    Ok(message_type)
}
