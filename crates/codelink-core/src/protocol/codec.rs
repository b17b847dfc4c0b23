//! JSON codec for encoding and decoding codelink protocol messages.
//!
//! Wire format (one WebSocket text frame per message):
//! ```text
//! {"type": "<MessageType>", "payload": { ... }}
//! ```
//! `payload` is omitted for `Ping` and `Pong`.
//!
//! # Decoding rules
//!
//! 1. The frame must be a JSON object with a string `type` field naming a
//!    known [`MessageType`].  Anything else is [`ProtocolError::MalformedMessage`].
//! 2. For payload-bearing variants, a missing or `null` payload decodes to the
//!    variant's zero-value defaults.  A payload of the wrong shape (a string
//!    where an object is expected, a negative `cursor_line`, ...) is malformed.
//! 3. `Ping` / `Pong` ignore any payload that happens to be present.
//!
//! # Encoding rules
//!
//! The envelope and payload are assembled as [`DynamicValue`] maps and then
//! serialized.  The only failure is a value JSON cannot represent (NaN or an
//! infinite double inside an `Echo` payload).

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{MessageType, WireMessage, LEGACY_HELLO};
use crate::protocol::value::DynamicValue;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame is not a valid message: bad JSON, missing or unknown `type`,
    /// or a payload of the wrong shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The message contains a value with no JSON representation.
    #[error("cannot encode {message_type} message: {reason}")]
    Unencodable {
        message_type: MessageType,
        reason: String,
    },
}

impl ProtocolError {
    fn malformed(reason: impl Into<String>) -> Self {
        ProtocolError::MalformedMessage(reason.into())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`WireMessage`] into a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Unencodable`] if the message holds a non-finite
/// double.
///
/// # Examples
///
/// ```rust
/// use codelink_core::protocol::{decode_message, encode_message};
/// use codelink_core::WireMessage;
///
/// let text = encode_message(&WireMessage::Ping).unwrap();
/// assert_eq!(text, r#"{"type":"Ping"}"#);
/// assert_eq!(decode_message(&text).unwrap(), WireMessage::Ping);
/// ```
pub fn encode_message(msg: &WireMessage) -> Result<String, ProtocolError> {
    let message_type = msg.message_type();

    let mut envelope = vec![("type", DynamicValue::from(message_type.as_str()))];
    if let Some(payload) = msg.payload() {
        envelope.push(("payload", payload));
    }

    serde_json::to_string(&DynamicValue::map(envelope)).map_err(|e| ProtocolError::Unencodable {
        message_type,
        reason: e.to_string(),
    })
}

/// Decodes one [`WireMessage`] from a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] if the text is not a JSON
/// object, the `type` discriminator is missing or unknown, or the payload is
/// structurally incompatible with the variant.
///
/// # Examples
///
/// ```rust
/// use codelink_core::protocol::decode_message;
/// use codelink_core::protocol::messages::ConnectionRejected;
/// use codelink_core::WireMessage;
///
/// // No payload: the variant's defaults are used.
/// let msg = decode_message(r#"{"type":"ConnectionRejected"}"#).unwrap();
/// assert_eq!(msg, WireMessage::ConnectionRejected(ConnectionRejected::default()));
/// ```
pub fn decode_message(text: &str) -> Result<WireMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::malformed(format!("invalid JSON: {e}")))?;

    let Value::Object(mut envelope) = value else {
        return Err(ProtocolError::malformed("frame is not a JSON object"));
    };

    let message_type = match envelope.get("type") {
        Some(Value::String(name)) => name
            .parse::<MessageType>()
            .map_err(|name| ProtocolError::malformed(format!("unknown message type '{name}'")))?,
        Some(_) => return Err(ProtocolError::malformed("'type' is not a string")),
        None => return Err(ProtocolError::malformed("missing 'type' field")),
    };

    let payload = envelope.remove("payload").unwrap_or(Value::Null);

    let msg = match message_type {
        MessageType::ConnectionRequest => {
            WireMessage::ConnectionRequest(decode_payload(message_type, payload)?)
        }
        MessageType::ConnectionAccepted => {
            WireMessage::ConnectionAccepted(decode_payload(message_type, payload)?)
        }
        MessageType::ConnectionRejected => {
            WireMessage::ConnectionRejected(decode_payload(message_type, payload)?)
        }
        MessageType::EditorStateSync => {
            WireMessage::EditorStateSync(decode_payload(message_type, payload)?)
        }
        MessageType::Ping => WireMessage::Ping,
        MessageType::Pong => WireMessage::Pong,
        MessageType::Echo => WireMessage::Echo(decode_payload(message_type, payload)?),
    };
    Ok(msg)
}

/// Returns `true` if `text` is a legacy plain-text handshake acknowledgement.
///
/// Legacy companions answer the `"hello"` greeting with free-form text such
/// as `"hello from Studio"`.  Any frame that is not a decodable JSON message
/// and contains `hello` (case-insensitively) counts.
pub fn is_legacy_acknowledgement(text: &str) -> bool {
    decode_message(text).is_err() && text.to_ascii_lowercase().contains(LEGACY_HELLO)
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Deserializes a payload, treating a missing / `null` payload as the
/// variant's defaults.
fn decode_payload<T>(message_type: MessageType, payload: Value) -> Result<T, ProtocolError>
where
    T: DeserializeOwned + Default,
{
    match payload {
        Value::Null => Ok(T::default()),
        Value::Object(_) => serde_json::from_value(payload).map_err(|e| {
            ProtocolError::malformed(format!("invalid {message_type} payload: {e}"))
        }),
        other => Err(ProtocolError::malformed(format!(
            "{message_type} payload must be an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
