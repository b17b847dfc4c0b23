//! Protocol message type definitions.
//!
//! Every WebSocket text frame carries exactly one [`WireMessage`], wrapped in
//! a JSON envelope:
//!
//! ```json
//! {"type": "EditorStateSync", "payload": {"file_path": "src/main.rs", "cursor_line": 12, ...}}
//! ```
//!
//! The `type` string selects the variant.  `payload` is an object whose shape
//! depends on the variant; `Ping` and `Pong` have none.
//!
//! # Lenient payloads
//!
//! Every payload struct derives `Default` and is annotated with
//! `#[serde(default)]`.  A sender that omits `payload` entirely, or omits some
//! fields inside it, still produces a valid message whose missing parts are
//! zero values (`""`, `0`, `None`, an empty map).  Older companion builds rely
//! on this.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::value::DynamicValue;

/// The literal greeting used by the legacy plain-text handshake.
pub const LEGACY_HELLO: &str = "hello";

// ── Message type discriminant ─────────────────────────────────────────────────

/// The `type` discriminant of a [`WireMessage`], as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ConnectionRequest,
    ConnectionAccepted,
    ConnectionRejected,
    EditorStateSync,
    Ping,
    Pong,
    Echo,
}

impl MessageType {
    /// All known message types, in declaration order.
    pub const ALL: [MessageType; 7] = [
        MessageType::ConnectionRequest,
        MessageType::ConnectionAccepted,
        MessageType::ConnectionRejected,
        MessageType::EditorStateSync,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Echo,
    ];

    /// The wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::ConnectionRequest => "ConnectionRequest",
            MessageType::ConnectionAccepted => "ConnectionAccepted",
            MessageType::ConnectionRejected => "ConnectionRejected",
            MessageType::EditorStateSync => "EditorStateSync",
            MessageType::Ping => "Ping",
            MessageType::Pong => "Pong",
            MessageType::Echo => "Echo",
        }
    }

    /// Returns `true` if the variant carries a payload object.
    pub fn has_payload(self) -> bool {
        !matches!(self, MessageType::Ping | MessageType::Pong)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ── Payload types ─────────────────────────────────────────────────────────────

/// Client → companion: asks to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionRequest {
    /// Human-readable name of this device, shown in the companion's UI.
    pub device_name: String,
}

/// Identity of the companion process, sent in [`ConnectionAccepted`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub platform: String,
}

/// Companion → client: the session is open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionAccepted {
    /// Opaque identifier the companion assigned to this session.
    pub connection_id: String,
    pub server_info: ServerInfo,
}

/// Companion → client: the session was refused.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionRejected {
    pub reason: String,
}

/// Companion → client: the editor's current file and cursor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorStateSync {
    /// Path of the file open in the editor, if any.
    pub file_path: Option<String>,
    /// Zero-based cursor line.
    pub cursor_line: u32,
    /// Zero-based cursor column.
    pub cursor_column: u32,
    /// A short excerpt of the content around the cursor.
    pub content_preview: String,
}

/// Either direction: returns `original` unchanged, stamped with a timestamp.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Echo {
    /// Arbitrary JSON object supplied by the sender.
    pub original: BTreeMap<String, DynamicValue>,
    /// Milliseconds since the Unix epoch at which the echo was produced.
    pub timestamp: u64,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All protocol messages exchanged over the companion WebSocket.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    ConnectionRequest(ConnectionRequest),
    ConnectionAccepted(ConnectionAccepted),
    ConnectionRejected(ConnectionRejected),
    EditorStateSync(EditorStateSync),
    /// Liveness probe; answered with [`WireMessage::Pong`].
    Ping,
    Pong,
    Echo(Echo),
}

impl WireMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::ConnectionRequest(_) => MessageType::ConnectionRequest,
            WireMessage::ConnectionAccepted(_) => MessageType::ConnectionAccepted,
            WireMessage::ConnectionRejected(_) => MessageType::ConnectionRejected,
            WireMessage::EditorStateSync(_) => MessageType::EditorStateSync,
            WireMessage::Ping => MessageType::Ping,
            WireMessage::Pong => MessageType::Pong,
            WireMessage::Echo(_) => MessageType::Echo,
        }
    }

    /// Builds the `payload` object for this message as a [`DynamicValue`] map.
    ///
    /// Returns `None` for `Ping` and `Pong`, which carry no payload.
    pub fn payload(&self) -> Option<DynamicValue> {
        let payload = match self {
            WireMessage::ConnectionRequest(m) => {
                DynamicValue::map([("device_name", DynamicValue::from(m.device_name.as_str()))])
            }
            WireMessage::ConnectionAccepted(m) => DynamicValue::map([
                ("connection_id", DynamicValue::from(m.connection_id.as_str())),
                (
                    "server_info",
                    DynamicValue::map([
                        ("name", DynamicValue::from(m.server_info.name.as_str())),
                        ("version", DynamicValue::from(m.server_info.version.as_str())),
                        ("platform", DynamicValue::from(m.server_info.platform.as_str())),
                    ]),
                ),
            ]),
            WireMessage::ConnectionRejected(m) => {
                DynamicValue::map([("reason", DynamicValue::from(m.reason.as_str()))])
            }
            WireMessage::EditorStateSync(m) => DynamicValue::map([
                ("file_path", DynamicValue::from(m.file_path.as_deref())),
                ("cursor_line", DynamicValue::from(m.cursor_line)),
                ("cursor_column", DynamicValue::from(m.cursor_column)),
                ("content_preview", DynamicValue::from(m.content_preview.as_str())),
            ]),
            WireMessage::Ping | WireMessage::Pong => return None,
            WireMessage::Echo(m) => DynamicValue::map([
                ("original", DynamicValue::Map(m.original.clone())),
                ("timestamp", DynamicValue::from(m.timestamp)),
            ]),
        };
        Some(payload)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_round_trips_through_string() {
        for t in MessageType::ALL {
            assert_eq!(t.as_str().parse::<MessageType>(), Ok(t));
        }
    }

    #[test]
    fn test_unknown_message_type_string_fails_to_parse() {
        assert!("Handshake".parse::<MessageType>().is_err());
        assert!("ping".parse::<MessageType>().is_err(), "names are case-sensitive");
    }

    #[test]
    fn test_only_ping_and_pong_have_no_payload() {
        let without: Vec<_> = MessageType::ALL
            .into_iter()
            .filter(|t| !t.has_payload())
            .collect();
        assert_eq!(without, vec![MessageType::Ping, MessageType::Pong]);
    }

    #[test]
    fn test_ping_payload_is_none() {
        assert!(WireMessage::Ping.payload().is_none());
        assert!(WireMessage::Pong.payload().is_none());
    }

    #[test]
    fn test_editor_state_payload_uses_null_for_missing_path() {
        // Arrange
        let msg = WireMessage::EditorStateSync(EditorStateSync {
            file_path: None,
            cursor_line: 4,
            cursor_column: 2,
            content_preview: "fn main".to_string(),
        });

        // Act
        let payload = msg.payload().unwrap();

        // Assert
        assert_eq!(payload.get("file_path"), Some(&DynamicValue::Null));
        assert_eq!(payload.get("cursor_line"), Some(&DynamicValue::Int(4)));
    }

    #[test]
    fn test_accepted_payload_nests_server_info_map() {
        let msg = WireMessage::ConnectionAccepted(ConnectionAccepted {
            connection_id: "c-1".to_string(),
            server_info: ServerInfo {
                name: "Studio".to_string(),
                version: "2.1".to_string(),
                platform: "macOS".to_string(),
            },
        });

        let payload = msg.payload().unwrap();
        let info = payload.get("server_info").unwrap();

        assert_eq!(info.get("platform").and_then(DynamicValue::as_str), Some("macOS"));
    }

    #[test]
    fn test_message_type_matches_variant() {
        assert_eq!(WireMessage::Ping.message_type(), MessageType::Ping);
        assert_eq!(
            WireMessage::Echo(Echo::default()).message_type(),
            MessageType::Echo
        );
    }
}
