//! Connection state machine states.
//!
//! ```text
//!                 connect()
//! Disconnected ──────────────> Connecting ──ack──> Connected
//!      ^                           │                 │  │
//!      │                     error │           error │  │ mark_reconnecting()
//!      │                           v                 v  v
//!      └──── disconnect() ───── Failed(reason)   Reconnecting
//! ```
//!
//! Any state returns to `Disconnected` on an explicit `disconnect()`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::messages::{ConnectionAccepted, ServerInfo};

/// The state of the single connection owned by a client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport.  Initial and terminal state.
    #[default]
    Disconnected,
    /// Transport opening or handshake in flight.
    Connecting,
    /// Handshake acknowledged; heartbeat running.
    Connected,
    /// An external retry policy is about to reconnect.
    Reconnecting,
    /// The last attempt ended with a transport or handshake error.
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns `true` while a transport is being opened or re-opened.
    pub fn is_pending(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }

    /// The failure description, if the state is `Failed`.
    pub fn failure(&self) -> Option<&str> {
        match self {
            ConnectionState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting => f.write_str("reconnecting"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Session identity received in `ConnectionAccepted`.
///
/// Legacy plain-text handshakes carry no identity, so a connected client may
/// have no `ConnectionInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub server: ServerInfo,
}

impl From<ConnectionAccepted> for ConnectionInfo {
    fn from(accepted: ConnectionAccepted) -> Self {
        Self {
            connection_id: accepted.connection_id,
            server: accepted.server_info,
        }
    }
}
