//! # codelink-core
//!
//! Shared library for codelink containing the JSON wire protocol codec, the
//! dynamic JSON value type, and the domain entities exchanged between the
//! discovery engine, the connection client, and the UI layer.
//!
//! It performs no I/O: no sockets, no HTTP, no timers.
//!
//! # Architecture overview
//!
//! codelink finds a companion editor process on the local network and keeps
//! a live WebSocket session with it, mirroring the remote editor's state
//! (open file, cursor position, a preview of the content).
//!
//! - **`protocol`** – How messages travel over the WebSocket.  Every frame is
//!   a JSON object `{"type": ..., "payload": {...}}` decoded into the closed
//!   [`WireMessage`] enum.  Fields whose shape is not fixed are carried as
//!   [`DynamicValue`].
//!
//! - **`domain`** – Plain data: discovered services, the connection state
//!   machine's states, and the editor-state snapshot.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `codelink_core::WireMessage` instead of the full module path.
pub use domain::connection::{ConnectionInfo, ConnectionState};
pub use domain::editor::EditorState;
pub use domain::service::{DiscoveryInfo, ServiceRecord};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::WireMessage;
pub use protocol::value::DynamicValue;
