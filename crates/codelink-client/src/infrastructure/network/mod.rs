//! Network infrastructure for the companion session.
//!
//! - **`client`** – [`ConnectionClient`]: one WebSocket session at a time,
//!   the connection state machine, and inbound message delivery.
//! - **`heartbeat`** – [`HeartbeatTimer`]: the `Ping` keepalive that runs
//!   while the session is `Connected`.

pub mod client;
pub mod heartbeat;

pub use client::{ClientError, ConnectionClient, InboundMessage, INBOUND_CAPACITY};
pub use heartbeat::HeartbeatTimer;
