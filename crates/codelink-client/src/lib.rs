//! codelink-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does codelink-client do?
//!
//! It finds a companion editor on the local network and keeps a live session
//! with it:
//!
//! 1. Scans the LAN: every candidate address gets one HTTP `GET /discover`,
//!    at most `max_concurrent_probes` at a time.
//! 2. Opens a WebSocket to the chosen companion and performs the handshake
//!    (a JSON `ConnectionRequest`, or the legacy `"hello"` greeting).
//! 3. Keeps the session alive with a `Ping` heartbeat while connected.
//! 4. Mirrors the companion's editor state (`EditorStateSync`) into a snapshot
//!    the UI reads.
//!
//! There is no automatic reconnection: when a session fails, the state says
//! so, and retrying is up to the caller.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: the coordinator facade.
pub mod application;

/// Infrastructure layer: discovery, network session, and config storage.
pub mod infrastructure;

pub use application::ConnectionCoordinator;
