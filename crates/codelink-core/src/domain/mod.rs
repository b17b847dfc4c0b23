//! Domain types shared by the discovery engine, the connection client, and
//! the UI layer.
//!
//! - **`service`** – [`ServiceRecord`](service::ServiceRecord): a companion
//!   found on the LAN, plus the discovery response it was built from.
//! - **`connection`** – [`ConnectionState`](connection::ConnectionState) and the
//!   session identity received in the handshake.
//! - **`editor`** – [`EditorState`](editor::EditorState): the mirrored snapshot.

pub mod connection;
pub mod editor;
pub mod service;
