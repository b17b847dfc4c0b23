//! Infrastructure layer: everything that touches the network or the disk.
//!
//! - **`discovery`** – LAN scan over HTTP with bounded concurrency.
//! - **`network`** – The WebSocket session with a companion.
//! - **`storage`** – TOML configuration file.

pub mod discovery;
pub mod network;
pub mod storage;
