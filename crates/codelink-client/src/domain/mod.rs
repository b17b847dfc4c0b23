//! Domain layer for codelink-client.
//!
//! Pure configuration types with no I/O.  The infrastructure layer populates
//! them from a TOML file and the binary overrides them from CLI arguments.

pub mod config;

pub use config::{AppConfig, ConnectionConfig, DiscoveryConfig, HandshakeMode, LoggingConfig};
